//! Server-sent events reader: a byte level automaton over a strict subset of the
//! W3C event stream grammar.
//!
//! ```text
//! event:<name>\r\n
//! data:<payload>\r\n
//! \r\n
//! ```
//!
//! Field names are lower case `event`, `data`, `id` and `retry`. `id` and `retry`
//! are accepted but ignored. `data:\r\n\r\n` is a keep-alive marker.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::{
    error::{Error, Result},
    event::{Decoded, EventMappings},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    NewEvent,
    NewField,
    WaitColon,
    EventName,
    DataValue,
    IdOrRetry,
    FieldCR,
    FieldLF,
    EventCR,
    EventLF,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    None,
    Event,
    Data,
    Id,
    Retry,
}

/// Reads events one at a time from a buffered byte stream.
#[derive(Debug)]
pub struct EventReader<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin> EventReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Reads until the next event mapped in `mappings`.
    ///
    /// Keep-alive markers, blank lines and unmapped events are skipped. Returns
    /// `Ok(None)` on end of stream, even in the middle of an event. Malformed input
    /// is an [`Error::StreamProtocol`]; the reader does not try to resynchronize.
    pub async fn read<E>(&mut self, mappings: &EventMappings<E>) -> Result<Option<E>> {
        let mut state = State::NewEvent;
        let mut field = Field::None;
        let mut name: Vec<u8> = Vec::new();
        let mut payload: Option<Vec<u8>> = None;

        loop {
            match state {
                State::NewEvent => {
                    name.clear();
                    payload = None;
                    field = Field::None;
                    state = State::NewField;
                    continue;
                }
                State::DataValue => {
                    let Some(value) = self.read_value().await? else {
                        return Ok(None);
                    };
                    payload = Some(value);
                    state = State::FieldCR;
                    continue;
                }
                _ => {}
            }

            let Some(c) = self.next_byte().await? else {
                return Ok(None);
            };

            state = match state {
                // a carriage return here is the blank line ending the event
                State::NewField if c == b'\r' => State::EventLF,
                State::NewField => {
                    field = match c {
                        b'e' => Field::Event,
                        b'd' => Field::Data,
                        b'i' => Field::Id,
                        b'r' => Field::Retry,
                        other => return Err(unexpected("field name", other)),
                    };
                    State::WaitColon
                }
                State::WaitColon if c != b':' => State::WaitColon,
                State::WaitColon => match field {
                    Field::Event => State::EventName,
                    Field::Data => State::DataValue,
                    Field::Id | Field::Retry => State::IdOrRetry,
                    Field::None => return Err(Error::stream_protocol("colon without field")),
                },
                State::EventName if c != b'\r' => {
                    name.push(c);
                    State::EventName
                }
                State::EventName => {
                    if name.is_empty() {
                        return Err(Error::stream_protocol("empty event name"));
                    }
                    State::FieldLF
                }
                State::IdOrRetry if c != b'\r' => State::IdOrRetry,
                State::IdOrRetry => State::FieldLF,
                State::FieldCR => expect(c, b'\r', State::FieldLF)?,
                State::FieldLF if field == Field::Data => expect(c, b'\n', State::EventCR)?,
                State::FieldLF => expect(c, b'\n', State::NewField)?,
                State::EventCR => expect(c, b'\r', State::EventLF)?,
                State::EventLF => {
                    expect(c, b'\n', State::NewEvent)?;
                    if let Some(event) = dispatch(&name, payload.take(), mappings)? {
                        return Ok(Some(event));
                    }
                    State::NewEvent
                }
                State::NewEvent | State::DataValue => unreachable!("handled before reading"),
            };
        }
    }

    async fn next_byte(&mut self) -> Result<Option<u8>> {
        let buf = self.reader.fill_buf().await?;
        let Some(&c) = buf.first() else {
            return Ok(None);
        };
        self.reader.consume(1);
        Ok(Some(c))
    }

    /// Rest of the current line, line terminator left unread. `None` on end of stream.
    async fn read_value(&mut self) -> Result<Option<Vec<u8>>> {
        let mut value = Vec::new();
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(None);
            }
            match buf.iter().position(|c| *c == b'\r' || *c == b'\n') {
                Some(end) => {
                    value.extend_from_slice(&buf[..end]);
                    self.reader.consume(end);
                    return Ok(Some(value));
                }
                None => {
                    let len = buf.len();
                    value.extend_from_slice(buf);
                    self.reader.consume(len);
                }
            }
        }
    }
}

fn dispatch<E>(name: &[u8], payload: Option<Vec<u8>>, mappings: &EventMappings<E>) -> Result<Option<E>> {
    let Some(payload) = payload else {
        return Ok(None);
    };
    if payload.is_empty() {
        debug!("Keep-alive received");
        return Ok(None);
    }
    let name = std::str::from_utf8(name).map_err(|_| Error::stream_protocol("event name is not UTF-8"))?;
    let payload =
        std::str::from_utf8(&payload).map_err(|_| Error::stream_protocol("event data is not UTF-8"))?;
    match mappings.decode(name, payload)? {
        Decoded::Event(event) => Ok(Some(event)),
        Decoded::KeepAlive => {
            debug!(event = name, "Keep-alive event received");
            Ok(None)
        }
        Decoded::Unmapped => {
            debug!(event = name, "Discarding unmapped event");
            Ok(None)
        }
    }
}

fn expect(c: u8, expected: u8, next: State) -> Result<State> {
    if c != expected {
        return Err(unexpected(
            if expected == b'\r' { "carriage return" } else { "line feed" },
            c,
        ));
    }
    Ok(next)
}

fn unexpected(what: &str, c: u8) -> Error {
    Error::stream_protocol(format!("expected {} but got {:?}", what, c as char))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mappings() -> EventMappings<String> {
        let mut mappings = EventMappings::new();
        mappings.register_with("Foo", |payload| Ok(payload.to_string()));
        mappings
    }

    async fn read_all(input: &str) -> Result<Vec<String>> {
        let mut reader = EventReader::new(input.as_bytes());
        let mappings = mappings();
        let mut events = Vec::new();
        while let Some(event) = reader.read(&mappings).await? {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn single_event() {
        assert_eq!(read_all("event:Foo\r\ndata:{}\r\n\r\n").await.unwrap(), vec!["{}"]);
    }

    #[tokio::test]
    async fn id_and_retry_are_ignored() {
        let events = read_all("id:7\r\nretry:100\r\nevent:Foo\r\ndata:{\"a\":1}\r\n\r\n").await.unwrap();
        assert_eq!(events, vec!["{\"a\":1}"]);
    }

    #[tokio::test]
    async fn blank_lines_and_keep_alive_are_skipped() {
        let input = "\r\ndata:\r\n\r\nevent:KeepAliveEvent\r\ndata:{}\r\n\r\nevent:Foo\r\ndata:x\r\n\r\n";
        assert_eq!(read_all(input).await.unwrap(), vec!["x"]);
    }

    #[tokio::test]
    async fn unmapped_event_is_discarded() {
        assert!(read_all("event:Bar\r\ndata:{}\r\n\r\n").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_event_name_is_a_violation() {
        let err = read_all("event:\r\ndata:{}\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, Error::StreamProtocol(_)));
    }

    #[tokio::test]
    async fn upper_case_field_is_a_violation() {
        let err = read_all("EVENT:Foo\r\ndata:{}\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, Error::StreamProtocol(_)));
    }

    #[tokio::test]
    async fn bare_line_feed_is_a_violation() {
        let err = read_all("event:Foo\r\ndata:{}\n\n").await.unwrap_err();
        assert!(matches!(err, Error::StreamProtocol(_)));
    }

    #[tokio::test]
    async fn truncated_event_is_end_of_stream() {
        assert!(read_all("event:Foo\r\ndata:").await.unwrap().is_empty());
        assert!(read_all("event:Foo\r\ndata:{}\r\n").await.unwrap().is_empty());
    }
}
