//! Argument encoders: pick a wire encoding for an argument list and produce the request body.

use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::io;
use tokio_util::io::ReaderStream;

use crate::{
    argument::Argument,
    connection::Body,
    error::{Error, Result},
    utils,
};

const JSON: &str = "application/json";
const XML: &str = "text/xml; charset=UTF-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Request body encoding, chosen once per call from the argument list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgumentEncoding {
    /// JSON array with one element per argument.
    Json,
    /// Single XML document.
    Xml,
    /// Single raw byte stream.
    Stream,
    /// One `multipart/mixed` part per argument.
    MultipartMixed,
}

impl ArgumentEncoding {
    /// Selection rules:
    /// - a single document argument is sent as `Xml`,
    /// - a single stream argument is sent as `Stream`,
    /// - any other list holding documents or streams is `MultipartMixed`,
    /// - everything else is `Json`.
    pub fn select(arguments: &[Argument]) -> Self {
        let documents = arguments.iter().filter(|a| a.is_document()).count();
        let streams = arguments.iter().filter(|a| a.is_stream()).count();

        if arguments.len() == 1 {
            if documents != 0 {
                return ArgumentEncoding::Xml;
            }
            if streams != 0 {
                return ArgumentEncoding::Stream;
            }
        }
        if documents != 0 || streams != 0 {
            return ArgumentEncoding::MultipartMixed;
        }
        ArgumentEncoding::Json
    }
}

/// Encoder bound to one call: the selected encoding plus its multipart boundary, if any.
#[derive(Clone, Debug)]
pub struct ArgumentsEncoder {
    encoding: ArgumentEncoding,
    boundary: Option<String>,
}

impl ArgumentsEncoder {
    pub fn for_arguments(arguments: &[Argument]) -> Self {
        let encoding = ArgumentEncoding::select(arguments);
        let boundary = match encoding {
            ArgumentEncoding::MultipartMixed => Some(utils::boundary()),
            _ => None,
        };
        Self { encoding, boundary }
    }

    pub fn encoding(&self) -> ArgumentEncoding {
        self.encoding
    }

    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// `Content-Type` request header value.
    pub fn content_type(&self) -> Option<String> {
        match self.encoding {
            ArgumentEncoding::Json => Some(JSON.to_string()),
            ArgumentEncoding::Xml => Some(XML.to_string()),
            ArgumentEncoding::Stream => Some(OCTET_STREAM.to_string()),
            ArgumentEncoding::MultipartMixed => self
                .boundary
                .as_ref()
                .map(|boundary| format!("multipart/mixed; boundary=\"{}\"", boundary)),
        }
    }

    /// Builds the request body. Streams are not buffered; they are read while the body is sent.
    pub fn encode(&self, arguments: Vec<Argument>) -> Result<Body> {
        match self.encoding {
            ArgumentEncoding::Json => {
                let values = arguments
                    .into_iter()
                    .map(|argument| match argument {
                        Argument::Value(value) => Ok(value),
                        other => Err(Error::Bug(format!(
                            "JSON encoding selected for non-value argument {:?}",
                            other
                        ))),
                    })
                    .collect::<Result<Vec<Value>>>()?;
                Ok(chunk(serde_json::to_vec(&values)?))
            }
            ArgumentEncoding::Xml | ArgumentEncoding::Stream => match arguments.into_iter().next() {
                Some(argument) => part_body(argument),
                None => Err(Error::Bug("Missing argument for single part encoding".into())),
            },
            ArgumentEncoding::MultipartMixed => {
                let boundary = self
                    .boundary
                    .as_deref()
                    .ok_or_else(|| Error::Bug("Multipart encoding without boundary".into()))?;
                self.multipart(boundary, arguments)
            }
        }
    }

    fn multipart(&self, boundary: &str, arguments: Vec<Argument>) -> Result<Body> {
        let mut parts: Vec<Body> = Vec::with_capacity(arguments.len() * 2 + 1);
        for (index, argument) in arguments.into_iter().enumerate() {
            let content_type = match &argument {
                Argument::Value(_) => JSON,
                Argument::Document(_) => XML,
                Argument::Stream(_) => OCTET_STREAM,
            };
            // name carries the argument index
            parts.push(chunk(format!(
                "\r\n--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                boundary, index, content_type
            )));
            parts.push(part_body(argument)?);
        }
        parts.push(chunk(format!("\r\n--{}--", boundary)));
        Ok(Box::pin(stream::iter(parts).flatten()))
    }
}

fn part_body(argument: Argument) -> Result<Body> {
    match argument {
        Argument::Value(value) => Ok(chunk(serde_json::to_vec(&value)?)),
        Argument::Document(document) => Ok(chunk(document.into_bytes())),
        Argument::Stream(stream) => Ok(Box::pin(ReaderStream::new(stream.into_reader()))),
    }
}

fn chunk(bytes: impl Into<Bytes>) -> Body {
    Box::pin(stream::iter([Ok::<_, io::Error>(bytes.into())]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::{Document, StreamArgument};
    use futures::TryStreamExt;
    use serde_json::json;

    async fn collect(body: Body) -> String {
        let bytes = body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap();
        String::from_utf8(bytes).unwrap()
    }

    fn document() -> Document {
        Document::parse("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n<root></root>").unwrap()
    }

    fn select(arguments: Vec<Argument>) -> ArgumentEncoding {
        ArgumentEncoding::select(&arguments)
    }

    #[test]
    fn selection_rules() {
        use ArgumentEncoding::*;

        assert_eq!(select(vec![]), Json);
        assert_eq!(select(vec![json!(1).into(), json!(null).into()]), Json);
        assert_eq!(select(vec![document().into()]), Xml);
        assert_eq!(select(vec![StreamArgument::from_bytes("s").into()]), Stream);
        assert_eq!(select(vec![document().into(), document().into()]), MultipartMixed);
        assert_eq!(
            select(vec![json!(1).into(), StreamArgument::from_bytes("s").into()]),
            MultipartMixed
        );
        assert_eq!(
            select(vec![
                StreamArgument::from_bytes("a").into(),
                StreamArgument::from_bytes("b").into()
            ]),
            MultipartMixed
        );
    }

    #[tokio::test]
    async fn json_array_body() {
        let arguments: Vec<Argument> = vec![json!(1).into(), json!(2).into()];
        let encoder = ArgumentsEncoder::for_arguments(&arguments);
        assert_eq!(encoder.content_type().as_deref(), Some("application/json"));
        assert_eq!(collect(encoder.encode(arguments).unwrap()).await, "[1,2]");
    }

    #[tokio::test]
    async fn xml_body() {
        let arguments: Vec<Argument> = vec![document().into()];
        let encoder = ArgumentsEncoder::for_arguments(&arguments);
        assert_eq!(encoder.content_type().as_deref(), Some("text/xml; charset=UTF-8"));
        assert_eq!(
            collect(encoder.encode(arguments).unwrap()).await,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n<root></root>"
        );
    }

    #[tokio::test]
    async fn stream_body() {
        let arguments: Vec<Argument> = vec![StreamArgument::from_bytes("stream").into()];
        let encoder = ArgumentsEncoder::for_arguments(&arguments);
        assert_eq!(encoder.content_type().as_deref(), Some("application/octet-stream"));
        assert_eq!(collect(encoder.encode(arguments).unwrap()).await, "stream");
    }

    #[tokio::test]
    async fn multipart_single_value_part() {
        let encoder = ArgumentsEncoder {
            encoding: ArgumentEncoding::MultipartMixed,
            boundary: Some("B".into()),
        };
        assert_eq!(
            encoder.content_type().as_deref(),
            Some("multipart/mixed; boundary=\"B\"")
        );
        let body = encoder.encode(vec![json!(1).into()]).unwrap();
        assert_eq!(
            collect(body).await,
            "\r\n--B\r\nContent-Disposition: form-data; name=\"0\"\r\nContent-Type: application/json\r\n\r\n1\r\n--B--"
        );
    }

    #[tokio::test]
    async fn multipart_mixed_parts_in_order() {
        let arguments: Vec<Argument> = vec![
            json!(1).into(),
            document().into(),
            StreamArgument::from_bytes("stream").into(),
        ];
        let encoder = ArgumentsEncoder::for_arguments(&arguments);
        assert_eq!(encoder.encoding(), ArgumentEncoding::MultipartMixed);
        let boundary = encoder.boundary().unwrap().to_string();

        let expected = format!(
            "\r\n--{b}\r\nContent-Disposition: form-data; name=\"0\"\r\nContent-Type: application/json\r\n\r\n1\
             \r\n--{b}\r\nContent-Disposition: form-data; name=\"1\"\r\nContent-Type: text/xml; charset=UTF-8\r\n\r\n\
             <?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n<root></root>\
             \r\n--{b}\r\nContent-Disposition: form-data; name=\"2\"\r\nContent-Type: application/octet-stream\r\n\r\nstream\
             \r\n--{b}--",
            b = boundary
        );
        assert_eq!(collect(encoder.encode(arguments).unwrap()).await, expected);
    }
}
