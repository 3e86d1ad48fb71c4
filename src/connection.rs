//! Connection provider seam and its `reqwest` implementation.
//!
//! A [`ConnectionProvider`] turns a fully built [`Request`] into a [`Response`]
//! whose body is still on the wire. Implementations must never replay a request
//! on their own after a failure: remote calls are not idempotent, and a silently
//! retried `POST` may execute the remote method twice.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::{
    header::{HeaderMap, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use std::{collections::HashMap, fmt, io, pin::Pin, time::Duration};
use tokio::{io::AsyncRead, sync::Mutex};
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Streaming request body.
pub type Body = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Response body, still attached to its connection.
pub type ResponseBody = Box<dyn AsyncRead + Send + Unpin>;

/// A request ready to be sent.
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    pub connect_timeout: Duration,
    /// Bounds the wait for the response head and for every body chunk.
    pub read_timeout: Option<Duration>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body.is_some())
            .finish()
    }
}

/// Response head plus unread body. Dropping it releases the connection.
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl Response {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    /// True if the server declared `Connection: close`.
    pub fn closes_connection(&self) -> bool {
        self.headers
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }

    /// Tears down the underlying connection without reading the rest of the body.
    pub fn disconnect(self) {
        drop(self.body);
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Opens a request/response channel to a URL, plain or TLS.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Sends the request and returns as soon as the response head is available.
    async fn open(&self, request: Request) -> Result<Response>;
}

/// [`ConnectionProvider`] backed by `reqwest`.
///
/// Keeps one client per distinct connect timeout. Idle pooling is disabled, so
/// a request is never re-sent over a stale pooled connection.
#[derive(Default)]
pub struct HttpConnectionProvider {
    clients: Mutex<HashMap<Duration, Client>>,
}

impl HttpConnectionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, connect_timeout: Duration) -> Result<Client> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        clients.insert(connect_timeout, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ConnectionProvider for HttpConnectionProvider {
    async fn open(&self, request: Request) -> Result<Response> {
        let client = self.client(request.connect_timeout).await?;
        let url = request.url.clone();
        debug!(method = %request.method, url = %url, "Opening HTTP connection");

        let mut builder = client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(reqwest::Body::wrap_stream(body));
        }

        let response = match request.read_timeout {
            Some(read_timeout) => tokio::time::timeout(read_timeout, builder.send())
                .await
                .map_err(|_| Error::Timeout {
                    url: url.to_string(),
                    after: read_timeout,
                })??,
            None => builder.send().await?,
        };

        let status = response.status();
        let headers = response.headers().clone();
        let chunks = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        let body: ResponseBody = match request.read_timeout {
            Some(read_timeout) => Box::new(StreamReader::new(Box::pin(with_read_timeout(
                chunks,
                read_timeout,
            )))),
            None => Box::new(StreamReader::new(Box::pin(chunks))),
        };

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

/// Fails the stream with `TimedOut` when no chunk arrives within `timeout`.
fn with_read_timeout<S>(chunks: S, timeout: Duration) -> impl Stream<Item = io::Result<Bytes>> + Send
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    futures::stream::unfold(Some(Box::pin(chunks)), move |state| async move {
        let mut chunks = state?;
        match tokio::time::timeout(timeout, chunks.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(chunks))),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
                None,
            )),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tokio::io::AsyncReadExt;

    fn response(headers: &[(&'static str, &'static str)]) -> Response {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_static(value));
        }
        Response {
            status: StatusCode::OK,
            headers: map,
            body: Box::new(io::Cursor::new(Vec::new())),
        }
    }

    #[test]
    fn response_head_accessors() {
        let resp = response(&[
            ("content-type", "application/json; charset=UTF-8"),
            ("content-length", "0"),
            ("connection", "Close"),
        ]);
        assert_eq!(resp.content_type(), Some("application/json; charset=UTF-8"));
        assert_eq!(resp.content_length(), Some(0));
        assert!(resp.closes_connection());
        assert!(!response(&[]).closes_connection());
    }

    #[tokio::test]
    async fn read_timeout_fails_stalled_stream() {
        let stalled = futures::stream::pending::<io::Result<Bytes>>();
        let mut reader = StreamReader::new(Box::pin(with_read_timeout(stalled, Duration::from_millis(20))));
        let mut buf = Vec::new();
        let err = reader.read_to_end(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn read_timeout_passes_chunks_through() {
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"he")),
            Ok(Bytes::from_static(b"llo")),
        ]);
        let mut reader = StreamReader::new(Box::pin(with_read_timeout(chunks, Duration::from_secs(1))));
        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "hello");
    }
}
