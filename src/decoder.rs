//! Value decoders: turn a successful response body into a value of the declared return type.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::error;
use url::Url;

use crate::{
    argument::Document,
    connection::{Response, ResponseBody},
    error::{BoxError, Error, Result},
    utils::media_type,
};

/// Response decoding, chosen from the response content type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueDecoding {
    Json,
    Xml,
    Stream,
    Unsupported,
}

impl ValueDecoding {
    /// Parameters are ignored and the media type is compared case-insensitively.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type.map(media_type).as_deref() {
            Some("application/json") => ValueDecoding::Json,
            Some("application/octet-stream") => ValueDecoding::Stream,
            Some("text/xml") => ValueDecoding::Xml,
            _ => ValueDecoding::Unsupported,
        }
    }

    /// Decodes the response body. `Stream` hands the body over unread.
    pub async fn decode(self, response: Response, url: &Url, expected: &ReturnType) -> Result<RemoteValue> {
        let content_type = response.content_type().map(str::to_string);
        let mut body = response.body;
        match self {
            ValueDecoding::Json => {
                let bytes = read_body(&mut body, url, expected).await?;
                serde_json::from_slice(&bytes)
                    .map(RemoteValue::Json)
                    .map_err(|e| unparsable(url, expected, e))
            }
            ValueDecoding::Xml => {
                let bytes = read_body(&mut body, url, expected).await?;
                let source = String::from_utf8(bytes).map_err(|e| unparsable(url, expected, e))?;
                Document::parse(source)
                    .map(RemoteValue::Document)
                    .map_err(|e| unparsable(url, expected, e))
            }
            ValueDecoding::Stream => Ok(RemoteValue::Stream(ResponseStream::new(body))),
            ValueDecoding::Unsupported => {
                error!(
                    url = %url,
                    content_type = content_type.as_deref().unwrap_or("none"),
                    "Unsupported content type for HTTP-RMI response"
                );
                let mut dump = Vec::new();
                body.read_to_end(&mut dump).await?;
                error!(url = %url, body = %String::from_utf8_lossy(&dump), "Unsupported HTTP-RMI response body");
                Ok(RemoteValue::Unsupported { content_type })
            }
        }
    }
}

async fn read_body(body: &mut ResponseBody, url: &Url, expected: &ReturnType) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    body.read_to_end(&mut bytes).await?;
    if bytes.is_empty() {
        return Err(empty_response(url, expected));
    }
    Ok(bytes)
}

pub(crate) fn empty_response(url: &Url, expected: &ReturnType) -> Error {
    Error::Bug(format!(
        "Invalid HTTP-RMI transaction with |{}|. Expect return value of type |{}| but got empty response.",
        url, expected
    ))
}

pub(crate) fn unparsable(url: &Url, expected: &ReturnType, cause: impl fmt::Display) -> Error {
    Error::Bug(format!(
        "Invalid HTTP-RMI transaction with |{}|. Response cannot be parsed to type |{}|. Cause: {}",
        url, expected, cause
    ))
}

/// Declared return type of a remote method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnType {
    /// No value; a `204` or any body is accepted and ignored.
    Void,
    /// JSON value, named by its Rust type for diagnostics.
    Value(&'static str),
    Document,
    Stream,
}

impl ReturnType {
    pub fn is_void(&self) -> bool {
        matches!(self, ReturnType::Void)
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnType::Void => write!(f, "void"),
            ReturnType::Value(name) => write!(f, "{}", name),
            ReturnType::Document => write!(f, "Document"),
            ReturnType::Stream => write!(f, "ResponseStream"),
        }
    }
}

/// Decoded, still untyped, remote method result.
#[derive(Debug)]
pub enum RemoteValue {
    Empty,
    Json(Value),
    Document(Document),
    Stream(ResponseStream),
    /// Body of an unanticipated content type, already drained to the log.
    Unsupported { content_type: Option<String> },
}

impl RemoteValue {
    fn kind(&self) -> &'static str {
        match self {
            RemoteValue::Empty => "empty response",
            RemoteValue::Json(_) => "JSON value",
            RemoteValue::Document(_) => "XML document",
            RemoteValue::Stream(_) => "byte stream",
            RemoteValue::Unsupported { .. } => "unsupported content",
        }
    }

    fn mismatch(self, expected: ReturnType) -> BoxError {
        format!("expected {} but server sent {}", expected, self.kind()).into()
    }
}

/// Response body handed to the caller as a byte stream. The caller owns the
/// underlying connection until this value is dropped.
pub struct ResponseStream {
    body: ResponseBody,
}

impl ResponseStream {
    pub fn new(body: ResponseBody) -> Self {
        Self { body }
    }

    pub fn into_inner(self) -> ResponseBody {
        self.body
    }
}

impl AsyncRead for ResponseStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().body).poll_read(cx, buf)
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

/// Rust types a remote method result can be decoded into.
///
/// The implementing type is the expected decode target of an invocation.
pub trait RemoteReturn: Sized + Send + 'static {
    fn return_type() -> ReturnType;

    fn from_remote(value: RemoteValue) -> std::result::Result<Self, BoxError>;
}

impl RemoteReturn for () {
    fn return_type() -> ReturnType {
        ReturnType::Void
    }

    fn from_remote(_: RemoteValue) -> std::result::Result<Self, BoxError> {
        Ok(())
    }
}

impl RemoteReturn for Document {
    fn return_type() -> ReturnType {
        ReturnType::Document
    }

    fn from_remote(value: RemoteValue) -> std::result::Result<Self, BoxError> {
        match value {
            RemoteValue::Document(document) => Ok(document),
            other => Err(other.mismatch(Self::return_type())),
        }
    }
}

impl RemoteReturn for ResponseStream {
    fn return_type() -> ReturnType {
        ReturnType::Stream
    }

    fn from_remote(value: RemoteValue) -> std::result::Result<Self, BoxError> {
        match value {
            RemoteValue::Stream(stream) => Ok(stream),
            other => Err(other.mismatch(Self::return_type())),
        }
    }
}

/// Optional value: `None` for an empty response or a JSON `null`.
impl<T: RemoteReturn> RemoteReturn for Option<T> {
    fn return_type() -> ReturnType {
        T::return_type()
    }

    fn from_remote(value: RemoteValue) -> std::result::Result<Self, BoxError> {
        match value {
            RemoteValue::Empty | RemoteValue::Json(Value::Null) => Ok(None),
            value => T::from_remote(value).map(Some),
        }
    }
}

/// JSON decoded return value of any deserializable type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned + Send + 'static> RemoteReturn for Json<T> {
    fn return_type() -> ReturnType {
        ReturnType::Value(std::any::type_name::<T>())
    }

    fn from_remote(value: RemoteValue) -> std::result::Result<Self, BoxError> {
        match value {
            RemoteValue::Json(json) => Ok(Json(serde_json::from_value(json)?)),
            other => Err(other.mismatch(Self::return_type())),
        }
    }
}

macro_rules! json_return {
    ($($ty:ty),*) => {
        $(
            impl RemoteReturn for $ty {
                fn return_type() -> ReturnType {
                    ReturnType::Value(stringify!($ty))
                }

                fn from_remote(value: RemoteValue) -> std::result::Result<Self, BoxError> {
                    Json::<$ty>::from_remote(value).map(Json::into_inner)
                }
            }
        )*
    };
}

json_return!(Value, bool, i32, i64, u32, u64, f64, String);
