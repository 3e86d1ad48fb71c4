use serde::{ser::Serializer, Serialize};
use std::{error::Error as StdError, fmt, time::Duration};
use thiserror::Error;

/// A specialized `Result` type for the HTTP-RMI client crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error used where a caller-supplied type produces the failure.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The error type for the HTTP-RMI client crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Operation on |{url}| timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// HTTP-RMI level failure not mapped to a caller declared type.
    #[error("HTTP-RMI error on |{url}|: {failure}")]
    Protocol { url: String, failure: ProtocolFailure },

    /// Server side business rule violation; displayed as `0x` plus 8 upper-case hex digits.
    #[error("0x{code:08X}")]
    Business { code: i32 },

    /// Remote exception whose cause is not among the declared exception types.
    #[error("HTTP-RMI server execution error on |{url}|: {cause}: {}", .message.as_deref().unwrap_or(""))]
    RemoteExecution {
        url: String,
        cause: String,
        message: Option<String>,
    },

    /// Remote exception matching a declared exception type.
    #[error("{source}")]
    Declared { type_name: String, source: BoxError },

    #[error("Event stream protocol violation: {0}")]
    StreamProtocol(String),

    /// Local failure against an unexpected body; an implementation bug, never retried.
    #[error("Bug: {0}")]
    Bug(String),

    #[error("Unsupported content type |{}| for HTTP-RMI response from |{url}|", .content_type.as_deref().unwrap_or("none"))]
    UnsupportedContentType {
        url: String,
        content_type: Option<String>,
    },
}

impl Error {
    pub(crate) fn protocol(url: impl fmt::Display, failure: ProtocolFailure) -> Self {
        Error::Protocol {
            url: url.to_string(),
            failure,
        }
    }

    pub(crate) fn stream_protocol(message: impl Into<String>) -> Self {
        Error::StreamProtocol(message.into())
    }

    /// True for transport level failures: timeouts, refused connections, broken streams.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Request(_) | Error::Timeout { .. })
    }

    /// Returns the declared exception carried by this error, if it has type `E`.
    pub fn declared<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Error::Declared { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Status code mapped failures of an HTTP-RMI transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolFailure {
    /// 401
    Unauthorized,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 503
    BackendDown,
    /// Any status without a dedicated mapping.
    UnexpectedStatus(u16),
}

impl ProtocolFailure {
    /// Failure for a non-success status without a response body mapping.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ProtocolFailure::Unauthorized,
            403 => ProtocolFailure::Forbidden,
            404 => ProtocolFailure::NotFound,
            503 => ProtocolFailure::BackendDown,
            other => ProtocolFailure::UnexpectedStatus(other),
        }
    }
}

impl fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolFailure::Unauthorized => {
                write!(f, "attempt to access private method without authorization")
            }
            ProtocolFailure::Forbidden => write!(f, "server refuses to process request"),
            ProtocolFailure::NotFound => write!(f, "method not found"),
            ProtocolFailure::BackendDown => write!(f, "front-end up, back-end down"),
            ProtocolFailure::UnexpectedStatus(code) => write!(f, "server returned {}", code),
        }
    }
}

/// An error type a remote method may declare, re-created locally when the server reports it.
pub trait DeclaredException: StdError + Send + Sync + Sized + 'static {
    /// Builds the error from the remote message, or its no-argument form when there is none.
    fn from_remote(message: Option<String>) -> Self;
}

/// Declared remote exception registered by name only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFault {
    /// Fully qualified remote type name.
    pub cause: String,
    pub message: Option<String>,
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.cause, message),
            None => write!(f, "{}", self.cause),
        }
    }
}

impl StdError for RemoteFault {}
