//! # HTTP-RMI client
//!
//! Client library for HTTP-RMI, a lightweight remote method invocation protocol
//! over HTTP/HTTPS, plus a reader for the companion server-push event stream.
//!
//! - Remote calls: one HTTP request per call against `<class path>/<method>.rmi`
//! - Argument encodings: JSON array, XML document, raw byte stream and `multipart/mixed`
//! - Response decoding into typed values, XML documents or streams
//! - Server failures mapped to typed errors, including caller declared exceptions
//! - Session affinity through server assigned session cookies
//! - Awaited or background execution with completion callbacks
//! - Event stream client with a strict server-sent events parser
//!
//! For usage examples, see `demos/invoke.rs`.

pub mod argument;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod event;
pub mod event_reader;
pub mod event_stream;
pub mod session;
pub mod transaction;
pub mod utils;

pub use argument::{Argument, Document, StreamArgument};
pub use config::{Config, EventStreamConfig};
pub use connection::{ConnectionProvider, HttpConnectionProvider, Request, Response};
pub use decoder::{Json, RemoteReturn, RemoteValue, ResponseStream, ReturnType};
pub use dispatcher::{Invocation, Outcome, RemoteService, RmiClient};
pub use error::{DeclaredException, Error, ProtocolFailure, RemoteFault, Result};
pub use event::{EventMappings, KEEP_ALIVE_EVENT};
pub use event_reader::EventReader;
pub use event_stream::{EventStreamClient, StreamState};
pub use session::SessionStore;
pub use transaction::{RemoteCall, Transaction};
