//! HTTP-RMI transaction engine: one remote call turned into one HTTP request/response pair.

use reqwest::{
    header::{
        HeaderMap, HeaderName, HeaderValue, ACCEPT, CONNECTION, CONTENT_TYPE, COOKIE, PRAGMA, SET_COOKIE, USER_AGENT,
    },
    Method, StatusCode,
};
use serde::Deserialize;
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{debug, error};
use url::Url;

use crate::{
    argument::Argument,
    config::Config,
    connection::{ConnectionProvider, Request, Response},
    decoder::{empty_response, unparsable, RemoteReturn, RemoteValue, ReturnType, ValueDecoding},
    encoder::ArgumentsEncoder,
    error::{BoxError, DeclaredException, Error, ProtocolFailure, RemoteFault, Result},
    session::SessionStore,
    utils::{is_json, method_path, simple_name},
};

const ACCEPT_TYPES: &str = "application/json, text/xml, application/octet-stream";
const NO_CACHE: &str = "no-cache";
const CACHE: &str = "cache";

/// Bytes of an unexpected error body copied to the log.
const ERROR_DUMP_LIMIT: u64 = 100;

/// Builds a declared exception from the remote message.
pub type ExceptionFactory = fn(Option<String>) -> BoxError;

fn declared_exception<E: DeclaredException>(message: Option<String>) -> BoxError {
    Box::new(E::from_remote(message))
}

/// A remote method call: target, arguments, declared return and exception types.
///
/// Consumed by exactly one [`Transaction`].
#[derive(Debug)]
pub struct RemoteCall {
    class_name: String,
    method_name: String,
    method_path: String,
    arguments: Vec<Argument>,
    return_type: ReturnType,
    exceptions: HashMap<String, Option<ExceptionFactory>>,
}

impl RemoteCall {
    /// Fails with [`Error::InvalidArgument`] if either name is empty.
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Result<Self> {
        let class_name = class_name.into();
        let method_name = method_name.into();
        let method_path = method_path(&class_name, &method_name)?;
        Ok(Self {
            class_name,
            method_name,
            method_path,
            arguments: Vec::new(),
            return_type: ReturnType::Void,
            exceptions: HashMap::new(),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Path relative to the implementation URL, e.g. `comp/prj/Class/method.rmi`.
    pub fn method_path(&self) -> &str {
        &self.method_path
    }

    pub fn push_argument(&mut self, argument: impl Into<Argument>) -> &mut Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn set_arguments(&mut self, arguments: Vec<Argument>) -> &mut Self {
        self.arguments = arguments;
        self
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn has_stream_argument(&self) -> bool {
        self.arguments.iter().any(Argument::is_stream)
    }

    pub fn set_return_type(&mut self, return_type: ReturnType) -> &mut Self {
        self.return_type = return_type;
        self
    }

    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    /// Declares exception type `E`, matched against the simple name of the remote cause.
    pub fn declare<E: DeclaredException>(&mut self, simple_name: impl Into<String>) -> &mut Self {
        self.exceptions
            .insert(simple_name.into(), Some(declared_exception::<E> as ExceptionFactory));
        self
    }

    /// Declares an exception by name only; it surfaces as a [`RemoteFault`].
    pub fn declare_named(&mut self, simple_name: impl Into<String>) -> &mut Self {
        self.exceptions.entry(simple_name.into()).or_insert(None);
        self
    }

    pub fn is_declared(&self, simple_name: &str) -> bool {
        self.exceptions.contains_key(simple_name)
    }
}

/// One execution of a [`RemoteCall`] against an implementation URL.
pub struct Transaction {
    provider: Arc<dyn ConnectionProvider>,
    sessions: Arc<SessionStore>,
    implementation_url: Url,
    call: RemoteCall,
    connect_timeout: Duration,
    read_timeout: Duration,
    low_resource: bool,
    user_agent: String,
    headers: Vec<(HeaderName, Option<HeaderValue>)>,
}

impl Transaction {
    /// `implementation_url` is expected to be normalized, see [`crate::utils::implementation_url`].
    pub fn new(
        provider: Arc<dyn ConnectionProvider>,
        sessions: Arc<SessionStore>,
        implementation_url: Url,
        call: RemoteCall,
        config: &Config,
    ) -> Self {
        Self {
            provider,
            sessions,
            implementation_url,
            call,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            low_resource: config.low_resource,
            user_agent: config.user_agent.clone(),
            headers: Vec::new(),
        }
    }

    pub fn call(&self) -> &RemoteCall {
        &self.call
    }

    pub fn call_mut(&mut self) -> &mut RemoteCall {
        &mut self.call
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.connect_timeout = positive(timeout, "Connect timeout")?;
        Ok(())
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.read_timeout = positive(timeout, "Read timeout")?;
        Ok(())
    }

    /// Adds a custom request header, applied after the fixed ones.
    /// `None` removes the header from the request.
    pub fn set_header(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidArgument(format!("Invalid header name |{}|: {}", name, e)))?;
        let value = value.map(header_value).transpose()?;
        self.headers.push((name, value));
        Ok(())
    }

    /// Target URL: implementation URL plus method path.
    pub fn url(&self) -> Result<Url> {
        Ok(self.implementation_url.join(&self.call.method_path)?)
    }

    /// True if an argument is a stream, so the caller has to drive the transaction.
    pub fn is_synchronous(&self) -> bool {
        self.call.has_stream_argument()
    }

    /// Executes the call and converts its result to `R`, which takes precedence
    /// over any previously declared return type.
    pub async fn execute_as<R: RemoteReturn>(mut self) -> Result<R> {
        let return_type = R::return_type();
        self.call.return_type = return_type;
        let url = self.url()?;
        let value = self.execute().await?;
        R::from_remote(value).map_err(|e| unparsable(&url, &return_type, e))
    }

    /// Executes the call and returns the decoded, untyped value.
    pub async fn execute(self) -> Result<RemoteValue> {
        let url = self.url()?;
        let Transaction {
            provider,
            sessions,
            implementation_url: _,
            call,
            connect_timeout,
            read_timeout,
            low_resource,
            user_agent,
            headers: custom_headers,
        } = self;
        let RemoteCall {
            arguments,
            return_type,
            exceptions,
            ..
        } = call;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&user_agent)?);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_TYPES));
        headers.insert(PRAGMA, HeaderValue::from_static(NO_CACHE));
        headers.insert(HeaderName::from_static(CACHE), HeaderValue::from_static(NO_CACHE));
        if low_resource {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        for (name, value) in custom_headers {
            match value {
                Some(value) => {
                    headers.insert(name, value);
                }
                None => {
                    headers.remove(name);
                }
            }
        }
        if let Some(cookie) = sessions.cookie(&url).await {
            headers.insert(COOKIE, header_value(&cookie)?);
        }

        let (method, body) = if arguments.is_empty() {
            (Method::GET, None)
        } else {
            let encoder = ArgumentsEncoder::for_arguments(&arguments);
            if let Some(content_type) = encoder.content_type() {
                headers.insert(CONTENT_TYPE, header_value(&content_type)?);
            }
            (Method::POST, Some(encoder.encode(arguments)?))
        };

        debug!(method = %method, url = %url, "Executing HTTP-RMI transaction");
        let response = provider
            .open(Request {
                method,
                url: url.clone(),
                headers,
                body,
                connect_timeout,
                read_timeout: Some(read_timeout),
            })
            .await?;

        let status = response.status;
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            return Err(on_error(response, &url, &exceptions).await);
        }

        {
            let set_cookies = response
                .headers
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok());
            sessions.remember(&url, set_cookies).await;
        }

        if status == StatusCode::NO_CONTENT || return_type.is_void() {
            response.disconnect();
            return Ok(RemoteValue::Empty);
        }
        if response.content_length() == Some(0) {
            response.disconnect();
            return Err(empty_response(&url, &return_type));
        }

        // chunked or unsized bodies may still turn out empty
        let mut response = response;
        let mut body = BufReader::new(response.body);
        if body.fill_buf().await?.is_empty() {
            return Err(empty_response(&url, &return_type));
        }
        response.body = Box::new(body);

        let closes = response.closes_connection();
        let decoding = ValueDecoding::from_content_type(response.content_type());
        let value = decoding.decode(response, &url, &return_type).await?;
        if closes {
            debug!(url = %url, "Server closed HTTP-RMI connection");
        }
        match value {
            RemoteValue::Unsupported { content_type } => Err(Error::UnsupportedContentType {
                url: url.to_string(),
                content_type,
            }),
            value => Ok(value),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("implementation_url", &self.implementation_url.as_str())
            .field("call", &self.call)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("low_resource", &self.low_resource)
            .finish_non_exhaustive()
    }
}

fn positive(timeout: Duration, what: &str) -> Result<Duration> {
    if timeout.is_zero() {
        return Err(Error::InvalidArgument(format!("{} must be strictly positive", what)));
    }
    Ok(timeout)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::InvalidArgument(format!("Invalid header value |{}|: {}", value, e)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BusinessErrorBody {
    error_code: i32,
}

#[derive(Deserialize)]
struct RemoteErrorEnvelope {
    cause: String,
    message: Option<String>,
}

/// Maps a non-success response to an error. The response is released before returning.
async fn on_error(response: Response, url: &Url, exceptions: &HashMap<String, Option<ExceptionFactory>>) -> Error {
    let status = response.status.as_u16();
    let json = is_json(response.content_type());
    let mut body = response.body;

    let failure = match status {
        401 | 403 | 404 | 503 => ProtocolFailure::from_status(status),
        _ => {
            let mut bytes = Vec::new();
            let envelope = json && (status == 400 || status == 500);
            let read = if envelope {
                body.read_to_end(&mut bytes).await
            } else {
                (&mut body).take(ERROR_DUMP_LIMIT).read_to_end(&mut bytes).await
            };
            if let Err(e) = read {
                debug!(url = %url, error = %e, "Error body not readable");
            }
            if envelope {
                if let Some(err) = remote_error(status, &bytes, url, exceptions) {
                    return err;
                }
            }
            bytes.truncate(ERROR_DUMP_LIMIT as usize);
            error!(
                url = %url,
                status,
                body = %String::from_utf8_lossy(&bytes),
                "Unexpected HTTP-RMI response"
            );
            ProtocolFailure::UnexpectedStatus(status)
        }
    };
    drop(body);
    Error::protocol(url, failure)
}

/// JSON error bodies of `400` and `500` responses. `None` falls through to the generic mapping.
fn remote_error(
    status: u16,
    bytes: &[u8],
    url: &Url,
    exceptions: &HashMap<String, Option<ExceptionFactory>>,
) -> Option<Error> {
    match status {
        400 => serde_json::from_slice::<BusinessErrorBody>(bytes)
            .ok()
            .map(|body| Error::Business { code: body.error_code }),
        500 => {
            let envelope: RemoteErrorEnvelope = serde_json::from_slice(bytes).ok()?;
            error!(
                url = %url,
                cause = %envelope.cause,
                message = envelope.message.as_deref().unwrap_or(""),
                "HTTP-RMI server execution error"
            );
            let type_name = simple_name(&envelope.cause).to_string();
            let err = match exceptions.get(&type_name) {
                Some(Some(factory)) => Error::Declared {
                    type_name,
                    source: factory(envelope.message),
                },
                Some(None) => Error::Declared {
                    type_name,
                    source: Box::new(RemoteFault {
                        cause: envelope.cause,
                        message: envelope.message,
                    }),
                },
                None => Error::RemoteExecution {
                    url: url.to_string(),
                    cause: envelope.cause,
                    message: envelope.message,
                },
            };
            Some(err)
        }
        _ => None,
    }
}
