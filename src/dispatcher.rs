//! Call dispatcher: the client facing entry point that turns a method call into a
//! [`Transaction`] and decides whether the caller awaits it or it runs in the background.

use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::error;
use url::Url;

use crate::{
    argument::Argument,
    config::Config,
    connection::{ConnectionProvider, HttpConnectionProvider},
    decoder::RemoteReturn,
    error::{DeclaredException, Error, Result},
    session::SessionStore,
    transaction::{RemoteCall, Transaction},
    utils::{implementation_url, remote_class_name},
};

/// Receives failures of calls executed in the background.
pub type FailureHandler = Arc<dyn Fn(Error) + Send + Sync>;

/// Receives the value of a completed call.
pub type Completion<R> = Box<dyn FnOnce(R) + Send>;

/// HTTP-RMI client bound to one implementation URL.
///
/// Cloning is cheap; clones share the connection provider and the session store.
#[derive(Clone)]
pub struct RmiClient {
    implementation_url: Url,
    provider: Arc<dyn ConnectionProvider>,
    sessions: Arc<SessionStore>,
    config: Config,
    on_failure: Option<FailureHandler>,
}

impl RmiClient {
    /// Creates a client with the `reqwest` provider and [`Config::from_env`].
    pub fn new<U: AsRef<str>>(url: U) -> Result<Self> {
        Self::with_config(url, Config::from_env())
    }

    pub fn with_config<U: AsRef<str>>(url: U, config: Config) -> Result<Self> {
        Self::with_provider(url, Arc::new(HttpConnectionProvider::new()), config)
    }

    pub fn with_provider<U: AsRef<str>>(url: U, provider: Arc<dyn ConnectionProvider>, config: Config) -> Result<Self> {
        Ok(Self {
            implementation_url: implementation_url(url.as_ref())?,
            provider,
            sessions: Arc::new(SessionStore::new()),
            config,
            on_failure: None,
        })
    }

    /// Shares a session store with other clients.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Registers the handler for failures of background calls.
    pub fn on_failure(mut self, handler: impl Fn(Error) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    pub fn implementation_url(&self) -> &Url {
        &self.implementation_url
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stub for one remote class. Classes declared in a `.client` package address their parent package.
    pub fn service(&self, class_name: &str) -> RemoteService {
        RemoteService {
            client: self.clone(),
            class_name: remote_class_name(class_name),
            headers: Vec::new(),
            connect_timeout: None,
            read_timeout: None,
        }
    }

    /// Prepares a call of `class_name.method_name`.
    pub fn call(&self, class_name: &str, method_name: &str) -> Result<Invocation> {
        let call = RemoteCall::new(class_name, method_name)?;
        Ok(Invocation {
            transaction: Transaction::new(
                self.provider.clone(),
                self.sessions.clone(),
                self.implementation_url.clone(),
                call,
                &self.config,
            ),
            on_failure: self.on_failure.clone(),
        })
    }
}

impl fmt::Debug for RmiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RmiClient")
            .field("implementation_url", &self.implementation_url.as_str())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Class-bound client: every call goes to methods of one remote class.
#[derive(Clone, Debug)]
pub struct RemoteService {
    client: RmiClient,
    class_name: String,
    headers: Vec<(String, Option<String>)>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl RemoteService {
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Header sent with every call of this service; `None` removes it.
    pub fn header(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.headers.push((name.into(), value.map(str::to_string)));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Generic entry point: prepares a call of `method_name` on this class.
    pub fn method(&self, method_name: &str) -> Result<Invocation> {
        let mut invocation = self.client.call(&self.class_name, method_name)?;
        for (name, value) in &self.headers {
            invocation.transaction.set_header(name, value.as_deref())?;
        }
        if let Some(timeout) = self.connect_timeout {
            invocation.transaction.set_connect_timeout(timeout)?;
        }
        if let Some(timeout) = self.read_timeout {
            invocation.transaction.set_read_timeout(timeout)?;
        }
        Ok(invocation)
    }
}

/// How a dispatched call was executed.
#[derive(Debug)]
pub enum Outcome<R> {
    /// Executed in the caller's task, value handed back directly.
    Value(R),
    /// Executed in the caller's task, value passed to the completion callback.
    Delivered,
    /// Executed in a background task.
    Spawned(JoinHandle<()>),
}

impl<R> Outcome<R> {
    pub fn into_value(self) -> Option<R> {
        match self {
            Outcome::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// A prepared remote call.
pub struct Invocation {
    transaction: Transaction,
    on_failure: Option<FailureHandler>,
}

impl Invocation {
    pub fn arg(mut self, argument: impl Into<Argument>) -> Self {
        self.transaction.call_mut().push_argument(argument);
        self
    }

    /// Serializes `value` as a plain JSON argument.
    pub fn json_arg<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        Ok(self.arg(Argument::json(value)?))
    }

    pub fn declare<E: DeclaredException>(mut self, simple_name: impl Into<String>) -> Self {
        self.transaction.call_mut().declare::<E>(simple_name);
        self
    }

    pub fn declare_named(mut self, simple_name: impl Into<String>) -> Self {
        self.transaction.call_mut().declare_named(simple_name);
        self
    }

    pub fn header(mut self, name: &str, value: Option<&str>) -> Result<Self> {
        self.transaction.set_header(name, value)?;
        Ok(self)
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.transaction.set_connect_timeout(timeout)?;
        Ok(self)
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.transaction.set_read_timeout(timeout)?;
        Ok(self)
    }

    /// Failure handler for this call only, replacing the client-wide one.
    pub fn on_failure(mut self, handler: impl Fn(Error) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Awaits the call and returns its value, whatever the argument and return types.
    pub async fn invoke<R: RemoteReturn>(self) -> Result<R> {
        self.transaction.execute_as::<R>().await
    }

    /// Dispatches the call with a completion callback. See [`Invocation::dispatch`].
    pub async fn invoke_with<R: RemoteReturn>(self, completion: impl FnOnce(R) + Send + 'static) -> Result<Outcome<R>> {
        self.dispatch(Some(Box::new(completion))).await
    }

    /// Executes the call; `R` is the expected decode target.
    ///
    /// Execution mode, first match wins:
    /// 1. a stream argument: awaited here, the value goes to `completion` if given;
    /// 2. no `completion` and a non-void `R`: awaited here, the value is returned;
    /// 3. otherwise: spawned. Errors go to the failure handler, or to the log when there is none.
    pub async fn dispatch<R: RemoteReturn>(self, completion: Option<Completion<R>>) -> Result<Outcome<R>> {
        let Invocation {
            transaction,
            on_failure,
        } = self;

        if transaction.is_synchronous() {
            let value = transaction.execute_as::<R>().await?;
            return Ok(match completion {
                Some(completion) => {
                    completion(value);
                    Outcome::Delivered
                }
                None => Outcome::Value(value),
            });
        }

        if completion.is_none() && !R::return_type().is_void() {
            return Ok(Outcome::Value(transaction.execute_as::<R>().await?));
        }

        let url = transaction.url()?;
        let handle = tokio::spawn(async move {
            match transaction.execute_as::<R>().await {
                Ok(value) => {
                    if let Some(completion) = completion {
                        completion(value);
                    }
                }
                Err(err) => match on_failure {
                    Some(handler) => handler(err),
                    None => error!(url = %url, error = %err, "Asynchronous HTTP-RMI call failed"),
                },
            }
        });
        Ok(Outcome::Spawned(handle))
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("transaction", &self.transaction)
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}
