//! Event stream client: keeps a server-push connection open and feeds decoded
//! events to a consumer from a background task.

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONNECTION, PRAGMA},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use std::{fmt, io, sync::Arc, time::Instant};
use tokio::{
    io::BufReader,
    sync::{oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::EventStreamConfig,
    connection::{ConnectionProvider, HttpConnectionProvider, Request, Response},
    error::{Error, ProtocolFailure, Result},
    event::EventMappings,
    event_reader::EventReader,
};

/// Event stream client lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    /// `open()` in progress.
    Connecting,
    /// Connected, waiting for `read()`.
    Open,
    Reading,
    Closing,
}

/// Client for one server-push event stream.
pub struct EventStreamClient<E> {
    provider: Arc<dyn ConnectionProvider>,
    config: EventStreamConfig,
    mappings: EventMappings<E>,
    state: Arc<watch::Sender<StreamState>>,
    connection: Option<(Url, Response)>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<E: Send + 'static> EventStreamClient<E> {
    /// Client using the `reqwest` provider and default timeouts.
    pub fn new(mappings: EventMappings<E>) -> Self {
        Self::with_provider(
            Arc::new(HttpConnectionProvider::new()),
            EventStreamConfig::default(),
            mappings,
        )
    }

    pub fn with_provider(
        provider: Arc<dyn ConnectionProvider>,
        config: EventStreamConfig,
        mappings: EventMappings<E>,
    ) -> Self {
        let (state, _) = watch::channel(StreamState::Closed);
        Self {
            provider,
            config,
            mappings,
            state: Arc::new(state),
            connection: None,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Creates a client and opens the stream at `url`.
    pub async fn connect(url: &str, mappings: EventMappings<E>) -> Result<Self> {
        let mut client = Self::new(mappings);
        client.open(url).await?;
        Ok(client)
    }

    /// Maps event `name` to JSON payloads of type `T`. Takes effect on the next `read()`.
    pub fn add_mapping<T>(&mut self, name: impl Into<String>) -> &mut Self
    where
        T: DeserializeOwned + Into<E> + 'static,
    {
        self.mappings.register::<T>(name);
        self
    }

    pub fn mappings_mut(&mut self) -> &mut EventMappings<E> {
        &mut self.mappings
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Watches lifecycle changes, e.g. to learn when the read loop has exited.
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Opens the stream connection. The client has to be closed.
    pub async fn open(&mut self, url: &str) -> Result<()> {
        if self.state() != StreamState::Closed {
            return Err(Error::Bug(format!("Event stream already open, state {:?}", self.state())));
        }
        let url = Url::parse(url)?;
        self.state.send_replace(StreamState::Connecting);

        match self.connect_stream(&url).await {
            Ok(response) => {
                debug!(url = %url, "Event stream connected");
                self.connection = Some((url, response));
                self.cancel = CancellationToken::new();
                self.state.send_replace(StreamState::Open);
                Ok(())
            }
            Err(err) => {
                self.state.send_replace(StreamState::Closed);
                Err(err)
            }
        }
    }

    async fn connect_stream(&self, url: &Url) -> Result<Response> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(HeaderName::from_static("cache"), HeaderValue::from_static("no-cache"));

        let request = Request {
            method: Method::GET,
            url: url.clone(),
            headers,
            body: None,
            connect_timeout: self.config.connect_timeout,
            read_timeout: Some(self.config.read_timeout),
        };
        let response = self.provider.open(request).await?;

        if response.status != StatusCode::OK {
            let status = response.status.as_u16();
            response.disconnect();
            return Err(Error::protocol(url, ProtocolFailure::from_status(status)));
        }
        Ok(response)
    }

    /// Starts the background read loop, passing every event to `consumer`.
    ///
    /// The loop ends on end of stream, read timeout, error or `close()`; the
    /// connection is then released and the client is `Closed` again.
    pub async fn read(&mut self, mut consumer: impl FnMut(E) + Send + 'static) -> Result<()> {
        let Some((url, response)) = self.connection.take() else {
            return Err(Error::Bug("Event stream read without open connection".into()));
        };
        self.state.send_replace(StreamState::Reading);

        let mut reader = EventReader::new(BufReader::new(response.body));
        let mappings = self.mappings.clone();
        let cancel = self.cancel.clone();
        let state = self.state.clone();
        let (started_tx, started_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let _ = started_tx.send(());
            let connected = Instant::now();
            info!(url = %url, "Event stream reading");

            let exit = loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break Ok(()),
                    read = reader.read(&mappings) => match read {
                        Ok(Some(event)) => consumer(event),
                        Ok(None) => break Ok(()),
                        Err(err) => break Err(err),
                    },
                }
            };

            match exit {
                Ok(()) => debug!(url = %url, "Event stream ended"),
                Err(Error::Io(err)) if err.kind() == io::ErrorKind::TimedOut => {
                    error!(url = %url, "Event stream read timeout; server keep-alive missing")
                }
                Err(Error::Io(err)) => debug!(url = %url, error = %err, "Event stream closed"),
                Err(err) => error!(url = %url, error = %err, "Event stream failure"),
            }
            drop(reader);
            info!(
                url = %url,
                connected_secs = connected.elapsed().as_secs(),
                "Event stream connection released"
            );
            state.send_replace(StreamState::Closed);
        });

        if tokio::time::timeout(self.config.start_timeout, started_rx).await.is_err() {
            warn!("Event stream read loop not started in time");
        }
        self.task = Some(task);
        Ok(())
    }

    /// Closes the stream and waits, bounded by the stop timeout, for the read loop to exit.
    pub async fn close(&mut self) {
        if let Some((url, response)) = self.connection.take() {
            debug!(url = %url, "Closing unread event stream");
            response.disconnect();
        }
        if let Some(mut task) = self.task.take() {
            self.state.send_replace(StreamState::Closing);
            self.cancel.cancel();
            match tokio::time::timeout(self.config.stop_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "Event stream read loop failed"),
                Err(_) => {
                    warn!("Event stream read loop not stopped in time");
                    task.abort();
                }
            }
        }
        self.state.send_replace(StreamState::Closed);
    }
}

impl<E> Drop for EventStreamClient<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<E> fmt::Debug for EventStreamClient<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamClient")
            .field("config", &self.config)
            .field("mappings", &self.mappings)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
