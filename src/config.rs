//! Configuration options for the HTTP-RMI client and the event stream client.

use std::time::Duration;

/// Environment variable that switches on low-resource mode in [`Config::from_env`].
pub const LOW_RESOURCE_ENV: &str = "HTTP_RMI_LOW_RESOURCE";

/// Transaction defaults for an HTTP-RMI client.
#[derive(Clone, Debug)]
pub struct Config {
    /// Connect timeout applied to every transaction unless overridden.
    pub connect_timeout: Duration,
    /// Read timeout applied to every transaction unless overridden.
    pub read_timeout: Duration,
    /// Low-resource client mode: every request asks the server to close the connection.
    pub low_resource: bool,
    /// Value of the `User-Agent` request header.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(120),
            low_resource: false,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Default configuration, with `low_resource` enabled when [`LOW_RESOURCE_ENV`] is set.
    pub fn from_env() -> Self {
        Self {
            low_resource: std::env::var_os(LOW_RESOURCE_ENV).is_some(),
            ..Self::default()
        }
    }
}

/// Configuration for the event stream client.
#[derive(Clone, Debug)]
pub struct EventStreamConfig {
    /// Bounds `open()`.
    pub connect_timeout: Duration,
    /// Must stay a little larger than the server keep-alive period.
    pub read_timeout: Duration,
    /// How long `read()` waits for the background loop to report it is running.
    pub start_timeout: Duration,
    /// How long `close()` waits for the background loop to exit.
    pub stop_timeout: Duration,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(50),
            start_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_secs(2),
        }
    }
}
