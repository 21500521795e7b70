//! Client configuration.

use std::time::Duration;

/// Path Primus mounts its websocket endpoint on by default.
pub const DEFAULT_PATHNAME: &str = "/primus";

/// How long the websocket handshake may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long `close()` waits for the close frame to be flushed.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for establishing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Path appended to the base URL unless it already ends with it.
    /// Empty to use the URL as given.
    pub pathname: String,
    /// Timeout for the websocket handshake.
    pub connect_timeout: Duration,
    /// Timeout for flushing the close frame on shutdown.
    pub close_timeout: Duration,
    /// Append a `_primuscb` cache-busting query parameter.
    pub cache_buster: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pathname: DEFAULT_PATHNAME.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            cache_buster: true,
        }
    }
}
