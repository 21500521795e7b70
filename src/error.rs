use thiserror::Error;

use crate::protocol::{ProtocolError, ServerError};

/// Errors that can occur in the Feathers client.
#[derive(Error, Debug)]
pub enum FeathersError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered a call with a non-null error.
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// The websocket handshake did not complete.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport ended; every call still pending fails with this.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using [`FeathersError`].
pub type Result<T> = std::result::Result<T, FeathersError>;
