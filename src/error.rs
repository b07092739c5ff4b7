use std::fmt;

use crate::types::ConnectionState;

/// Result type for market-realtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by a message handler.
///
/// Handler failures never leave the dispatcher; they are logged and the
/// remaining handlers still run.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for market-realtime
#[derive(Debug)]
pub enum Error {
    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Invalid configuration
    Config(String),

    /// Endpoint could not be parsed as a URL
    Url(url::ParseError),

    /// WebSocket transport error
    WebSocket(String),

    /// Inbound frame was not a tagged `{"type": ...}` object
    MalformedFrame(String),

    /// Outbound operation attempted while the connection is not open
    NotConnected { state: ConnectionState },

    /// WebSocket connection closed
    ConnectionClosed,

    /// The client was shut down with `disconnect()`
    Closed,

    /// Reconnection gave up after the configured number of attempts;
    /// returned by sends until the next `connect()`
    ReconnectFailed { attempts: u32, last_error: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(e) => write!(f, "JSON error: {}", e),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Url(e) => write!(f, "Invalid endpoint URL: {}", e),
            Error::WebSocket(msg) => write!(f, "WebSocket error: {}", msg),
            Error::MalformedFrame(msg) => write!(f, "Malformed frame: {}", msg),
            Error::NotConnected { state } => {
                write!(f, "Not connected (connection state: {})", state)
            }
            Error::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Error::Closed => write!(f, "Client has been closed"),
            Error::ReconnectFailed {
                attempts,
                last_error,
            } => write!(
                f,
                "Reconnection failed after {} attempts: {}",
                attempts, last_error
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(e) => Some(e),
            Error::Url(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Url(err)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(err.to_string())
    }
}
