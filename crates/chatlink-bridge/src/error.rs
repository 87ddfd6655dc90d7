//! Error types for the bridge

use tokio_tungstenite::tungstenite;

/// STOMP frame decoding errors
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Frame truncated")]
    Truncated,
    #[error("Frame is missing its NUL terminator")]
    MissingNull,
    #[error("Malformed header line: {0}")]
    MalformedHeader(String),
    #[error("Invalid escape sequence in header: {0}")]
    InvalidEscape(String),
    #[error("Invalid content-length: {0}")]
    ContentLength(String),
    #[error("Invalid heart-beat header: {0}")]
    HeartBeat(String),
}

/// Errors raised by the underlying link to the broker
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Transport link closed")]
    Closed,
    #[error("SockJS protocol error: {0}")]
    SockJs(String),
    #[error("Invalid transport URL: {0}")]
    Url(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The handshake failed or timed out; every waiter on the gate sees this.
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Subscription failed: {0}")]
    Subscription(String),
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

impl BridgeError {
    /// Short label used for metrics and log fields
    pub fn category(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::Subscription(_) => "subscription",
            Self::MalformedInput(_) => "malformed_input",
            Self::NotConnected => "not_connected",
            Self::Transport(_) => "transport",
            Self::Frame(_) => "frame",
            Self::Json(_) => "json",
            Self::Url(_) => "url",
        }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_and_messages() {
        let err = BridgeError::Handshake("no CONNECTED frame within 30s".to_string());
        assert_eq!(err.category(), "handshake");
        assert_eq!(err.to_string(), "Handshake failed: no CONNECTED frame within 30s");

        let err: BridgeError = TransportError::Closed.into();
        assert_eq!(err.category(), "transport");
        assert_eq!(err.to_string(), "Transport error: Transport link closed");

        let err: BridgeError = FrameError::MissingNull.into();
        assert_eq!(err.category(), "frame");
    }
}
