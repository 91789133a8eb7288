//! Gateway client error types.
//!
//! # Error Classification
//!
//! Errors fall into two groups:
//!
//! - **Connection-scoped**: `Transport`, `Handshake`, `Protocol` and
//!   `ConnectionClosed` end the connection. `connect` surfaces them directly;
//!   pending requests see `ConnectionClosed`.
//! - **Request-scoped**: `Request`, `Timeout`, `PayloadTooLarge` and
//!   `Backpressure` are returned only to the caller that issued the request.
//!   The connection stays up.
//!
//! `Signing` and `Persistence` are absorbed by the client. A signing failure
//! means the handshake goes out without device attestation, and a persistence
//! failure is reported through [`PersistOutcome`](crate::identity::PersistOutcome)
//! or logged. They still have variants so the lower layers can return them.

use std::time::Duration;

use thiserror::Error;

/// Gateway client errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The transport could not be opened, or failed while open.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection was torn down while the operation was outstanding.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// An operation needs a live connection and there is none.
    #[error("Not connected")]
    NotConnected,

    /// A frame violated the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server rejected the handshake, or its reply was unusable.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The server answered a request with `ok: false`.
    #[error("Request `{method}` failed ({code}): {message}")]
    Request {
        /// Method that was called.
        method: String,
        /// Server error code.
        code: String,
        /// Human-readable server message.
        message: String,
    },

    /// No response arrived within the request timeout.
    #[error("Request `{method}` timed out after {after:?}")]
    Timeout {
        /// Method that was called.
        method: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Encoded frame is larger than the negotiated `maxPayload`.
    #[error("Frame of {size} bytes exceeds max payload of {limit} bytes")]
    PayloadTooLarge {
        /// Encoded frame size.
        size: usize,
        /// Negotiated limit.
        limit: usize,
    },

    /// Too many bytes are queued for the transport.
    #[error("Send buffer full: {buffered} bytes queued, limit {limit}")]
    Backpressure {
        /// Bytes queued including the rejected frame.
        buffered: usize,
        /// Negotiated `maxBufferedBytes`.
        limit: usize,
    },

    /// Signing with the device key failed.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Writing identity or token state to disk failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Whether this error ended the connection it came from.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::ConnectionClosed(_)
                | Self::NotConnected
                | Self::Protocol(_)
                | Self::Handshake(_)
        )
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for GatewayError {
    fn from(err: base64::DecodeError) -> Self {
        GatewayError::Signing(format!("Base64 decode error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        assert!(GatewayError::Transport("reset".into()).is_connection_error());
        assert!(GatewayError::Handshake("denied".into()).is_connection_error());
        assert!(!GatewayError::Timeout {
            method: "health".into(),
            after: Duration::from_secs(1),
        }
        .is_connection_error());
        assert!(!GatewayError::Backpressure {
            buffered: 10,
            limit: 5
        }
        .is_connection_error());
    }

    #[test]
    fn test_request_error_display() {
        let err = GatewayError::Request {
            method: "chat.send".into(),
            code: "INVALID_REQUEST".into(),
            message: "missing sessionKey".into(),
        };
        assert_eq!(
            err.to_string(),
            "Request `chat.send` failed (INVALID_REQUEST): missing sessionKey"
        );
    }
}
