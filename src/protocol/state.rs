//! Connection state machine.

use std::fmt;

/// Lifecycle of one gateway connection.
///
/// ```text
/// Disconnected -> Connecting -> AwaitingChallenge -> Authenticating -> Connected
///       ^                                                                  |
///       +---------------------------- close() ------------------------------+
///
/// any state --(transport error, rejected handshake, protocol error)--> Failed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection, either never opened or closed by the caller.
    #[default]
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Waiting (bounded) for the server's challenge nonce.
    AwaitingChallenge,
    /// `connect` sent, waiting for `hello-ok`.
    Authenticating,
    /// Handshake complete, requests allowed.
    Connected,
    /// Connection ended because of an error.
    Failed,
}

impl ConnectionState {
    /// Whether the connection is gone (closed or failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Whether a handshake is in progress.
    pub fn is_handshaking(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingChallenge | Self::Authenticating
        )
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingChallenge => "awaiting-challenge",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(ConnectionState::default().is_terminal());
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(ConnectionState::AwaitingChallenge.is_handshaking());
        assert!(!ConnectionState::Connected.is_handshaking());
        assert_eq!(ConnectionState::Authenticating.to_string(), "authenticating");
    }
}
