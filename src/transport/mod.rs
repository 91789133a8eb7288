//! Transport layer abstraction for the gateway client.
//!
//! The client needs an ordered, message-oriented, bidirectional channel. It
//! splits the channel into a write half, owned by the writer task, and a read
//! half, owned by the receive loop.
//!
//! # Architecture
//!
//! ```text
//!            Connection core
//!    writer task            receive loop
//!         │                       ▲
//!    MessageSink            MessageStream
//!         │                       │
//!         ▼                       │
//!   Transport::split() ───────────┘
//!         │
//!    ┌────┴──────────────┐
//!    ▼                   ▼
//! WebSocketTransport   MemoryTransport
//! (tokio-tungstenite)  (channels, tests)
//! ```

mod memory;
mod websocket;

pub use memory::{pair as memory_pair, MemoryPeer, MemoryTransport};
pub use websocket::WebSocketTransport;

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// Boxed `Send` future returned by transport halves.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// UTF-8 text message; frames are sent this way.
    Text(String),
    /// Binary message.
    Binary(Vec<u8>),
    /// Liveness check.
    Ping(Vec<u8>),
    /// Reply to a liveness check.
    Pong(Vec<u8>),
}

impl WireMessage {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is a ping or pong.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Ping(_) | Self::Pong(_))
    }
}

/// Write half of a transport.
pub trait MessageSink: Send {
    /// Send one message. Each call is one atomic transport message.
    fn send(&mut self, message: WireMessage) -> BoxFuture<'_, Result<()>>;

    /// Close the transport from this side.
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Read half of a transport.
pub trait MessageStream: Send {
    /// Next message; `None` once the peer has closed.
    fn next_message(&mut self) -> BoxFuture<'_, Option<Result<WireMessage>>>;
}

/// An open transport that can be handed to the connection core.
pub trait Transport: Send + 'static {
    /// Split into independently owned write and read halves.
    fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageStream>);

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_message_len() {
        assert_eq!(WireMessage::Text("abc".into()).len(), 3);
        assert!(WireMessage::Ping(Vec::new()).is_empty());
        assert!(WireMessage::Pong(vec![1]).is_control());
        assert!(!WireMessage::Binary(vec![1]).is_control());
    }
}
