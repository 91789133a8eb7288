//! In-process transport backed by channels.
//!
//! [`pair`] returns the client side as a [`Transport`] and the server side as
//! a [`MemoryPeer`] that a test (or an embedded server) drives directly.

use tokio::sync::mpsc;

use super::{BoxFuture, MessageSink, MessageStream, Transport, WireMessage};
use crate::error::{GatewayError, Result};
use crate::protocol::Frame;

/// Create a connected client transport and server peer.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (to_client, client_rx) = mpsc::unbounded_channel();
    let (to_peer, peer_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: to_peer,
            rx: client_rx,
        },
        MemoryPeer {
            tx: Some(to_client),
            rx: peer_rx,
        },
    )
}

/// Client side of an in-memory transport.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<WireMessage>,
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

impl Transport for MemoryTransport {
    fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        (
            Box::new(MemorySink { tx: Some(self.tx) }),
            Box::new(MemoryStream { rx: self.rx }),
        )
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<WireMessage>>,
}

impl MessageSink for MemorySink {
    fn send(&mut self, message: WireMessage) -> BoxFuture<'_, Result<()>> {
        let sent = match &self.tx {
            Some(tx) => tx
                .send(message)
                .map_err(|_| GatewayError::Transport("peer closed".to_string())),
            None => Err(GatewayError::Transport("transport closed".to_string())),
        };
        Box::pin(async move { sent })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.tx = None;
        Box::pin(async { Ok(()) })
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

impl MessageStream for MemoryStream {
    fn next_message(&mut self) -> BoxFuture<'_, Option<Result<WireMessage>>> {
        Box::pin(async move { self.rx.recv().await.map(Ok) })
    }
}

/// Server side of an in-memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<WireMessage>>,
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

impl MemoryPeer {
    /// Send a raw message to the client.
    pub fn send(&self, message: WireMessage) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or_else(|| GatewayError::Transport("peer closed".to_string()))?
            .send(message)
            .map_err(|_| GatewayError::Transport("client closed".to_string()))
    }

    /// Send a frame to the client as text.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send(WireMessage::Text(frame.to_text()?))
    }

    /// Next message from the client, including pings.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }

    /// Next frame from the client, skipping pings and pongs.
    ///
    /// `None` once the client side is gone.
    pub async fn recv_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.rx.recv().await? {
                WireMessage::Text(text) => return Some(Frame::from_text(&text)),
                WireMessage::Binary(data) => return Some(Frame::from_slice(&data)),
                WireMessage::Ping(_) | WireMessage::Pong(_) => continue,
            }
        }
    }

    /// Close the server side; the client sees end of stream.
    pub fn close(&mut self) {
        self.tx = None;
    }
}
