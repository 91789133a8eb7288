//! WebSocket transport (tokio-tungstenite).

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{BoxFuture, MessageSink, MessageStream, Transport, WireMessage};
use crate::error::{GatewayError, Result};

/// A connected WebSocket.
pub struct WebSocketTransport<S = MaybeTlsStream<TcpStream>> {
    stream: WebSocketStream<S>,
}

impl WebSocketTransport {
    /// Open a WebSocket to `url` (`ws://` or `wss://`).
    ///
    /// Inbound messages larger than `max_message_size` fail the transport.
    pub async fn connect(url: &str, max_message_size: usize) -> Result<Self> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(max_message_size);
        config.max_frame_size = Some(max_message_size);

        let (stream, response) = tokio_tungstenite::connect_async_with_config(url, Some(config), false)
            .await
            .map_err(|e| GatewayError::Transport(format!("cannot connect to {url}: {e}")))?;
        tracing::debug!(url, status = %response.status(), "websocket open");
        Ok(Self { stream })
    }
}

impl<S> WebSocketTransport<S> {
    /// Wrap an already established WebSocket stream.
    pub fn from_stream(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn split(self) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        let (sink, stream) = self.stream.split();
        (Box::new(WsSink { sink }), Box::new(WsStream { stream }))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

struct WsSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> MessageSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send(&mut self, message: WireMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let message = match message {
                WireMessage::Text(text) => Message::Text(text.into()),
                WireMessage::Binary(data) => Message::Binary(data.into()),
                WireMessage::Ping(data) => Message::Ping(data.into()),
                WireMessage::Pong(data) => Message::Pong(data.into()),
            };
            self.sink.send(message).await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.sink.close().await {
                Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

struct WsStream<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S> MessageStream for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn next_message(&mut self) -> BoxFuture<'_, Option<Result<WireMessage>>> {
        Box::pin(async move {
            loop {
                let message = match self.stream.next().await? {
                    Ok(message) => message,
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                    Err(e) => return Some(Err(e.into())),
                };
                return Some(Ok(match message {
                    Message::Text(text) => WireMessage::Text(text.as_str().to_owned()),
                    Message::Binary(data) => WireMessage::Binary(data.to_vec()),
                    // tungstenite queues the pong reply itself
                    Message::Ping(data) => WireMessage::Ping(data.to_vec()),
                    Message::Pong(data) => WireMessage::Pong(data.to_vec()),
                    Message::Close(frame) => {
                        tracing::debug!(?frame, "websocket closed by peer");
                        return None;
                    }
                    Message::Frame(_) => continue,
                }));
            }
        })
    }
}
