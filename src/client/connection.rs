//! A live, authenticated connection and its background tasks.
//!
//! Three tasks serve each connection:
//!
//! - the receive loop, sole reader of the transport, which routes responses
//!   to the correlation table and events to subscribers;
//! - the writer, sole writer of the transport, fed by an unbounded queue whose
//!   size is bounded by the `maxBufferedBytes` accounting in `send_frame`;
//! - the heartbeat, which pings at the tick interval and fails the connection
//!   after `TICK_MISS_FACTOR` silent intervals.
//!
//! Every exit path goes through [`Shared::teardown`], which runs once.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use super::handshake::publish_event;
use super::pending::{PendingGuard, PendingTable};
use crate::error::{GatewayError, Result};
use crate::protocol::value::decode_payload;
use crate::protocol::{
    ConnectionPolicy, ConnectionState, EventFrame, Frame, HelloOk, RequestFrame,
};
use crate::transport::{MessageSink, MessageStream, WireMessage};

/// State shared between the handle and the background tasks.
pub(crate) struct Shared {
    pending: PendingTable,
    outbound: mpsc::UnboundedSender<WireMessage>,
    buffered: AtomicUsize,
    hello: HelloOk,
    request_timeout: Option<Duration>,
    events: broadcast::Sender<EventFrame>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Sender<bool>,
    closed: Mutex<Option<(ConnectionState, String)>>,
    last_inbound: Mutex<Instant>,
}

impl Shared {
    fn policy(&self) -> &ConnectionPolicy {
        &self.hello.policy
    }

    /// Encode and queue a frame, enforcing the negotiated limits.
    fn send_frame(&self, frame: &Frame) -> Result<()> {
        let text = frame.to_text()?;
        let size = text.len();

        if let Some(limit) = self.policy().payload_limit() {
            if size > limit {
                return Err(GatewayError::PayloadTooLarge { size, limit });
            }
        }

        let queued = self.buffered.fetch_add(size, Ordering::AcqRel);
        if let Some(limit) = self.policy().buffer_limit() {
            // A lone frame may exceed the limit; maxPayload bounds it instead.
            if queued > 0 && queued + size > limit {
                self.buffered.fetch_sub(size, Ordering::AcqRel);
                return Err(GatewayError::Backpressure {
                    buffered: queued + size,
                    limit,
                });
            }
        }

        if self.outbound.send(WireMessage::Text(text)).is_err() {
            self.buffered.fetch_sub(size, Ordering::AcqRel);
            return Err(GatewayError::NotConnected);
        }
        Ok(())
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Response(response) => {
                let id = response.id.clone();
                if !self.pending.complete(response) {
                    tracing::warn!(%id, "dropping response with no pending request");
                }
            }
            Frame::Event(event) => publish_event(&self.events, event),
            Frame::Request(request) => {
                tracing::warn!(id = %request.id, method = %request.method, "ignoring request frame from server");
            }
        }
    }

    fn touch(&self) {
        *self.last_inbound.lock() = Instant::now();
    }

    /// End the connection. Only the first call has any effect.
    pub(crate) fn teardown(&self, next: ConnectionState, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut slot = self.closed.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some((next, reason.clone()));
        }

        let failed = self.pending.fail_all(&reason);
        if next == ConnectionState::Failed {
            tracing::warn!(%reason, failed_requests = failed, "connection failed");
        } else {
            tracing::info!(%reason, failed_requests = failed, "connection closed");
        }
        self.state.send_replace(next);
        self.shutdown.send_replace(true);
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Drops with the last [`Connection`] clone and closes the connection.
struct Handle {
    shared: Arc<Shared>,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shared
            .teardown(ConnectionState::Disconnected, "connection handle dropped");
    }
}

/// An authenticated gateway connection.
///
/// Cheap to clone; every clone multiplexes over the same transport. The
/// connection closes when [`close`](Self::close) is called, when the server
/// or transport ends it, or when the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    handle: Arc<Handle>,
}

impl Connection {
    /// Spawn the background tasks for an established connection.
    pub(crate) fn start(
        hello: HelloOk,
        request_timeout: Option<Duration>,
        events: broadcast::Sender<EventFrame>,
        state: Arc<watch::Sender<ConnectionState>>,
        sink: Box<dyn MessageSink>,
        stream: Box<dyn MessageStream>,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let policy = hello.policy;

        let shared = Arc::new(Shared {
            pending: PendingTable::new(),
            outbound,
            buffered: AtomicUsize::new(0),
            hello,
            request_timeout,
            events,
            state,
            shutdown,
            closed: Mutex::new(None),
            last_inbound: Mutex::new(Instant::now()),
        });
        shared.state.send_replace(ConnectionState::Connected);

        tokio::spawn(run_reader(Arc::clone(&shared), stream));
        tokio::spawn(run_writer(Arc::clone(&shared), sink, outbound_rx));
        if let (Some(interval), Some(deadline)) =
            (policy.tick_interval(), policy.liveness_deadline())
        {
            tokio::spawn(run_heartbeat(Arc::clone(&shared), interval, deadline));
        }

        Self {
            handle: Arc::new(Handle { shared }),
        }
    }

    fn shared(&self) -> &Shared {
        &self.handle.shared
    }

    /// Call `method` with the default request timeout.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, self.shared().request_timeout)
            .await
    }

    /// Call `method`, waiting at most `timeout` (`None` waits until teardown).
    ///
    /// Dropping the returned future cancels the request: its correlation
    /// entry is removed and a late response is discarded.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let shared = self.shared();
        let (id, waiter) = shared.pending.register()?;
        let _guard = PendingGuard {
            table: &shared.pending,
            id: &id,
        };

        shared.send_frame(&Frame::Request(RequestFrame::new(id.as_str(), method, params)))?;
        tracing::debug!(%id, method, "request sent");

        let outcome = match timeout {
            Some(after) => match tokio::time::timeout(after, waiter).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::debug!(%id, method, ?after, "request timed out");
                    return Err(GatewayError::Timeout {
                        method: method.to_string(),
                        after,
                    });
                }
            },
            None => waiter.await,
        };
        let response = outcome
            .map_err(|_| GatewayError::ConnectionClosed("response slot dropped".to_string()))??;
        response.into_result(method)
    }

    /// Call `method` with JSON bytes in and out.
    ///
    /// An empty payload sends no params.
    pub async fn request_raw(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let params = if payload.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(payload)?)
        };
        let value = self.request(method, params).await?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// Typed call: serialize `params`, deserialize the result.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let params = (!params.is_null()).then_some(params);
        decode_payload(self.request(method, params).await?)
    }

    /// Subscribe to server events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.shared().events.subscribe()
    }

    /// State of this connection: `Connected` until it ends, then
    /// `Disconnected` or `Failed`.
    pub fn state(&self) -> ConnectionState {
        self.shared()
            .closed
            .lock()
            .as_ref()
            .map_or(ConnectionState::Connected, |(state, _)| *state)
    }

    /// Whether requests can still be issued.
    pub fn is_connected(&self) -> bool {
        !self.shared().is_shut_down()
    }

    /// The server's `hello-ok` payload.
    pub fn hello(&self) -> &HelloOk {
        &self.shared().hello
    }

    /// Negotiated connection policy.
    pub fn policy(&self) -> ConnectionPolicy {
        *self.shared().policy()
    }

    /// Ids of requests still awaiting a response.
    pub fn pending_ids(&self) -> Vec<String> {
        self.shared().pending.ids()
    }

    /// Why the connection ended, once it has.
    pub fn close_reason(&self) -> Option<String> {
        self.shared()
            .closed
            .lock()
            .as_ref()
            .map(|(_, reason)| reason.clone())
    }

    /// Close the connection, failing any outstanding requests.
    pub fn close(&self) {
        self.shared()
            .teardown(ConnectionState::Disconnected, "closed by client");
    }

    /// Wait until the connection has ended and return the reason.
    pub async fn closed(&self) -> String {
        let mut shutdown = self.shared().shutdown.subscribe();
        let _ = shutdown.wait_for(|closed| *closed).await;
        self.close_reason()
            .unwrap_or_else(|| "connection closed".to_string())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .field("pending", &self.shared().pending.len())
            .field("policy", self.shared().policy())
            .finish()
    }
}

async fn run_reader(shared: Arc<Shared>, mut stream: Box<dyn MessageStream>) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        let message = tokio::select! {
            message = stream.next_message() => message,
            _ = shutdown.wait_for(|closed| *closed) => break,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                shared.teardown(ConnectionState::Failed, e.to_string());
                break;
            }
            None => {
                shared.teardown(ConnectionState::Failed, "connection closed by server");
                break;
            }
        };

        shared.touch();
        let frame = match message {
            WireMessage::Text(text) => Frame::decode_text(&text),
            WireMessage::Binary(data) => Frame::decode_slice(&data),
            WireMessage::Ping(_) | WireMessage::Pong(_) => continue,
        };
        match frame {
            Ok(Some(frame)) => shared.dispatch(frame),
            Ok(None) => {}
            Err(e) => {
                shared.teardown(ConnectionState::Failed, e.to_string());
                break;
            }
        }
    }
    tracing::debug!("receive loop stopped");
}

async fn run_writer(
    shared: Arc<Shared>,
    mut sink: Box<dyn MessageSink>,
    mut outbound: mpsc::UnboundedReceiver<WireMessage>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        let message = tokio::select! {
            message = outbound.recv() => message,
            _ = shutdown.wait_for(|closed| *closed) => None,
        };
        let Some(message) = message else {
            break;
        };

        let size = if message.is_control() { 0 } else { message.len() };
        let sent = sink.send(message).await;
        shared.buffered.fetch_sub(size, Ordering::AcqRel);
        if let Err(e) = sent {
            shared.teardown(ConnectionState::Failed, e.to_string());
            break;
        }
    }
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "transport close failed");
    }
    tracing::debug!("writer stopped");
}

async fn run_heartbeat(shared: Arc<Shared>, interval: Duration, deadline: Duration) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|closed| *closed) => break,
        }

        let silent = shared.last_inbound.lock().elapsed();
        if silent > deadline {
            shared.teardown(
                ConnectionState::Failed,
                format!("no traffic from server for {silent:?}"),
            );
            break;
        }
        if shared.outbound.send(WireMessage::Ping(Vec::new())).is_err() {
            break;
        }
    }
}
