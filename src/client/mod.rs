//! Connection core.
//!
//! [`GatewayClient`] owns the injected identity and token stores and performs
//! the handshake. A successful handshake yields a [`Connection`], which
//! multiplexes requests and events over the one transport.
//!
//! # Request Flow
//!
//! ```text
//! caller ──request()──> PendingTable.register(id) ──> writer task ──> transport
//!   ▲                                                                   │
//!   └──── oneshot ◄──── PendingTable.complete(id) ◄──── receive loop ◄──┘
//!                                                          │
//!                                   broadcast ◄── event ───┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gateway::client::{ClientOptions, GatewayClient};
//! use gateway::identity::IdentityStore;
//! use gateway::token::InMemoryTokenStore;
//!
//! let client = GatewayClient::new(
//!     ClientOptions::default(),
//!     Arc::new(IdentityStore::new(IdentityStore::default_root())),
//!     Arc::new(InMemoryTokenStore::new()),
//! );
//! let connection = client.connect_url("ws://127.0.0.1:18789").await?;
//! let health = connection.request("health", None).await?;
//! ```

mod connection;
mod handshake;
mod pending;

pub use connection::Connection;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::identity::IdentityStore;
use crate::protocol::{ConnectionState, EventFrame, MAX_MESSAGE_SIZE};
use crate::token::TokenStore;
use crate::transport::{BoxFuture, Transport, WebSocketTransport};

use handshake::Handshake;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How the client identifies itself and how long it waits.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Client product id.
    pub client_id: String,
    /// Client mode.
    pub client_mode: String,
    /// Display name.
    pub display_name: Option<String>,
    /// Requested role.
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Shared gateway token, used when no device token is cached.
    pub shared_token: Option<String>,
    /// Client locale.
    pub locale: Option<String>,
    /// Bounded wait for the challenge event.
    pub challenge_timeout: Duration,
    /// Bounded wait for the `connect` response.
    pub connect_timeout: Duration,
    /// Default per-request timeout; `None` waits until teardown.
    pub request_timeout: Option<Duration>,
    /// Largest inbound WebSocket message.
    pub max_message_size: usize,
    /// Events buffered per subscriber before it lags.
    pub event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        let gateway = &config.gateway;
        Self {
            client_id: config.client.id.clone(),
            client_mode: config.client.mode.clone(),
            display_name: config.client.display_name.clone(),
            role: config.client.role.clone(),
            scopes: config.client.scopes.clone(),
            shared_token: gateway.token.clone(),
            locale: config.client.locale.clone(),
            challenge_timeout: Duration::from_millis(gateway.challenge_timeout_ms),
            connect_timeout: Duration::from_secs(gateway.connect_timeout_secs),
            request_timeout: (gateway.request_timeout_secs > 0)
                .then(|| Duration::from_secs(gateway.request_timeout_secs)),
            max_message_size: if gateway.max_message_size > 0 {
                gateway.max_message_size
            } else {
                MAX_MESSAGE_SIZE
            },
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Generic request call for higher-level services.
///
/// Payloads are JSON-encoded bytes. Services such as chat built on top of
/// the gateway depend on this trait rather than on [`Connection`].
pub trait GatewayRequester: Send + Sync {
    /// Call `method` with `payload` and return the response payload.
    fn request(&self, method: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>>>;
}

impl GatewayRequester for Connection {
    fn request(&self, method: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>>> {
        let method = method.to_string();
        Box::pin(async move { self.request_raw(&method, &payload).await })
    }
}

/// Gateway client: stores, options and the connection state machine.
pub struct GatewayClient {
    options: ClientOptions,
    instance_id: String,
    identity_store: Arc<IdentityStore>,
    token_store: Arc<dyn TokenStore>,
    events: broadcast::Sender<EventFrame>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl GatewayClient {
    /// Create a client. Nothing is opened until [`connect`](Self::connect).
    pub fn new(
        options: ClientOptions,
        identity_store: Arc<IdentityStore>,
        token_store: Arc<dyn TokenStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            options,
            instance_id: uuid::Uuid::new_v4().to_string(),
            identity_store,
            token_store,
            events,
            state: Arc::new(state),
        }
    }

    /// Client options.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Identity store in use.
    pub fn identity_store(&self) -> &IdentityStore {
        &self.identity_store
    }

    /// Token store in use.
    pub fn token_store(&self) -> &dyn TokenStore {
        self.token_store.as_ref()
    }

    /// Per-process instance id sent in the client descriptor.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Current state of the most recent connection attempt.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribe to server events, including events that arrive during the
    /// handshake.
    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.events.subscribe()
    }

    /// Open a WebSocket to `url` and perform the handshake.
    pub async fn connect_url(&self, url: &str) -> Result<Connection> {
        self.begin()?;
        let transport = match WebSocketTransport::connect(url, self.options.max_message_size).await
        {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(url, error = %e, "cannot open transport");
                self.state.send_replace(ConnectionState::Failed);
                return Err(e);
            }
        };
        self.establish(transport).await
    }

    /// Perform the handshake over an already open transport.
    pub async fn connect<T: Transport>(&self, transport: T) -> Result<Connection> {
        self.begin()?;
        self.establish(transport).await
    }

    /// Move to `Connecting` unless a connection is already live.
    fn begin(&self) -> Result<()> {
        let mut current = ConnectionState::Disconnected;
        let started = self.state.send_if_modified(|state| {
            current = *state;
            if state.is_terminal() {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(GatewayError::Protocol(format!(
                "cannot connect while {current}"
            )));
        }
        Ok(())
    }

    async fn establish<T: Transport>(&self, transport: T) -> Result<Connection> {
        let transport_name = transport.name();
        let (mut sink, mut stream) = transport.split();
        let identity = self.identity_store.load_or_create().identity;

        let handshake = Handshake {
            options: &self.options,
            instance_id: &self.instance_id,
            identity: &identity,
            token_store: self.token_store.as_ref(),
            events: &self.events,
            state: &self.state,
        };

        match handshake.run(sink.as_mut(), stream.as_mut()).await {
            Ok(hello) => {
                tracing::info!(
                    transport = transport_name,
                    device_id = %identity.device_id,
                    protocol = ?hello.protocol,
                    tick_ms = hello.policy.tick_interval_ms,
                    "connected"
                );
                Ok(Connection::start(
                    hello,
                    self.options.request_timeout,
                    self.events.clone(),
                    Arc::clone(&self.state),
                    sink,
                    stream,
                ))
            }
            Err(e) => {
                tracing::warn!(transport = transport_name, error = %e, "handshake failed");
                self.state.send_replace(ConnectionState::Failed);
                if let Err(close_err) = sink.close().await {
                    tracing::debug!(error = %close_err, "transport close failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, ResponseFrame, HANDSHAKE_REQUEST_ID};
    use crate::token::InMemoryTokenStore;
    use crate::transport::memory_pair;
    use serde_json::json;

    fn client(dir: &std::path::Path) -> GatewayClient {
        GatewayClient::new(
            ClientOptions {
                challenge_timeout: Duration::from_millis(20),
                ..ClientOptions::default()
            },
            Arc::new(IdentityStore::new(dir)),
            Arc::new(InMemoryTokenStore::new()),
        )
    }

    fn hello_ok() -> ResponseFrame {
        ResponseFrame::success(
            HANDSHAKE_REQUEST_ID,
            json!({"policy": {"tickIntervalMs": 0, "maxPayload": 0, "maxBufferedBytes": 0}}),
        )
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.gateway.request_timeout_secs = 0;
        config.gateway.token = Some("shared".to_string());

        let options = ClientOptions::from(&config);
        assert_eq!(options.request_timeout, None);
        assert_eq!(options.shared_token.as_deref(), Some("shared"));
        assert_eq!(options.challenge_timeout, Duration::from_secs(2));
        assert_eq!(options.max_message_size, MAX_MESSAGE_SIZE);
    }

    #[tokio::test]
    async fn test_second_connect_is_refused_while_connected() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());

        let (transport, peer) = memory_pair();
        peer.send_frame(&Frame::Response(hello_ok())).unwrap();
        let connection = client.connect(transport).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);

        let (again, _peer2) = memory_pair();
        assert!(client.connect(again).await.is_err());

        connection.close();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let (third, peer3) = memory_pair();
        peer3.send_frame(&Frame::Response(hello_ok())).unwrap();
        let reconnected = client.connect(third).await.unwrap();
        assert!(reconnected.is_connected());
        drop(peer);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());

        let (transport, peer) = memory_pair();
        peer.send_frame(&Frame::Response(hello_ok())).unwrap();
        let connection = client.connect(transport).await.unwrap();
        let clone = connection.clone();

        drop(connection);
        assert_eq!(client.state(), ConnectionState::Connected);
        drop(clone);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    async fn connect_instance_id(client: &GatewayClient) -> String {
        let (transport, mut peer) = memory_pair();
        peer.send_frame(&Frame::Response(hello_ok())).unwrap();
        let connection = client.connect(transport).await.unwrap();
        let connect = match peer.recv_frame().await.unwrap().unwrap() {
            Frame::Request(request) => request,
            other => panic!("expected connect request, got {other:?}"),
        };
        connection.close();
        connect.params.unwrap()["client"]["instanceId"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_instance_id_is_stable_across_connects() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path());

        let first = connect_instance_id(&client).await;
        let second = connect_instance_id(&client).await;
        assert_eq!(first, second);
        assert_eq!(first, client.instance_id().to_lowercase());
    }
}
