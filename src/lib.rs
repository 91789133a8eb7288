//! # Gateway Client
//!
//! Client half of an authenticated, multiplexed JSON RPC protocol carried
//! over one persistent WebSocket.
//!
//! ## Features
//!
//! - **Device identity**: Ed25519 keypair persisted per installation, id derived
//!   from the public key
//! - **Challenge-response handshake**: signed `connect` request, optional server
//!   nonce, capability token issued on success
//! - **Token cache**: device tokens reused across connections per `(device, role)`
//! - **Multiplexing**: any number of concurrent requests correlated by id, plus
//!   a broadcast feed of server events
//! - **Flow control**: heartbeat liveness, `maxPayload` and `maxBufferedBytes`
//!   limits negotiated at connect time
//!
//! ## Architecture
//!
//! ```text
//!  IdentityStore    TokenStore
//!        │              │
//!        └──────┬───────┘
//!               ▼
//!        GatewayClient ──handshake──> Connection ──┬── request()/call()
//!               │                        │         └── subscribe()
//!               ▼                        ▼
//!          Transport (WebSocket | in-memory)
//! ```
//!
//! ### State Machine
//!
//! ```text
//!     [Disconnected] ──connect()──> [Connecting]
//!                                        │ transport open
//!                                        v
//!                               [AwaitingChallenge]
//!                                        │ challenge or bounded timeout
//!                                        v
//!                                [Authenticating]
//!                                        │ hello-ok
//!                                        v
//!     [Disconnected] <──close()──── [Connected]
//!
//!     any state ──error──> [Failed]
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gateway::{ClientOptions, GatewayClient, IdentityStore, InMemoryTokenStore};
//!
//! #[tokio::main]
//! async fn main() -> gateway::Result<()> {
//!     let client = GatewayClient::new(
//!         ClientOptions::default(),
//!         Arc::new(IdentityStore::new(IdentityStore::default_root())),
//!         Arc::new(InMemoryTokenStore::new()),
//!     );
//!
//!     let connection = client.connect_url("ws://127.0.0.1:18789").await?;
//!     let mut events = connection.subscribe();
//!
//!     let status = connection.request("status", None).await?;
//!     println!("{status}");
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{}: {:?}", event.event, event.payload);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`identity`]: device keypair, signing, persistence
//! - [`token`]: device token cache
//! - [`protocol`]: frames, handshake payloads, connection state
//! - [`transport`]: WebSocket and in-memory transports
//! - [`client`]: handshake driver and multiplexed connection
//! - [`config`]: TOML and environment configuration

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod persist;
pub mod protocol;
pub mod token;
pub mod transport;

pub use client::{ClientOptions, Connection, GatewayClient, GatewayRequester};
pub use config::Config;
pub use error::{GatewayError, Result};
pub use identity::{DeviceIdentity, IdentityStore, PersistOutcome};
pub use protocol::{ConnectionPolicy, ConnectionState, EventFrame, Frame, HelloOk};
pub use token::{CachedToken, FileTokenStore, InMemoryTokenStore, TokenStore};
pub use transport::{Transport, WebSocketTransport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
