//! Gateway wire protocol.
//!
//! Frames, the `connect` handshake and the connection state machine. Nothing
//! in this module touches a socket; see [`client`](crate::client) for the
//! engine that drives it.
//!
//! # Handshake
//!
//! ```text
//! Client                                   Server
//!    |                                        |
//!    |<--- event connect.challenge {nonce} ---|  optional
//!    |                                        |
//!    |---- req id="req" method="connect" ---->|  ConnectParams, signed
//!    |                                        |
//!    |<--- res id="req" ok=true hello-ok -----|  auth + policy
//!    |                                        |
//!    |==== req / res (multiplexed) ==========>|
//!    |<=== event ============================|
//! ```
//!
//! The challenge wait is bounded. If the first frame is anything other than
//! a challenge it is kept and processed normally, so a server that skips the
//! challenge (or pushes an event first) loses nothing.
//!
//! # Frames
//!
//! | `type`  | Direction      | Purpose                                 |
//! |---------|----------------|-----------------------------------------|
//! | `req`   | Client→Server  | Call a method, correlated by `id`       |
//! | `res`   | Server→Client  | Result or error for a `req`             |
//! | `event` | Server→Client  | Out-of-band notification, never matched |
//!
//! # Policy
//!
//! `hello-ok` carries the connection policy. `tickIntervalMs` drives the
//! heartbeat; `maxPayload` bounds any single outbound frame;
//! `maxBufferedBytes` bounds the send queue. Zero disables each limit.

pub mod connect;
pub mod frame;
pub mod hello;
mod state;
pub mod value;

pub use connect::{AuthBlock, ClientInfo, ConnectParams, DeviceAttestation, HandshakeInput};
pub use frame::{ErrorShape, EventFrame, Frame, RequestFrame, ResponseFrame, StateVersion};
pub use hello::{AuthGrant, ConnectionPolicy, Features, HelloOk, ServerInfo, Snapshot};
pub use state::ConnectionState;
pub use value::ValueExt;

/// Highest protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 3;

/// Lowest protocol version this client speaks.
pub const MIN_PROTOCOL_VERSION: u32 = 3;

/// Correlation id reserved for the handshake request.
pub const HANDSHAKE_REQUEST_ID: &str = "req";

/// Method name of the handshake request.
pub const CONNECT_METHOD: &str = "connect";

/// Event carrying the handshake challenge nonce.
pub const CHALLENGE_EVENT: &str = "connect.challenge";

/// Missed heartbeat intervals tolerated before the connection is failed.
pub const TICK_MISS_FACTOR: u32 = 2;

/// Largest inbound transport message accepted (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
