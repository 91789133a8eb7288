//! Device identity.
//!
//! Every installation owns one Ed25519 keypair. Its id is the lowercase hex
//! SHA-256 of the raw public key, and the handshake proves possession of the
//! private key by signing a canonical string (see
//! [`protocol::connect`](crate::protocol::connect)).
//!
//! # Storage
//!
//! ```text
//! <root>/identity/device.json
//! {
//!   "deviceId":    "<hex sha256(publicKey)>",
//!   "publicKey":   "<base64 raw 32 bytes>",
//!   "privateKey":  "<base64 raw 32 bytes>",
//!   "createdAtMs": 1700000000000
//! }
//! ```
//!
//! The file is written atomically with owner-only permissions. Writing is
//! best-effort: if it fails the identity still works for the current process,
//! but the next process will generate a different one.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gateway::identity::IdentityStore;
//!
//! let store = IdentityStore::new(IdentityStore::default_root());
//! let identity = store.load_or_create().identity;
//! let signature = store.sign_payload(b"payload", &identity);
//! ```

mod device;
mod encoding;
mod store;

pub use device::{verify_signature, DeviceIdentity};
pub use encoding::{base64_from_base64url, base64url_from_base64, device_id_for_public_key};
pub use store::{IdentityLoad, IdentityStore, PersistOutcome, IDENTITY_DIR, IDENTITY_FILE};
