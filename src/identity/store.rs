//! Persistent device identity store.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::device::DeviceIdentity;
use crate::error::{GatewayError, Result};
use crate::persist;

/// Directory under the store root that holds identity state.
pub const IDENTITY_DIR: &str = "identity";

/// File name of the persisted device identity.
pub const IDENTITY_FILE: &str = "device.json";

/// What happened to the on-disk copy during [`IdentityStore::load_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Served from the in-process cache.
    Cached,
    /// Read back from an existing valid file.
    Loaded,
    /// A new identity was generated and written.
    Written,
    /// A new identity was generated but could not be written.
    ///
    /// The identity is still usable for this process.
    Failed(String),
}

impl PersistOutcome {
    /// Convert into a `Result` for callers that care about durability.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Failed(reason) => Err(GatewayError::Persistence(reason)),
            _ => Ok(()),
        }
    }
}

/// Result of [`IdentityStore::load_or_create`].
#[derive(Debug, Clone)]
pub struct IdentityLoad {
    /// The device identity to use.
    pub identity: DeviceIdentity,
    /// Whether the identity is durably stored.
    pub persistence: PersistOutcome,
}

/// Loads, creates and caches the device identity for one installation.
///
/// The identity file lives at `<root>/identity/device.json`.
#[derive(Debug)]
pub struct IdentityStore {
    root: PathBuf,
    cached: Mutex<Option<DeviceIdentity>>,
}

impl IdentityStore {
    /// Create a store rooted at `root`. Nothing is read until first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cached: Mutex::new(None),
        }
    }

    /// Per-user data directory used when no root is configured.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("gateway-client")
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the identity file.
    pub fn path(&self) -> PathBuf {
        self.root.join(IDENTITY_DIR).join(IDENTITY_FILE)
    }

    /// Return the device identity, creating and persisting one if needed.
    ///
    /// Idempotent: once an identity exists every call returns the same one.
    /// A write failure is reported in [`IdentityLoad::persistence`] and does
    /// not prevent the identity from being used.
    pub fn load_or_create(&self) -> IdentityLoad {
        let mut cached = self.cached.lock();
        if let Some(identity) = cached.as_ref() {
            return IdentityLoad {
                identity: identity.clone(),
                persistence: PersistOutcome::Cached,
            };
        }

        if let Some(identity) = self.read_persisted() {
            *cached = Some(identity.clone());
            return IdentityLoad {
                identity,
                persistence: PersistOutcome::Loaded,
            };
        }

        let identity = DeviceIdentity::generate();
        let path = self.path();
        let persistence = match persist::write_json_atomic(&path, &identity) {
            Ok(()) => {
                tracing::info!(device_id = %identity.device_id, path = %path.display(), "created device identity");
                PersistOutcome::Written
            }
            Err(e) => {
                tracing::warn!(device_id = %identity.device_id, error = %e, "device identity not persisted");
                PersistOutcome::Failed(e.to_string())
            }
        };
        *cached = Some(identity.clone());
        IdentityLoad {
            identity,
            persistence,
        }
    }

    /// Sign `payload` with `identity`'s key.
    ///
    /// URL-safe base64 without padding; `None` if the key cannot be decoded.
    pub fn sign_payload(&self, payload: &[u8], identity: &DeviceIdentity) -> Option<String> {
        identity.sign(payload)
    }

    fn read_persisted(&self) -> Option<DeviceIdentity> {
        let path = self.path();
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read device identity");
                return None;
            }
        };
        match serde_json::from_slice::<DeviceIdentity>(&data) {
            Ok(identity) if identity.is_valid() => Some(identity),
            Ok(identity) => {
                tracing::warn!(device_id = %identity.device_id, "stored device identity is inconsistent, regenerating");
                None
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "stored device identity is malformed, regenerating");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_create_persists_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        let first = store.load_or_create();
        assert_eq!(first.persistence, PersistOutcome::Written);
        assert!(store.path().exists());

        let second = store.load_or_create();
        assert_eq!(second.persistence, PersistOutcome::Cached);
        assert_eq!(first.identity, second.identity);
    }

    #[test]
    fn test_fresh_store_reads_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let created = IdentityStore::new(dir.path()).load_or_create().identity;

        let reopened = IdentityStore::new(dir.path()).load_or_create();
        assert_eq!(reopened.persistence, PersistOutcome::Loaded);
        assert_eq!(reopened.identity, created);
    }

    #[test]
    fn test_malformed_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{\"deviceId\": \"\"").unwrap();

        let load = store.load_or_create();
        assert_eq!(load.persistence, PersistOutcome::Written);
        assert!(load.identity.is_valid());
    }

    #[test]
    fn test_empty_fields_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            br#"{"deviceId":"","publicKey":"","privateKey":"","createdAtMs":0}"#,
        )
        .unwrap();

        let load = store.load_or_create();
        assert_eq!(load.persistence, PersistOutcome::Written);
        assert!(!load.identity.device_id.is_empty());
    }

    #[test]
    fn test_unwritable_root_still_yields_identity() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not dir").unwrap();
        let store = IdentityStore::new(&blocker);

        let first = store.load_or_create();
        assert!(matches!(first.persistence, PersistOutcome::Failed(_)));
        assert!(first.persistence.clone().into_result().is_err());
        assert!(first.identity.is_valid());

        // Same identity for the rest of the process.
        let second = store.load_or_create();
        assert_eq!(second.identity, first.identity);
    }

    #[test]
    fn test_sign_payload_delegates_to_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        let identity = store.load_or_create().identity;

        let signature = store.sign_payload(b"hello", &identity).unwrap();
        assert!(identity.verify(b"hello", &signature));
    }
}
