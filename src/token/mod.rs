//! Device token cache.
//!
//! A successful handshake returns a capability token bound to the device and
//! a role. The cache keeps the most recent token per `(deviceId, role)` so
//! later connections can authenticate with it instead of a shared secret.
//!
//! Two implementations are provided:
//!
//! | Store               | Lifetime     | Use                               |
//! |---------------------|--------------|-----------------------------------|
//! | `InMemoryTokenStore`| process      | tests, ephemeral clients          |
//! | `FileTokenStore`    | installation | default for long-lived clients    |

mod file;

pub use file::{FileTokenStore, TOKEN_FILE};

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A server-issued capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    /// Opaque bearer token.
    pub token: String,
    /// Role the token was granted for (trimmed).
    pub role: String,
    /// Granted scopes, deduplicated and sorted.
    pub scopes: BTreeSet<String>,
    /// When the token was stored, milliseconds since the Unix epoch.
    pub updated_at_ms: i64,
}

impl CachedToken {
    /// Build an entry with normalized role and scopes, stamped now.
    pub fn new(token: &str, role: &str, scopes: &[String]) -> Self {
        Self {
            token: token.to_string(),
            role: normalize_role(role),
            scopes: normalize_scopes(scopes),
            updated_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Scopes as a sorted list.
    pub fn scope_list(&self) -> Vec<String> {
        self.scopes.iter().cloned().collect()
    }
}

/// Storage for device tokens keyed by `(device_id, role)`.
///
/// Roles are trimmed before use as a key, so `" operator "` and `"operator"`
/// address the same entry.
pub trait TokenStore: Send + Sync {
    /// Look up the token for a device and role.
    fn load(&self, device_id: &str, role: &str) -> Option<CachedToken>;

    /// Store a token, replacing any previous entry, and return what was stored.
    fn store(&self, device_id: &str, role: &str, token: &str, scopes: &[String]) -> CachedToken;

    /// Forget the token for a device and role.
    fn clear(&self, device_id: &str, role: &str);
}

/// Trim a role name.
pub fn normalize_role(role: &str) -> String {
    role.trim().to_string()
}

/// Trim, drop empties, deduplicate and sort scopes.
pub fn normalize_scopes(scopes: &[String]) -> BTreeSet<String> {
    scopes
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn cache_key(device_id: &str, role: &str) -> (String, String) {
    (device_id.to_string(), normalize_role(role))
}

/// Process-lifetime token store.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    entries: Mutex<HashMap<(String, String), CachedToken>>,
}

impl InMemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached tokens.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load(&self, device_id: &str, role: &str) -> Option<CachedToken> {
        self.entries.lock().get(&cache_key(device_id, role)).cloned()
    }

    fn store(&self, device_id: &str, role: &str, token: &str, scopes: &[String]) -> CachedToken {
        let entry = CachedToken::new(token, role, scopes);
        self.entries
            .lock()
            .insert(cache_key(device_id, role), entry.clone());
        entry
    }

    fn clear(&self, device_id: &str, role: &str) {
        self.entries.lock().remove(&cache_key(device_id, role));
    }
}
