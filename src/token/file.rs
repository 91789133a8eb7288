//! File-backed token store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{cache_key, CachedToken, TokenStore};
use crate::error::Result;
use crate::identity::IDENTITY_DIR;
use crate::persist;

/// File name of the persisted token cache, next to the device identity.
pub const TOKEN_FILE: &str = "device-auth.json";

const FILE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    version: u32,
    #[serde(default)]
    tokens: Vec<TokenRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRecord {
    device_id: String,
    #[serde(flatten)]
    entry: CachedToken,
}

/// Token store persisted as JSON under `<root>/identity/device-auth.json`.
///
/// The in-memory map is authoritative. Every change rewrites the file
/// atomically; a failed write is logged and the next change retries it.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    entries: Mutex<HashMap<(String, String), CachedToken>>,
}

impl FileTokenStore {
    /// Open the store under `root`, loading any existing entries.
    ///
    /// A missing or unreadable file yields an empty store.
    pub fn open(root: impl AsRef<Path>) -> Self {
        let path = root.as_ref().join(IDENTITY_DIR).join(TOKEN_FILE);
        let entries = Self::read(&path);
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current entries to disk.
    pub fn flush(&self) -> Result<()> {
        let entries = self.entries.lock();
        self.write(&entries)
    }

    fn read(path: &Path) -> HashMap<(String, String), CachedToken> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read token cache");
                return HashMap::new();
            }
        };
        match serde_json::from_slice::<TokenFile>(&data) {
            Ok(file) if file.version == FILE_VERSION => file
                .tokens
                .into_iter()
                .map(|r| (cache_key(&r.device_id, &r.entry.role), r.entry))
                .collect(),
            Ok(file) => {
                tracing::warn!(version = file.version, "unsupported token cache version, ignoring");
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "token cache is malformed, ignoring");
                HashMap::new()
            }
        }
    }

    fn write(&self, entries: &HashMap<(String, String), CachedToken>) -> Result<()> {
        let mut tokens: Vec<TokenRecord> = entries
            .iter()
            .map(|((device_id, _), entry)| TokenRecord {
                device_id: device_id.clone(),
                entry: entry.clone(),
            })
            .collect();
        tokens.sort_by(|a, b| {
            (a.device_id.as_str(), a.entry.role.as_str())
                .cmp(&(b.device_id.as_str(), b.entry.role.as_str()))
        });
        persist::write_json_atomic(
            &self.path,
            &TokenFile {
                version: FILE_VERSION,
                tokens,
            },
        )
    }

    fn write_best_effort(&self, entries: &HashMap<(String, String), CachedToken>) {
        if let Err(e) = self.write(entries) {
            tracing::warn!(error = %e, "token cache not persisted");
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, device_id: &str, role: &str) -> Option<CachedToken> {
        self.entries.lock().get(&cache_key(device_id, role)).cloned()
    }

    fn store(&self, device_id: &str, role: &str, token: &str, scopes: &[String]) -> CachedToken {
        let entry = CachedToken::new(token, role, scopes);
        let mut entries = self.entries.lock();
        entries.insert(cache_key(device_id, role), entry.clone());
        self.write_best_effort(&entries);
        entry
    }

    fn clear(&self, device_id: &str, role: &str) {
        let mut entries = self.entries.lock();
        if entries.remove(&cache_key(device_id, role)).is_some() {
            self.write_best_effort(&entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path());
        store.store(
            "dev1",
            " operator",
            "tok-1",
            &["operator.write".to_string(), "operator.read".to_string()],
        );
        store.store("dev1", "node", "tok-2", &[]);

        let reopened = FileTokenStore::open(dir.path());
        let entry = reopened.load("dev1", "operator").unwrap();
        assert_eq!(entry.token, "tok-1");
        assert_eq!(entry.scope_list(), vec!["operator.read", "operator.write"]);
        assert_eq!(reopened.load("dev1", "node").unwrap().token, "tok-2");
    }

    #[test]
    fn test_clear_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path());
        store.store("dev1", "operator", "tok", &[]);
        store.clear("dev1", "operator");

        assert!(FileTokenStore::open(dir.path())
            .load("dev1", "operator")
            .is_none());
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path());
        store.store("dev1", "operator", "tok", &["a".to_string()]);

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["tokens"][0]["deviceId"], "dev1");
        assert_eq!(json["tokens"][0]["role"], "operator");
        assert_eq!(json["tokens"][0]["scopes"][0], "a");
        assert!(json["tokens"][0]["updatedAtMs"].is_i64());
    }

    #[test]
    fn test_write_failure_keeps_memory_entry() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let store = FileTokenStore::open(&blocker);
        store.store("dev1", "operator", "tok", &[]);

        assert_eq!(store.load("dev1", "operator").unwrap().token, "tok");
        assert!(store.flush().is_err());
    }

    #[test]
    fn test_malformed_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(IDENTITY_DIR).join(TOKEN_FILE);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"[not json").unwrap();

        let store = FileTokenStore::open(dir.path());
        assert!(store.load("dev1", "operator").is_none());
    }
}
