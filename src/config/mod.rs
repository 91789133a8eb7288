//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `gateway` binary)
//!
//! ```toml
//! [gateway]
//! url = "ws://127.0.0.1:18789"
//! token = "shared-secret"
//! request_timeout_secs = 30
//!
//! [client]
//! id = "gateway-cli"
//! mode = "cli"
//! role = "operator"
//! scopes = ["operator.read", "operator.write"]
//!
//! [storage]
//! state_dir = "/var/lib/gateway-client"
//! persist_tokens = true
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::identity::IdentityStore;
use crate::protocol::MAX_MESSAGE_SIZE;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Gateway endpoint and timeouts
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// How this client presents itself
    #[serde(default)]
    pub client: ClientConfig,

    /// Identity and token storage
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("GATEWAY_URL") {
            config.gateway.url = url;
        }
        if let Ok(token) = std::env::var("GATEWAY_TOKEN") {
            if !token.trim().is_empty() {
                config.gateway.token = Some(token);
            }
        }
        if let Ok(secs) = std::env::var("GATEWAY_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.gateway.request_timeout_secs = secs;
            }
        }
        if let Ok(role) = std::env::var("GATEWAY_ROLE") {
            config.client.role = role;
        }
        if let Ok(dir) = std::env::var("GATEWAY_STATE_DIR") {
            config.storage.state_dir = Some(PathBuf::from(dir));
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs from defaults)
    pub fn merge(self, other: Self) -> Self {
        let gateway_defaults = GatewayConfig::default();
        let client_defaults = ClientConfig::default();
        let storage_defaults = StorageConfig::default();

        Self {
            gateway: GatewayConfig {
                url: pick(self.gateway.url, other.gateway.url, &gateway_defaults.url),
                token: other.gateway.token.or(self.gateway.token),
                request_timeout_secs: pick(
                    self.gateway.request_timeout_secs,
                    other.gateway.request_timeout_secs,
                    &gateway_defaults.request_timeout_secs,
                ),
                connect_timeout_secs: pick(
                    self.gateway.connect_timeout_secs,
                    other.gateway.connect_timeout_secs,
                    &gateway_defaults.connect_timeout_secs,
                ),
                challenge_timeout_ms: pick(
                    self.gateway.challenge_timeout_ms,
                    other.gateway.challenge_timeout_ms,
                    &gateway_defaults.challenge_timeout_ms,
                ),
                max_message_size: pick(
                    self.gateway.max_message_size,
                    other.gateway.max_message_size,
                    &gateway_defaults.max_message_size,
                ),
            },
            client: ClientConfig {
                id: pick(self.client.id, other.client.id, &client_defaults.id),
                mode: pick(self.client.mode, other.client.mode, &client_defaults.mode),
                display_name: other.client.display_name.or(self.client.display_name),
                role: pick(self.client.role, other.client.role, &client_defaults.role),
                scopes: pick(self.client.scopes, other.client.scopes, &client_defaults.scopes),
                locale: other.client.locale.or(self.client.locale),
            },
            storage: StorageConfig {
                state_dir: other.storage.state_dir.or(self.storage.state_dir),
                persist_tokens: pick(
                    self.storage.persist_tokens,
                    other.storage.persist_tokens,
                    &storage_defaults.persist_tokens,
                ),
            },
        }
    }
}

fn pick<T: PartialEq>(base: T, over: T, default: &T) -> T {
    if over != *default {
        over
    } else {
        base
    }
}

/// Gateway endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,

    /// Shared gateway token, used when no device token is cached
    pub token: Option<String>,

    /// Default per-request timeout in seconds (0 = no timeout)
    pub request_timeout_secs: u64,

    /// Time allowed for the `connect` response in seconds
    pub connect_timeout_secs: u64,

    /// How long to wait for a challenge before connecting without one
    pub challenge_timeout_ms: u64,

    /// Largest inbound message accepted
    pub max_message_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".to_string(),
            token: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            challenge_timeout_ms: 2000,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Client descriptor sent during the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client product id
    pub id: String,

    /// Client mode
    pub mode: String,

    /// Display name
    pub display_name: Option<String>,

    /// Requested role
    pub role: String,

    /// Requested scopes
    pub scopes: Vec<String>,

    /// Locale, e.g. `en-US`
    pub locale: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: "gateway-client".to_string(),
            mode: "cli".to_string(),
            display_name: None,
            role: "operator".to_string(),
            scopes: vec!["operator.read".to_string(), "operator.write".to_string()],
            locale: None,
        }
    }
}

/// Identity and token storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for `identity/device.json` and `identity/device-auth.json`
    pub state_dir: Option<PathBuf>,

    /// Keep device tokens on disk (false = memory only)
    pub persist_tokens: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            persist_tokens: true,
        }
    }
}

impl StorageConfig {
    /// Configured state directory or the per-user default.
    pub fn root(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(IdentityStore::default_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway.url, "ws://127.0.0.1:18789");
        assert_eq!(config.gateway.max_message_size, 16 * 1024 * 1024);
        assert_eq!(config.client.role, "operator");
        assert!(config.storage.persist_tokens);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [gateway]
            url = "wss://gateway.example.com"
            token = "secret"
            request_timeout_secs = 5

            [client]
            id = "ios"
            mode = "ui"
            scopes = ["operator.read"]

            [storage]
            state_dir = "/tmp/gw"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.gateway.url, "wss://gateway.example.com");
        assert_eq!(config.gateway.token.as_deref(), Some("secret"));
        assert_eq!(config.gateway.request_timeout_secs, 5);
        assert_eq!(config.gateway.connect_timeout_secs, 10);
        assert_eq!(config.client.mode, "ui");
        assert_eq!(config.client.role, "operator");
        assert_eq!(config.storage.root(), PathBuf::from("/tmp/gw"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[client]\nrole = \"node\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.client.role, "node");

        std::fs::write(&path, "[client\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_merge_prefers_non_default_values() {
        let file = Config {
            gateway: GatewayConfig {
                url: "ws://file:1".to_string(),
                token: Some("file-token".to_string()),
                ..GatewayConfig::default()
            },
            ..Config::default()
        };
        let cli = Config {
            gateway: GatewayConfig {
                request_timeout_secs: 3,
                ..GatewayConfig::default()
            },
            client: ClientConfig {
                role: "node".to_string(),
                ..ClientConfig::default()
            },
            ..Config::default()
        };

        let merged = file.merge(cli);
        assert_eq!(merged.gateway.url, "ws://file:1");
        assert_eq!(merged.gateway.token.as_deref(), Some("file-token"));
        assert_eq!(merged.gateway.request_timeout_secs, 3);
        assert_eq!(merged.client.role, "node");
    }
}
