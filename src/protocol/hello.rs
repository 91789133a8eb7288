//! The `hello-ok` payload that completes a handshake.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::frame::StateVersion;
use super::TICK_MISS_FACTOR;
use crate::error::{GatewayError, Result};

/// Payload of the successful `connect` response.
///
/// Only `policy` is required. Everything else defaults when the server
/// leaves it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    /// Payload discriminator, `"hello-ok"` when present.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Protocol version selected by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,
    /// Server build information.
    #[serde(default)]
    pub server: ServerInfo,
    /// Methods and events the server supports.
    #[serde(default)]
    pub features: Features,
    /// Initial state snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    /// Canvas host for UI clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_host_url: Option<String>,
    /// Device token grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthGrant>,
    /// Limits for this connection.
    pub policy: ConnectionPolicy,
}

impl HelloOk {
    /// Reject a server protocol version outside `[min, max]`.
    ///
    /// A server that does not report a version is accepted.
    pub fn check_protocol(&self, min: u32, max: u32) -> Result<()> {
        match self.protocol {
            Some(v) if v < min || v > max => Err(GatewayError::Handshake(format!(
                "server protocol {v} outside supported range {min}..={max}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Server identification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Source revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Server-assigned connection id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,
}

/// Advertised methods and events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// Callable methods.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Events the server may push.
    #[serde(default)]
    pub events: Vec<String>,
}

impl Features {
    /// Whether the server advertises `method`.
    pub fn supports_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Server state at connect time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Connected presences.
    #[serde(default)]
    pub presence: Vec<Value>,
    /// Health report.
    #[serde(default)]
    pub health: Value,
    /// Versions the snapshot reflects.
    #[serde(default)]
    pub state_version: StateVersion,
    /// Server uptime.
    #[serde(default)]
    pub uptime_ms: u64,
}

/// Device token issued by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthGrant {
    /// Token to present on later connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    /// Role granted, defaults to the requested role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Scopes granted.
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Per-connection limits. Zero disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPolicy {
    /// Heartbeat interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Largest frame the client may send, in bytes.
    pub max_payload: usize,
    /// Most bytes that may sit in the send queue.
    pub max_buffered_bytes: usize,
}

impl ConnectionPolicy {
    /// Heartbeat interval, `None` when disabled.
    pub fn tick_interval(&self) -> Option<Duration> {
        (self.tick_interval_ms > 0).then(|| Duration::from_millis(self.tick_interval_ms))
    }

    /// Inbound silence after which the connection is considered dead.
    pub fn liveness_deadline(&self) -> Option<Duration> {
        self.tick_interval().map(|t| t * TICK_MISS_FACTOR)
    }

    /// Frame size limit, `None` when unlimited.
    pub fn payload_limit(&self) -> Option<usize> {
        (self.max_payload > 0).then_some(self.max_payload)
    }

    /// Send queue limit, `None` when unlimited.
    pub fn buffer_limit(&self) -> Option<usize> {
        (self.max_buffered_bytes > 0).then_some(self.max_buffered_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_hello_ok() {
        let hello: HelloOk = serde_json::from_value(json!({
            "auth": {"deviceToken": "dtok", "role": "operator", "scopes": ["operator.read"]},
            "policy": {"tickIntervalMs": 15000, "maxPayload": 1048576, "maxBufferedBytes": 4194304}
        }))
        .unwrap();

        let auth = hello.auth.unwrap();
        assert_eq!(auth.device_token.as_deref(), Some("dtok"));
        assert_eq!(hello.policy.tick_interval(), Some(Duration::from_secs(15)));
        assert_eq!(hello.policy.liveness_deadline(), Some(Duration::from_secs(30)));
        assert!(hello.features.methods.is_empty());
    }

    #[test]
    fn test_full_hello_ok() {
        let hello: HelloOk = serde_json::from_value(json!({
            "type": "hello-ok",
            "protocol": 3,
            "server": {"version": "1.2.0", "connId": "c-1"},
            "features": {"methods": ["health", "chat.send"], "events": ["tick"]},
            "snapshot": {"presence": [], "health": {}, "stateVersion": {"presence": 1, "health": 2}, "uptimeMs": 10},
            "policy": {"tickIntervalMs": 0, "maxPayload": 0, "maxBufferedBytes": 0}
        }))
        .unwrap();

        assert_eq!(hello.kind.as_deref(), Some("hello-ok"));
        assert_eq!(hello.server.conn_id.as_deref(), Some("c-1"));
        assert!(hello.features.supports_method("chat.send"));
        assert_eq!(hello.snapshot.unwrap().state_version.health, 2);
        assert_eq!(hello.policy.tick_interval(), None);
        assert_eq!(hello.policy.payload_limit(), None);
        assert_eq!(hello.policy.buffer_limit(), None);
    }

    #[test]
    fn test_missing_policy_is_rejected() {
        let result = serde_json::from_value::<HelloOk>(json!({"auth": {"deviceToken": "x"}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_protocol_range_check() {
        let mut hello: HelloOk = serde_json::from_value(json!({
            "policy": {"tickIntervalMs": 1, "maxPayload": 1, "maxBufferedBytes": 1}
        }))
        .unwrap();
        assert!(hello.check_protocol(3, 3).is_ok());

        hello.protocol = Some(3);
        assert!(hello.check_protocol(3, 3).is_ok());

        hello.protocol = Some(2);
        assert!(matches!(
            hello.check_protocol(3, 3),
            Err(GatewayError::Handshake(_))
        ));
    }
}
