//! Handshake `connect` parameters and the signed device proof.
//!
//! The device signs a pipe-joined canonical string:
//!
//! ```text
//! v1|<deviceId>|<clientId>|<clientMode>|<role>|<scope,scope>|<signedAtMs>|<token>
//! v2|<deviceId>|<clientId>|<clientMode>|<role>|<scope,scope>|<signedAtMs>|<token>|<nonce>
//! ```
//!
//! `v2` is used when the server issued a challenge nonce. A missing token is
//! an empty segment. Scopes are joined in the order given.

use serde::{Deserialize, Serialize};

use super::{MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
use crate::identity::DeviceIdentity;

/// Inputs to one handshake.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeInput<'a> {
    /// Client product id.
    pub client_id: &'a str,
    /// Client mode, e.g. `ui` or `node`.
    pub client_mode: &'a str,
    /// Display name shown to other clients.
    pub display_name: Option<&'a str>,
    /// Per-process instance id.
    pub instance_id: &'a str,
    /// Requested role.
    pub role: &'a str,
    /// Requested scopes.
    pub scopes: &'a [String],
    /// Bearer token to authenticate with.
    pub token: Option<&'a str>,
    /// Nonce from the server challenge.
    pub challenge_nonce: Option<&'a str>,
    /// Client locale.
    pub locale: Option<&'a str>,
}

impl HandshakeInput<'_> {
    /// Canonical string signed by the device key.
    pub fn signing_payload(&self, device_id: &str, signed_at_ms: i64) -> String {
        let version = if self.challenge_nonce.is_some() { "v2" } else { "v1" };
        let scopes = self.scopes.join(",");
        let signed_at = signed_at_ms.to_string();
        let mut parts = vec![
            version,
            device_id,
            self.client_id,
            self.client_mode,
            self.role,
            scopes.as_str(),
            signed_at.as_str(),
            self.token.unwrap_or(""),
        ];
        if let Some(nonce) = self.challenge_nonce {
            parts.push(nonce);
        }
        parts.join("|")
    }
}

/// Parameters of the `connect` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Lowest protocol version the client speaks.
    pub min_protocol: u32,
    /// Highest protocol version the client speaks.
    pub max_protocol: u32,
    /// Client descriptor.
    pub client: ClientInfo,
    /// Client capabilities.
    #[serde(default)]
    pub caps: Vec<String>,
    /// Requested role.
    pub role: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Signed device proof, absent when signing failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceAttestation>,
    /// Bearer credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthBlock>,
    /// Client locale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Client user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Describes the connecting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client product id.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Client version.
    pub version: String,
    /// Operating system.
    pub platform: String,
    /// Client mode.
    pub mode: String,
    /// Per-process instance id.
    pub instance_id: String,
}

/// Proof of possession of the device key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttestation {
    /// Device id.
    pub id: String,
    /// Public key, URL-safe base64 without padding.
    pub public_key: String,
    /// Signature over the canonical string, URL-safe base64 without padding.
    pub signature: String,
    /// Timestamp embedded in the signed string.
    pub signed_at: i64,
    /// Challenge nonce embedded in the signed string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Bearer token credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBlock {
    /// Device token or shared gateway token.
    pub token: String,
}

impl ConnectParams {
    /// Build parameters signed at the current time.
    pub fn build(input: &HandshakeInput<'_>, identity: &DeviceIdentity) -> Self {
        Self::build_at(input, identity, chrono::Utc::now().timestamp_millis())
    }

    /// Build parameters with an explicit signing timestamp.
    pub fn build_at(input: &HandshakeInput<'_>, identity: &DeviceIdentity, signed_at_ms: i64) -> Self {
        let payload = input.signing_payload(&identity.device_id, signed_at_ms);
        let device = match (identity.sign(payload.as_bytes()), identity.public_key_base64url()) {
            (Some(signature), Some(public_key)) => Some(DeviceAttestation {
                id: identity.device_id.clone(),
                public_key,
                signature,
                signed_at: signed_at_ms,
                nonce: input.challenge_nonce.map(str::to_string),
            }),
            _ => {
                tracing::debug!(device_id = %identity.device_id, "connecting without device attestation");
                None
            }
        };

        Self {
            min_protocol: MIN_PROTOCOL_VERSION,
            max_protocol: PROTOCOL_VERSION,
            client: ClientInfo {
                id: input.client_id.to_string(),
                display_name: input.display_name.map(str::to_string),
                version: crate::VERSION.to_string(),
                platform: std::env::consts::OS.to_string(),
                mode: input.client_mode.to_string(),
                instance_id: input.instance_id.to_lowercase(),
            },
            caps: Vec::new(),
            role: input.role.to_string(),
            scopes: input.scopes.to_vec(),
            device,
            auth: input.token.map(|token| AuthBlock {
                token: token.to_string(),
            }),
            locale: input.locale.map(str::to_string),
            user_agent: Some(user_agent()),
        }
    }
}

/// User agent sent with every handshake.
pub fn user_agent() -> String {
    format!(
        "gateway-client/{} ({}; {})",
        crate::VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::verify_signature;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use ed25519_dalek::SigningKey;

    fn scopes() -> Vec<String> {
        vec!["operator.read".to_string(), "operator.write".to_string()]
    }

    fn input<'a>(scopes: &'a [String], token: Option<&'a str>, nonce: Option<&'a str>) -> HandshakeInput<'a> {
        HandshakeInput {
            client_id: "cli",
            client_mode: "ui",
            display_name: Some("Laptop"),
            instance_id: "ABC-123",
            role: "operator",
            scopes,
            token,
            challenge_nonce: nonce,
            locale: None,
        }
    }

    #[test]
    fn test_signing_payload_v1() {
        let scopes = scopes();
        let payload = input(&scopes, None, None).signing_payload("dev", 1700);
        assert_eq!(payload, "v1|dev|cli|ui|operator|operator.read,operator.write|1700|");
    }

    #[test]
    fn test_signing_payload_v2_ends_with_nonce() {
        let scopes = scopes();
        let payload = input(&scopes, Some("tok"), Some("n1")).signing_payload("dev", 5);
        assert_eq!(payload, "v2|dev|cli|ui|operator|operator.read,operator.write|5|tok|n1");
        assert!(payload.ends_with("|n1"));
    }

    #[test]
    fn test_build_signs_canonical_string() {
        let identity = DeviceIdentity::from_signing_key(&SigningKey::from_bytes(&[9u8; 32]), 0);
        let scopes = scopes();
        let input = input(&scopes, Some("tok"), Some("n1"));

        let params = ConnectParams::build_at(&input, &identity, 1234);
        let device = params.device.clone().unwrap();
        assert_eq!(device.id, identity.device_id);
        assert_eq!(device.signed_at, 1234);
        assert_eq!(device.nonce.as_deref(), Some("n1"));
        assert!(!device.public_key.contains('='));

        let expected = input.signing_payload(&identity.device_id, 1234);
        assert!(verify_signature(
            expected.as_bytes(),
            &device.signature,
            &identity.public_key
        ));

        assert_eq!(params.auth.unwrap().token, "tok");
        assert_eq!(params.client.instance_id, "abc-123");
        assert_eq!(params.min_protocol, MIN_PROTOCOL_VERSION);
    }

    #[test]
    fn test_unsignable_identity_omits_device_block() {
        let identity = DeviceIdentity::generate().with_private_key(&STANDARD.encode([0u8; 5]));
        let scopes = scopes();

        let params = ConnectParams::build(&input(&scopes, Some("tok"), None), &identity);
        assert!(params.device.is_none());
        assert_eq!(params.auth.unwrap().token, "tok");
    }

    #[test]
    fn test_no_token_means_no_auth_block() {
        let identity = DeviceIdentity::generate();
        let scopes = scopes();
        let params = ConnectParams::build(&input(&scopes, None, None), &identity);

        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("auth").is_none());
        assert!(json["device"].get("nonce").is_none());
        assert_eq!(json["client"]["mode"], "ui");
        assert_eq!(json["minProtocol"], MIN_PROTOCOL_VERSION);
    }
}
