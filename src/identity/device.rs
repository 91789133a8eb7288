//! Ed25519 device identity.

use std::fmt;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::encoding::{base64url_from_base64, device_id_for_public_key};

/// A long-lived Ed25519 keypair and the id derived from it.
///
/// Keys hold the standard base64 encoding of the raw 32-byte key, which is
/// also the persisted form. `device_id` is always the lowercase hex SHA-256
/// of the raw public key.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Stable device identifier.
    pub device_id: String,
    /// Standard base64 of the raw public key.
    pub public_key: String,
    private_key: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at_ms: i64,
}

impl DeviceIdentity {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(&signing_key, chrono::Utc::now().timestamp_millis())
    }

    /// Build an identity from an existing signing key.
    pub fn from_signing_key(signing_key: &SigningKey, created_at_ms: i64) -> Self {
        let public = signing_key.verifying_key().to_bytes();
        let private = Zeroizing::new(signing_key.to_bytes());
        Self {
            device_id: device_id_for_public_key(&public),
            public_key: STANDARD.encode(public),
            private_key: STANDARD.encode(private.as_slice()),
            created_at_ms,
        }
    }

    /// Whether every field is present and `device_id` matches the public key.
    pub fn is_valid(&self) -> bool {
        if self.device_id.is_empty() || self.public_key.is_empty() || self.private_key.is_empty() {
            return false;
        }
        match STANDARD.decode(&self.public_key) {
            Ok(raw) => device_id_for_public_key(&raw) == self.device_id,
            Err(_) => false,
        }
    }

    /// Public key as sent on the wire (URL-safe base64, no padding).
    pub fn public_key_base64url(&self) -> Option<String> {
        base64url_from_base64(&self.public_key)
    }

    /// Sign `payload` with the device key.
    ///
    /// Returns the signature as URL-safe base64 without padding, or `None`
    /// when the stored private key cannot be decoded.
    pub fn sign(&self, payload: &[u8]) -> Option<String> {
        let signing_key = match self.signing_key() {
            Ok(key) => key,
            Err(reason) => {
                tracing::warn!(device_id = %self.device_id, %reason, "device key unusable, not signing");
                return None;
            }
        };
        let signature = signing_key.sign(payload);
        Some(URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }

    /// Check a URL-safe base64 signature over `payload` against this identity.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        verify_signature(payload, signature, &self.public_key)
    }

    fn signing_key(&self) -> std::result::Result<SigningKey, String> {
        let raw = Zeroizing::new(
            STANDARD
                .decode(&self.private_key)
                .map_err(|e| format!("private key is not base64: {e}"))?,
        );
        let bytes: &[u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| format!("private key is {} bytes, expected 32", raw.len()))?;
        Ok(SigningKey::from_bytes(bytes))
    }

    #[cfg(test)]
    pub(crate) fn with_private_key(mut self, private_key: &str) -> Self {
        self.private_key = private_key.to_string();
        self
    }
}

/// Verify a URL-safe base64 Ed25519 signature.
///
/// `public_key` is the standard base64 of the raw public key.
pub fn verify_signature(payload: &[u8], signature: &str, public_key: &str) -> bool {
    let Ok(public) = STANDARD.decode(public_key) else {
        return false;
    };
    let Ok(public) = <[u8; 32]>::try_from(public.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public) else {
        return false;
    };
    let Ok(sig) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig) else {
        return false;
    };
    verifying_key.verify(payload, &sig).is_ok()
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Don't leak key material in debug output
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .field("created_at_ms", &self.created_at_ms)
            .finish()
    }
}

impl Drop for DeviceIdentity {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_is_valid() {
        let identity = DeviceIdentity::generate();
        assert!(identity.is_valid());
        assert_eq!(identity.device_id.len(), 64);
        assert!(identity.created_at_ms > 0);
    }

    #[test]
    fn test_sign_and_verify() {
        let identity = DeviceIdentity::generate();
        let signature = identity.sign(b"v1|abc|cli|ui|operator||1|").unwrap();

        assert!(!signature.contains('='));
        assert!(!signature.contains('+'));
        assert!(identity.verify(b"v1|abc|cli|ui|operator||1|", &signature));
        assert!(!identity.verify(b"v1|abc|cli|ui|operator||2|", &signature));
    }

    #[test]
    fn test_signatures_are_deterministic() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let identity = DeviceIdentity::from_signing_key(&key, 1);
        assert_eq!(identity.sign(b"payload"), identity.sign(b"payload"));
    }

    #[test]
    fn test_undecodable_private_key_does_not_sign() {
        let identity = DeviceIdentity::generate().with_private_key("%%%");
        assert!(identity.sign(b"payload").is_none());

        let short = DeviceIdentity::generate().with_private_key(&STANDARD.encode([1u8; 16]));
        assert!(short.sign(b"payload").is_none());
    }

    #[test]
    fn test_tampered_device_id_is_invalid() {
        let mut identity = DeviceIdentity::generate();
        identity.device_id = "0".repeat(64);
        assert!(!identity.is_valid());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let identity = DeviceIdentity::generate();
        let debug = format!("{:?}", identity);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&identity.private_key));
    }

    #[test]
    fn test_persisted_field_names() {
        let identity = DeviceIdentity::from_signing_key(&SigningKey::from_bytes(&[1u8; 32]), 42);
        let json = serde_json::to_value(&identity).unwrap();
        for field in ["deviceId", "publicKey", "privateKey", "createdAtMs"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["createdAtMs"], 42);
    }
}
