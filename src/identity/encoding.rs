//! Key and signature encodings.
//!
//! Keys are persisted as standard base64 of the raw key bytes. On the wire
//! they travel as URL-safe base64 without padding, like signatures.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};

/// Lowercase hex of SHA-256 over a raw public key.
pub fn device_id_for_public_key(public_key: &[u8]) -> String {
    hex_encode(&Sha256::digest(public_key))
}

/// Re-encode standard base64 as URL-safe base64 without padding.
///
/// Returns `None` when the input is not valid standard base64.
pub fn base64url_from_base64(standard: &str) -> Option<String> {
    let bytes = STANDARD.decode(standard).ok()?;
    Some(URL_SAFE_NO_PAD.encode(bytes))
}

/// Re-encode URL-safe unpadded base64 as standard padded base64.
pub fn base64_from_base64url(url_safe: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(url_safe).ok()?;
    Some(STANDARD.encode(bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{:02x}", b);
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_device_id_of_zero_key() {
        assert_eq!(
            device_id_for_public_key(&[0u8; 32]),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn test_base64url_drops_padding_and_swaps_alphabet() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet.
        assert_eq!(base64url_from_base64("+/8=").as_deref(), Some("-_8"));
        assert_eq!(base64_from_base64url("-_8").as_deref(), Some("+/8="));
    }

    #[test]
    fn test_invalid_input_is_none() {
        assert!(base64url_from_base64("not base64!").is_none());
        assert!(base64_from_base64url("+/8=").is_none());
    }

    proptest! {
        #[test]
        fn prop_reencoding_preserves_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..96)) {
            let standard = STANDARD.encode(&bytes);
            let url = base64url_from_base64(&standard).unwrap();
            prop_assert!(!url.contains('='));
            prop_assert_eq!(URL_SAFE_NO_PAD.decode(&url).unwrap(), bytes);
            prop_assert_eq!(base64_from_base64url(&url).unwrap(), standard);
        }
    }
}
