//! Identifier and secret-material generation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

/// Bytes of entropy in a generated signing token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Generate a fresh v4 event identifier.
#[must_use]
pub fn new_event_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a url-safe signing token suitable for webhook secrets.
#[must_use]
pub fn generate_signing_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a hex nonce for replay-protection headers.
#[must_use]
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_tokens_are_unique() {
        assert_ne!(generate_signing_token(), generate_signing_token());
    }

    #[test]
    fn test_signing_token_is_url_safe() {
        let token = generate_signing_token();
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        // 32 bytes -> 43 base64url chars without padding
        assert_eq!(token.len(), 43);
    }

    #[test]
    fn test_nonce_is_hex() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
