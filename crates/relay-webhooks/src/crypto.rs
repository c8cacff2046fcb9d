//! Cryptographic operations for webhook secrets and payload signing.
//!
//! - HMAC (SHA-256 or SHA-512) payload signatures, base64-encoded
//! - `t=<ts>,v1=<sig>` signature headers with max-age verification
//! - argon2 hashing of security tokens for verification at rest
//! - AES-256-GCM encryption of the signing secret at rest

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Sha256, Sha512};

use crate::error::WebhookError;

/// Nonce size for AES-GCM (96 bits).
const NONCE_SIZE: usize = 12;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

// ---------------------------------------------------------------------------
// Signature algorithm selection
// ---------------------------------------------------------------------------

/// HMAC algorithm used for payload signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    #[default]
    HmacSha256,
    HmacSha512,
}

impl SignatureAlgorithm {
    /// Parse the configuration name (`HmacSHA256` / `HmacSHA512`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HmacSHA256" => Some(Self::HmacSha256),
            "HmacSHA512" => Some(Self::HmacSha512),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HmacSha256 => "HmacSHA256",
            Self::HmacSha512 => "HmacSHA512",
        }
    }
}

// ---------------------------------------------------------------------------
// HMAC payload signing
// ---------------------------------------------------------------------------

/// Compute a base64-encoded HMAC signature over the payload bytes.
#[must_use]
pub fn compute_signature(algorithm: SignatureAlgorithm, secret: &str, payload: &[u8]) -> String {
    let bytes = match algorithm {
        SignatureAlgorithm::HmacSha256 => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
                .expect("HMAC accepts any key length");
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        SignatureAlgorithm::HmacSha512 => {
            let mut mac = <HmacSha512 as Mac>::new_from_slice(secret.as_bytes())
                .expect("HMAC accepts any key length");
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
    };
    BASE64.encode(bytes)
}

/// Verify a signature using constant-time comparison.
#[must_use]
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    secret: &str,
    payload: &[u8],
    signature: &str,
) -> bool {
    let expected = compute_signature(algorithm, secret, payload);
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// Signature headers
// ---------------------------------------------------------------------------

/// Format a signature header: `t=<unix-seconds>,v1=<signature>`.
#[must_use]
pub fn format_signature_header(signature: &str, timestamp: i64) -> String {
    format!("t={timestamp},v1={signature}")
}

/// Parse a signature header back into `(timestamp, signature)`.
pub fn parse_signature_header(header: &str) -> Result<(i64, String), WebhookError> {
    let mut parts = header.splitn(2, ',');
    let ts_part = parts
        .next()
        .filter(|p| p.starts_with("t="))
        .ok_or_else(|| WebhookError::Validation("Invalid signature header format".into()))?;
    let sig_part = parts
        .next()
        .filter(|p| p.starts_with("v1="))
        .ok_or_else(|| WebhookError::Validation("Invalid signature header format".into()))?;

    let timestamp = ts_part[2..]
        .parse::<i64>()
        .map_err(|_| WebhookError::Validation("Invalid timestamp in signature header".into()))?;

    Ok((timestamp, sig_part[3..].to_string()))
}

/// Verify a `t=,v1=` header against the payload, rejecting signatures
/// older than `max_age_seconds`.
#[must_use]
pub fn verify_signature_header(
    algorithm: SignatureAlgorithm,
    secret: &str,
    payload: &[u8],
    header: &str,
    now_unix: i64,
    max_age_seconds: i64,
) -> bool {
    let Ok((timestamp, signature)) = parse_signature_header(header) else {
        return false;
    };
    if now_unix - timestamp > max_age_seconds {
        return false;
    }
    verify_signature(algorithm, secret, payload, &signature)
}

/// Replay-protection header value: `t=<millis>,n=<nonce>`.
#[must_use]
pub fn replay_protection_header(now_millis: i64, nonce: &str) -> String {
    format!("t={now_millis},n={nonce}")
}

// ---------------------------------------------------------------------------
// Token hashing (argon2)
// ---------------------------------------------------------------------------

/// Hash a security token for storage.
pub fn hash_security_token(token: &str) -> Result<String, WebhookError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(token.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| WebhookError::Crypto(format!("Token hashing failed: {e}")))
}

/// Verify a token against its stored hash.
#[must_use]
pub fn verify_security_token(token: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(token.as_bytes(), &parsed)
        .is_ok()
}

// ---------------------------------------------------------------------------
// Secret encryption at rest (AES-256-GCM)
// ---------------------------------------------------------------------------

/// Encrypt the signing secret for storage.
///
/// Output: base64(nonce || ciphertext || tag).
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::Crypto(format!(
            "Invalid encryption key length: expected 32 bytes, got {}",
            key.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WebhookError::Crypto(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| WebhookError::Crypto(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

/// Decrypt a stored signing secret.
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::Crypto(format!(
            "Invalid encryption key length: expected 32 bytes, got {}",
            key.len()
        )));
    }

    let raw = BASE64
        .decode(encoded)
        .map_err(|e| WebhookError::Crypto(format!("Base64 decode failed: {e}")))?;

    if raw.len() < NONCE_SIZE + 1 {
        return Err(WebhookError::Crypto("Encrypted secret too short".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| WebhookError::Crypto(e.to_string()))?;

    let nonce = Nonce::from_slice(&raw[..NONCE_SIZE]);
    let plaintext = cipher
        .decrypt(nonce, &raw[NONCE_SIZE..])
        .map_err(|e| WebhookError::Crypto(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| WebhookError::Crypto(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_deterministic() {
        let a = compute_signature(SignatureAlgorithm::HmacSha256, "secret", b"payload");
        let b = compute_signature(SignatureAlgorithm::HmacSha256, "secret", b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_is_base64() {
        let sig = compute_signature(SignatureAlgorithm::HmacSha256, "secret", b"payload");
        assert!(BASE64.decode(&sig).is_ok());
        // SHA-256 output is 32 bytes -> 44 base64 chars.
        assert_eq!(sig.len(), 44);
    }

    #[test]
    fn test_sign_then_verify() {
        let sig = compute_signature(SignatureAlgorithm::HmacSha256, "secret", b"payload");
        assert!(verify_signature(
            SignatureAlgorithm::HmacSha256,
            "secret",
            b"payload",
            &sig
        ));
    }

    #[test]
    fn test_verify_rejects_mutated_payload() {
        let sig = compute_signature(SignatureAlgorithm::HmacSha256, "secret", b"payload");
        assert!(!verify_signature(
            SignatureAlgorithm::HmacSha256,
            "secret",
            b"payloae",
            &sig
        ));
    }

    #[test]
    fn test_verify_rejects_mutated_signature() {
        let mut sig = compute_signature(SignatureAlgorithm::HmacSha256, "secret", b"payload")
            .into_bytes();
        sig[0] ^= 1;
        let sig = String::from_utf8(sig).unwrap();
        assert!(!verify_signature(
            SignatureAlgorithm::HmacSha256,
            "secret",
            b"payload",
            &sig
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let sig = compute_signature(SignatureAlgorithm::HmacSha256, "secret", b"payload");
        assert!(!verify_signature(
            SignatureAlgorithm::HmacSha256,
            "other",
            b"payload",
            &sig
        ));
    }

    #[test]
    fn test_sha512_differs_from_sha256() {
        let a = compute_signature(SignatureAlgorithm::HmacSha256, "secret", b"payload");
        let b = compute_signature(SignatureAlgorithm::HmacSha512, "secret", b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(
            SignatureAlgorithm::parse("HmacSHA256"),
            Some(SignatureAlgorithm::HmacSha256)
        );
        assert_eq!(
            SignatureAlgorithm::parse("HmacSHA512"),
            Some(SignatureAlgorithm::HmacSha512)
        );
        assert_eq!(SignatureAlgorithm::parse("HmacMD5"), None);
    }

    #[test]
    fn test_signature_header_roundtrip() {
        let header = format_signature_header("c2ln", 1706400000);
        assert_eq!(header, "t=1706400000,v1=c2ln");
        let (ts, sig) = parse_signature_header(&header).unwrap();
        assert_eq!(ts, 1706400000);
        assert_eq!(sig, "c2ln");
    }

    #[test]
    fn test_signature_header_invalid_formats() {
        assert!(parse_signature_header("").is_err());
        assert!(parse_signature_header("t=123").is_err());
        assert!(parse_signature_header("v1=sig,t=123").is_err());
        assert!(parse_signature_header("t=abc,v1=sig").is_err());
    }

    #[test]
    fn test_signature_header_verify_with_max_age() {
        let now = 1706400100;
        let sig = compute_signature(SignatureAlgorithm::HmacSha256, "secret", b"body");
        let fresh = format_signature_header(&sig, now - 60);
        let stale = format_signature_header(&sig, now - 600);

        assert!(verify_signature_header(
            SignatureAlgorithm::HmacSha256,
            "secret",
            b"body",
            &fresh,
            now,
            300
        ));
        assert!(!verify_signature_header(
            SignatureAlgorithm::HmacSha256,
            "secret",
            b"body",
            &stale,
            now,
            300
        ));
    }

    #[test]
    fn test_replay_protection_header_format() {
        let header = replay_protection_header(1706400000123, "abcd");
        assert_eq!(header, "t=1706400000123,n=abcd");
    }

    #[test]
    fn test_token_hash_and_verify() {
        let hash = hash_security_token("my-token").unwrap();
        assert_ne!(hash, "my-token");
        assert!(verify_security_token("my-token", &hash));
        assert!(!verify_security_token("other-token", &hash));
        assert!(!verify_security_token("my-token", "not-a-hash"));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0x42u8; 32];
        let encrypted = encrypt_secret("signing-secret", &key).unwrap();
        assert_eq!(decrypt_secret(&encrypted, &key).unwrap(), "signing-secret");
    }

    #[test]
    fn test_encrypt_uses_random_nonce() {
        let key = [0x42u8; 32];
        let a = encrypt_secret("same", &key).unwrap();
        let b = encrypt_secret("same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let encrypted = encrypt_secret("secret", &[0x42u8; 32]).unwrap();
        assert!(decrypt_secret(&encrypted, &[0x43u8; 32]).is_err());
    }

    #[test]
    fn test_bad_key_length_rejected() {
        assert!(encrypt_secret("x", &[0u8; 16]).is_err());
        assert!(decrypt_secret("x", &[0u8; 16]).is_err());
    }
}
