//! Small cryptographic helpers shared by sessions, verification tokens and webhooks.

use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Generates 32 bytes (256 bits) of secure random data, base64url encoded without padding.
///
/// Used for bearer session tokens and verification token secrets.
pub fn generate_secret_token() -> String {
    let mut bytes = [0u8; 32];
    rng().fill(&mut bytes);

    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{digest:x}")
}

/// Lowercase hex HMAC-SHA256 of `message` under `key`.
pub fn hmac_sha256_hex(key: &[u8], message: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(message.as_bytes());
    Some(format!("{:x}", mac.finalize().into_bytes()))
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secret_token_format() {
        let token = generate_secret_token();

        // 32 bytes -> 43 base64url chars without padding
        assert_eq!(token.len(), 43);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_secret_token());
    }

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hmac_sha256_hex_depends_on_key() {
        let a = hmac_sha256_hex(b"key-one", "message").unwrap();
        let b = hmac_sha256_hex(b"key-two", "message").unwrap();

        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(Some(a), hmac_sha256_hex(b"key-one", "message"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
