//! HMAC signature generation and verification.
//!
//! The signature is a plain HMAC-SHA256 over the exact body bytes, hex
//! encoded. There is no timestamp or nonce: every retry of a delivery carries
//! the same signature, and receivers de-duplicate on the delivery id.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length in bytes of generated subscription secrets.
pub const SECRET_BYTES: usize = 32;

/// Webhook signer for generating and verifying signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookSigner;

impl WebhookSigner {
    /// Signs `payload` with `secret`. Returns 64 lowercase hex characters.
    pub fn sign(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verifies a hex signature against the payload.
    pub fn verify(payload: &[u8], secret: &str, signature: &str) -> bool {
        match Self::sign(payload, secret) {
            Ok(expected) => constant_time_compare(&expected, &signature.to_ascii_lowercase()),
            Err(_) => false,
        }
    }

    /// Generates a new random secret, hex encoded.
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

/// Signature errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The key was rejected by the MAC.
    InvalidKey,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::InvalidKey => write!(f, "Invalid signing key"),
        }
    }
}

impl std::error::Error for SignatureError {}

impl From<SignatureError> for crate::error::WebhookError {
    fn from(err: SignatureError) -> Self {
        crate::error::WebhookError::Signature(err.to_string())
    }
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_deterministic() {
        let payload = br#"{"event":"clip.approved"}"#;

        let a = WebhookSigner::sign(payload, "test-secret").unwrap();
        let b = WebhookSigner::sign(payload, "test-secret").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_inputs_change_signature() {
        let a = WebhookSigner::sign(b"payload one", "test-secret").unwrap();
        let b = WebhookSigner::sign(b"payload two", "test-secret").unwrap();
        let c = WebhookSigner::sign(b"payload one", "other-secret").unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(b.len(), 64);
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let sig = WebhookSigner::sign(b"what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify() {
        let payload = b"test payload";
        let signature = WebhookSigner::sign(payload, "test-secret").unwrap();

        assert!(WebhookSigner::verify(payload, "test-secret", &signature));
        assert!(WebhookSigner::verify(payload, "test-secret", &signature.to_uppercase()));

        // Wrong payload should fail
        assert!(!WebhookSigner::verify(b"wrong payload", "test-secret", &signature));

        // Wrong secret should fail
        assert!(!WebhookSigner::verify(payload, "rotated", &signature));

        // Truncated signature should fail
        assert!(!WebhookSigner::verify(payload, "test-secret", &signature[..10]));
    }

    #[test]
    fn test_generate_secret() {
        let a = WebhookSigner::generate_secret();
        let b = WebhookSigner::generate_secret();

        assert_eq!(a.len(), SECRET_BYTES * 2);
        assert_ne!(a, b);
    }
}
