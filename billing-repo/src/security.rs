//! Webhook signature helpers.
//!
//! The provider signs every webhook body with HMAC-SHA512 keyed by the
//! merchant secret and sends the lowercase hex digest in a header.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;

type HmacSha512 = Hmac<Sha512>;

/// Signs a payload using HMAC-SHA512, returning lowercase hex.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC takes keys of any size
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a webhook signature using constant-time comparison.
///
/// `payload` must be the exact bytes received; re-serialized JSON will not
/// match.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let signature = signature.trim().to_ascii_lowercase();
    if signature.is_empty() {
        return false;
    }
    let expected = sign_payload(payload, secret);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}
