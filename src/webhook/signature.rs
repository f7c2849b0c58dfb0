//! HMAC-SHA256 webhook signatures
//!
//! The sender signs the raw request body with the shared secret and sends the
//! lowercase hex digest in a header. Comparison is constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing signature header")]
    Missing,

    #[error("Signature mismatch")]
    Mismatch,

    #[error("Invalid signing key")]
    InvalidKey,
}

/// Hex-encoded HMAC-SHA256 of `body`
pub fn compute_signature(secret: &[u8], body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received signature against the raw body.
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    provided: Option<&str>,
) -> Result<(), SignatureError> {
    let provided = provided
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::Missing)?;

    let expected = compute_signature(secret, body)?;
    let provided = provided.to_ascii_lowercase();

    // ct_eq on unequal lengths returns false without early exit on content
    if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
