//! HMAC-SHA256 tags with constant-time verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Byte length of an HMAC-SHA256 tag.
pub const TAG_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum MacError {
    /// HMAC accepts keys of any length; an empty key is still refused.
    #[error("mac key must not be empty")]
    EmptyKey,
}

/// Compute HMAC-SHA256 of `message` under `key`.
pub fn tag(key: &[u8], message: &[u8]) -> Result<[u8; TAG_LEN], MacError> {
    let mut mac = new_mac(key)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Check `expected` against HMAC-SHA256 of `message` in constant time.
pub fn verify(key: &[u8], message: &[u8], expected: &[u8]) -> Result<bool, MacError> {
    let mut mac = new_mac(key)?;
    mac.update(message);
    Ok(mac.verify_slice(expected).is_ok())
}

fn new_mac(key: &[u8]) -> Result<HmacSha256, MacError> {
    if key.is_empty() {
        return Err(MacError::EmptyKey);
    }
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| MacError::EmptyKey)
}
