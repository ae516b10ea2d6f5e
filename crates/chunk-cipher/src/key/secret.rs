//! [`KeySecret`]: fixed-size key material that wipes itself on drop.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use crate::crypto::KEY_LEN;

/// Errors produced when materialising key bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    /// The key material has an unexpected length.
    #[error("key secret has invalid length: expected {KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),

    /// The key material is not valid standard base64.
    #[error("key secret is not valid base64")]
    InvalidBase64,
}

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// When this type is dropped, the memory is overwritten with zeroes to
/// minimise the window during which plaintext key material lives in RAM.
#[derive(Clone, PartialEq, Eq)]
pub struct KeySecret(Box<[u8; KEY_LEN]>);

impl KeySecret {
    /// Copy `bytes` into a new secret.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::InvalidLength`] if the slice has the wrong length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SecretError> {
        if bytes.len() != KEY_LEN {
            return Err(SecretError::InvalidLength(bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Decode standard base64 key material, as carried in broker responses.
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let mut bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| SecretError::InvalidBase64)?;
        let secret = Self::from_slice(&bytes);
        bytes.iter_mut().for_each(|b| *b = 0);
        secret
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    /// Standard base64 of the key bytes, for handing back to a broker.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0[..])
    }
}

impl Drop for KeySecret {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for KeySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("KeySecret([REDACTED])")
    }
}
