//! AES-256-GCM-SIV sealing of payloads and protected attribute values.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant,
//! so an accidental nonce repeat degrades to revealing equal plaintexts rather
//! than breaking authentication. A fresh random nonce is still drawn per call.
//!
//! # Sealed layout
//!
//! ```text
//! nonce (12 bytes) || ciphertext || tag (16 bytes)
//! ```

use aes_gcm_siv::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the authentication tag appended by AES-GCM-SIV.
pub const TAG_LEN: usize = 16;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The sealed buffer is too short to hold a nonce and a tag.
    #[error("sealed data truncated: {0} bytes")]
    Truncated(usize),

    /// Encryption failed or authentication did not verify.
    #[error("aead operation failed")]
    AeadFailure,
}

/// Seal `plaintext` under `key`, binding `aad` into the tag.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `key` is not [`KEY_LEN`] bytes.
pub fn seal(plaintext: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;

    use aes_gcm_siv::aead::rand_core::RngCore;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CipherError::AeadFailure)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a buffer produced by [`seal`].
///
/// # Errors
///
/// Returns [`CipherError::AeadFailure`] on a wrong key, wrong `aad`, or any
/// modification of `sealed`. No partial plaintext is ever returned.
pub fn open(sealed: &[u8], key: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(key)?;
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::Truncated(sealed.len()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CipherError::AeadFailure)
}

fn build_cipher(key: &[u8]) -> Result<Aes256GcmSiv, CipherError> {
    if key.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength(key.len()));
    }
    Aes256GcmSiv::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))
}
