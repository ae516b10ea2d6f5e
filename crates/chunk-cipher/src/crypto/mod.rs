//! Opaque cryptographic primitives: AES-256-GCM-SIV sealing and HMAC-SHA256.
//!
//! This module knows nothing about envelopes, attributes, or brokers.

pub mod cipher;
pub mod mac;

pub use cipher::{CipherError, KEY_LEN};
