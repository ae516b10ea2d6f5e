//! `chunk-cipher`: text envelopes around AEAD ciphertext, keyed by a remote
//! key broker.
//!
//! An envelope names the key that sealed it:
//!
//! ```text
//! ~!2!<key id>!2!<unpadded base64 ciphertext>!2!~
//! ```
//!
//! [`ChunkCipher::encrypt`] asks the broker to mint a key carrying the
//! caller's signed attributes, seals the plaintext under it, and returns the
//! envelope. [`ChunkCipher::decrypt`] fetches the named key, verifies its
//! attributes, and opens the payload. Brokers plug in through [`KeyBroker`].

pub mod attributes;
pub mod broker;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod envelope;
pub mod key;
pub mod telemetry;

pub use broker::KeyBroker;
pub use common::protocol::{AttributeMap, AttributeSlot};
pub use common::{ChunkCipherError, TransportError};
pub use config::EngineConfig;
pub use engine::{
    AttributeFindings, ChunkCipher, DecryptAttributes, EncryptAttributes, FetchedKey, UnopenedAttribute,
};
pub use envelope::{ChunkInfo, CipherVariant};
pub use key::{Key, KeySecret};
