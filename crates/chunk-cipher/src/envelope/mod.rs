//! The textual chunk cipher envelope.
//!
//! # Wire format
//!
//! ```text
//! <key tag start><key id><ciphertext start><unpadded base64><ciphertext end>
//! ```
//!
//! The three delimiters are fixed per [`CipherVariant`]. Key ids never contain
//! them, and each delimiter holds at least one character outside the base64
//! alphabet, so a single left-to-right scan recovers both parts.

pub mod codec;
pub mod variant;

pub use codec::{classify, classify_any, decode, encode, ChunkInfo, Envelope, EnvelopeError};
pub use variant::{CipherVariant, PayloadAad, VariantError};
