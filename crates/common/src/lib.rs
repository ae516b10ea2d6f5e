//! Broker wire protocol types and the error taxonomy shared across `chunk-cipher` crates.

pub mod error;
pub mod protocol;

pub use error::{ChunkCipherError, TransportError};
