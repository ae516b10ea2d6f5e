//! Structured logging setup.
//!
//! # Telemetry invariants
//!
//! - **No key material, plaintext, or protected attribute values** may appear
//!   in any log field. Key ids, variant ids, and error codes are fine.
//! - Log level is configurable via `CHUNK_CIPHER_LOG_LEVEL` (default: `info`);
//!   `RUST_LOG` takes precedence when set.

pub mod init;

pub use init::init_telemetry;
