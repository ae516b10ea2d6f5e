//! Key attribute integrity: canonicalisation, signing, and protected values.
//!
//! # Module invariants
//!
//! - **Signatures cover bytes, not structures.** Inbound signatures are checked
//!   against the attribute string exactly as received, before parsing.
//! - **Plaintext in memory, sealed on the wire.** Protected values are sealed
//!   only by [`payload::encode_slot`] and opened only by [`payload::decode_slot`].

pub mod canonical;
pub mod payload;
pub mod protected;
pub mod signer;

pub use canonical::canonicalize;
pub use payload::{decode_slot, encode_slot, AttributeError, DecodedSlot, SignatureStatus};
pub use protected::{is_protected, OpenFailure, ProtectError};
pub use signer::SigningContext;
