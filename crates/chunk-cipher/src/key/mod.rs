//! Broker-issued keys as held in memory.
//!
//! # Security invariants
//!
//! - Secrets are never logged or included in traces; [`KeySecret`] redacts
//!   itself in `Debug` output and zeroes its buffer on drop.
//! - Attribute maps on a [`Key`] always hold plaintext. Sealed protected values
//!   exist only in [`SignedAttributes`](common::protocol::SignedAttributes)
//!   payloads.

pub mod secret;

pub use secret::{KeySecret, SecretError};

use common::protocol::AttributeMap;

/// A key minted or fetched through the broker.
#[derive(Debug, Clone)]
pub struct Key {
    pub id: String,
    pub secret: KeySecret,
    pub attributes: AttributeMap,
    pub mutable_attributes: AttributeMap,
    pub obligations: serde_json::Map<String, serde_json::Value>,
    /// Signature the broker attached to `attributes`, as received.
    pub attributes_sig: Option<String>,
    /// Signature the broker attached to `mutable_attributes`, as received.
    pub mutable_attributes_sig: Option<String>,
    pub origin: String,
}

impl Key {
    /// A key with no attributes, obligations, or signatures.
    pub fn new(id: impl Into<String>, secret: KeySecret) -> Self {
        Self {
            id: id.into(),
            secret,
            attributes: AttributeMap::new(),
            mutable_attributes: AttributeMap::new(),
            obligations: serde_json::Map::new(),
            attributes_sig: None,
            mutable_attributes_sig: None,
            origin: String::new(),
        }
    }
}
