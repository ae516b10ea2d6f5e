//! Per-call inputs and outputs of [`ChunkCipher`](super::ChunkCipher) operations.

use common::protocol::{AttributeMap, AttributeSlot, BrokerError, RequestMetadata};
use common::ChunkCipherError;
use tokio_util::sync::CancellationToken;

use crate::key::Key;

/// Attribute problems found while opening a broker-issued key.
///
/// Neither kind stops the operation; both are kept here for the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeFindings {
    /// Slots whose signature was invalid or missing.
    pub failed_slots: Vec<AttributeSlot>,
    /// Protected attributes that failed to open.
    pub unopened: Vec<UnopenedAttribute>,
}

/// A protected attribute left sealed, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnopenedAttribute {
    pub name: String,
    /// Values exactly as the broker returned them.
    pub sealed: Vec<String>,
    /// Why opening failed.
    pub reason: String,
}

impl AttributeFindings {
    pub fn is_clean(&self) -> bool {
        self.failed_slots.is_empty() && self.unopened.is_empty()
    }

    /// One [`ChunkCipherError::AttributeIntegrity`] per failed slot.
    pub fn integrity_errors(&self, variant: &str, key_id: &str) -> Vec<ChunkCipherError> {
        self.failed_slots
            .iter()
            .map(|slot| ChunkCipherError::AttributeIntegrity {
                variant: variant.to_owned(),
                key_id: key_id.to_owned(),
                slot: *slot,
            })
            .collect()
    }

    /// One [`ChunkCipherError::ProtectedAttribute`] per unopened attribute.
    pub fn protected_errors(&self, key_id: &str) -> Vec<ChunkCipherError> {
        self.unopened
            .iter()
            .map(|attr| ChunkCipherError::ProtectedAttribute {
                key_id: key_id.to_owned(),
                name: attr.name.clone(),
            })
            .collect()
    }
}

/// A key returned by an external-id fetch, with what was found opening it.
#[derive(Debug, Clone)]
pub struct FetchedKey {
    pub key: Key,
    pub findings: AttributeFindings,
}

/// Inputs and captured results of one encrypt call.
#[derive(Debug, Default)]
pub struct EncryptAttributes {
    /// Forwarded verbatim to the broker.
    pub metadata: RequestMetadata,
    /// Immutable attributes for the new key.
    pub attributes: AttributeMap,
    /// Mutable attributes for the new key.
    pub mutable_attributes: AttributeMap,
    /// Cancels the broker round-trip when triggered.
    pub cancellation: Option<CancellationToken>,

    pub(crate) cipher_id: Option<&'static str>,
    pub(crate) key: Option<Key>,
    pub(crate) broker_error: Option<BrokerError>,
    pub(crate) findings: AttributeFindings,
}

impl EncryptAttributes {
    pub fn new(attributes: AttributeMap, mutable_attributes: AttributeMap) -> Self {
        Self {
            attributes,
            mutable_attributes,
            ..Self::default()
        }
    }

    /// Id of the variant that produced the envelope.
    pub fn cipher_id(&self) -> Option<&'static str> {
        self.cipher_id
    }

    /// The key the broker minted, attributes as returned and opened.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Condition the broker reported, even when a key was still issued.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        self.broker_error.as_ref()
    }

    pub fn findings(&self) -> &AttributeFindings {
        &self.findings
    }
}

/// Inputs and captured results of one decrypt call.
#[derive(Debug, Default)]
pub struct DecryptAttributes {
    /// Forwarded verbatim to the broker.
    pub metadata: RequestMetadata,
    /// Cancels the broker round-trip when triggered.
    pub cancellation: Option<CancellationToken>,

    pub(crate) cipher_id: Option<&'static str>,
    pub(crate) key: Option<Key>,
    pub(crate) broker_error: Option<BrokerError>,
    pub(crate) findings: AttributeFindings,
}

impl DecryptAttributes {
    pub fn new(metadata: RequestMetadata) -> Self {
        Self {
            metadata,
            ..Self::default()
        }
    }

    pub fn cipher_id(&self) -> Option<&'static str> {
        self.cipher_id
    }

    /// The fetched key, recorded whether or not its signatures verified.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Plaintext immutable attributes of the fetched key.
    pub fn attributes(&self) -> Option<&AttributeMap> {
        self.key.as_ref().map(|k| &k.attributes)
    }

    /// Plaintext mutable attributes of the fetched key.
    pub fn mutable_attributes(&self) -> Option<&AttributeMap> {
        self.key.as_ref().map(|k| &k.mutable_attributes)
    }

    pub fn broker_error(&self) -> Option<&BrokerError> {
        self.broker_error.as_ref()
    }

    pub fn findings(&self) -> &AttributeFindings {
        &self.findings
    }

    /// Integrity errors for the fetched key; empty when every signature verified.
    pub fn integrity_errors(&self) -> Vec<ChunkCipherError> {
        match (&self.key, self.cipher_id) {
            (Some(key), Some(variant)) => self.findings.integrity_errors(variant, &key.id),
            _ => Vec::new(),
        }
    }
}
