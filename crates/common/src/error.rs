//! Error taxonomy shared by the chunk cipher and key broker implementations.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{AttributeSlot, BrokerError};

/// Failure of the transport underneath a key broker call.
///
/// Distinct from a [`BrokerError`], which is a condition the broker itself
/// reported in an otherwise well-formed response.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Top-level error for encrypt, decrypt, and update preparation.
///
/// None of these are retried internally. [`ChunkCipherError::caller_may_retry`]
/// reports which ones a caller may reasonably retry.
#[derive(Debug, Error)]
pub enum ChunkCipherError {
    /// Empty plaintext, an unusable key id, or another caller mistake.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The envelope string does not match the variant's wire format.
    #[error("malformed {variant} envelope: {reason}")]
    MalformedEnvelope { variant: String, reason: String },

    /// The broker returned no keys.
    #[error("key denied by broker ({variant}, key {}){}", key_id.as_deref().unwrap_or("<new>"), broker_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    KeyDenied {
        variant: String,
        key_id: Option<String>,
        broker_error: Option<BrokerError>,
    },

    /// The broker answered with a key other than the one requested.
    #[error("broker returned key {returned} when {requested} was requested ({variant})")]
    ProtocolViolation {
        variant: String,
        requested: String,
        returned: String,
    },

    /// The broker's response could not be interpreted (bad key material or
    /// attribute JSON).
    #[error("malformed broker response for key {key_id} ({variant}): {reason}")]
    MalformedResponse {
        variant: String,
        key_id: String,
        reason: String,
    },

    /// A signature over the key's attributes did not verify.
    #[error("{slot} signature mismatch on key {key_id} ({variant})")]
    AttributeIntegrity {
        variant: String,
        key_id: String,
        slot: AttributeSlot,
    },

    /// A protected attribute value could not be opened.
    #[error("protected attribute {name} on key {key_id} failed authentication")]
    ProtectedAttribute { key_id: String, name: String },

    /// The payload failed authentication under the fetched key.
    #[error("decryption failed under key {key_id} ({variant})")]
    DecryptionFailed { variant: String, key_id: String },

    /// The broker could not be reached or its response could not be read.
    #[error("key broker unavailable: {0}")]
    BrokerUnavailable(#[from] TransportError),

    /// The broker call exceeded the configured timeout.
    #[error("key broker call timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the operation while a broker call was in flight.
    #[error("operation cancelled")]
    Cancelled,
}

impl ChunkCipherError {
    /// Short machine-readable code suitable for log fields and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            ChunkCipherError::InvalidInput(_) => "invalid_input",
            ChunkCipherError::MalformedEnvelope { .. } => "malformed_envelope",
            ChunkCipherError::KeyDenied { .. } => "key_denied",
            ChunkCipherError::ProtocolViolation { .. } => "protocol_violation",
            ChunkCipherError::MalformedResponse { .. } => "malformed_response",
            ChunkCipherError::AttributeIntegrity { .. } => "attribute_integrity",
            ChunkCipherError::ProtectedAttribute { .. } => "protected_attribute",
            ChunkCipherError::DecryptionFailed { .. } => "decryption_failed",
            ChunkCipherError::BrokerUnavailable(_) => "broker_unavailable",
            ChunkCipherError::Timeout(_) => "timeout",
            ChunkCipherError::Cancelled => "cancelled",
        }
    }

    /// Whether a caller may retry the whole operation.
    ///
    /// Retrying an encrypt mints a new key; the key id is not reused.
    pub fn caller_may_retry(&self) -> bool {
        matches!(
            self,
            ChunkCipherError::KeyDenied { .. }
                | ChunkCipherError::BrokerUnavailable(_)
                | ChunkCipherError::Timeout(_)
        )
    }
}
