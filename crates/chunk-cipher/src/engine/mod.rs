//! [`ChunkCipher`]: encrypt and decrypt chunk envelopes with broker-issued keys.
//!
//! Each call is self-contained: one broker round-trip bounded by the
//! configured timeout and the caller's cancellation token, then local crypto.
//! Nothing is retried and nothing is cached between calls.

pub mod attrs;

pub use attrs::{AttributeFindings, DecryptAttributes, EncryptAttributes, FetchedKey, UnopenedAttribute};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::protocol::{
    AttributeMap, AttributeSlot, BrokerError, CreateKeySpec, CreateKeysRequest, FetchKeysRequest,
    KeyRecord, KeysResponse, SignedAttributes, UpdateKeySpec,
};
use common::{ChunkCipherError, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::attributes::{decode_slot, encode_slot, SigningContext};
use crate::broker::KeyBroker;
use crate::config::EngineConfig;
use crate::crypto::cipher;
use crate::envelope::{self, ChunkInfo, CipherVariant};
use crate::key::{Key, KeySecret};

const DEFAULT_BROKER_TIMEOUT: Duration = Duration::from_secs(30);

/// Chunk cipher engine for one [`CipherVariant`].
///
/// Cheap to share: wrap in an `Arc` and call concurrently.
pub struct ChunkCipher {
    broker: Arc<dyn KeyBroker>,
    variant: CipherVariant,
    client_secret: KeySecret,
    broker_timeout: Duration,
    strict_integrity: bool,
}

impl ChunkCipher {
    /// An engine producing `variant` envelopes.
    ///
    /// `client_secret` authenticates attribute payloads sent on key creation.
    ///
    /// # Errors
    ///
    /// [`ChunkCipherError::InvalidInput`] if the variant's delimiters are
    /// unusable or would let a built-in variant claim its envelopes.
    pub fn new(
        broker: Arc<dyn KeyBroker>,
        variant: CipherVariant,
        client_secret: KeySecret,
    ) -> Result<Self, ChunkCipherError> {
        variant
            .validate_alongside(&CipherVariant::BUILT_IN)
            .map_err(|e| ChunkCipherError::InvalidInput(e.to_string()))?;
        Ok(Self {
            broker,
            variant,
            client_secret,
            broker_timeout: DEFAULT_BROKER_TIMEOUT,
            strict_integrity: false,
        })
    }

    /// Build an engine from loaded configuration.
    pub fn from_config(broker: Arc<dyn KeyBroker>, cfg: &EngineConfig) -> anyhow::Result<Self> {
        let engine = Self::new(broker, cfg.cipher_variant()?, cfg.client_secret()?)?
            .with_broker_timeout(cfg.broker_timeout())
            .with_strict_attribute_integrity(cfg.strict_attribute_integrity);
        Ok(engine)
    }

    pub fn with_broker_timeout(mut self, timeout: Duration) -> Self {
        self.broker_timeout = timeout;
        self
    }

    /// Fail decrypts whose key attributes do not verify instead of returning
    /// the plaintext alongside the recorded failure.
    pub fn with_strict_attribute_integrity(mut self, strict: bool) -> Self {
        self.strict_integrity = strict;
        self
    }

    pub fn variant(&self) -> CipherVariant {
        self.variant
    }

    /// Encrypt `plaintext` under a freshly minted key and return the envelope.
    ///
    /// The minted key, any broker-reported condition, and attribute findings
    /// are recorded on `attrs`. Findings never fail an encrypt.
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        attrs: &mut EncryptAttributes,
    ) -> Result<String, ChunkCipherError> {
        if plaintext.is_empty() {
            return Err(ChunkCipherError::InvalidInput("plaintext must not be empty".into()));
        }
        let variant = self.variant;
        let ref_id = variant.id;

        let spec = CreateKeySpec {
            ref_id: ref_id.to_owned(),
            quantity: 1,
            attributes: self.sign_outbound(&attrs.attributes, AttributeSlot::Attributes, ref_id)?,
            mutable_attributes: self.sign_outbound(
                &attrs.mutable_attributes,
                AttributeSlot::MutableAttributes,
                ref_id,
            )?,
        };
        let request = CreateKeysRequest {
            metadata: attrs.metadata.clone(),
            keys: vec![spec],
        };
        let response = self
            .call_broker(attrs.cancellation.as_ref(), self.broker.create_keys(request))
            .await?;

        attrs.cipher_id = Some(variant.id);
        attrs.broker_error = note_broker_error(&variant, None, &response);
        let Some(record) = response.keys.into_iter().next() else {
            return Err(denied(&variant, None, attrs.broker_error.clone()));
        };

        let (key, findings) = self.open_key(&variant, record)?;
        let key_id = key.id.clone();
        let sealed = cipher::seal(plaintext, key.secret.as_bytes(), variant.payload_aad(&key_id))
            .map_err(|e| malformed(&variant, &key_id, e))?;
        attrs.key = Some(key);
        attrs.findings = findings;

        let envelope = envelope::encode(&variant, &key_id, &STANDARD.encode(sealed))
            .map_err(|e| malformed(&variant, &key_id, e))?;
        debug!(variant = variant.id, key_id = %key_id, "chunk encrypted");
        Ok(envelope)
    }

    /// Decrypt an envelope of this engine's variant.
    ///
    /// The fetched key's attributes are recorded on `attrs` whether or not
    /// they verify and open. Unless strict integrity is enabled, a failed
    /// signature or an unopenable protected attribute is reported only
    /// through `attrs`.
    pub async fn decrypt(
        &self,
        envelope: &str,
        attrs: &mut DecryptAttributes,
    ) -> Result<Vec<u8>, ChunkCipherError> {
        self.decrypt_as(self.variant, envelope, attrs).await
    }

    /// Decrypt an envelope of this engine's variant or any built-in one.
    pub async fn decrypt_auto(
        &self,
        envelope: &str,
        attrs: &mut DecryptAttributes,
    ) -> Result<Vec<u8>, ChunkCipherError> {
        let [first, second] = CipherVariant::BUILT_IN;
        let candidates = [self.variant, first, second];
        let info = envelope::classify_any(&candidates, envelope).ok_or_else(|| {
            ChunkCipherError::MalformedEnvelope {
                variant: self.variant.id.to_owned(),
                reason: "no known cipher variant recognises the envelope".into(),
            }
        })?;
        self.decrypt_as(info.variant, envelope, attrs).await
    }

    /// Fetch every key whose attributes carry `external_id`.
    ///
    /// Each key is verified and opened like a decrypt key; findings are kept
    /// per key and never fail the call. `attrs` supplies metadata and
    /// cancellation and records the broker's condition. No match is an empty
    /// result, not an error.
    pub async fn keys_by_external_id(
        &self,
        external_id: &str,
        attrs: &mut DecryptAttributes,
    ) -> Result<Vec<FetchedKey>, ChunkCipherError> {
        if external_id.is_empty() {
            return Err(ChunkCipherError::InvalidInput("external id must not be empty".into()));
        }
        let variant = self.variant;
        let request = FetchKeysRequest {
            metadata: attrs.metadata.clone(),
            key_ids: Vec::new(),
            external_ids: vec![external_id.to_owned()],
        };
        let response = self
            .call_broker(attrs.cancellation.as_ref(), self.broker.fetch_keys(request))
            .await?;

        attrs.broker_error = note_broker_error(&variant, None, &response);
        let mut fetched = Vec::with_capacity(response.keys.len());
        for record in response.keys {
            let (key, findings) = self.open_key(&variant, record)?;
            fetched.push(FetchedKey { key, findings });
        }
        debug!(variant = variant.id, external_id, keys = fetched.len(), "keys fetched by external id");
        Ok(fetched)
    }

    /// Recognise `data` as an envelope of this engine's variant.
    ///
    /// Never calls the broker.
    pub fn get_chunk_info(&self, data: &str) -> Option<ChunkInfo> {
        envelope::classify(&self.variant, data)
    }

    /// Prepare a replacement of `key`'s mutable attributes for the broker.
    ///
    /// The new attributes are protected under the key and signed with the
    /// key's current mutable signature chained in, so the broker can reject
    /// updates made from a stale view. `force` asks for an unconditional
    /// overwrite and is covered by the signature.
    pub fn prepare_mutable_update(
        &self,
        key: &Key,
        mutable_attributes: &AttributeMap,
        force: bool,
    ) -> Result<UpdateKeySpec, ChunkCipherError> {
        let ctx = SigningContext::mutable(&key.id)
            .chained(key.mutable_attributes_sig.as_deref())
            .forced(force);
        let slot = encode_slot(
            mutable_attributes,
            key.secret.as_bytes(),
            key.secret.as_bytes(),
            &ctx,
        )
        .map_err(|e| {
            ChunkCipherError::InvalidInput(format!(
                "cannot encode mutable attributes for key {}: {e}",
                key.id
            ))
        })?;
        Ok(UpdateKeySpec {
            key_id: key.id.clone(),
            mutable_attributes: slot,
            previous_sig: key.mutable_attributes_sig.clone(),
            force,
        })
    }

    async fn decrypt_as(
        &self,
        variant: CipherVariant,
        envelope: &str,
        attrs: &mut DecryptAttributes,
    ) -> Result<Vec<u8>, ChunkCipherError> {
        let parsed = envelope::decode(&variant, envelope).map_err(|e| {
            ChunkCipherError::MalformedEnvelope {
                variant: variant.id.to_owned(),
                reason: e.to_string(),
            }
        })?;
        let key_id = parsed.key_id;
        // The delimiters parsed, so the body is ciphertext as far as the
        // caller can tell; an undecodable body fails authentication.
        let sealed = STANDARD.decode(&parsed.ciphertext_b64).map_err(|e| {
            warn!(variant = variant.id, key_id = %key_id, error = %e, error_code = "decryption_failed", "ciphertext body is not canonical base64");
            ChunkCipherError::DecryptionFailed {
                variant: variant.id.to_owned(),
                key_id: key_id.clone(),
            }
        })?;

        let request = FetchKeysRequest {
            metadata: attrs.metadata.clone(),
            key_ids: vec![key_id.clone()],
            external_ids: Vec::new(),
        };
        let response = self
            .call_broker(attrs.cancellation.as_ref(), self.broker.fetch_keys(request))
            .await?;

        attrs.cipher_id = Some(variant.id);
        attrs.broker_error = note_broker_error(&variant, Some(&key_id), &response);
        let Some(record) = response.keys.into_iter().next() else {
            return Err(denied(&variant, Some(&key_id), attrs.broker_error.clone()));
        };
        if record.id != key_id {
            warn!(
                variant = variant.id,
                key_id = %key_id,
                returned = %record.id,
                error_code = "protocol_violation",
                "broker returned a different key"
            );
            return Err(ChunkCipherError::ProtocolViolation {
                variant: variant.id.to_owned(),
                requested: key_id,
                returned: record.id,
            });
        }

        let (key, findings) = self.open_key(&variant, record)?;
        let opened = cipher::open(&sealed, key.secret.as_bytes(), variant.payload_aad(&key_id));
        attrs.key = Some(key);
        attrs.findings = findings;

        let plaintext = opened.map_err(|_| {
            warn!(variant = variant.id, key_id = %key_id, error_code = "decryption_failed", "chunk failed authentication");
            ChunkCipherError::DecryptionFailed {
                variant: variant.id.to_owned(),
                key_id: key_id.clone(),
            }
        })?;

        if self.strict_integrity {
            let protected = attrs.findings.protected_errors(&key_id);
            if let Some(err) = attrs.integrity_errors().into_iter().chain(protected).next() {
                return Err(err);
            }
        }
        debug!(variant = variant.id, key_id = %key_id, "chunk decrypted");
        Ok(plaintext)
    }

    /// Protect and sign a caller-supplied attribute map for a create request.
    fn sign_outbound(
        &self,
        attrs: &AttributeMap,
        slot: AttributeSlot,
        ref_id: &str,
    ) -> Result<SignedAttributes, ChunkCipherError> {
        let secret = self.client_secret.as_bytes();
        encode_slot(attrs, secret, secret, &SigningContext::for_slot(slot, ref_id))
            .map_err(|e| ChunkCipherError::InvalidInput(format!("cannot encode {slot}: {e}")))
    }

    /// Turn a broker record into a [`Key`], verifying and opening both
    /// attribute slots under the key's own secret.
    fn open_key(
        &self,
        variant: &CipherVariant,
        record: KeyRecord,
    ) -> Result<(Key, AttributeFindings), ChunkCipherError> {
        let secret =
            KeySecret::from_base64(&record.secret).map_err(|e| malformed(variant, &record.id, e))?;
        let open = |slot: AttributeSlot, signed: &SignedAttributes| {
            decode_slot(signed, secret.as_bytes(), &SigningContext::for_slot(slot, &record.id))
                .map_err(|e| malformed(variant, &record.id, e))
        };
        let attributes = open(AttributeSlot::Attributes, &record.attributes)?;
        let mutable_attributes = open(AttributeSlot::MutableAttributes, &record.mutable_attributes)?;

        let mut findings = AttributeFindings::default();
        for (slot, decoded) in [
            (AttributeSlot::Attributes, &attributes),
            (AttributeSlot::MutableAttributes, &mutable_attributes),
        ] {
            if !decoded.signature_status.is_valid() {
                warn!(
                    variant = variant.id,
                    key_id = %record.id,
                    slot = %slot,
                    status = ?decoded.signature_status,
                    error_code = "attribute_integrity",
                    "key attribute signature did not verify"
                );
                findings.failed_slots.push(slot);
            }
            for failure in &decoded.protected_failures {
                warn!(
                    variant = variant.id,
                    key_id = %record.id,
                    attribute = failure.attribute(),
                    error = %failure.error,
                    error_code = "protected_attribute",
                    "protected attribute did not open"
                );
                findings.unopened.push(UnopenedAttribute {
                    name: failure.attribute().to_owned(),
                    sealed: failure.sealed.clone(),
                    reason: failure.error.to_string(),
                });
            }
        }

        let key = Key {
            id: record.id,
            secret,
            attributes: attributes.attributes,
            mutable_attributes: mutable_attributes.attributes,
            obligations: record.obligations,
            attributes_sig: attributes.signature,
            mutable_attributes_sig: mutable_attributes.signature,
            origin: record.origin,
        };
        Ok((key, findings))
    }

    /// Run one broker call under the timeout and the caller's cancellation.
    async fn call_broker<F>(
        &self,
        cancellation: Option<&CancellationToken>,
        call: F,
    ) -> Result<KeysResponse, ChunkCipherError>
    where
        F: Future<Output = Result<KeysResponse, TransportError>>,
    {
        let bounded = tokio::time::timeout(self.broker_timeout, call);
        let outcome = match cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(variant = self.variant.id, "broker call cancelled");
                    return Err(ChunkCipherError::Cancelled);
                }
                outcome = bounded => outcome,
            },
            None => bounded.await,
        };
        let response = outcome
            .map_err(|_| {
                warn!(variant = self.variant.id, timeout = ?self.broker_timeout, error_code = "timeout", "broker call timed out");
                ChunkCipherError::Timeout(self.broker_timeout)
            })?
            .map_err(|e| {
                warn!(variant = self.variant.id, error = %e, error_code = "broker_unavailable", "broker call failed");
                ChunkCipherError::from(e)
            })?;
        Ok(response)
    }
}

fn denied(
    variant: &CipherVariant,
    key_id: Option<&str>,
    broker_error: Option<BrokerError>,
) -> ChunkCipherError {
    warn!(
        variant = variant.id,
        key_id = key_id.unwrap_or_default(),
        error_code = "key_denied",
        "broker returned no keys"
    );
    ChunkCipherError::KeyDenied {
        variant: variant.id.to_owned(),
        key_id: key_id.map(str::to_owned),
        broker_error,
    }
}

/// Log and return the condition a broker attached to its response.
fn note_broker_error(
    variant: &CipherVariant,
    key_id: Option<&str>,
    response: &KeysResponse,
) -> Option<BrokerError> {
    if response.is_ok() {
        return None;
    }
    let err = response.error_for(key_id)?;
    warn!(
        variant = variant.id,
        key_id = key_id.unwrap_or_default(),
        broker_code = err.code,
        broker_message = %err.message,
        "broker reported an error condition"
    );
    Some(err)
}

fn malformed(variant: &CipherVariant, key_id: &str, reason: impl std::fmt::Display) -> ChunkCipherError {
    ChunkCipherError::MalformedResponse {
        variant: variant.id.to_owned(),
        key_id: key_id.to_owned(),
        reason: reason.to_string(),
    }
}
