//! In-memory broker test double.
//!
//! Behaves like a real broker as far as the client can observe: it checks the
//! client's signatures, opens protected values with the client secret, mints
//! keys, and re-seals and re-signs attributes under each minted key.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use common::protocol::{
    AttributeSlot, BrokerError, CreateKeysRequest, FetchKeysRequest, KeyError, KeyRecord,
    KeysResponse, SignedAttributes, UpdateKeySpec, EXTERNAL_ID_ATTRIBUTE,
};
use common::TransportError;

use super::KeyBroker;
use crate::attributes::{canonical, decode_slot, encode_slot, SigningContext};
use crate::key::KeySecret;

pub(crate) const DENIED: i32 = 40003;
pub(crate) const UNKNOWN_KEY: i32 = 40004;

pub(crate) struct InMemoryBroker {
    client_secret: KeySecret,
    minted: Mutex<VecDeque<(String, KeySecret)>>,
    records: Mutex<HashMap<String, KeyRecord>>,
    counter: Mutex<u8>,
    /// Refuse every create and fetch.
    pub(crate) deny: bool,
    /// Answer fetches with this id instead of the stored one.
    pub(crate) answer_as: Option<String>,
    /// Attach this condition to otherwise successful responses.
    pub(crate) degraded: Option<BrokerError>,
}

impl InMemoryBroker {
    pub(crate) fn new(client_secret: KeySecret) -> Self {
        Self {
            client_secret,
            minted: Mutex::new(VecDeque::new()),
            records: Mutex::new(HashMap::new()),
            counter: Mutex::new(0),
            deny: false,
            answer_as: None,
            degraded: None,
        }
    }

    /// Queue the id and secret of the next minted key.
    pub(crate) fn will_mint(self, id: &str, secret: &[u8]) -> Self {
        let secret = KeySecret::from_slice(secret).expect("32-byte test secret");
        self.minted
            .lock()
            .unwrap()
            .push_back((id.to_owned(), secret));
        self
    }

    /// Mutate a stored record, simulating server-side or in-transit tampering.
    pub(crate) fn tamper(&self, id: &str, f: impl FnOnce(&mut KeyRecord)) {
        let mut records = self.records.lock().unwrap();
        f(records.get_mut(id).expect("stored key"));
    }

    /// Apply a prepared mutable-attribute update the way a broker would.
    pub(crate) fn apply_update(&self, spec: &UpdateKeySpec) -> Result<(), &'static str> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&spec.key_id).ok_or("unknown key")?;
        if !spec.force && spec.previous_sig != record.mutable_attributes.sig {
            return Err("stale update");
        }
        let secret = KeySecret::from_base64(&record.secret).map_err(|_| "bad secret")?;
        let ctx = SigningContext::mutable(&spec.key_id)
            .chained(spec.previous_sig.as_deref())
            .forced(spec.force);
        let decoded = decode_slot(&spec.mutable_attributes, secret.as_bytes(), &ctx)
            .map_err(|_| "malformed update")?;
        if !decoded.signature_status.is_valid() {
            return Err("bad signature");
        }
        record.mutable_attributes = encode_slot(
            &decoded.attributes,
            secret.as_bytes(),
            secret.as_bytes(),
            &SigningContext::mutable(&spec.key_id),
        )
        .map_err(|_| "reseal failed")?;
        Ok(())
    }

    fn next_key(&self) -> (String, KeySecret) {
        if let Some(next) = self.minted.lock().unwrap().pop_front() {
            return next;
        }
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        let secret = KeySecret::from_slice(&[*counter; 32]).expect("32-byte secret");
        (format!("key.{counter}"), secret)
    }

    fn reseal(
        &self,
        signed: &SignedAttributes,
        slot: AttributeSlot,
        ref_id: &str,
        key_id: &str,
        key_secret: &KeySecret,
    ) -> Option<SignedAttributes> {
        let inbound = SigningContext::for_slot(slot, ref_id);
        let outbound = SigningContext::for_slot(slot, key_id);
        let decoded = decode_slot(signed, self.client_secret.as_bytes(), &inbound).ok()?;
        if !decoded.signature_status.is_valid() || !decoded.protected_failures.is_empty() {
            return None;
        }
        encode_slot(
            &decoded.attributes,
            key_secret.as_bytes(),
            key_secret.as_bytes(),
            &outbound,
        )
        .ok()
    }

    fn has_external_id(record: &KeyRecord, wanted: &[String]) -> bool {
        let Ok(attrs) = canonical::parse(&record.attributes.attrs) else {
            return false;
        };
        attrs
            .get(EXTERNAL_ID_ATTRIBUTE)
            .is_some_and(|values| values.iter().any(|v| wanted.contains(v)))
    }
}

fn denied(message: &str) -> KeysResponse {
    KeysResponse {
        keys: Vec::new(),
        error: Some(BrokerError {
            code: DENIED,
            message: message.to_owned(),
        }),
        key_errors: Vec::new(),
    }
}

#[async_trait]
impl KeyBroker for InMemoryBroker {
    async fn create_keys(&self, request: CreateKeysRequest) -> Result<KeysResponse, TransportError> {
        if self.deny {
            return Ok(denied("policy"));
        }
        let mut keys = Vec::new();
        for spec in &request.keys {
            for _ in 0..spec.quantity {
                let (id, secret) = self.next_key();
                let Some(attributes) =
                    self.reseal(&spec.attributes, AttributeSlot::Attributes, &spec.ref_id, &id, &secret)
                else {
                    return Ok(denied("attribute signature"));
                };
                let Some(mutable_attributes) = self.reseal(
                    &spec.mutable_attributes,
                    AttributeSlot::MutableAttributes,
                    &spec.ref_id,
                    &id,
                    &secret,
                ) else {
                    return Ok(denied("mutable attribute signature"));
                };
                let record = KeyRecord {
                    id: id.clone(),
                    secret: secret.to_base64(),
                    ref_id: spec.ref_id.clone(),
                    attributes,
                    mutable_attributes,
                    obligations: Default::default(),
                    origin: "memory".into(),
                };
                self.records.lock().unwrap().insert(id, record.clone());
                keys.push(record);
            }
        }
        Ok(KeysResponse {
            keys,
            error: self.degraded.clone(),
            key_errors: Vec::new(),
        })
    }

    async fn fetch_keys(&self, request: FetchKeysRequest) -> Result<KeysResponse, TransportError> {
        if self.deny {
            return Ok(denied("policy"));
        }
        let records = self.records.lock().unwrap();
        let mut keys = Vec::new();
        let mut key_errors = Vec::new();
        for id in &request.key_ids {
            match records.get(id) {
                Some(record) => keys.push(record.clone()),
                None => key_errors.push(KeyError {
                    key_id: id.clone(),
                    client_error: 0,
                    server_error: UNKNOWN_KEY,
                    message: "unknown key".into(),
                }),
            }
        }
        if !request.external_ids.is_empty() {
            let mut matched: Vec<&KeyRecord> = records
                .values()
                .filter(|r| !request.key_ids.contains(&r.id))
                .filter(|r| Self::has_external_id(r, &request.external_ids))
                .collect();
            matched.sort_by(|a, b| a.id.cmp(&b.id));
            keys.extend(matched.into_iter().cloned());
        }
        for record in &mut keys {
            record.ref_id.clear();
            if let Some(other) = &self.answer_as {
                record.id = other.clone();
            }
        }
        Ok(KeysResponse {
            keys,
            error: self.degraded.clone(),
            key_errors,
        })
    }
}
