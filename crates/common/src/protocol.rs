//! Request and response types exchanged with a key broker.
//!
//! Attribute maps travel as *canonical strings* paired with a signature, never
//! as nested JSON, so that both sides sign and verify exactly the same bytes.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Attribute maps
// ---------------------------------------------------------------------------

/// Ordered multi-map of attribute name to a list of string values.
///
/// Iteration and serialisation follow insertion order. Re-inserting an existing
/// name replaces its values in place, keeping the original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: Vec<(String, Vec<String>)>,
}

impl AttributeMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the values for `name`, returning the previous values.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) -> Option<Vec<String>> {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, values)),
            None => {
                self.entries.push((name, values));
                None
            }
        }
    }

    /// Values recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, values)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }
}

impl<K: Into<String>> FromIterator<(K, Vec<String>)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (K, Vec<String>)>>(iter: I) -> Self {
        let mut map = AttributeMap::new();
        for (name, values) in iter {
            map.insert(name, values);
        }
        map
    }
}

impl IntoIterator for AttributeMap {
    type Item = (String, Vec<String>);
    type IntoIter = std::vec::IntoIter<(String, Vec<String>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for AttributeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributeMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = AttributeMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping attribute names to arrays of strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = AttributeMap::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<String>>()? {
                    map.insert(name, values);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Which of a key's two independently signed attribute maps is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeSlot {
    Attributes,
    MutableAttributes,
}

impl AttributeSlot {
    pub fn is_mutable(self) -> bool {
        matches!(self, AttributeSlot::MutableAttributes)
    }
}

impl fmt::Display for AttributeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeSlot::Attributes => f.write_str("attributes"),
            AttributeSlot::MutableAttributes => f.write_str("mutable attributes"),
        }
    }
}

/// A canonical attribute string together with its base64 HMAC signature.
///
/// Protected attribute values inside `attrs` are already sealed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAttributes {
    /// Canonical JSON object of attribute name to value list.
    pub attrs: String,
    /// Base64 HMAC-SHA256 over the signing string built from `attrs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

/// Opaque key/value pairs forwarded to the broker with every request.
pub type RequestMetadata = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// One entry of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateKeySpec {
    /// Reference id echoed back to correlate minted keys with this entry.
    #[serde(rename = "ref")]
    pub ref_id: String,
    /// Number of keys to mint.
    #[serde(rename = "qty")]
    pub quantity: u32,
    pub attributes: SignedAttributes,
    pub mutable_attributes: SignedAttributes,
}

/// Body of a create-keys call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateKeysRequest {
    #[serde(default)]
    pub metadata: RequestMetadata,
    pub keys: Vec<CreateKeySpec>,
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

/// Body of a fetch-keys call.
///
/// Keys are selected by id, by external id, or both; the broker answers with
/// the union.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchKeysRequest {
    #[serde(default)]
    pub metadata: RequestMetadata,
    #[serde(default)]
    pub key_ids: Vec<String>,
    /// Match keys whose attributes carry one of these under [`EXTERNAL_ID_ATTRIBUTE`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_ids: Vec<String>,
}

/// Attribute name an external-id fetch matches against.
pub const EXTERNAL_ID_ATTRIBUTE: &str = "external-id";

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// A prepared mutable-attribute update for a single key.
///
/// The signature is chained to the key's previous mutable signature so the
/// broker can reject updates computed against stale attribute state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateKeySpec {
    #[serde(rename = "id")]
    pub key_id: String,
    pub mutable_attributes: SignedAttributes,
    /// Previous mutable signature the new one is chained to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_sig: Option<String>,
    /// Overwrite unconditionally even if the broker's state has moved on.
    #[serde(default)]
    pub force: bool,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A key as returned by the broker, attributes still in payload form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: String,
    /// Standard base64 of the raw key bytes.
    pub secret: String,
    /// Reference id of the create entry this key answers; empty on fetch.
    #[serde(default, rename = "ref")]
    pub ref_id: String,
    #[serde(default)]
    pub attributes: SignedAttributes,
    #[serde(default)]
    pub mutable_attributes: SignedAttributes,
    #[serde(default)]
    pub obligations: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub origin: String,
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .field("ref_id", &self.ref_id)
            .field("attributes", &self.attributes)
            .field("mutable_attributes", &self.mutable_attributes)
            .field("obligations", &self.obligations)
            .field("origin", &self.origin)
            .finish()
    }
}

/// A server-side condition reported alongside (possibly empty) results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerError {
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "broker error {}", self.code)
        } else {
            write!(f, "broker error {}: {}", self.code, self.message)
        }
    }
}

/// A failure the broker reported for one key rather than the whole call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyError {
    #[serde(rename = "id")]
    pub key_id: String,
    /// Error code assigned on the client side of the broker, 0 if none.
    #[serde(default)]
    pub client_error: i32,
    /// Error code assigned by the broker server, 0 if none.
    #[serde(default)]
    pub server_error: i32,
    #[serde(default)]
    pub message: String,
}

impl KeyError {
    /// The server code if there is one, else the client code.
    pub fn to_broker_error(&self) -> BrokerError {
        let code = if self.server_error != 0 {
            self.server_error
        } else {
            self.client_error
        };
        BrokerError {
            code,
            message: self.message.clone(),
        }
    }
}

/// Response to a create or fetch call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysResponse {
    #[serde(default)]
    pub keys: Vec<KeyRecord>,
    /// `None` means the broker reported `OK`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BrokerError>,
    /// Failures for individual keys, alongside whatever keys did succeed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_errors: Vec<KeyError>,
}

impl KeysResponse {
    /// `true` when the broker reported no error condition at all.
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.key_errors.is_empty()
    }

    /// The condition that applies to `key_id`: its own error first, then the
    /// response-level one. With no `key_id` the first per-key error stands in.
    pub fn error_for(&self, key_id: Option<&str>) -> Option<BrokerError> {
        let per_key = match key_id {
            Some(id) => self.key_errors.iter().find(|e| e.key_id == id),
            None => self.key_errors.first(),
        };
        per_key
            .map(KeyError::to_broker_error)
            .or_else(|| self.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn attribute_map_keeps_insertion_order() {
        let mut map = AttributeMap::new();
        map.insert("zeta", values(&["1"]));
        map.insert("alpha", values(&["2"]));
        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["zeta", "alpha"]);
    }

    #[test]
    fn reinsert_replaces_in_place() {
        let mut map = AttributeMap::new();
        map.insert("a", values(&["1"]));
        map.insert("b", values(&["2"]));
        let prev = map.insert("a", values(&["3"]));
        assert_eq!(prev, Some(values(&["1"])));
        assert_eq!(map.iter().next(), Some(("a", values(&["3"]).as_slice())));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn attribute_map_deserialises_in_document_order() {
        let map: AttributeMap =
            serde_json::from_str(r#"{"zz":["x"],"aa":["y","z"],"mm":[]}"#).unwrap();
        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["zz", "aa", "mm"]);
        assert_eq!(map.get("aa"), Some(values(&["y", "z"]).as_slice()));
    }

    #[test]
    fn attribute_map_rejects_non_array_values() {
        assert!(serde_json::from_str::<AttributeMap>(r#"{"a":"b"}"#).is_err());
    }

    #[test]
    fn create_spec_uses_short_field_names() {
        let spec = CreateKeySpec {
            ref_id: "chunk-v1".into(),
            quantity: 1,
            attributes: SignedAttributes {
                attrs: "{}".into(),
                sig: Some("c2ln".into()),
            },
            mutable_attributes: SignedAttributes::default(),
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["ref"], "chunk-v1");
        assert_eq!(json["qty"], 1);
        assert_eq!(json["attributes"]["sig"], "c2ln");
        assert!(json["mutable_attributes"].get("sig").is_none());
    }

    #[test]
    fn key_record_debug_redacts_secret() {
        let record = KeyRecord {
            id: "abc.def".into(),
            secret: "AQEBAQ==".into(),
            ref_id: String::new(),
            attributes: SignedAttributes::default(),
            mutable_attributes: SignedAttributes::default(),
            obligations: Default::default(),
            origin: String::new(),
        };
        let dbg = format!("{record:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("AQEBAQ=="));
    }

    #[test]
    fn keys_response_defaults_to_ok() {
        let resp: KeysResponse = serde_json::from_str(r#"{"keys":[]}"#).unwrap();
        assert!(resp.is_ok());
        let resp: KeysResponse =
            serde_json::from_str(r#"{"error":{"code":40001,"message":"denied"}}"#).unwrap();
        assert!(!resp.is_ok());
        assert!(resp.keys.is_empty());
    }

    #[test]
    fn per_key_error_takes_precedence() {
        let resp: KeysResponse = serde_json::from_str(
            r#"{"keys":[],
                "error":{"code":40001,"message":"partial"},
                "key_errors":[
                    {"id":"abc.def","client_error":0,"server_error":40004,"message":"unknown key"},
                    {"id":"ghi.jkl","client_error":-7,"message":"bad tag"}
                ]}"#,
        )
        .unwrap();
        assert!(!resp.is_ok());
        assert_eq!(resp.error_for(Some("abc.def")).map(|e| e.code), Some(40004));
        assert_eq!(resp.error_for(Some("ghi.jkl")).map(|e| e.code), Some(-7));
        assert_eq!(resp.error_for(Some("zzz.zzz")).map(|e| e.code), Some(40001));
        assert_eq!(resp.error_for(None).map(|e| e.message), Some("unknown key".into()));
    }

    #[test]
    fn key_errors_alone_make_a_response_not_ok() {
        let resp: KeysResponse =
            serde_json::from_str(r#"{"key_errors":[{"id":"abc.def","server_error":500}]}"#).unwrap();
        assert!(!resp.is_ok());
        assert!(resp.error.is_none());
    }

    #[test]
    fn fetch_request_omits_empty_external_ids() {
        let req = FetchKeysRequest {
            key_ids: vec!["abc.def".into()],
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("external_ids").is_none());

        let req: FetchKeysRequest = serde_json::from_str(r#"{"external_ids":["invoice-7"]}"#).unwrap();
        assert!(req.key_ids.is_empty());
        assert_eq!(req.external_ids, ["invoice-7"]);
    }
}
