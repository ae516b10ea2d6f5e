//! Sealing of protected attribute values at the payload boundary.
//!
//! A protected value list is serialised as a compact JSON array, sealed with
//! AES-256-GCM-SIV under the owning key (the owning id is the AAD), and carried
//! as a single base64 string. Nothing outside this module ever sees the sealed
//! form inside an in-memory [`AttributeMap`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::protocol::AttributeMap;
use thiserror::Error;

use super::canonical;
use crate::crypto::cipher::{self, CipherError};

/// Attribute names starting with this prefix are protected.
pub const PROTECTED_PREFIX: &str = "protected-";

/// Protected by exact name.
pub const INTEGRITY_HASH: &str = "integrity-hash";

#[derive(Debug, Error)]
pub enum ProtectError {
    #[error("attribute {0} is not a protected attribute")]
    NotProtected(String),

    #[error("protected attribute {0} must carry exactly one sealed value")]
    Malformed(String),

    #[error("protected attribute {name} failed to open: {source}")]
    Cipher {
        name: String,
        #[source]
        source: CipherError,
    },
}

/// `true` for names whose values are sealed in payloads.
pub fn is_protected(name: &str) -> bool {
    name == INTEGRITY_HASH || name.starts_with(PROTECTED_PREFIX)
}

/// Seal `values` of protected attribute `name` under `key`, bound to `owner_id`.
pub fn protect(
    name: &str,
    values: &[String],
    key: &[u8],
    owner_id: &str,
) -> Result<Vec<String>, ProtectError> {
    if !is_protected(name) {
        return Err(ProtectError::NotProtected(name.to_owned()));
    }
    let json =
        canonical::canonical_values(values).map_err(|_| ProtectError::Malformed(name.to_owned()))?;
    let sealed = cipher::seal(json.as_bytes(), key, owner_id.as_bytes()).map_err(|source| {
        ProtectError::Cipher {
            name: name.to_owned(),
            source,
        }
    })?;
    Ok(vec![STANDARD.encode(sealed)])
}

/// Inverse of [`protect`].
///
/// # Errors
///
/// [`ProtectError::Cipher`] on a wrong key, a wrong `owner_id`, or corrupted
/// data; [`ProtectError::Malformed`] when the value is not a single base64
/// string wrapping a JSON array of strings.
pub fn unprotect(
    name: &str,
    sealed: &[String],
    owner_id: &str,
    key: &[u8],
) -> Result<Vec<String>, ProtectError> {
    let malformed = || ProtectError::Malformed(name.to_owned());
    let [encoded] = sealed else {
        return Err(malformed());
    };
    let bytes = STANDARD.decode(encoded).map_err(|_| malformed())?;
    let plain = cipher::open(&bytes, key, owner_id.as_bytes()).map_err(|source| {
        ProtectError::Cipher {
            name: name.to_owned(),
            source,
        }
    })?;
    serde_json::from_slice(&plain).map_err(|_| malformed())
}

/// A protected attribute that could not be opened, kept in its sealed form.
#[derive(Debug)]
pub struct OpenFailure {
    /// Values exactly as carried in the payload.
    pub sealed: Vec<String>,
    pub error: ProtectError,
}

impl OpenFailure {
    pub fn attribute(&self) -> &str {
        self.error.attribute()
    }
}

/// Result of opening every protected value in a payload map.
#[derive(Debug, Default)]
pub struct OpenedAttributes {
    /// Plaintext map; attributes that failed to open are left out.
    pub attributes: AttributeMap,
    /// Protected attributes that failed to open.
    pub failures: Vec<OpenFailure>,
}

/// Seal every protected attribute in `attrs`; others are copied unchanged.
pub fn seal_map(attrs: &AttributeMap, key: &[u8], owner_id: &str) -> Result<AttributeMap, ProtectError> {
    attrs
        .iter()
        .map(|(name, values)| {
            let values = if is_protected(name) {
                protect(name, values, key, owner_id)?
            } else {
                values.to_vec()
            };
            Ok((name.to_owned(), values))
        })
        .collect()
}

/// Open every protected attribute in `attrs`; failures do not stop the rest.
pub fn open_map(attrs: &AttributeMap, key: &[u8], owner_id: &str) -> OpenedAttributes {
    let mut opened = OpenedAttributes::default();
    for (name, values) in attrs.iter() {
        if !is_protected(name) {
            opened.attributes.insert(name, values.to_vec());
            continue;
        }
        match unprotect(name, values, owner_id, key) {
            Ok(plain) => {
                opened.attributes.insert(name, plain);
            }
            Err(error) => opened.failures.push(OpenFailure {
                sealed: values.to_vec(),
                error,
            }),
        }
    }
    opened
}

impl ProtectError {
    /// Name of the attribute the error concerns.
    pub fn attribute(&self) -> &str {
        match self {
            ProtectError::NotProtected(name) | ProtectError::Malformed(name) => name,
            ProtectError::Cipher { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [1u8; 32];

    fn vals(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn recognises_protected_names() {
        assert!(is_protected("protected-ssn"));
        assert!(is_protected("integrity-hash"));
        assert!(!is_protected("classification"));
        assert!(!is_protected("integrity-hash-2"));
    }

    #[test]
    fn round_trip() {
        let values = vals(&["123-45-6789", "second"]);
        let sealed = protect("protected-ssn", &values, &KEY, "abc.def").unwrap();
        assert_eq!(sealed.len(), 1);
        assert_ne!(sealed, values);
        let opened = unprotect("protected-ssn", &sealed, "abc.def", &KEY).unwrap();
        assert_eq!(opened, values);
    }

    #[test]
    fn other_owner_id_fails() {
        let sealed = protect("protected-ssn", &vals(&["x"]), &KEY, "abc.def").unwrap();
        assert!(matches!(
            unprotect("protected-ssn", &sealed, "abc.xyz", &KEY),
            Err(ProtectError::Cipher { .. })
        ));
    }

    #[test]
    fn other_key_fails() {
        let sealed = protect("protected-ssn", &vals(&["x"]), &KEY, "abc.def").unwrap();
        assert!(unprotect("protected-ssn", &sealed, "abc.def", &[2u8; 32]).is_err());
    }

    #[test]
    fn unprotected_name_refused() {
        assert!(matches!(
            protect("region", &vals(&["eu"]), &KEY, "k"),
            Err(ProtectError::NotProtected(_))
        ));
    }

    #[test]
    fn malformed_sealed_value() {
        assert!(matches!(
            unprotect("protected-x", &vals(&["a", "b"]), "k", &KEY),
            Err(ProtectError::Malformed(_))
        ));
        assert!(matches!(
            unprotect("protected-x", &vals(&["***"]), "k", &KEY),
            Err(ProtectError::Malformed(_))
        ));
    }

    #[test]
    fn seal_map_only_touches_protected_names() {
        let attrs: AttributeMap = vec![
            ("region", vals(&["eu"])),
            ("protected-ssn", vals(&["123"])),
        ]
        .into_iter()
        .collect();
        let sealed = seal_map(&attrs, &KEY, "k").unwrap();
        assert_eq!(sealed.get("region"), Some(vals(&["eu"]).as_slice()));
        assert_ne!(sealed.get("protected-ssn"), Some(vals(&["123"]).as_slice()));

        let opened = open_map(&sealed, &KEY, "k");
        assert!(opened.failures.is_empty());
        assert_eq!(opened.attributes, attrs);
    }

    #[test]
    fn open_map_continues_past_failures() {
        let mut sealed = AttributeMap::new();
        sealed.insert("protected-a", protect("protected-a", &vals(&["1"]), &KEY, "other").unwrap());
        sealed.insert("protected-b", protect("protected-b", &vals(&["2"]), &KEY, "k").unwrap());
        sealed.insert("plain", vals(&["3"]));

        let opened = open_map(&sealed, &KEY, "k");
        assert_eq!(opened.failures.len(), 1);
        assert_eq!(opened.failures[0].attribute(), "protected-a");
        assert_eq!(opened.attributes.get("protected-b"), Some(vals(&["2"]).as_slice()));
        assert_eq!(opened.attributes.get("plain"), Some(vals(&["3"]).as_slice()));
        assert!(!opened.attributes.contains("protected-a"));
        assert_eq!(Some(opened.failures[0].sealed.as_slice()), sealed.get("protected-a"));
        assert!(matches!(opened.failures[0].error, ProtectError::Cipher { .. }));
    }
}
