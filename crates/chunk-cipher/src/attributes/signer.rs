//! Keyed signatures over canonical attribute strings.
//!
//! # Signing string
//!
//! ```text
//! <id>[:m]:<canonical attrs>[:<previous signature>][:force]
//! ```
//!
//! Bracketed fields are omitted entirely when absent. The HMAC-SHA256 tag of
//! this string is carried as padded standard base64.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::protocol::AttributeSlot;
use thiserror::Error;

use crate::crypto::mac::{self, MacError};

/// Separator between signing string fields.
pub const DELIMITER: &str = ":";

/// Field marking a signature over mutable attributes.
pub const MUTABLE_FLAG: &str = "m";

/// Field marking an unconditional mutable-attribute overwrite.
pub const FORCE_FLAG: &str = "force";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error(transparent)]
    Mac(#[from] MacError),
}

/// Everything other than the attributes that a signature binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningContext<'a> {
    /// Reference id on create, key id everywhere else.
    pub id: &'a str,
    pub mutable: bool,
    /// Signature of the attribute state this one replaces.
    pub previous_sig: Option<&'a str>,
    pub force: bool,
}

impl<'a> SigningContext<'a> {
    pub fn immutable(id: &'a str) -> Self {
        Self {
            id,
            mutable: false,
            previous_sig: None,
            force: false,
        }
    }

    pub fn mutable(id: &'a str) -> Self {
        Self {
            mutable: true,
            ..Self::immutable(id)
        }
    }

    /// Unchained context for either slot of `id`.
    pub fn for_slot(slot: AttributeSlot, id: &'a str) -> Self {
        Self {
            mutable: slot.is_mutable(),
            ..Self::immutable(id)
        }
    }

    /// Chain to the signature of the previous attribute state.
    pub fn chained(self, previous_sig: Option<&'a str>) -> Self {
        Self {
            previous_sig,
            ..self
        }
    }

    pub fn forced(self, force: bool) -> Self {
        Self { force, ..self }
    }

    /// The exact string that is signed for `canonical_attrs`.
    pub fn signing_string(&self, canonical_attrs: &str) -> String {
        let mut fields = vec![self.id];
        if self.mutable {
            fields.push(MUTABLE_FLAG);
        }
        fields.push(canonical_attrs);
        if let Some(prev) = self.previous_sig {
            fields.push(prev);
        }
        if self.force {
            fields.push(FORCE_FLAG);
        }
        fields.join(DELIMITER)
    }
}

/// Sign `canonical_attrs` in `ctx` under `secret`.
pub fn sign(
    ctx: &SigningContext<'_>,
    canonical_attrs: &str,
    secret: &[u8],
) -> Result<String, SignatureError> {
    let tag = mac::tag(secret, ctx.signing_string(canonical_attrs).as_bytes())?;
    Ok(STANDARD.encode(tag))
}

/// Recompute and compare in constant time.
///
/// A signature that is not even valid base64 is reported as a mismatch, not an
/// error: from the caller's point of view it is equally a sign of tampering.
pub fn verify(
    ctx: &SigningContext<'_>,
    canonical_attrs: &str,
    secret: &[u8],
    signature_b64: &str,
) -> Result<bool, SignatureError> {
    let Ok(expected) = STANDARD.decode(signature_b64.trim()) else {
        return Ok(false);
    };
    Ok(mac::verify(
        secret,
        ctx.signing_string(canonical_attrs).as_bytes(),
        &expected,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 32] = [1u8; 32];
    const ATTRS: &str = r#"{"classification":["restricted"]}"#;

    #[test]
    fn signing_string_layout() {
        assert_eq!(
            SigningContext::immutable("chunk-v1").signing_string("{}"),
            "chunk-v1:{}"
        );
        assert_eq!(
            SigningContext::mutable("abc.def").signing_string("{}"),
            "abc.def:m:{}"
        );
        assert_eq!(
            SigningContext::mutable("abc.def")
                .chained(Some("cHJldg=="))
                .forced(true)
                .signing_string("{}"),
            "abc.def:m:{}:cHJldg==:force"
        );
    }

    #[test]
    fn deterministic() {
        let ctx = SigningContext::immutable("abc.def");
        assert_eq!(
            sign(&ctx, ATTRS, &SECRET).unwrap(),
            sign(&ctx, ATTRS, &SECRET).unwrap()
        );
    }

    #[test]
    fn verify_accepts_own_signature() {
        for ctx in [
            SigningContext::immutable("abc.def"),
            SigningContext::mutable("abc.def"),
            SigningContext::mutable("abc.def").chained(Some("prev")),
        ] {
            let sig = sign(&ctx, ATTRS, &SECRET).unwrap();
            assert!(verify(&ctx, ATTRS, &SECRET, &sig).unwrap());
        }
    }

    #[test]
    fn flipped_byte_fails() {
        let ctx = SigningContext::immutable("abc.def");
        let sig = sign(&ctx, ATTRS, &SECRET).unwrap();
        let mut tampered = ATTRS.as_bytes().to_vec();
        for i in 0..tampered.len() {
            tampered[i] ^= 0x01;
            let s = String::from_utf8_lossy(&tampered).into_owned();
            assert!(!verify(&ctx, &s, &SECRET, &sig).unwrap(), "byte {i}");
            tampered[i] ^= 0x01;
        }
    }

    #[test]
    fn slots_are_not_interchangeable() {
        let sig = sign(&SigningContext::immutable("k"), ATTRS, &SECRET).unwrap();
        assert!(!verify(&SigningContext::mutable("k"), ATTRS, &SECRET, &sig).unwrap());
    }

    #[test]
    fn slot_constructor_matches_named_ones() {
        assert_eq!(
            SigningContext::for_slot(AttributeSlot::Attributes, "k"),
            SigningContext::immutable("k")
        );
        assert_eq!(
            SigningContext::for_slot(AttributeSlot::MutableAttributes, "k"),
            SigningContext::mutable("k")
        );
    }

    #[test]
    fn reordered_attributes_sign_differently() {
        use crate::attributes::canonical::canonicalize;
        use common::protocol::AttributeMap;

        let mut forward = AttributeMap::new();
        forward.insert("a", vec!["1".into()]);
        forward.insert("b", vec!["2".into()]);
        let mut reverse = AttributeMap::new();
        reverse.insert("b", vec!["2".into()]);
        reverse.insert("a", vec!["1".into()]);

        let ctx = SigningContext::immutable("k");
        let forward_sig = sign(&ctx, &canonicalize(&forward).unwrap(), &SECRET).unwrap();
        let reverse_sig = sign(&ctx, &canonicalize(&reverse).unwrap(), &SECRET).unwrap();
        assert_ne!(forward_sig, reverse_sig);
        assert!(!verify(&ctx, &canonicalize(&reverse).unwrap(), &SECRET, &forward_sig).unwrap());
    }

    #[test]
    fn chaining_changes_signature() {
        let base = SigningContext::mutable("k");
        let a = sign(&base, ATTRS, &SECRET).unwrap();
        let b = sign(&base.chained(Some(&a)), ATTRS, &SECRET).unwrap();
        assert_ne!(a, b);
        assert!(!verify(&base, ATTRS, &SECRET, &b).unwrap());
    }

    #[test]
    fn other_secret_fails() {
        let ctx = SigningContext::immutable("k");
        let sig = sign(&ctx, ATTRS, &SECRET).unwrap();
        assert!(!verify(&ctx, ATTRS, &[2u8; 32], &sig).unwrap());
    }

    #[test]
    fn garbage_signature_is_mismatch() {
        let ctx = SigningContext::immutable("k");
        assert!(!verify(&ctx, ATTRS, &SECRET, "***").unwrap());
    }

    #[test]
    fn padded_base64_output() {
        let sig = sign(&SigningContext::immutable("k"), "{}", &SECRET).unwrap();
        assert_eq!(sig.len(), 44);
        assert!(sig.ends_with('='));
    }
}
