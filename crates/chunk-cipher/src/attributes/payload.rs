//! Converting attribute maps to and from signed payload slots.
//!
//! Outbound: seal protected values, canonicalise, sign.
//! Inbound: verify the signature over the string exactly as received, parse,
//! then open protected values.

use common::protocol::{AttributeMap, SignedAttributes};
use thiserror::Error;

use super::canonical;
use super::protected::{self, OpenFailure, ProtectError};
use super::signer::{self, SignatureError, SigningContext};

#[derive(Debug, Error)]
pub enum AttributeError {
    #[error(transparent)]
    Protect(#[from] ProtectError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("attribute payload is not a JSON object of string arrays: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Outcome of checking a slot's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    Valid,
    Invalid,
    /// The slot carried no signature at all; treated like [`Invalid`](Self::Invalid).
    Missing,
}

impl SignatureStatus {
    pub fn is_valid(self) -> bool {
        matches!(self, SignatureStatus::Valid)
    }
}

/// A slot received from the broker, opened and checked.
#[derive(Debug)]
pub struct DecodedSlot {
    /// Plaintext attributes; protected values that failed to open are absent.
    pub attributes: AttributeMap,
    /// Signature as received.
    pub signature: Option<String>,
    pub signature_status: SignatureStatus,
    /// Protected values that failed to open, still sealed.
    pub protected_failures: Vec<OpenFailure>,
}

/// Build an outbound slot.
///
/// Protected values are sealed under `seal_key` with `ctx.id` as AAD; the
/// canonical string is signed under `sign_key`.
pub fn encode_slot(
    attrs: &AttributeMap,
    seal_key: &[u8],
    sign_key: &[u8],
    ctx: &SigningContext<'_>,
) -> Result<SignedAttributes, AttributeError> {
    let sealed = protected::seal_map(attrs, seal_key, ctx.id)?;
    let attrs = canonical::canonicalize(&sealed)?;
    let sig = signer::sign(ctx, &attrs, sign_key)?;
    Ok(SignedAttributes {
        attrs,
        sig: Some(sig),
    })
}

/// Verify and open an inbound slot for the key identified by `ctx.id`.
///
/// Signature and protected-value problems are reported in the result, not as
/// errors; only unparseable attribute JSON fails outright.
pub fn decode_slot(
    slot: &SignedAttributes,
    secret: &[u8],
    ctx: &SigningContext<'_>,
) -> Result<DecodedSlot, AttributeError> {
    let signature_status = match slot.sig.as_deref() {
        None => SignatureStatus::Missing,
        Some(sig) if signer::verify(ctx, &slot.attrs, secret, sig)? => SignatureStatus::Valid,
        Some(_) => SignatureStatus::Invalid,
    };
    let sealed = canonical::parse(&slot.attrs)?;
    let opened = protected::open_map(&sealed, secret, ctx.id);
    Ok(DecodedSlot {
        attributes: opened.attributes,
        signature: slot.sig.clone(),
        signature_status,
        protected_failures: opened.failures,
    })
}
