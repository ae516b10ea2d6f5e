//! Cipher variants: pure configuration consumed by the generic codec and engine.

use thiserror::Error;

/// What a variant binds into the payload's authentication tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadAad {
    /// Nothing beyond the ciphertext itself.
    None,
    /// The key id, so a payload cannot be re-labelled with another key's id.
    KeyId,
}

/// A named set of envelope delimiters plus variant-specific crypto parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherVariant {
    /// Stable identifier; also sent to the broker as the create reference id.
    pub id: &'static str,
    pub key_tag_start: &'static str,
    pub ciphertext_start: &'static str,
    pub ciphertext_end: &'static str,
    pub aad: PayloadAad,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VariantError {
    #[error("variant {0} has an empty delimiter")]
    EmptyDelimiter(&'static str),

    #[error("variant {0} reuses the same token for two delimiters")]
    DuplicateDelimiter(&'static str),

    #[error("variant {variant} cannot be told apart from variant {other}")]
    Indistinguishable {
        variant: &'static str,
        other: &'static str,
    },

    #[error("variant {variant} delimiter {token:?} only uses base64 characters")]
    Base64Delimiter {
        variant: &'static str,
        token: &'static str,
    },
}

impl CipherVariant {
    /// `~!1!<key id>!1!<base64>!1!~`, no payload AAD.
    pub const V1: CipherVariant = CipherVariant {
        id: "chunk-v1",
        key_tag_start: "~!1!",
        ciphertext_start: "!1!",
        ciphertext_end: "!1!~",
        aad: PayloadAad::None,
    };

    /// `~!2!<key id>!2!<base64>!2!~`, key id bound as payload AAD.
    pub const V2: CipherVariant = CipherVariant {
        id: "chunk-v2",
        key_tag_start: "~!2!",
        ciphertext_start: "!2!",
        ciphertext_end: "!2!~",
        aad: PayloadAad::KeyId,
    };

    /// Built-in variants in probing order.
    pub const BUILT_IN: [CipherVariant; 2] = [CipherVariant::V2, CipherVariant::V1];

    /// Look up a built-in variant by id.
    pub fn from_id(id: &str) -> Option<CipherVariant> {
        Self::BUILT_IN.into_iter().find(|v| v.id == id)
    }

    /// Combined byte length of the three delimiter tokens.
    pub fn delimiter_len(&self) -> usize {
        self.key_tag_start.len() + self.ciphertext_start.len() + self.ciphertext_end.len()
    }

    pub fn delimiters(&self) -> [&'static str; 3] {
        [self.key_tag_start, self.ciphertext_start, self.ciphertext_end]
    }

    /// Associated data bound into the payload for `key_id`.
    pub fn payload_aad<'a>(&self, key_id: &'a str) -> &'a [u8] {
        match self.aad {
            PayloadAad::None => &[],
            PayloadAad::KeyId => key_id.as_bytes(),
        }
    }

    /// Check the delimiters cannot be confused with base64 output or each other.
    pub fn validate(&self) -> Result<(), VariantError> {
        let delimiters = self.delimiters();
        for (i, token) in delimiters.iter().enumerate() {
            if token.is_empty() {
                return Err(VariantError::EmptyDelimiter(self.id));
            }
            if delimiters[..i].contains(token) {
                return Err(VariantError::DuplicateDelimiter(self.id));
            }
            if token.chars().all(is_base64_char) {
                return Err(VariantError::Base64Delimiter {
                    variant: self.id,
                    token,
                });
            }
        }
        Ok(())
    }

    /// `true` when neither variant's key tag is a prefix of the other's, so an
    /// envelope can only ever be claimed by one of them.
    pub fn is_distinguishable_from(&self, other: &CipherVariant) -> bool {
        !(self.key_tag_start.starts_with(other.key_tag_start)
            || other.key_tag_start.starts_with(self.key_tag_start))
    }

    /// [`validate`](Self::validate), and also check that no variant in `others`
    /// shares this one's id or could claim its envelopes.
    pub fn validate_alongside(&self, others: &[CipherVariant]) -> Result<(), VariantError> {
        self.validate()?;
        for other in others.iter().filter(|o| *o != self) {
            if other.id == self.id || !self.is_distinguishable_from(other) {
                return Err(VariantError::Indistinguishable {
                    variant: self.id,
                    other: other.id,
                });
            }
        }
        Ok(())
    }
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')
}
