//! Build, parse, and classify chunk cipher envelope strings.

use thiserror::Error;

use super::variant::CipherVariant;

const BASE64_PAD: char = '=';
const BASE64_BLOCK: usize = 4;

/// Errors produced while building or parsing an envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("key id must not be empty")]
    EmptyKeyId,

    #[error("key id contains the delimiter {0:?}")]
    DelimiterInKeyId(&'static str),

    #[error("envelope does not start with the key tag")]
    MissingKeyTag,

    #[error("ciphertext start delimiter not found after the key tag")]
    MissingCiphertextStart,

    #[error("ciphertext end delimiter not found after the ciphertext start")]
    MissingCiphertextEnd,

    #[error("{0} unexpected bytes after the ciphertext end delimiter")]
    TrailingData(usize),
}

/// Key id and padded base64 ciphertext recovered from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub key_id: String,
    pub ciphertext_b64: String,
}

/// Where a recognised envelope keeps its parts; produced without decrypting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub variant: CipherVariant,
    pub key_id: String,
    /// Byte offset of the unpadded base64 ciphertext.
    pub ciphertext_offset: usize,
    /// Byte length of the unpadded base64 ciphertext.
    pub ciphertext_len: usize,
}

impl ChunkInfo {
    pub fn cipher_id(&self) -> &'static str {
        self.variant.id
    }
}

/// Drop base64 `=` padding; it is restorable from the length alone.
pub fn normalize(base64: &str) -> &str {
    base64.trim_end_matches(BASE64_PAD)
}

/// Restore the padding removed by [`normalize`].
pub fn denormalize(unpadded: &str) -> String {
    let pad = (BASE64_BLOCK - unpadded.len() % BASE64_BLOCK) % BASE64_BLOCK;
    let mut out = String::with_capacity(unpadded.len() + pad);
    out.push_str(unpadded);
    out.extend(std::iter::repeat(BASE64_PAD).take(pad));
    out
}

/// Format `key_id` and padded base64 `ciphertext_b64` as a `variant` envelope.
///
/// # Errors
///
/// Returns an error if `key_id` is empty, contains one of the variant's
/// delimiter tokens, or ends in a prefix of the ciphertext start token. Any of
/// these would make `decode` recover a different key id.
pub fn encode(
    variant: &CipherVariant,
    key_id: &str,
    ciphertext_b64: &str,
) -> Result<String, EnvelopeError> {
    if key_id.is_empty() {
        return Err(EnvelopeError::EmptyKeyId);
    }
    if let Some(token) = variant.delimiters().into_iter().find(|d| key_id.contains(d)) {
        return Err(EnvelopeError::DelimiterInKeyId(token));
    }
    let body = normalize(ciphertext_b64);
    let mut out = String::with_capacity(variant.delimiter_len() + key_id.len() + body.len());
    out.push_str(variant.key_tag_start);
    out.push_str(key_id);
    out.push_str(variant.ciphertext_start);
    out.push_str(body);
    out.push_str(variant.ciphertext_end);

    // A key id tail can combine with the following delimiter into an earlier
    // match, e.g. `ab!1` + `!1!`; decode must find the tokens where we put them.
    let key_id_start = variant.key_tag_start.len();
    let key_id_end = key_id_start + key_id.len();
    if find_from(&out, variant.ciphertext_start, key_id_start) != Some(key_id_end) {
        return Err(EnvelopeError::DelimiterInKeyId(variant.ciphertext_start));
    }
    Ok(out)
}

/// Split a `variant` envelope into its key id and padded base64 ciphertext.
pub fn decode(variant: &CipherVariant, envelope: &str) -> Result<Envelope, EnvelopeError> {
    if !envelope.starts_with(variant.key_tag_start) {
        return Err(EnvelopeError::MissingKeyTag);
    }
    let key_id_start = variant.key_tag_start.len();
    let key_id_end = find_from(envelope, variant.ciphertext_start, key_id_start)
        .ok_or(EnvelopeError::MissingCiphertextStart)?;
    let body_start = key_id_end + variant.ciphertext_start.len();
    let body_end = find_from(envelope, variant.ciphertext_end, body_start)
        .ok_or(EnvelopeError::MissingCiphertextEnd)?;
    let trailing = envelope.len() - (body_end + variant.ciphertext_end.len());
    if trailing > 0 {
        return Err(EnvelopeError::TrailingData(trailing));
    }
    let key_id = &envelope[key_id_start..key_id_end];
    if key_id.is_empty() {
        return Err(EnvelopeError::EmptyKeyId);
    }
    Ok(Envelope {
        key_id: key_id.to_owned(),
        ciphertext_b64: denormalize(&envelope[body_start..body_end]),
    })
}

/// Recognise `data` as a `variant` envelope without decrypting or calling out.
///
/// Returns `None` for anything that is not shaped like one; never fails.
pub fn classify(variant: &CipherVariant, data: &str) -> Option<ChunkInfo> {
    if data.is_empty() || data.len() < variant.delimiter_len() {
        return None;
    }
    if !data.starts_with(variant.key_tag_start) || !data.ends_with(variant.ciphertext_end) {
        return None;
    }
    let key_id_start = variant.key_tag_start.len();
    let key_id_end = find_from(data, variant.ciphertext_start, key_id_start)?;
    let body_start = key_id_end + variant.ciphertext_start.len();
    let body_end = find_from(data, variant.ciphertext_end, body_start)?;
    if body_end + variant.ciphertext_end.len() != data.len() {
        // Same rule as `decode`: the first end delimiter must close the envelope.
        return None;
    }
    Some(ChunkInfo {
        variant: *variant,
        key_id: data[key_id_start..key_id_end].to_owned(),
        ciphertext_offset: body_start,
        ciphertext_len: body_end - body_start,
    })
}

/// Probe `variants` in order; the first that recognises `data` wins.
pub fn classify_any(variants: &[CipherVariant], data: &str) -> Option<ChunkInfo> {
    variants.iter().find_map(|v| classify(v, data))
}

fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack.get(from..)?.find(needle).map(|i| i + from)
}
