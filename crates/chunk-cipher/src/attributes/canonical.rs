//! Deterministic serialisation of attribute maps, used as signing input.
//!
//! The output is compact JSON: names in insertion order (not sorted), values as
//! arrays of strings in list order, no whitespace. [`AttributeMap`] serialises
//! in insertion order, so `serde_json`'s compact writer is the canonical form.

use common::protocol::AttributeMap;

/// Canonical form of `attrs`. An empty map is `{}`.
pub fn canonicalize(attrs: &AttributeMap) -> Result<String, serde_json::Error> {
    serde_json::to_string(attrs)
}

/// Canonical JSON array of a single value list, e.g. `["a","b"]`.
pub fn canonical_values(values: &[String]) -> Result<String, serde_json::Error> {
    serde_json::to_string(values)
}

/// Parse a canonical (or any JSON object) attribute string, keeping document order.
///
/// An empty string is treated as an empty map.
pub fn parse(canonical: &str) -> Result<AttributeMap, serde_json::Error> {
    if canonical.trim().is_empty() {
        return Ok(AttributeMap::new());
    }
    serde_json::from_str(canonical)
}
