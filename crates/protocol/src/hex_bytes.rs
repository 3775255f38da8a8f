//! Serde helper for optional byte fields rendered as uppercase hex.
//!
//! `None` maps to the empty string on the wire, matching the convention
//! that absent hashes are sent as `""` rather than omitted.

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(bytes) => serializer.serialize_str(&hex::encode_upper(bytes)),
        None => serializer.serialize_str(""),
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        return Ok(None);
    }
    hex::decode(&s).map(Some).map_err(serde::de::Error::custom)
}
