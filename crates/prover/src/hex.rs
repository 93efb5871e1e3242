//! Serde helpers for hex-encoded byte fields.
//!
//! The proving backends are inconsistent about the `0x` prefix, so every helper here accepts the
//! prefix or its absence. Malformed hex is always an error.

use crate::ProverError;
use ethers::{
    types::{Bytes, H256},
    utils::hex as codec,
};
use serde::{de, Deserialize, Deserializer};

/// Decodes a hex string with an optional `0x` prefix.
pub fn decode(value: &str) -> Result<Vec<u8>, ProverError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    codec::decode(stripped).map_err(|e| ProverError::InvalidHex(format!("{value:?}: {e}")))
}

/// Encodes bytes as a `0x`-prefixed hex string.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", codec::encode(bytes.as_ref()))
}

/// Deserializes a hex string with an optional `0x` prefix into [Bytes].
pub fn deserialize_bytes<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    decode(&value).map(Bytes::from).map_err(de::Error::custom)
}

/// Deserializes a hex string with an optional `0x` prefix into an [H256].
///
/// An empty string is the zero hash: the backends leave hash fields blank while a request is
/// still processing.
pub fn deserialize_hash<'de, D>(deserializer: D) -> Result<H256, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    let bytes = decode(&value).map_err(de::Error::custom)?;
    match bytes.len() {
        0 => Ok(H256::zero()),
        32 => Ok(H256::from_slice(&bytes)),
        n => Err(de::Error::custom(format!("expected 32 bytes for a hash, got {n}"))),
    }
}
