//! MessagePack codec for channel events and stored user data.
//!
//! Structs are written as maps with field names so that other msgpack
//! producers on the channel can read and write the same records.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Reference record carried on the channel and in the user-data hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub name: String,
    pub age: i64,
}

impl PersonRecord {
    pub fn new(name: impl Into<String>, age: i64) -> Self {
        Self {
            name: name.into(),
            age,
        }
    }
}

/// The fixed record set published by the `/publish` trigger
pub fn sample_records() -> Vec<PersonRecord> {
    vec![PersonRecord::new("Alice", 1), PersonRecord::new("Bas", 18)]
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Expected a sequence of records, got {0}")]
    NotASequence(&'static str),
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Decode a channel event as a sequence of records.
///
/// Records are kept as generic values: producers choose their own keys
/// and every field is passed through untouched.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<serde_json::Value>, CodecError> {
    match decode_value(bytes)? {
        serde_json::Value::Array(records) => Ok(records),
        other => Err(CodecError::NotASequence(kind_of(&other))),
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "nil",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "map",
    }
}

/// Decode any msgpack payload into a JSON value
pub fn decode_value(bytes: &[u8]) -> Result<serde_json::Value, CodecError> {
    decode(bytes)
}
