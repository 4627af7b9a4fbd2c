//! JSON document helpers for store values.

use crate::store::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub fn encode<T: Serialize>(doc: &T) -> Result<Value> {
    Ok(serde_json::to_value(doc)?)
}

pub fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Decodes every well-formed entry of a collection snapshot, in order.
///
/// Malformed entries are skipped: one bad write from a peer must not hide
/// the entries around it.
pub fn decode_collection<T: DeserializeOwned>(snapshot: Option<Value>) -> Vec<T> {
    match snapshot {
        Some(Value::Array(entries)) => entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    log::warn!("Skipping malformed collection entry: {}", e);
                    None
                }
            })
            .collect(),
        Some(other) => {
            log::warn!("Expected a collection, got {}", other);
            Vec::new()
        }
        None => Vec::new(),
    }
}
