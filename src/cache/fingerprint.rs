//! Content-addressed cache keys

use crate::error::{Result, RetraceError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Everything that identifies one cacheable computation
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    /// Logical name of the output, usually the table the work produces
    pub target: String,
    /// Invocation configuration, compared by its serialized form
    pub config: Value,
    /// Description of the computation itself, e.g. its SQL or a versioned tag
    pub logic: String,
}

impl CacheRequest {
    pub fn new(
        target: impl Into<String>,
        config: &impl Serialize,
        logic: impl Into<String>,
    ) -> Result<Self> {
        let config = serde_json::to_value(config).map_err(|e| RetraceError::Json {
            source: e,
            context: "Failed to serialize cache configuration".to_string(),
        })?;

        Ok(Self {
            target: target.into(),
            config,
            logic: logic.into(),
        })
    }

    /// Hex BLAKE3 fingerprint of target, configuration and logic
    pub fn fingerprint(&self) -> Result<String> {
        let config = serde_json::to_string(&canonical(&self.config)).map_err(|e| RetraceError::Json {
            source: e,
            context: "Failed to serialize cache configuration".to_string(),
        })?;
        Ok(fingerprint(&self.target, &config, &self.logic))
    }
}

/// Copy of `value` with object keys sorted at every level
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect::<Map<_, _>>())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Hash the three inputs, each length-prefixed so field boundaries are fixed
pub fn fingerprint(target: &str, config: &str, logic: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [target, config, logic] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
