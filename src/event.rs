//! Host-provided event accessor.
//!
//! The core never parses the event format itself; a host pipeline hands it
//! something implementing [`Event`], giving typed access to nested fields
//! and the raw serialized length used by size-limited throttle rules.

use serde_json::Value;

/// Minimal accessor a host event type must provide.
pub trait Event {
    /// Resolve a field path, already split into path segments. `None` means
    /// the path does not resolve to a value — a *missing* field, which both
    /// DoIf and Throttle treat as distinct from an empty string.
    fn dig(&self, path: &[&str]) -> Option<Vec<u8>>;

    /// Length in bytes of the raw (serialized) event, used as the charge
    /// cost for size-limited throttle rules.
    fn raw_len(&self) -> usize;
}

/// Reference [`Event`] implementation over a `serde_json::Value`, used by
/// this crate's tests and the demo binary.
#[derive(Debug, Clone)]
pub struct JsonEvent {
    value: Value,
    raw: Vec<u8>,
}

impl JsonEvent {
    pub fn new(value: Value) -> Self {
        let raw = serde_json::to_vec(&value).unwrap_or_default();
        Self { value, raw }
    }

    pub fn from_raw(raw: Vec<u8>) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_slice(&raw)?;
        Ok(Self { value, raw })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Event for JsonEvent {
    fn dig(&self, path: &[&str]) -> Option<Vec<u8>> {
        let mut cur = &self.value;
        for seg in path {
            cur = cur.get(seg)?;
        }
        match cur {
            Value::Null => None,
            Value::String(s) => Some(s.as_bytes().to_vec()),
            Value::Bool(b) => Some(b.to_string().into_bytes()),
            Value::Number(n) => Some(n.to_string().into_bytes()),
            other => Some(other.to_string().into_bytes()),
        }
    }

    fn raw_len(&self) -> usize {
        self.raw.len()
    }
}

/// Split a dot-or-slash separated field selector into path segments.
pub fn parse_field_path(field: &str) -> Vec<String> {
    field
        .split(['.', '/'])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
