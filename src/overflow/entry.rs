//! Overflow entry values

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scalar parameter stored next to an entry's payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Binary payload part; cloning shares the bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowBlob {
    name: Option<String>,
    data: Arc<[u8]>,
}

impl OverflowBlob {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: None,
            data: Arc::from(data.into()),
        }
    }

    pub fn named(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: Some(name.into()),
            data: Arc::from(data.into()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Stored entry; replaced wholesale on every write
#[derive(Debug, Clone)]
pub(crate) struct OverflowEntry {
    pub(crate) generation: u64,
    pub(crate) params: HashMap<String, ParamValue>,
    pub(crate) payloads: Vec<OverflowBlob>,
    pub(crate) completed: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl OverflowEntry {
    pub(crate) fn new(generation: u64) -> Self {
        let now = Utc::now();
        Self {
            generation,
            params: HashMap::new(),
            payloads: Vec::new(),
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Summed payload bytes
    pub(crate) fn size(&self) -> u64 {
        self.payloads.iter().map(|blob| blob.len() as u64).sum()
    }

    /// Cache weight: payload bytes plus parameter text, clamped to the weigher range
    pub(crate) fn weight(&self, key: &str) -> u32 {
        let params: usize = self
            .params
            .iter()
            .map(|(name, value)| name.len() + value.as_str().map_or(8, str::len))
            .sum();
        let total = self.size() + (params + key.len()) as u64;
        u32::try_from(total).unwrap_or(u32::MAX).max(1)
    }

    pub(crate) fn status(&self) -> EntryStatus {
        EntryStatus {
            completed: self.completed,
            size: self.size(),
            payload_count: self.payloads.len(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub(crate) fn snapshot(&self, key: &str) -> OverflowSnapshot {
        OverflowSnapshot {
            key: key.to_string(),
            params: self.params.clone(),
            payloads: self.payloads.clone(),
            completed_at: self.updated_at,
        }
    }
}

/// Lifecycle view of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub completed: bool,
    pub size: u64,
    pub payload_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contents of a completed entry
#[derive(Debug, Clone, PartialEq)]
pub struct OverflowSnapshot {
    pub key: String,
    pub params: HashMap<String, ParamValue>,
    pub payloads: Vec<OverflowBlob>,
    pub completed_at: DateTime<Utc>,
}

impl OverflowSnapshot {
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// All payload parts joined in write order
    pub fn concat_payloads(&self) -> Vec<u8> {
        let total = self.payloads.iter().map(OverflowBlob::len).sum();
        let mut data = Vec::with_capacity(total);
        for blob in &self.payloads {
            data.extend_from_slice(blob.as_bytes());
        }
        data
    }
}

/// Store-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreStats {
    pub entry_count: u64,
    pub weighted_size: u64,
    pub open_entries: usize,
    pub lost_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_value_untagged_serde() {
        let values: HashMap<String, ParamValue> =
            serde_json::from_str(r#"{"a": true, "b": 3, "c": 1.5, "d": "x"}"#).unwrap();
        assert_eq!(values["a"], ParamValue::Bool(true));
        assert_eq!(values["b"], ParamValue::Integer(3));
        assert_eq!(values["c"], ParamValue::Float(1.5));
        assert_eq!(values["d"].as_str(), Some("x"));
    }

    #[test]
    fn test_entry_weight_never_zero() {
        let entry = OverflowEntry::new(1);
        assert_eq!(entry.size(), 0);
        assert!(entry.weight("") >= 1);
    }

    #[test]
    fn test_snapshot_concatenates_in_order() {
        let mut entry = OverflowEntry::new(1);
        entry.payloads.push(OverflowBlob::new(b"ab".to_vec()));
        entry.payloads.push(OverflowBlob::named("tail", b"cd".to_vec()));
        entry.completed = true;
        let snapshot = entry.snapshot("k");
        assert_eq!(snapshot.concat_payloads(), b"abcd");
        assert_eq!(snapshot.payloads[1].name(), Some("tail"));
        assert_eq!(entry.status().size, 4);
    }
}
