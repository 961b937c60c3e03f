//! Stream records
//!
//! A record is an opaque key plus exactly one payload form: inline bytes, a
//! reference into the overflow store, or a data-loss marker left by a reader
//! that could not resolve such a reference.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Payload carried by a [`Record`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RecordPayload {
    /// Bytes travelling on the stream itself
    Inline { data: Vec<u8> },
    /// Bytes parked in the overflow store under `reference`
    Overflow { reference: String, size: usize },
    /// The overflow entry behind `reference` could not be read
    Lost { reference: String, reason: String },
}

/// A keyed record flowing between computations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    key: String,
    payload: RecordPayload,
    timestamp_ms: i64,
}

impl Record {
    /// Create a record with an inline payload
    pub fn new(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: RecordPayload::Inline { data: data.into() },
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Create a record whose payload is the JSON encoding of `value`
    pub fn from_json<T: Serialize>(key: impl Into<String>, value: &T) -> serde_json::Result<Self> {
        Ok(Self::new(key, serde_json::to_vec(value)?))
    }

    /// Decode an inline JSON payload
    pub fn decode_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(self.data())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &RecordPayload {
        &self.payload
    }

    pub fn into_payload(self) -> RecordPayload {
        self.payload
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Inline bytes; empty for overflow references and lost payloads
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            RecordPayload::Inline { data } => data,
            RecordPayload::Overflow { .. } | RecordPayload::Lost { .. } => &[],
        }
    }

    /// Size of the payload in bytes, including spilled payloads
    pub fn payload_len(&self) -> usize {
        match &self.payload {
            RecordPayload::Inline { data } => data.len(),
            RecordPayload::Overflow { size, .. } => *size,
            RecordPayload::Lost { .. } => 0,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.payload, RecordPayload::Inline { .. })
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self.payload, RecordPayload::Overflow { .. })
    }

    /// True when the payload could not be recovered from the overflow store
    pub fn is_data_loss(&self) -> bool {
        matches!(self.payload, RecordPayload::Lost { .. })
    }

    /// Overflow reference for spilled or lost payloads
    pub fn overflow_reference(&self) -> Option<&str> {
        match &self.payload {
            RecordPayload::Overflow { reference, .. } | RecordPayload::Lost { reference, .. } => {
                Some(reference)
            }
            RecordPayload::Inline { .. } => None,
        }
    }

    /// Same key and timestamp with an empty inline payload
    pub(crate) fn without_payload(&self) -> Self {
        Self {
            key: self.key.clone(),
            payload: RecordPayload::Inline { data: Vec::new() },
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Same key and timestamp with a different payload
    pub fn with_payload(self, payload: RecordPayload) -> Self {
        Self { payload, ..self }
    }
}
