//! Overflow record filter
//!
//! Spills record payloads larger than a threshold into an [`OverflowStore`]
//! when they are appended, leaving a reference on the stream, and resolves
//! the reference again when a consumer reads the record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::{debug, error};
use uuid::Uuid;

use super::entry::{OverflowBlob, ParamValue};
use super::traits::OverflowStore;
use crate::config::OverflowConfig;
use crate::metrics;
use crate::topology::{FilterError, Record, RecordFilter, RecordPayload};

/// Stream filter moving large payloads through an overflow store
#[derive(Clone)]
pub struct OverflowRecordFilter {
    store: Arc<dyn OverflowStore>,
    threshold_bytes: usize,
    key_prefix: String,
}

impl OverflowRecordFilter {
    pub fn new(store: Arc<dyn OverflowStore>, threshold_bytes: usize, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            threshold_bytes,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn from_config(store: Arc<dyn OverflowStore>, config: &OverflowConfig, threshold_bytes: usize) -> Self {
        Self::new(store, threshold_bytes, config.key_prefix.clone())
    }

    pub fn threshold_bytes(&self) -> usize {
        self.threshold_bytes
    }

    /// Fresh store key per spilled record
    fn entry_key(&self, record_key: &str) -> String {
        format!("{}{}:{}", self.key_prefix, record_key, Uuid::new_v4())
    }
}

impl std::fmt::Debug for OverflowRecordFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverflowRecordFilter")
            .field("store", &self.store.provider_name())
            .field("threshold_bytes", &self.threshold_bytes)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

#[async_trait]
impl RecordFilter for OverflowRecordFilter {
    fn name(&self) -> &str {
        "overflow"
    }

    async fn before_append(&self, stream: &str, record: Record) -> Result<Record, FilterError> {
        if !record.is_inline() || record.data().len() <= self.threshold_bytes {
            return Ok(record);
        }

        let shell = record.without_payload();
        let RecordPayload::Inline { data } = record.into_payload() else {
            return Ok(shell);
        };
        let size = data.len();
        let reference = self.entry_key(shell.key());
        let write_error = |e: super::OverflowError| FilterError::OverflowWrite {
            key: shell.key().to_string(),
            reason: e.to_string(),
        };

        let params = HashMap::from([
            ("record_key".to_string(), ParamValue::from(shell.key())),
            ("stream".to_string(), ParamValue::from(stream)),
            ("size".to_string(), ParamValue::Integer(size as i64)),
        ]);
        self.store
            .put(&reference, params, vec![OverflowBlob::new(data)])
            .await
            .map_err(write_error)?;
        self.store.mark_complete(&reference).await.map_err(write_error)?;

        let labels = [KeyValue::new("stream", stream.to_string())];
        metrics::overflow::records_spilled_total().add(1, &labels);
        metrics::overflow::bytes_spilled_total().add(size as u64, &labels);
        debug!(
            stream = %stream,
            key = %shell.key(),
            reference = %reference,
            size = size,
            "Record payload spilled to overflow store"
        );

        Ok(shell.with_payload(RecordPayload::Overflow { reference, size }))
    }

    async fn after_read(&self, stream: &str, record: Record) -> Result<Record, FilterError> {
        let (reference, size) = match record.payload() {
            RecordPayload::Overflow { reference, size } => (reference.clone(), *size),
            _ => return Ok(record),
        };

        match self.store.get(&reference).await {
            Ok(snapshot) => {
                let data = snapshot.concat_payloads();
                if data.len() != size {
                    debug!(
                        reference = %reference,
                        expected = size,
                        actual = data.len(),
                        "Overflow payload size differs from reference"
                    );
                }
                Ok(record.without_payload().with_payload(RecordPayload::Inline { data }))
            }
            Err(e) => {
                metrics::overflow::data_loss_total().add(
                    1,
                    &[
                        KeyValue::new("stream", stream.to_string()),
                        KeyValue::new("reason", e.to_string()),
                    ],
                );
                error!(
                    stream = %stream,
                    key = %record.key(),
                    reference = %reference,
                    error = %e,
                    "Overflow payload could not be resolved"
                );
                Err(FilterError::OverflowUnavailable {
                    reference,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overflow::MokaOverflowStore;
    use std::time::Duration;

    fn filter(threshold: usize) -> (OverflowRecordFilter, MokaOverflowStore) {
        let store = MokaOverflowStore::new(1024 * 1024, Duration::from_secs(60));
        let filter = OverflowRecordFilter::new(Arc::new(store.clone()), threshold, "overflow:");
        (filter, store)
    }

    #[tokio::test]
    async fn test_large_record_is_spilled_and_restored() {
        let (filter, _store) = filter(16);
        let original = Record::new("doc-1", vec![7u8; 64]);

        let spilled = filter.before_append("bulk/x", original.clone()).await.unwrap();
        assert!(spilled.is_overflow());
        assert!(spilled.overflow_reference().unwrap().starts_with("overflow:doc-1:"));

        let restored = filter.after_read("bulk/x", spilled).await.unwrap();
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let (filter, store) = filter(16);
        let record = Record::new("k", vec![1u8; 16]);
        let passed = filter.before_append("s", record.clone()).await.unwrap();
        assert_eq!(passed, record);
        assert_eq!(store.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_evicted_entry_is_reported() {
        let (filter, store) = filter(1);
        let spilled = filter
            .before_append("s", Record::new("k", vec![1u8; 8]))
            .await
            .unwrap();
        store
            .evict(spilled.overflow_reference().unwrap())
            .await
            .unwrap();

        let result = filter.after_read("s", spilled).await;
        assert!(matches!(result, Err(FilterError::OverflowUnavailable { .. })));
    }
}
