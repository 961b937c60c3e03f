//! Overflow store contract

use std::collections::HashMap;

use async_trait::async_trait;

use super::entry::{EntryStatus, OverflowBlob, OverflowSnapshot, ParamValue, StoreStats};
use super::errors::OverflowResult;

/// Keyed, TTL-bounded storage for payloads too large to travel inline
///
/// An entry is written by a single producer through any number of `put`
/// calls, then sealed with `mark_complete`. Readers only see sealed entries.
/// Entries disappear when their TTL (measured from the last write) lapses or
/// when the store exceeds its size budget; neither producers nor consumers
/// delete them in normal operation.
#[async_trait]
pub trait OverflowStore: Send + Sync + 'static {
    /// Create the entry if absent, overwrite the given parameters and append payloads
    async fn put(
        &self,
        key: &str,
        params: HashMap<String, ParamValue>,
        payloads: Vec<OverflowBlob>,
    ) -> OverflowResult<()>;

    /// Seal the entry; repeated calls are no-ops
    async fn mark_complete(&self, key: &str) -> OverflowResult<()>;

    /// Read a sealed entry
    async fn get(&self, key: &str) -> OverflowResult<OverflowSnapshot>;

    /// Lifecycle view; `None` when no entry exists
    async fn status(&self, key: &str) -> OverflowResult<Option<EntryStatus>>;

    /// Drop one entry immediately
    async fn evict(&self, key: &str) -> OverflowResult<()>;

    /// Drop every entry
    async fn clear(&self) -> OverflowResult<()>;

    async fn stats(&self) -> StoreStats;

    async fn health_check(&self) -> bool;

    /// Release resources; later calls fail with `StoreUnavailable`
    async fn shutdown(&self);

    fn provider_name(&self) -> &'static str;
}
