//! In-process overflow store backed by Moka
//!
//! Entries are immutable `Arc` values replaced on every write, so the cache's
//! TTL restarts with each `put`. The weigher charges payload bytes against
//! `max_size_bytes`.
//!
//! Moka may drop an entry that is still being written. Keys of unsealed
//! entries are tracked in `open` together with the generation that created
//! them; when the cache reports such an eviction the key moves to `lost`, and
//! the producer's next write fails with `NotFound` instead of silently
//! starting a fresh, truncated entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use moka::future::Cache;
use moka::notification::RemovalCause;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::entry::{EntryStatus, OverflowBlob, OverflowEntry, OverflowSnapshot, ParamValue, StoreStats};
use super::errors::{OverflowError, OverflowResult};
use super::traits::OverflowStore;
use crate::config::OverflowConfig;
use crate::metrics;

/// Moka-backed [`OverflowStore`]
#[derive(Clone)]
pub struct MokaOverflowStore {
    cache: Cache<String, Arc<OverflowEntry>>,
    /// Unsealed keys and the generation that created them
    open: Arc<DashMap<String, u64>>,
    /// Unsealed keys evicted by the cache, with the time of eviction
    lost: Arc<DashMap<String, Instant>>,
    generation: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    ttl: Duration,
}

impl std::fmt::Debug for MokaOverflowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaOverflowStore")
            .field("max_capacity", &self.cache.policy().max_capacity())
            .field("entry_count", &self.cache.entry_count())
            .field("open_entries", &self.open.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl MokaOverflowStore {
    pub fn from_config(config: &OverflowConfig) -> Self {
        Self::new(config.max_size_bytes, config.ttl())
    }

    pub fn new(max_size_bytes: u64, ttl: Duration) -> Self {
        let open: Arc<DashMap<String, u64>> = Arc::new(DashMap::new());
        let lost: Arc<DashMap<String, Instant>> = Arc::new(DashMap::new());

        let listener_open = Arc::clone(&open);
        let listener_lost = Arc::clone(&lost);
        let cache = Cache::builder()
            .max_capacity(max_size_bytes)
            .weigher(|key: &String, entry: &Arc<OverflowEntry>| entry.weight(key))
            .time_to_live(ttl)
            .eviction_listener(
                move |key: Arc<String>, entry: Arc<OverflowEntry>, cause: RemovalCause| {
                    if !cause.was_evicted() || entry.completed {
                        return;
                    }
                    let removed = listener_open
                        .remove_if(key.as_str(), |_, generation| *generation == entry.generation)
                        .is_some();
                    if removed {
                        listener_lost.insert(key.to_string(), Instant::now());
                        metrics::overflow::incomplete_evictions_total().add(1, &[]);
                        warn!(
                            key = %key,
                            cause = ?cause,
                            size = entry.size(),
                            "Incomplete overflow entry evicted"
                        );
                    }
                },
            )
            .build();

        debug!(
            max_size_bytes = max_size_bytes,
            ttl_seconds = ttl.as_secs(),
            "Moka overflow store created"
        );

        Self {
            cache,
            open,
            lost,
            generation: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            ttl,
        }
    }

    /// Run cache housekeeping every `interval` until the store shuts down
    ///
    /// Expired entries are otherwise only reclaimed lazily on access.
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if store.closed.load(Ordering::Acquire) {
                    break;
                }
                store.run_maintenance().await;
            }
            debug!("Overflow store maintenance stopped");
        })
    }

    /// One housekeeping pass: apply pending evictions, forget stale loss markers
    pub async fn run_maintenance(&self) {
        self.cache.run_pending_tasks().await;
        let ttl = self.ttl;
        self.lost.retain(|_, evicted_at| evicted_at.elapsed() < ttl);
    }

    fn ensure_open(&self) -> OverflowResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OverflowError::StoreUnavailable(
                "overflow store has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Current entry for a producer write; `NotFound` if it vanished mid-write
    async fn writable_entry(&self, key: &str) -> OverflowResult<Option<Arc<OverflowEntry>>> {
        if self.lost.remove(key).is_some() {
            return Err(OverflowError::NotFound {
                key: key.to_string(),
            });
        }
        match self.cache.get(key).await {
            Some(entry) => Ok(Some(entry)),
            None if self.open.remove(key).is_some() => {
                // Expired but the listener has not run yet
                metrics::overflow::incomplete_evictions_total().add(1, &[]);
                warn!(key = %key, "Incomplete overflow entry expired before completion");
                Err(OverflowError::NotFound {
                    key: key.to_string(),
                })
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OverflowStore for MokaOverflowStore {
    async fn put(
        &self,
        key: &str,
        params: HashMap<String, ParamValue>,
        payloads: Vec<OverflowBlob>,
    ) -> OverflowResult<()> {
        self.ensure_open()?;

        let mut entry = match self.writable_entry(key).await? {
            Some(current) if current.completed => {
                return Err(OverflowError::AlreadyCompleted {
                    key: key.to_string(),
                })
            }
            Some(current) => (*current).clone(),
            None => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                self.open.insert(key.to_string(), generation);
                OverflowEntry::new(generation)
            }
        };

        entry.params.extend(params);
        entry.payloads.extend(payloads);
        entry.updated_at = Utc::now();

        debug!(
            key = %key,
            size = entry.size(),
            payloads = entry.payloads.len(),
            "Overflow PUT"
        );
        self.cache.insert(key.to_string(), Arc::new(entry)).await;
        Ok(())
    }

    async fn mark_complete(&self, key: &str) -> OverflowResult<()> {
        self.ensure_open()?;

        let current = self
            .writable_entry(key)
            .await?
            .ok_or_else(|| OverflowError::NotFound {
                key: key.to_string(),
            })?;
        if current.completed {
            return Ok(());
        }

        let mut entry = (*current).clone();
        entry.completed = true;
        entry.updated_at = Utc::now();
        let size = entry.size();
        self.cache.insert(key.to_string(), Arc::new(entry)).await;
        self.open.remove(key);

        debug!(key = %key, size = size, "Overflow entry completed");
        Ok(())
    }

    async fn get(&self, key: &str) -> OverflowResult<OverflowSnapshot> {
        self.ensure_open()?;

        let entry = self
            .cache
            .get(key)
            .await
            .ok_or_else(|| OverflowError::NotFound {
                key: key.to_string(),
            })?;
        if !entry.completed {
            return Err(OverflowError::Incomplete {
                key: key.to_string(),
            });
        }
        Ok(entry.snapshot(key))
    }

    async fn status(&self, key: &str) -> OverflowResult<Option<EntryStatus>> {
        self.ensure_open()?;
        Ok(self.cache.get(key).await.map(|entry| entry.status()))
    }

    async fn evict(&self, key: &str) -> OverflowResult<()> {
        self.ensure_open()?;
        self.open.remove(key);
        self.lost.remove(key);
        self.cache.invalidate(key).await;
        debug!(key = %key, "Overflow entry evicted");
        Ok(())
    }

    async fn clear(&self) -> OverflowResult<()> {
        self.ensure_open()?;
        self.open.clear();
        self.lost.clear();
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        info!("Overflow store cleared");
        Ok(())
    }

    async fn stats(&self) -> StoreStats {
        self.cache.run_pending_tasks().await;
        StoreStats {
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
            open_entries: self.open.len(),
            lost_entries: self.lost.len(),
        }
    }

    async fn health_check(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.open.clear();
        self.lost.clear();
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        info!("Overflow store shut down");
    }

    fn provider_name(&self) -> &'static str {
        "moka"
    }
}
