//! Shared helpers for integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tasker_bulk::bulk::{
    ActionDescriptor, ActionError, ActionParams, ActionSession, BulkAction, Document,
    ExecutionTarget, IdScroll, InMemoryRepository, RecordOutcome, Repository, RepositoryError,
    RepositorySession,
};
use tasker_bulk::overflow::{
    EntryStatus, OverflowBlob, OverflowResult, OverflowSnapshot, OverflowStore, ParamValue,
    StoreStats,
};
use tasker_bulk::scheduler::{Work, WorkContext};

pub fn init_test_logging() {
    tasker_bulk::logging::init_tracing();
}

/// Repository holding `count` documents `doc-00000..` with `kind` set
pub fn seeded_repository(count: usize, kind: &str) -> Arc<InMemoryRepository> {
    let repository = Arc::new(InMemoryRepository::default());
    for i in 0..count {
        let mut document = Document::new();
        document.insert("kind".to_string(), json!(kind));
        repository.insert(format!("doc-{i:05}"), document);
    }
    repository
}

/// Repository whose sessions or scrolls are always unavailable
pub struct UnavailableRepository {
    inner: Arc<InMemoryRepository>,
    pub fail_sessions: AtomicBool,
    pub fail_scrolls: AtomicBool,
    pub session_attempts: AtomicUsize,
}

impl UnavailableRepository {
    pub fn new(inner: Arc<InMemoryRepository>) -> Self {
        Self {
            inner,
            fail_sessions: AtomicBool::new(false),
            fail_scrolls: AtomicBool::new(false),
            session_attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Repository for UnavailableRepository {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn validate_query(&self, query: &str) -> Result<(), RepositoryError> {
        self.inner.validate_query(query)
    }

    async fn scroll(
        &self,
        query: &str,
        target: &ExecutionTarget,
        batch_size: usize,
    ) -> Result<Box<dyn IdScroll>, RepositoryError> {
        if self.fail_scrolls.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("index offline".to_string()));
        }
        self.inner.scroll(query, target, batch_size).await
    }

    async fn open_session(
        &self,
        target: &ExecutionTarget,
    ) -> Result<Box<dyn RepositorySession>, RepositoryError> {
        self.session_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("db down".to_string()));
        }
        self.inner.open_session(target).await
    }
}

/// Overflow store wrapper counting calls, optionally losing every entry on read
pub struct CountingStore {
    inner: Arc<dyn OverflowStore>,
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
    pub lose_entries: AtomicBool,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn OverflowStore>) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            lose_entries: AtomicBool::new(false),
        }
    }

    pub fn interactions(&self) -> usize {
        self.puts.load(Ordering::SeqCst) + self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OverflowStore for CountingStore {
    async fn put(
        &self,
        key: &str,
        params: HashMap<String, ParamValue>,
        payloads: Vec<OverflowBlob>,
    ) -> OverflowResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, params, payloads).await
    }

    async fn mark_complete(&self, key: &str) -> OverflowResult<()> {
        self.inner.mark_complete(key).await
    }

    async fn get(&self, key: &str) -> OverflowResult<OverflowSnapshot> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.lose_entries.load(Ordering::SeqCst) {
            self.inner.evict(key).await?;
        }
        self.inner.get(key).await
    }

    async fn status(&self, key: &str) -> OverflowResult<Option<EntryStatus>> {
        self.inner.status(key).await
    }

    async fn evict(&self, key: &str) -> OverflowResult<()> {
        self.inner.evict(key).await
    }

    async fn clear(&self) -> OverflowResult<()> {
        self.inner.clear().await
    }

    async fn stats(&self) -> StoreStats {
        self.inner.stats().await
    }

    async fn health_check(&self) -> bool {
        self.inner.health_check().await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await
    }

    fn provider_name(&self) -> &'static str {
        "counting"
    }
}

/// Tracks how many bodies of one identity run at once
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    running: AtomicUsize,
    max_running: AtomicUsize,
    pub runs: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

/// Work that runs until suspended or until `duration` elapses
pub struct SlowWork {
    pub id: String,
    pub duration: Duration,
    pub probe: Arc<ConcurrencyProbe>,
}

impl SlowWork {
    pub fn new(id: &str, duration: Duration, probe: Arc<ConcurrencyProbe>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            duration,
            probe,
        })
    }
}

#[async_trait]
impl Work for SlowWork {
    fn id(&self) -> &str {
        &self.id
    }

    async fn work(&self, ctx: &WorkContext) -> anyhow::Result<()> {
        let running = self.probe.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_running.fetch_max(running, Ordering::SeqCst);
        self.probe.runs.fetch_add(1, Ordering::SeqCst);

        let deadline = tokio::time::Instant::now() + self.duration;
        while tokio::time::Instant::now() < deadline && !ctx.is_suspended() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        self.probe.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sets `touched = true` on every document except `poisoned`
pub struct TouchAction {
    poisoned: String,
}

impl TouchAction {
    pub const NAME: &'static str = "touch";

    pub fn descriptor(poisoned: &str) -> ActionDescriptor {
        let poisoned = poisoned.to_string();
        ActionDescriptor::new(
            Self::NAME,
            Arc::new(move || {
                Box::new(TouchAction {
                    poisoned: poisoned.clone(),
                }) as Box<dyn BulkAction>
            }),
        )
    }
}

#[async_trait]
impl BulkAction for TouchAction {
    async fn compute_record(
        &mut self,
        session: &mut ActionSession,
        id: &str,
        _params: &ActionParams,
    ) -> Result<RecordOutcome, ActionError> {
        if id == self.poisoned {
            return Err(ActionError::failed("document is corrupt"));
        }
        session.set_property(id, "touched", json!(true)).await?;
        Ok(RecordOutcome::Processed)
    }
}
