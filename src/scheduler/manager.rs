//! # Work Scheduler
//!
//! Runs [`Work`] bodies out of the caller's path. Each category gets a bounded
//! queue and a dispatcher task that hands queued instances to Tokio tasks,
//! bounded by a per-category semaphore.
//!
//! ## Identity rules
//!
//! Instances of one identity share an execution lock that is held for the
//! whole body, so a newly queued instance only turns RUNNING after the
//! previous body has returned. Scheduling decisions for an identity happen
//! under its registry entry lock.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::FutureExt;
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::errors::SchedulingError;
use super::events::{WorkEvent, WorkRef};
use super::instance::{WorkInstance, WorkSnapshot};
use super::state::WorkState;
use super::work::{SchedulePolicy, ScheduleOutcome, Work, WorkContext};
use crate::config::SchedulerConfig;
use crate::error::panic_message;
use crate::logging::log_work_operation;
use crate::metrics;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Instances of one identity
struct IdentitySlot {
    instances: Vec<Arc<WorkInstance>>,
    execution_lock: Arc<tokio::sync::Mutex<()>>,
}

impl IdentitySlot {
    fn new() -> Self {
        Self {
            instances: Vec::new(),
            execution_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Most recent instance in `state`
    fn latest(&self, state: WorkState) -> Option<&Arc<WorkInstance>> {
        self.instances.iter().rev().find(|i| i.state() == state)
    }

    fn latest_active(&self) -> Option<&Arc<WorkInstance>> {
        self.latest(WorkState::Running)
            .or_else(|| self.latest(WorkState::Scheduled))
    }
}

struct CategoryQueue {
    sender: mpsc::Sender<Arc<WorkInstance>>,
}

#[derive(Debug, Default)]
struct SchedulerCounters {
    scheduled: AtomicU64,
    coalesced: AtomicU64,
    skipped: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    suspended: AtomicU64,
}

/// Scheduler counters and current load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub coalesced: u64,
    pub skipped: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub suspended: u64,
    /// Instances currently queued
    pub queued: usize,
    /// Bodies currently executing, including suspended ones winding down
    pub executing: usize,
}

struct SchedulerInner {
    config: SchedulerConfig,
    registry: DashMap<String, IdentitySlot>,
    queues: DashMap<String, CategoryQueue>,
    dispatchers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<WorkEvent>,
    accepting: AtomicBool,
    executing: AtomicUsize,
    counters: SchedulerCounters,
}

/// Handle to the work scheduler; cheap to clone
#[derive(Clone)]
pub struct WorkScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for WorkScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkScheduler")
            .field("identities", &self.inner.registry.len())
            .field("categories", &self.inner.queues.len())
            .field("accepting", &self.inner.accepting.load(Ordering::Relaxed))
            .finish()
    }
}

impl WorkScheduler {
    /// Create a scheduler; dispatchers start lazily per category and need a Tokio runtime
    pub fn new(config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer_size);
        info!(
            default_max_concurrency = config.default_max_concurrency,
            queue_capacity = config.queue_capacity,
            categories = config.categories.len(),
            "Work scheduler created"
        );
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                registry: DashMap::new(),
                queues: DashMap::new(),
                dispatchers: parking_lot::Mutex::new(Vec::new()),
                events,
                accepting: AtomicBool::new(true),
                executing: AtomicUsize::new(0),
                counters: SchedulerCounters::default(),
            }),
        }
    }

    /// Queue `work` according to `policy`
    ///
    /// Waits while the category queue is full.
    pub async fn schedule(
        &self,
        work: Arc<dyn Work>,
        policy: SchedulePolicy,
    ) -> Result<ScheduleOutcome, SchedulingError> {
        let inner = &self.inner;
        inner.ensure_accepting()?;

        let work_id = work.id().to_string();
        if work_id.trim().is_empty() {
            return Err(SchedulingError::InvalidWork(
                "work id must not be blank".to_string(),
            ));
        }
        let category = work.category().to_string();

        let sender = inner.queue_sender(&category)?;
        let permit = sender
            .reserve()
            .await
            .map_err(|_| SchedulingError::QueueUnavailable {
                category: category.clone(),
            })?;
        inner.ensure_accepting()?;

        let mut suspended = Vec::new();
        let (outcome, queued) = {
            let mut slot = inner
                .registry
                .entry(work_id.clone())
                .or_insert_with(IdentitySlot::new);

            let existing = match policy {
                SchedulePolicy::IfNotScheduled => slot
                    .latest_active()
                    .map(|active| ScheduleOutcome::Skipped(active.snapshot())),
                SchedulePolicy::Enqueue { force: false } => {
                    slot.latest(WorkState::Scheduled).map(|waiting| {
                        waiting.absorb_request();
                        ScheduleOutcome::Coalesced(waiting.snapshot())
                    })
                }
                SchedulePolicy::Enqueue { force: true } => {
                    for instance in &slot.instances {
                        if let Some(previous) = instance.suspend(true) {
                            suspended.push((Arc::clone(instance), previous));
                        }
                    }
                    None
                }
            };

            match existing {
                Some(outcome) => (outcome, None),
                None => {
                    let instance = Arc::new(WorkInstance::new(
                        work,
                        Arc::clone(&slot.execution_lock),
                    ));
                    slot.instances.push(Arc::clone(&instance));
                    (ScheduleOutcome::Queued(instance.snapshot()), Some(instance))
                }
            }
        };

        for (instance, previous) in suspended {
            inner.record_suspension(&instance, previous, "superseded by forced schedule");
        }

        match queued {
            Some(instance) => {
                permit.send(Arc::clone(&instance));
                inner.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                metrics::scheduler::work_scheduled_total()
                    .add(1, &[KeyValue::new("category", category.clone())]);
                log_work_operation("schedule", &work_id, &category, "scheduled", None);
                inner.publish(WorkEvent::Scheduled {
                    work: work_ref(&instance),
                });
            }
            None => match &outcome {
                ScheduleOutcome::Coalesced(snapshot) => {
                    inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(work_id = %work_id, instance_id = %snapshot.instance_id, "Work request coalesced");
                    inner.publish(WorkEvent::Coalesced {
                        work: WorkRef {
                            work_id: snapshot.work_id.clone(),
                            instance_id: snapshot.instance_id,
                            category: snapshot.category.clone(),
                        },
                    });
                }
                _ => {
                    inner.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(work_id = %work_id, "Work already active, request skipped");
                }
            },
        }

        Ok(outcome)
    }

    /// Most recent instance of `work_id` in `state`
    pub fn find(&self, work_id: &str, state: WorkState) -> Option<WorkSnapshot> {
        self.inner
            .registry
            .get(work_id)
            .and_then(|slot| slot.latest(state).map(|instance| instance.snapshot()))
    }

    /// Aggregate state of an identity: running beats queued beats the latest instance
    pub fn state_of(&self, work_id: &str) -> WorkState {
        let Some(slot) = self.inner.registry.get(work_id) else {
            return WorkState::Unknown;
        };
        slot.latest_active()
            .or_else(|| slot.instances.last())
            .map(|instance| instance.state())
            .unwrap_or(WorkState::Unknown)
    }

    /// Every instance currently in `state`
    pub fn list(&self, state: WorkState) -> Vec<WorkSnapshot> {
        self.inner
            .registry
            .iter()
            .flat_map(|slot| {
                slot.instances
                    .iter()
                    .filter(|instance| instance.state() == state)
                    .map(|instance| instance.snapshot())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Request suspension of every queued or running instance of `work_id`
    ///
    /// Returns how many instances were suspended. They can be resumed later.
    pub fn suspend(&self, work_id: &str) -> usize {
        let suspended: Vec<_> = match self.inner.registry.get(work_id) {
            Some(slot) => slot
                .instances
                .iter()
                .filter_map(|instance| {
                    instance
                        .suspend(false)
                        .map(|previous| (Arc::clone(instance), previous))
                })
                .collect(),
            None => Vec::new(),
        };
        for (instance, previous) in &suspended {
            self.inner.record_suspension(instance, *previous, "suspension requested");
        }
        suspended.len()
    }

    /// Re-queue the most recent suspended instance of `work_id`
    ///
    /// Returns `None` when there is nothing to resume.
    pub async fn resume(&self, work_id: &str) -> Result<Option<WorkSnapshot>, SchedulingError> {
        let inner = &self.inner;
        inner.ensure_accepting()?;

        let candidate = inner.registry.get(work_id).and_then(|slot| {
            slot.instances
                .iter()
                .rev()
                .find(|i| i.state() == WorkState::Suspended && !i.is_superseded())
                .cloned()
        });
        let Some(instance) = candidate else {
            return Ok(None);
        };

        let sender = inner.queue_sender(instance.category())?;
        let permit = sender
            .reserve()
            .await
            .map_err(|_| SchedulingError::QueueUnavailable {
                category: instance.category().to_string(),
            })?;
        if !instance.resume() {
            return Ok(None);
        }
        permit.send(Arc::clone(&instance));

        log_work_operation("resume", work_id, instance.category(), "scheduled", None);
        inner.publish(WorkEvent::Resumed {
            work: work_ref(&instance),
        });
        Ok(Some(instance.snapshot()))
    }

    /// Lifecycle event stream
    pub fn subscribe(&self) -> broadcast::Receiver<WorkEvent> {
        self.inner.events.subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.inner.counters;
        SchedulerStats {
            scheduled: counters.scheduled.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            started: counters.started.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            suspended: counters.suspended.load(Ordering::Relaxed),
            queued: self.inner.count_in_state(WorkState::Scheduled),
            executing: self.inner.executing.load(Ordering::SeqCst),
        }
    }

    /// Wait until nothing is queued or executing; returns false on timeout
    pub async fn await_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Stop intake, suspend queued and running work, and wait for bodies to return
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SchedulingError> {
        let inner = &self.inner;
        if !inner.accepting.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        info!(timeout_ms = timeout.as_millis() as u64, "Work scheduler shutting down");

        let mut suspended = Vec::new();
        for slot in inner.registry.iter() {
            for instance in &slot.instances {
                if let Some(previous) = instance.suspend(false) {
                    suspended.push((Arc::clone(instance), previous));
                }
            }
        }
        for (instance, previous) in &suspended {
            inner.record_suspension(instance, *previous, "scheduler shutdown");
        }

        // Dropping the senders lets each dispatcher drain and exit
        inner.queues.clear();
        let started = Instant::now();
        let mut dispatchers: Vec<JoinHandle<()>> = std::mem::take(&mut *inner.dispatchers.lock());
        let joined = tokio::time::timeout(timeout, futures::future::join_all(dispatchers.iter_mut()))
            .await
            .is_ok();
        if !joined {
            for dispatcher in &dispatchers {
                dispatcher.abort();
            }
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        let deadline = Instant::now() + remaining;
        while inner.executing.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    executing = inner.executing.load(Ordering::SeqCst),
                    "Work scheduler shutdown timed out with bodies still running"
                );
                return Err(SchedulingError::ShutdownTimeout(timeout));
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }

        info!(suspended = suspended.len(), "Work scheduler shut down");
        Ok(())
    }
}

fn work_ref(instance: &WorkInstance) -> WorkRef {
    WorkRef {
        work_id: instance.work_id().to_string(),
        instance_id: instance.instance_id(),
        category: instance.category().to_string(),
    }
}

impl SchedulerInner {
    fn ensure_accepting(&self) -> Result<(), SchedulingError> {
        if self.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SchedulingError::ShutDown)
        }
    }

    fn publish(&self, event: WorkEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Sender of the category queue, starting its dispatcher on first use
    fn queue_sender(
        self: &Arc<Self>,
        category: &str,
    ) -> Result<mpsc::Sender<Arc<WorkInstance>>, SchedulingError> {
        if let Some(queue) = self.queues.get(category) {
            return Ok(queue.sender.clone());
        }

        let queue = self
            .queues
            .entry(category.to_string())
            .or_insert_with(|| self.start_dispatcher(category));
        if queue.sender.is_closed() {
            return Err(SchedulingError::QueueUnavailable {
                category: category.to_string(),
            });
        }
        Ok(queue.sender.clone())
    }

    fn start_dispatcher(self: &Arc<Self>, category: &str) -> CategoryQueue {
        let settings = self.config.category(category);
        let (sender, receiver) = mpsc::channel(settings.queue_capacity);
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrency));

        let handle = tokio::spawn(dispatch_loop(
            Arc::downgrade(self),
            category.to_string(),
            receiver,
            semaphore,
        ));
        self.dispatchers.lock().push(handle);

        info!(
            category = %category,
            max_concurrency = settings.max_concurrency,
            queue_capacity = settings.queue_capacity,
            "Work category dispatcher started"
        );
        CategoryQueue { sender }
    }

    fn record_suspension(&self, instance: &WorkInstance, previous: WorkState, reason: &str) {
        self.counters.suspended.fetch_add(1, Ordering::Relaxed);
        metrics::scheduler::work_suspended_total()
            .add(1, &[KeyValue::new("category", instance.category().to_string())]);
        log_work_operation(
            "suspend",
            instance.work_id(),
            instance.category(),
            "suspended",
            Some(reason),
        );
        self.publish(WorkEvent::Suspended {
            work: work_ref(instance),
            previous,
        });
    }

    async fn execute(self: Arc<Self>, instance: Arc<WorkInstance>, permit: OwnedSemaphorePermit) {
        let execution_lock = instance.execution_lock();
        let guard = execution_lock.lock().await;

        if !instance.transition(&[WorkState::Scheduled], WorkState::Running) {
            debug!(
                work_id = %instance.work_id(),
                state = %instance.state(),
                "Instance left the queue state while waiting for its identity"
            );
            drop(guard);
            drop(permit);
            self.release(&instance);
            return;
        }

        instance.set_executing(true);
        self.executing.fetch_add(1, Ordering::SeqCst);
        self.counters.started.fetch_add(1, Ordering::Relaxed);
        log_work_operation("start", instance.work_id(), instance.category(), "running", None);
        self.publish(WorkEvent::Started {
            work: work_ref(&instance),
        });

        let ctx = WorkContext::new(Arc::clone(&instance));
        let started = Instant::now();
        let result = AssertUnwindSafe(instance.work().work(&ctx)).catch_unwind().await;
        let elapsed = started.elapsed();

        let labels = [KeyValue::new("category", instance.category().to_string())];
        metrics::scheduler::work_duration().record(elapsed.as_secs_f64() * 1000.0, &labels);

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(("error", format!("{e:#}"))),
            Err(panic) => Some((
                "panic",
                format!("Work panicked: {}", panic_message(panic.as_ref())),
            )),
        };

        match failure {
            None => {
                if instance.transition(&[WorkState::Running], WorkState::Completed) {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    metrics::scheduler::work_completed_total().add(1, &labels);
                    log_work_operation(
                        "complete",
                        instance.work_id(),
                        instance.category(),
                        "completed",
                        None,
                    );
                    self.publish(WorkEvent::Completed {
                        work: work_ref(&instance),
                        duration_ms: elapsed.as_millis() as u64,
                    });
                } else {
                    debug!(
                        work_id = %instance.work_id(),
                        "Suspended work returned"
                    );
                }
            }
            Some((failure_type, message)) => {
                instance.set_failure(message.clone());
                if instance.transition(&[WorkState::Running], WorkState::Failed) {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    metrics::scheduler::work_failures_total().add(
                        1,
                        &[
                            KeyValue::new("category", instance.category().to_string()),
                            KeyValue::new("failure_type", failure_type),
                        ],
                    );
                    error!(
                        work_id = %instance.work_id(),
                        category = %instance.category(),
                        failure_type = failure_type,
                        error = %message,
                        "Work failed"
                    );
                    self.publish(WorkEvent::Failed {
                        work: work_ref(&instance),
                        error: message,
                    });
                } else {
                    warn!(
                        work_id = %instance.work_id(),
                        error = %message,
                        "Suspended work returned an error"
                    );
                }
            }
        }

        instance.set_executing(false);
        self.executing.fetch_sub(1, Ordering::SeqCst);
        drop(guard);
        drop(permit);
        self.release(&instance);
    }

    /// Forget an instance nobody can observe usefully anymore
    fn release(&self, instance: &Arc<WorkInstance>) {
        if self.config.retain_completed || instance.is_executing() {
            return;
        }
        let state = instance.state();
        let discard = state.is_terminal()
            || (state == WorkState::Suspended && instance.is_superseded());
        if !discard {
            return;
        }

        if let Some(mut slot) = self.registry.get_mut(instance.work_id()) {
            slot.instances.retain(|other| !Arc::ptr_eq(other, instance));
        }
        self.registry
            .remove_if(instance.work_id(), |_, slot| slot.instances.is_empty());
    }

    fn count_in_state(&self, state: WorkState) -> usize {
        self.registry
            .iter()
            .map(|slot| slot.instances.iter().filter(|i| i.state() == state).count())
            .sum()
    }

    fn is_idle(&self) -> bool {
        self.executing.load(Ordering::SeqCst) == 0 && self.count_in_state(WorkState::Scheduled) == 0
            && self.count_in_state(WorkState::Running) == 0
    }
}

async fn dispatch_loop(
    scheduler: Weak<SchedulerInner>,
    category: String,
    mut receiver: mpsc::Receiver<Arc<WorkInstance>>,
    semaphore: Arc<Semaphore>,
) {
    while let Some(instance) = receiver.recv().await {
        let Some(inner) = scheduler.upgrade() else {
            break;
        };
        if instance.state() != WorkState::Scheduled {
            debug!(
                category = %category,
                work_id = %instance.work_id(),
                state = %instance.state(),
                "Skipping dequeued instance that is no longer scheduled"
            );
            inner.release(&instance);
            continue;
        }

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        tokio::spawn(inner.execute(instance, permit));
    }
    debug!(category = %category, "Work category dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Counting {
        id: String,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Work for Counting {
        fn id(&self) -> &str {
            &self.id
        }

        async fn work(&self, ctx: &WorkContext) -> anyhow::Result<()> {
            ctx.set_status("counting");
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Work for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        async fn work(&self, _ctx: &WorkContext) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn retaining_config() -> SchedulerConfig {
        SchedulerConfig {
            retain_completed: true,
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_scheduled_work_completes() {
        let scheduler = WorkScheduler::new(retaining_config());
        let runs = Arc::new(AtomicUsize::new(0));
        let outcome = scheduler
            .schedule(
                Arc::new(Counting {
                    id: "count".to_string(),
                    runs: Arc::clone(&runs),
                }),
                SchedulePolicy::default(),
            )
            .await
            .unwrap();
        assert!(outcome.is_queued());

        assert!(scheduler.await_idle(Duration::from_secs(5)).await);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let done = scheduler.find("count", WorkState::Completed).unwrap();
        assert_eq!(done.status.as_deref(), Some("counting"));
        assert_eq!(scheduler.state_of("count"), WorkState::Completed);
        assert_eq!(scheduler.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_failing_work_is_failed_and_broadcast() {
        let scheduler = WorkScheduler::new(retaining_config());
        let mut events = scheduler.subscribe();
        scheduler
            .schedule(Arc::new(Failing), SchedulePolicy::default())
            .await
            .unwrap();
        assert!(scheduler.await_idle(Duration::from_secs(5)).await);

        let failed = scheduler.find("failing", WorkState::Failed).unwrap();
        assert_eq!(failed.failure.as_deref(), Some("disk full"));

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let WorkEvent::Failed { error, .. } = event {
                assert_eq!(error, "disk full");
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_terminal_instances_are_discarded_by_default() {
        let scheduler = WorkScheduler::new(SchedulerConfig::default());
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .schedule(
                Arc::new(Counting {
                    id: "gone".to_string(),
                    runs,
                }),
                SchedulePolicy::default(),
            )
            .await
            .unwrap();
        assert!(scheduler.await_idle(Duration::from_secs(5)).await);
        assert_eq!(scheduler.state_of("gone"), WorkState::Unknown);
    }

    #[tokio::test]
    async fn test_blank_id_is_rejected() {
        let scheduler = WorkScheduler::new(SchedulerConfig::default());
        let result = scheduler
            .schedule(
                Arc::new(Counting {
                    id: " ".to_string(),
                    runs: Arc::new(AtomicUsize::new(0)),
                }),
                SchedulePolicy::default(),
            )
            .await;
        assert!(matches!(result, Err(SchedulingError::InvalidWork(_))));
    }

    #[tokio::test]
    async fn test_schedule_after_shutdown_fails() {
        let scheduler = WorkScheduler::new(SchedulerConfig::default());
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
        let result = scheduler
            .schedule(Arc::new(Failing), SchedulePolicy::default())
            .await;
        assert_eq!(result.unwrap_err(), SchedulingError::ShutDown);
    }
}
