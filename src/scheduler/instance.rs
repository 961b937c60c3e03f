//! Scheduled work instances

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use super::state::WorkState;
use super::work::Work;

#[derive(Debug, Clone, Default)]
struct Timeline {
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// One scheduling of a [`Work`]
pub struct WorkInstance {
    instance_id: Uuid,
    work: Arc<dyn Work>,
    work_id: String,
    category: String,
    title: String,
    idempotent: bool,
    state: Mutex<WorkState>,
    status: Mutex<Option<String>>,
    failure: Mutex<Option<String>>,
    timeline: Mutex<Timeline>,
    suspend_requested: AtomicBool,
    /// Suspended because a forced schedule replaced it; never resumed
    superseded: AtomicBool,
    executing: AtomicBool,
    coalesced_requests: AtomicU32,
    /// Shared by every instance of the identity; held while a body runs
    execution_lock: Arc<tokio::sync::Mutex<()>>,
}

impl WorkInstance {
    pub(crate) fn new(work: Arc<dyn Work>, execution_lock: Arc<tokio::sync::Mutex<()>>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            work_id: work.id().to_string(),
            category: work.category().to_string(),
            title: work.title(),
            idempotent: work.is_idempotent(),
            work,
            state: Mutex::new(WorkState::Scheduled),
            status: Mutex::new(None),
            failure: Mutex::new(None),
            timeline: Mutex::new(Timeline {
                scheduled_at: Some(Utc::now()),
                ..Timeline::default()
            }),
            suspend_requested: AtomicBool::new(false),
            superseded: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            coalesced_requests: AtomicU32::new(0),
            execution_lock,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn work_id(&self) -> &str {
        &self.work_id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn state(&self) -> WorkState {
        *self.state.lock()
    }

    pub(crate) fn work(&self) -> &Arc<dyn Work> {
        &self.work
    }

    pub(crate) fn execution_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.execution_lock)
    }

    /// Move to `to` if the current state is one of `from`
    pub(crate) fn transition(&self, from: &[WorkState], to: WorkState) -> bool {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return false;
        }
        *state = to;
        match to {
            WorkState::Running => self.timeline.lock().started_at = Some(Utc::now()),
            WorkState::Completed | WorkState::Failed => {
                self.timeline.lock().finished_at = Some(Utc::now())
            }
            WorkState::Scheduled => self.timeline.lock().scheduled_at = Some(Utc::now()),
            WorkState::Unknown | WorkState::Suspended => {}
        }
        true
    }

    /// Request suspension of a queued or running instance
    ///
    /// Returns the state it was suspended from.
    pub(crate) fn suspend(&self, superseded: bool) -> Option<WorkState> {
        let mut state = self.state.lock();
        if !state.is_active() {
            return None;
        }
        let previous = *state;
        *state = WorkState::Suspended;
        self.suspend_requested.store(true, Ordering::Release);
        if superseded {
            self.superseded.store(true, Ordering::Release);
        }
        Some(previous)
    }

    /// Put a suspended instance back in the queue state
    pub(crate) fn resume(&self) -> bool {
        if !self.transition(&[WorkState::Suspended], WorkState::Scheduled) {
            return false;
        }
        self.suspend_requested.store(false, Ordering::Release);
        true
    }

    pub(crate) fn is_suspend_requested(&self) -> bool {
        self.suspend_requested.load(Ordering::Acquire)
    }

    pub(crate) fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }

    pub(crate) fn set_executing(&self, executing: bool) {
        self.executing.store(executing, Ordering::Release);
    }

    pub(crate) fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    pub(crate) fn absorb_request(&self) {
        self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_status(&self, status: String) {
        *self.status.lock() = Some(status);
    }

    pub(crate) fn set_failure(&self, failure: String) {
        *self.failure.lock() = Some(failure);
    }

    pub fn snapshot(&self) -> WorkSnapshot {
        let timeline = self.timeline.lock().clone();
        WorkSnapshot {
            instance_id: self.instance_id,
            work_id: self.work_id.clone(),
            category: self.category.clone(),
            title: self.title.clone(),
            idempotent: self.idempotent,
            state: self.state(),
            status: self.status.lock().clone(),
            failure: self.failure.lock().clone(),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            scheduled_at: timeline.scheduled_at,
            started_at: timeline.started_at,
            finished_at: timeline.finished_at,
        }
    }
}

impl std::fmt::Debug for WorkInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkInstance")
            .field("instance_id", &self.instance_id)
            .field("work_id", &self.work_id)
            .field("category", &self.category)
            .field("state", &self.state())
            .field("executing", &self.is_executing())
            .finish()
    }
}

/// Point-in-time view of a work instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkSnapshot {
    pub instance_id: Uuid,
    pub work_id: String,
    pub category: String,
    pub title: String,
    pub idempotent: bool,
    pub state: WorkState,
    pub status: Option<String>,
    pub failure: Option<String>,
    /// Requests absorbed by this instance while it was queued
    pub coalesced_requests: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::WorkContext;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Work for Noop {
        fn id(&self) -> &str {
            "noop"
        }

        async fn work(&self, _ctx: &WorkContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn instance() -> WorkInstance {
        WorkInstance::new(Arc::new(Noop), Arc::new(tokio::sync::Mutex::new(())))
    }

    #[test]
    fn test_transitions_are_guarded() {
        let instance = instance();
        assert_eq!(instance.state(), WorkState::Scheduled);
        assert!(!instance.transition(&[WorkState::Running], WorkState::Completed));
        assert!(instance.transition(&[WorkState::Scheduled], WorkState::Running));
        assert!(instance.snapshot().started_at.is_some());
        assert!(instance.transition(&[WorkState::Running], WorkState::Completed));
        assert!(instance.snapshot().finished_at.is_some());
    }

    #[test]
    fn test_suspend_and_resume() {
        let instance = instance();
        assert!(instance.transition(&[WorkState::Scheduled], WorkState::Running));
        assert_eq!(instance.suspend(false), Some(WorkState::Running));
        assert!(instance.is_suspend_requested());
        assert_eq!(instance.suspend(false), None);

        assert!(instance.resume());
        assert_eq!(instance.state(), WorkState::Scheduled);
        assert!(!instance.is_suspend_requested());
    }

    #[test]
    fn test_terminal_instance_cannot_be_suspended() {
        let instance = instance();
        instance.transition(&[WorkState::Scheduled], WorkState::Failed);
        assert_eq!(instance.suspend(true), None);
        assert!(!instance.is_superseded());
    }
}
