//! Work contract and scheduling policies

use std::sync::Arc;

use async_trait::async_trait;

use super::instance::{WorkInstance, WorkSnapshot};
use crate::constants::defaults;

/// A long-running unit of work
///
/// Two works with the same `id` are the same identity: the scheduler never
/// runs two bodies of one identity at the same time.
#[async_trait]
pub trait Work: Send + Sync + 'static {
    /// Identity used for coalescing and lookup
    fn id(&self) -> &str;

    /// Queue the work runs on
    fn category(&self) -> &str {
        defaults::WORK_CATEGORY
    }

    /// Human readable title
    fn title(&self) -> String {
        self.id().to_string()
    }

    /// Informational; running the body twice must be harmless when true
    fn is_idempotent(&self) -> bool {
        true
    }

    /// Execute the body
    ///
    /// Long bodies should poll [`WorkContext::is_suspended`] and return early
    /// once it reports true.
    async fn work(&self, ctx: &WorkContext) -> anyhow::Result<()>;
}

/// Per-execution handle passed to [`Work::work`]
#[derive(Debug, Clone)]
pub struct WorkContext {
    instance: Arc<WorkInstance>,
}

impl WorkContext {
    pub(crate) fn new(instance: Arc<WorkInstance>) -> Self {
        Self { instance }
    }

    /// True once suspension of this instance was requested
    pub fn is_suspended(&self) -> bool {
        self.instance.is_suspend_requested()
    }

    /// Update the free-form status text shown in snapshots
    pub fn set_status(&self, status: impl Into<String>) {
        self.instance.set_status(status.into());
    }

    pub fn work_id(&self) -> &str {
        self.instance.work_id()
    }

    pub fn instance_id(&self) -> uuid::Uuid {
        self.instance.instance_id()
    }
}

/// How `schedule` treats existing instances of the same identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// Queue the work. Without `force` a waiting instance absorbs the request;
    /// with `force` every queued or running instance is suspended first.
    Enqueue { force: bool },
    /// Do nothing when an instance is already queued or running
    IfNotScheduled,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self::Enqueue { force: false }
    }
}

/// Result of a `schedule` call
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// A new instance was queued
    Queued(WorkSnapshot),
    /// An already queued instance absorbed the request
    Coalesced(WorkSnapshot),
    /// An active instance exists and the policy forbids another
    Skipped(WorkSnapshot),
}

impl ScheduleOutcome {
    pub fn snapshot(&self) -> &WorkSnapshot {
        match self {
            Self::Queued(snapshot) | Self::Coalesced(snapshot) | Self::Skipped(snapshot) => snapshot,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}
