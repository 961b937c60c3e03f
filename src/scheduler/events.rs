//! Work lifecycle events broadcast to subscribers

use serde::Serialize;
use uuid::Uuid;

use super::state::WorkState;
use crate::constants::events;

/// Which instance an event is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkRef {
    pub work_id: String,
    pub instance_id: Uuid,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkEvent {
    Scheduled { work: WorkRef },
    Coalesced { work: WorkRef },
    Started { work: WorkRef },
    Completed { work: WorkRef, duration_ms: u64 },
    Failed { work: WorkRef, error: String },
    Suspended { work: WorkRef, previous: WorkState },
    Resumed { work: WorkRef },
}

impl WorkEvent {
    /// Event name as published on the lifecycle channel
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scheduled { .. } => events::WORK_SCHEDULED,
            Self::Coalesced { .. } => events::WORK_COALESCED,
            Self::Started { .. } => events::WORK_STARTED,
            Self::Completed { .. } => events::WORK_COMPLETED,
            Self::Failed { .. } => events::WORK_FAILED,
            Self::Suspended { .. } => events::WORK_SUSPENDED,
            Self::Resumed { .. } => events::WORK_RESUMED,
        }
    }

    pub fn work(&self) -> &WorkRef {
        match self {
            Self::Scheduled { work }
            | Self::Coalesced { work }
            | Self::Started { work }
            | Self::Completed { work, .. }
            | Self::Failed { work, .. }
            | Self::Suspended { work, .. }
            | Self::Resumed { work } => work,
        }
    }
}
