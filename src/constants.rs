//! # System Constants
//!
//! Stream names, event names and default tuning values shared by the scheduler,
//! the topology runtime and the bulk pipeline.

/// Lifecycle events emitted by the work scheduler and the bulk pipeline
pub mod events {
    // Work lifecycle events
    pub const WORK_SCHEDULED: &str = "work.scheduled";
    pub const WORK_COALESCED: &str = "work.coalesced";
    pub const WORK_STARTED: &str = "work.started";
    pub const WORK_COMPLETED: &str = "work.completed";
    pub const WORK_FAILED: &str = "work.failed";
    pub const WORK_SUSPENDED: &str = "work.suspended";
    pub const WORK_RESUMED: &str = "work.resumed";

    // Bulk command lifecycle events
    pub const BULK_SUBMITTED: &str = "bulk.submitted";
    pub const BULK_SCROLL_COMPLETED: &str = "bulk.scroll_completed";
    pub const BULK_COMPLETED: &str = "bulk.completed";
    pub const BULK_ABORTED: &str = "bulk.aborted";
}

/// Well-known stream and computation names of the bulk pipeline
pub mod streams {
    /// Stream carrying submitted commands to the scroller
    pub const COMMAND_STREAM: &str = "bulk/command";
    /// Stream carrying status increments to the status computation
    pub const STATUS_STREAM: &str = "bulk/status";
    /// Prefix of the per-action bucket streams (`bulk/<action>`)
    pub const ACTION_STREAM_PREFIX: &str = "bulk/";

    pub const SCROLLER_COMPUTATION: &str = "bulk/scroller";
    pub const STATUS_COMPUTATION: &str = "bulk/status";

    /// Stream name for a given action
    pub fn action_stream(action: &str) -> String {
        format!("{ACTION_STREAM_PREFIX}{action}")
    }
}

/// Default values used when a configuration section is absent
pub mod defaults {
    pub const WORK_CATEGORY: &str = "default";
    pub const WORK_MAX_CONCURRENCY: usize = 4;
    pub const WORK_QUEUE_CAPACITY: usize = 1024;

    pub const OVERFLOW_MAX_SIZE_BYTES: u64 = 256 * 1024 * 1024;
    pub const OVERFLOW_TTL_SECONDS: u64 = 3600;
    pub const OVERFLOW_MAINTENANCE_INTERVAL_MS: u64 = 1000;
    pub const OVERFLOW_KEY_PREFIX: &str = "overflow:";

    pub const TOPOLOGY_CONCURRENCY: usize = 2;
    pub const TOPOLOGY_CHANNEL_CAPACITY: usize = 256;
    pub const TOPOLOGY_MAX_RETRIES: u32 = 3;
    pub const TOPOLOGY_RETRY_DELAY_MS: u64 = 100;

    pub const BULK_BUCKET_SIZE: usize = 100;
    pub const BULK_SCROLL_BATCH_SIZE: usize = 1000;
    pub const BULK_OVERFLOW_THRESHOLD_BYTES: usize = 1_000_000;
    pub const BULK_ACTION_CONCURRENCY: usize = 2;
    pub const BULK_FINISHED_RETENTION_SECONDS: u64 = 3600;
    pub const BULK_STATUS_MAINTENANCE_INTERVAL_MS: u64 = 10_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_stream_name() {
        assert_eq!(streams::action_stream("legal_hold"), "bulk/legal_hold");
        assert_ne!(streams::action_stream("command"), "");
    }
}
