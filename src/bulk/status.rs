//! Bulk command status and the store folding status updates

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::command::BulkCommand;
use crate::constants::events;
use crate::logging::log_bulk_operation;

/// Failed document errors kept per command for inspection
const MAX_RECORDED_ERRORS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkState {
    /// Accepted, scroller has not started
    Scheduled,
    /// Ids are being scrolled and buckets may already be processed
    Scrolling,
    /// Scroll finished, buckets outstanding
    Running,
    Completed,
    Aborted,
    /// The command could not be scrolled
    Failed,
}

impl BulkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed)
    }
}

impl fmt::Display for BulkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Scrolling => write!(f, "scrolling"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A document the action failed on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub id: String,
    pub message: String,
}

/// Progress of a bulk command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkStatus {
    pub command_id: Uuid,
    pub action: String,
    pub state: BulkState,
    /// Ids handled by the action, including skipped and failed ones
    pub processed: u64,
    pub skipped: u64,
    /// Failed ids, plus the ids of lost buckets once the command completes
    pub error_count: u64,
    /// Ids matched by the query; unknown until the scroll ends
    pub total: Option<u64>,
    pub bucket_count: Option<u64>,
    pub buckets_processed: u64,
    /// Buckets whose payload could not be recovered
    pub lost_buckets: u64,
    pub errors: Vec<RecordError>,
    pub last_error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub scroll_started_at: Option<DateTime<Utc>>,
    pub scroll_ended_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkStatus {
    fn new(command: &BulkCommand) -> Self {
        Self {
            command_id: command.id,
            action: command.action.clone(),
            state: BulkState::Scheduled,
            processed: 0,
            skipped: 0,
            error_count: 0,
            total: None,
            bucket_count: None,
            buckets_processed: 0,
            lost_buckets: 0,
            errors: Vec::new(),
            last_error: None,
            submitted_at: command.submitted_at.unwrap_or_else(Utc::now),
            scroll_started_at: None,
            scroll_ended_at: None,
            completed_at: None,
        }
    }

    /// True once no further progress will be made
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0 || self.lost_buckets > 0
    }

    fn finish(&mut self, state: BulkState) {
        self.state = state;
        self.completed_at = Some(Utc::now());
    }
}

/// Increment emitted on the status stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusUpdate {
    ScrollStarted {
        command_id: Uuid,
        at: DateTime<Utc>,
    },
    ScrollEnded {
        command_id: Uuid,
        total: u64,
        bucket_count: u64,
        at: DateTime<Utc>,
    },
    BucketProcessed {
        command_id: Uuid,
        bucket_index: u64,
        processed: u64,
        skipped: u64,
        errors: Vec<RecordError>,
    },
    BucketLost {
        command_id: Uuid,
        bucket_index: u64,
        reason: String,
    },
    Failed {
        command_id: Uuid,
        reason: String,
    },
}

impl StatusUpdate {
    pub fn command_id(&self) -> Uuid {
        match self {
            Self::ScrollStarted { command_id, .. }
            | Self::ScrollEnded { command_id, .. }
            | Self::BucketProcessed { command_id, .. }
            | Self::BucketLost { command_id, .. }
            | Self::Failed { command_id, .. } => *command_id,
        }
    }
}

struct StatusEntry {
    status: BulkStatus,
    seen_buckets: HashSet<u64>,
}

/// Commands and their folded status
///
/// A command's parameters are released once it is terminal; its status is
/// kept until [`purge_finished`](Self::purge_finished) removes it.
#[derive(Default)]
pub struct BulkStatusStore {
    commands: DashMap<Uuid, BulkCommand>,
    statuses: DashMap<Uuid, StatusEntry>,
}

impl std::fmt::Debug for BulkStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkStatusStore")
            .field("commands", &self.commands.len())
            .field("statuses", &self.statuses.len())
            .finish()
    }
}

impl BulkStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted command in the scheduled state
    pub fn register(&self, command: BulkCommand) -> BulkStatus {
        let status = BulkStatus::new(&command);
        self.statuses.insert(
            command.id,
            StatusEntry {
                status: status.clone(),
                seen_buckets: HashSet::new(),
            },
        );
        self.commands.insert(command.id, command);
        status
    }

    pub fn command(&self, command_id: Uuid) -> Option<BulkCommand> {
        self.commands.get(&command_id).map(|c| c.clone())
    }

    pub fn status(&self, command_id: Uuid) -> Option<BulkStatus> {
        self.statuses.get(&command_id).map(|e| e.status.clone())
    }

    pub fn is_terminal(&self, command_id: Uuid) -> bool {
        self.statuses
            .get(&command_id)
            .map(|e| e.status.is_done())
            .unwrap_or(false)
    }

    /// Statuses of commands that have not reached a terminal state
    pub fn active(&self) -> Vec<BulkStatus> {
        self.statuses
            .iter()
            .filter(|e| !e.status.is_done())
            .map(|e| e.status.clone())
            .collect()
    }

    /// Number of commands whose status is still held
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Stop a command; returns the new status unless it was unknown
    pub fn abort(&self, command_id: Uuid) -> Option<BulkStatus> {
        let status = {
            let mut entry = self.statuses.get_mut(&command_id)?;
            if !entry.status.is_done() {
                entry.status.finish(BulkState::Aborted);
                log_bulk_operation(
                    events::BULK_ABORTED,
                    &command_id,
                    &entry.status.action,
                    None,
                );
            }
            entry.status.clone()
        };
        self.commands.remove(&command_id);
        Some(status)
    }

    /// Forget terminal commands that finished more than `retention` ago
    pub fn purge_finished(&self, retention: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return 0;
        };
        let before = self.statuses.len();
        self.statuses.retain(|_, entry| {
            entry
                .status
                .completed_at
                .map_or(true, |completed_at| completed_at > cutoff)
        });
        let purged = before.saturating_sub(self.statuses.len());
        if purged > 0 {
            tracing::debug!(
                purged = purged,
                retention_secs = retention.as_secs(),
                "Purged finished bulk commands"
            );
        }
        purged
    }

    /// Purge finished commands every `interval` until the handle is aborted
    pub fn spawn_maintenance(self: &Arc<Self>, retention: Duration, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.purge_finished(retention);
            }
        })
    }

    /// Fold one update into the command's status
    ///
    /// Updates for unknown commands are ignored; bucket updates are counted
    /// once per bucket index so redelivered buckets do not inflate progress.
    pub fn apply(&self, update: StatusUpdate) -> Option<BulkStatus> {
        let command_id = update.command_id();
        let status = self.fold(command_id, update)?;
        if status.is_done() {
            self.commands.remove(&command_id);
        }
        Some(status)
    }

    fn fold(&self, command_id: Uuid, update: StatusUpdate) -> Option<BulkStatus> {
        let mut entry = self.statuses.get_mut(&command_id)?;
        let entry = &mut *entry;
        let status = &mut entry.status;

        match update {
            StatusUpdate::ScrollStarted { at, .. } => {
                if status.state == BulkState::Scheduled {
                    status.state = BulkState::Scrolling;
                }
                status.scroll_started_at.get_or_insert(at);
            }
            StatusUpdate::ScrollEnded {
                total,
                bucket_count,
                at,
                ..
            } => {
                status.total = Some(total);
                status.bucket_count = Some(bucket_count);
                status.scroll_ended_at = Some(at);
                if matches!(status.state, BulkState::Scheduled | BulkState::Scrolling) {
                    status.state = BulkState::Running;
                }
                log_bulk_operation(
                    events::BULK_SCROLL_COMPLETED,
                    &command_id,
                    &status.action,
                    Some(&format!("total={total} buckets={bucket_count}")),
                );
            }
            StatusUpdate::BucketProcessed {
                bucket_index,
                processed,
                skipped,
                errors,
                ..
            } => {
                if !entry.seen_buckets.insert(bucket_index) {
                    tracing::debug!(
                        command_id = %command_id,
                        bucket_index = bucket_index,
                        "Duplicate bucket status ignored"
                    );
                    return Some(status.clone());
                }
                status.processed += processed;
                status.skipped += skipped;
                status.error_count += errors.len() as u64;
                status.buckets_processed += 1;
                if let Some(last) = errors.last() {
                    status.last_error = Some(format!("{}: {}", last.id, last.message));
                }
                let room = MAX_RECORDED_ERRORS.saturating_sub(status.errors.len());
                status.errors.extend(errors.into_iter().take(room));
            }
            StatusUpdate::BucketLost {
                bucket_index,
                reason,
                ..
            } => {
                if !entry.seen_buckets.insert(bucket_index) {
                    tracing::debug!(
                        command_id = %command_id,
                        bucket_index = bucket_index,
                        "Duplicate lost bucket ignored"
                    );
                    return Some(status.clone());
                }
                status.lost_buckets += 1;
                status.last_error = Some(reason);
            }
            StatusUpdate::Failed { reason, .. } => {
                if !status.is_done() {
                    status.finish(BulkState::Failed);
                    tracing::error!(
                        command_id = %command_id,
                        action = %status.action,
                        reason = %reason,
                        "Bulk command failed"
                    );
                }
                status.last_error = Some(reason);
            }
        }

        let all_buckets_seen = status
            .bucket_count
            .is_some_and(|count| status.buckets_processed + status.lost_buckets >= count);
        if status.state == BulkState::Running && all_buckets_seen {
            // Ids of lost buckets never reached the action
            let unaccounted = status.total.unwrap_or(0).saturating_sub(status.processed);
            status.error_count += unaccounted;
            status.finish(BulkState::Completed);
            log_bulk_operation(
                events::BULK_COMPLETED,
                &command_id,
                &status.action,
                Some(&format!(
                    "processed={} errors={} skipped={}",
                    status.processed, status.error_count, status.skipped
                )),
            );
        }

        Some(status.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(store: &BulkStatusStore) -> Uuid {
        let mut command = BulkCommand::new("set_properties", "SELECT * FROM Document");
        command.id = Uuid::new_v4();
        store.register(command).command_id
    }

    fn bucket(command_id: Uuid, index: u64, processed: u64) -> StatusUpdate {
        StatusUpdate::BucketProcessed {
            command_id,
            bucket_index: index,
            processed,
            skipped: 0,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_completion_requires_scroll_end_and_all_buckets() {
        let store = BulkStatusStore::new();
        let id = registered(&store);

        store.apply(StatusUpdate::ScrollStarted { command_id: id, at: Utc::now() });
        store.apply(bucket(id, 0, 10));
        assert_eq!(store.status(id).unwrap().state, BulkState::Scrolling);

        store.apply(StatusUpdate::ScrollEnded {
            command_id: id,
            total: 15,
            bucket_count: 2,
            at: Utc::now(),
        });
        assert_eq!(store.status(id).unwrap().state, BulkState::Running);

        let status = store.apply(bucket(id, 1, 5)).unwrap();
        assert_eq!(status.state, BulkState::Completed);
        assert_eq!(status.processed, 15);
        assert_eq!(status.total, Some(15));
        assert!(status.is_done());
    }

    #[test]
    fn test_duplicate_buckets_are_counted_once() {
        let store = BulkStatusStore::new();
        let id = registered(&store);
        store.apply(bucket(id, 0, 10));
        store.apply(bucket(id, 0, 10));
        assert_eq!(store.status(id).unwrap().processed, 10);
    }

    #[test]
    fn test_empty_scroll_completes_immediately() {
        let store = BulkStatusStore::new();
        let id = registered(&store);
        let status = store
            .apply(StatusUpdate::ScrollEnded {
                command_id: id,
                total: 0,
                bucket_count: 0,
                at: Utc::now(),
            })
            .unwrap();
        assert_eq!(status.state, BulkState::Completed);
    }

    #[test]
    fn test_abort_is_terminal() {
        let store = BulkStatusStore::new();
        let id = registered(&store);
        assert_eq!(store.abort(id).unwrap().state, BulkState::Aborted);
        assert!(store.is_terminal(id));

        // Late progress is still folded but the state stays aborted
        let status = store.apply(bucket(id, 0, 3)).unwrap();
        assert_eq!(status.state, BulkState::Aborted);
        assert_eq!(status.processed, 3);
        assert!(store.abort(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_errors_are_counted_and_capped() {
        let store = BulkStatusStore::new();
        let id = registered(&store);
        let errors: Vec<RecordError> = (0..80)
            .map(|i| RecordError {
                id: format!("doc-{i}"),
                message: "boom".to_string(),
            })
            .collect();
        let status = store
            .apply(StatusUpdate::BucketProcessed {
                command_id: id,
                bucket_index: 0,
                processed: 80,
                skipped: 0,
                errors,
            })
            .unwrap();
        assert_eq!(status.error_count, 80);
        assert_eq!(status.errors.len(), MAX_RECORDED_ERRORS);
        assert_eq!(status.last_error.as_deref(), Some("doc-79: boom"));
        assert!(status.has_errors());
    }

    #[test]
    fn test_lost_buckets_are_deduped_and_counted_as_errors() {
        let store = BulkStatusStore::new();
        let id = registered(&store);
        let lost = |index| StatusUpdate::BucketLost {
            command_id: id,
            bucket_index: index,
            reason: "overflow entry evicted".to_string(),
        };

        store.apply(StatusUpdate::ScrollEnded {
            command_id: id,
            total: 25,
            bucket_count: 3,
            at: Utc::now(),
        });
        store.apply(lost(1));
        let status = store.apply(lost(1)).unwrap();
        assert_eq!(status.lost_buckets, 1);
        assert_eq!(status.state, BulkState::Running);

        store.apply(bucket(id, 0, 10));
        let status = store.apply(bucket(id, 2, 5)).unwrap();
        assert_eq!(status.state, BulkState::Completed);
        assert_eq!(status.processed, 15);
        assert_eq!(status.error_count, 10);
        assert!(status.has_errors());
    }

    #[test]
    fn test_command_is_released_once_terminal() {
        let store = BulkStatusStore::new();
        let completed = registered(&store);
        let aborted = registered(&store);
        assert!(store.command(completed).is_some());

        store.apply(StatusUpdate::ScrollEnded {
            command_id: completed,
            total: 0,
            bucket_count: 0,
            at: Utc::now(),
        });
        store.abort(aborted);

        assert!(store.command(completed).is_none());
        assert!(store.command(aborted).is_none());
        assert_eq!(store.status(completed).unwrap().state, BulkState::Completed);
    }

    #[test]
    fn test_purge_only_removes_finished_commands_past_retention() {
        let store = BulkStatusStore::new();
        let running = registered(&store);
        let finished = registered(&store);
        store.abort(finished);

        assert_eq!(store.purge_finished(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 2);

        assert_eq!(store.purge_finished(Duration::ZERO), 1);
        assert!(store.status(finished).is_none());
        assert!(store.status(running).is_some());
        assert!(!store.is_terminal(finished));
    }
}
