//! # Bulk Pipeline Computations
//!
//! The three stages wired by [`BulkService`](super::service::BulkService):
//!
//! - [`ScrollerComputation`] reads commands, scrolls the matching ids and
//!   publishes buckets to the action's stream.
//! - [`ActionComputation`] applies one action to each bucket inside a single
//!   repository session.
//! - [`StatusComputation`] folds status increments into the [`BulkStatusStore`].
//!
//! Every stage reports progress on the status stream rather than touching the
//! store directly, so the store is only ever written by one instance.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::action::{ActionSession, BucketOutcome, BulkAction};
use super::command::{BucketRecord, BulkCommand};
use super::registry::ActionRegistry;
use super::repository::{PermissionChecker, Repository};
use super::status::{BulkStatusStore, StatusUpdate};
use crate::config::BulkConfig;
use crate::constants::streams;
use crate::error::panic_message;
use crate::metrics;
use crate::topology::{Computation, ComputationContext, ComputationError, Record, RecordPayload};

/// Collaborators shared by every stage
pub struct PipelineContext {
    pub repository: Arc<dyn Repository>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub store: Arc<BulkStatusStore>,
    pub registry: Arc<ActionRegistry>,
    pub config: BulkConfig,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("repository", &self.repository.name())
            .field("actions", &self.registry.names())
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineContext {
    /// Bucket size for a command: command, then action, then configuration
    pub fn bucket_size(&self, command: &BulkCommand) -> usize {
        command
            .bucket_size
            .or_else(|| {
                self.registry
                    .get(&command.action)
                    .and_then(|descriptor| descriptor.bucket_size())
            })
            .unwrap_or(self.config.default_bucket_size)
            .max(1)
    }
}

/// Key of a bucket record; buckets of one command spread over partitions
pub(crate) fn bucket_key(command_id: Uuid, bucket_index: u64) -> String {
    format!("{command_id}/{bucket_index}")
}

/// Command id encoded in a command, bucket or status record key
fn command_id_from_key(key: &str) -> Option<Uuid> {
    let id = key.split('/').next().unwrap_or(key);
    Uuid::parse_str(id).ok()
}

/// Bucket index encoded in a bucket record key
fn bucket_index_from_key(key: &str) -> Option<u64> {
    key.split_once('/')?.1.parse().ok()
}

fn encode<T: Serialize>(key: String, value: &T) -> Result<Record, ComputationError> {
    Record::from_json(key, value)
        .map_err(|e| ComputationError::permanent(format!("failed to encode record: {e}")))
}

async fn emit_status(ctx: &ComputationContext, update: StatusUpdate) -> Result<(), ComputationError> {
    let record = encode(update.command_id().to_string(), &update)?;
    ctx.produce(streams::STATUS_STREAM, record).await?;
    Ok(())
}

/// Report a status update from a context where failure can only be logged
async fn emit_status_or_log(ctx: &ComputationContext, update: StatusUpdate) {
    let command_id = update.command_id();
    if let Err(e) = emit_status(ctx, update).await {
        error!(
            command_id = %command_id,
            error = %e,
            "Failed to report status of a dropped record"
        );
    }
}

fn lost_reason(record: &Record) -> String {
    match record.payload() {
        RecordPayload::Lost { reference, reason } => format!("overflow entry {reference} lost: {reason}"),
        _ => "payload lost".to_string(),
    }
}

/// Scrolls the ids of each command into buckets
#[derive(Debug)]
pub struct ScrollerComputation {
    pipeline: Arc<PipelineContext>,
}

impl ScrollerComputation {
    pub fn new(pipeline: Arc<PipelineContext>) -> Self {
        Self { pipeline }
    }

    async fn publish_bucket(
        &self,
        ctx: &ComputationContext,
        command: &BulkCommand,
        bucket_index: u64,
        ids: Vec<String>,
    ) -> Result<(), ComputationError> {
        let bucket = BucketRecord {
            command_id: command.id,
            bucket_index,
            ids,
        };
        let record = encode(bucket_key(command.id, bucket_index), &bucket)?;
        ctx.produce(&streams::action_stream(&command.action), record)
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        ctx: &ComputationContext,
        command_id: Uuid,
        reason: String,
    ) -> Result<(), ComputationError> {
        emit_status(ctx, StatusUpdate::Failed { command_id, reason }).await
    }
}

#[async_trait]
impl Computation for ScrollerComputation {
    async fn process_record(
        &mut self,
        ctx: &ComputationContext,
        _input_stream: &str,
        record: Record,
    ) -> Result<(), ComputationError> {
        if record.is_data_loss() {
            let reason = lost_reason(&record);
            return match command_id_from_key(record.key()) {
                Some(command_id) => self.fail(ctx, command_id, reason).await,
                None => Err(ComputationError::permanent(reason)),
            };
        }

        let command: BulkCommand = record
            .decode_json()
            .map_err(|e| ComputationError::permanent(format!("undecodable command: {e}")))?;
        let store = &self.pipeline.store;
        match store.status(command.id) {
            None => {
                debug!(command_id = %command.id, "Command no longer tracked, not scrolling");
                return Ok(());
            }
            Some(status) if status.is_done() => {
                debug!(command_id = %command.id, "Command already finished, not scrolling");
                return Ok(());
            }
            Some(_) => {}
        }

        emit_status(
            ctx,
            StatusUpdate::ScrollStarted {
                command_id: command.id,
                at: Utc::now(),
            },
        )
        .await?;

        let bucket_size = self.pipeline.bucket_size(&command);
        let mut scroll = match self
            .pipeline
            .repository
            .scroll(&command.query, &command.target, self.pipeline.config.scroll_batch_size)
            .await
        {
            Ok(scroll) => scroll,
            Err(e) if e.is_transient() => return Err(ComputationError::retryable(e.to_string())),
            Err(e) => return self.fail(ctx, command.id, e.to_string()).await,
        };

        let mut pending: Vec<String> = Vec::with_capacity(bucket_size);
        let mut total: u64 = 0;
        let mut bucket_index: u64 = 0;

        loop {
            let batch = match scroll.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) if e.is_transient() => return Err(ComputationError::retryable(e.to_string())),
                Err(e) => return self.fail(ctx, command.id, e.to_string()).await,
            };
            total += batch.len() as u64;

            for id in batch {
                pending.push(id);
                if pending.len() < bucket_size {
                    continue;
                }
                if store.is_terminal(command.id) {
                    info!(command_id = %command.id, buckets = bucket_index, "Scroll stopped, command aborted");
                    return Ok(());
                }
                let ids = std::mem::replace(&mut pending, Vec::with_capacity(bucket_size));
                self.publish_bucket(ctx, &command, bucket_index, ids).await?;
                bucket_index += 1;
            }
        }

        if !pending.is_empty() {
            if store.is_terminal(command.id) {
                return Ok(());
            }
            self.publish_bucket(ctx, &command, bucket_index, pending).await?;
            bucket_index += 1;
        }

        debug!(
            command_id = %command.id,
            total = total,
            buckets = bucket_index,
            "Scroll finished"
        );
        emit_status(
            ctx,
            StatusUpdate::ScrollEnded {
                command_id: command.id,
                total,
                bucket_count: bucket_index,
                at: Utc::now(),
            },
        )
        .await
    }

    async fn record_dropped(
        &mut self,
        ctx: &ComputationContext,
        _input_stream: &str,
        record: &Record,
        reason: &str,
    ) {
        let Some(command_id) = command_id_from_key(record.key()) else {
            error!(record_key = %record.key(), reason = %reason, "Dropped command record has no command id");
            return;
        };
        warn!(command_id = %command_id, reason = %reason, "Scroll abandoned");
        let update = StatusUpdate::Failed {
            command_id,
            reason: format!("scroll abandoned: {reason}"),
        };
        emit_status_or_log(ctx, update).await;
    }
}

/// Applies one action to the buckets of its stream
pub struct ActionComputation {
    action_name: String,
    action: Box<dyn BulkAction>,
    pipeline: Arc<PipelineContext>,
}

impl std::fmt::Debug for ActionComputation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionComputation")
            .field("action_name", &self.action_name)
            .finish()
    }
}

impl ActionComputation {
    pub fn new(action_name: impl Into<String>, action: Box<dyn BulkAction>, pipeline: Arc<PipelineContext>) -> Self {
        Self {
            action_name: action_name.into(),
            action,
            pipeline,
        }
    }

    /// Run the action over one bucket inside a single session
    ///
    /// Only transient repository failures surface as errors so that the bucket
    /// is redelivered; everything else is folded into the outcome.
    async fn run_bucket(
        &mut self,
        command: &BulkCommand,
        bucket: &BucketRecord,
    ) -> Result<BucketOutcome, ComputationError> {
        if let Err(e) = self.action.start_bucket(command).await {
            return Ok(BucketOutcome::failed(&bucket.ids, &e.to_string()));
        }

        let session = match self.pipeline.repository.open_session(&command.target).await {
            Ok(session) => session,
            Err(e) if e.is_transient() => return Err(ComputationError::retryable(e.to_string())),
            Err(e) => return Ok(BucketOutcome::failed(&bucket.ids, &e.to_string())),
        };
        let mut session = ActionSession::new(
            command.target.principal.clone(),
            session,
            Arc::clone(&self.pipeline.permissions),
        );

        let outcome = match AssertUnwindSafe(self.action.compute(&mut session, &bucket.ids, &command.params))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = format!("action panicked: {}", panic_message(panic.as_ref()));
                error!(
                    command_id = %command.id,
                    bucket_index = bucket.bucket_index,
                    action = %self.action_name,
                    error = %message,
                    "Bulk action panicked, bucket discarded"
                );
                return Ok(BucketOutcome::failed(&bucket.ids, &message));
            }
        };

        match session.commit().await {
            Ok(()) => Ok(outcome),
            Err(e) if e.is_transient() => Err(ComputationError::retryable(format!("commit failed: {e}"))),
            Err(e) => Ok(BucketOutcome::failed(&bucket.ids, &format!("commit failed: {e}"))),
        }
    }
}

#[async_trait]
impl Computation for ActionComputation {
    async fn process_record(
        &mut self,
        ctx: &ComputationContext,
        _input_stream: &str,
        record: Record,
    ) -> Result<(), ComputationError> {
        if record.is_data_loss() {
            let reason = lost_reason(&record);
            let (Some(command_id), Some(bucket_index)) = (
                command_id_from_key(record.key()),
                bucket_index_from_key(record.key()),
            ) else {
                return Err(ComputationError::permanent(reason));
            };
            warn!(
                command_id = %command_id,
                bucket_index = bucket_index,
                reason = %reason,
                "Bucket payload lost"
            );
            let update = StatusUpdate::BucketLost {
                command_id,
                bucket_index,
                reason,
            };
            return emit_status(ctx, update).await;
        }

        let bucket: BucketRecord = record
            .decode_json()
            .map_err(|e| ComputationError::permanent(format!("undecodable bucket: {e}")))?;
        let store = &self.pipeline.store;
        if store.is_terminal(bucket.command_id) {
            debug!(
                command_id = %bucket.command_id,
                bucket_index = bucket.bucket_index,
                "Skipping bucket of finished command"
            );
            return Ok(());
        }
        let Some(command) = store.command(bucket.command_id) else {
            warn!(command_id = %bucket.command_id, "Bucket for unknown command dropped");
            return Ok(());
        };

        let outcome = self.run_bucket(&command, &bucket).await?;

        let labels = [KeyValue::new("action", self.action_name.clone())];
        metrics::bulk::buckets_processed_total().add(1, &labels);
        if !outcome.errors.is_empty() {
            metrics::bulk::record_failures_total().add(outcome.errors.len() as u64, &labels);
        }
        debug!(
            command_id = %command.id,
            bucket_index = bucket.bucket_index,
            processed = outcome.processed,
            skipped = outcome.skipped,
            errors = outcome.errors.len(),
            "Bucket processed"
        );

        emit_status(
            ctx,
            StatusUpdate::BucketProcessed {
                command_id: command.id,
                bucket_index: bucket.bucket_index,
                processed: outcome.processed,
                skipped: outcome.skipped,
                errors: outcome.errors,
            },
        )
        .await
    }

    /// A bucket given up on still counts toward completion, as failed ids
    async fn record_dropped(
        &mut self,
        ctx: &ComputationContext,
        _input_stream: &str,
        record: &Record,
        reason: &str,
    ) {
        let update = match record.decode_json::<BucketRecord>() {
            Ok(bucket) => {
                let outcome = BucketOutcome::failed(&bucket.ids, reason);
                metrics::bulk::record_failures_total().add(
                    outcome.errors.len() as u64,
                    &[KeyValue::new("action", self.action_name.clone())],
                );
                StatusUpdate::BucketProcessed {
                    command_id: bucket.command_id,
                    bucket_index: bucket.bucket_index,
                    processed: outcome.processed,
                    skipped: outcome.skipped,
                    errors: outcome.errors,
                }
            }
            Err(_) => {
                let (Some(command_id), Some(bucket_index)) = (
                    command_id_from_key(record.key()),
                    bucket_index_from_key(record.key()),
                ) else {
                    error!(record_key = %record.key(), reason = %reason, "Dropped bucket has an unreadable key");
                    return;
                };
                StatusUpdate::BucketLost {
                    command_id,
                    bucket_index,
                    reason: reason.to_string(),
                }
            }
        };
        warn!(
            command_id = %update.command_id(),
            record_key = %record.key(),
            action = %self.action_name,
            reason = %reason,
            "Bucket abandoned"
        );
        emit_status_or_log(ctx, update).await;
    }
}

/// Folds status increments into the store
#[derive(Debug)]
pub struct StatusComputation {
    store: Arc<BulkStatusStore>,
}

impl StatusComputation {
    pub fn new(store: Arc<BulkStatusStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Computation for StatusComputation {
    async fn process_record(
        &mut self,
        _ctx: &ComputationContext,
        _input_stream: &str,
        record: Record,
    ) -> Result<(), ComputationError> {
        let update: StatusUpdate = record
            .decode_json()
            .map_err(|e| ComputationError::permanent(format!("undecodable status update: {e}")))?;
        if self.store.apply(update).is_none() {
            debug!(record_key = %record.key(), "Status update for unknown command ignored");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_from_key() {
        let id = Uuid::new_v4();
        assert_eq!(command_id_from_key(&bucket_key(id, 7)), Some(id));
        assert_eq!(command_id_from_key(&id.to_string()), Some(id));
        assert_eq!(command_id_from_key("not-a-uuid/3"), None);
        assert_eq!(bucket_index_from_key(&bucket_key(id, 7)), Some(7));
        assert_eq!(bucket_index_from_key(&id.to_string()), None);
    }

    #[test]
    fn test_bucket_size_precedence() {
        let pipeline = PipelineContext {
            repository: Arc::new(super::super::repository::InMemoryRepository::default()),
            permissions: Arc::new(super::super::repository::StaticPermissions::allow_all()),
            store: Arc::new(BulkStatusStore::new()),
            registry: Arc::new(ActionRegistry::with_builtin_actions()),
            config: BulkConfig {
                default_bucket_size: 25,
                ..BulkConfig::default()
            },
        };
        let command = BulkCommand::new("legal_hold", "SELECT * FROM Document");
        assert_eq!(pipeline.bucket_size(&command), 25);
        assert_eq!(pipeline.bucket_size(&command.with_bucket_size(5)), 5);
    }
}
