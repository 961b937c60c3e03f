//! # Bulk Service
//!
//! Entry point of the bulk pipeline. [`BulkServiceBuilder::start`] wires the
//! stream topology:
//!
//! ```text
//! submit ─▶ bulk/command ─▶ scroller ─▶ bulk/<action> ─▶ action ─┐
//!                              │                                 │
//!                              └──────────▶ bulk/status ◀────────┘
//!                                               │
//!                                            status ─▶ BulkStatusStore
//! ```
//!
//! Command and bucket streams carry the overflow record filter, so oversized
//! commands and buckets travel through the overflow store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::computations::{ActionComputation, PipelineContext, ScrollerComputation, StatusComputation};
use super::command::BulkCommand;
use super::errors::BulkError;
use super::registry::{ActionDescriptor, ActionRegistry};
use super::repository::{PermissionChecker, Repository, StaticPermissions};
use super::status::{BulkStatus, BulkStatusStore, StatusUpdate};
use crate::config::TaskerConfig;
use crate::constants::{events, streams};
use crate::logging::log_bulk_operation;
use crate::metrics;
use crate::overflow::{MokaOverflowStore, OverflowRecordFilter, OverflowStore};
use crate::topology::{
    Computation, ComputationDefinition, ComputationStats, Record, RecordFilter, StreamDefinition,
    StreamProcessor, TopologyBuilder,
};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Assembles a [`BulkService`]
pub struct BulkServiceBuilder {
    repository: Arc<dyn Repository>,
    permissions: Arc<dyn PermissionChecker>,
    registry: ActionRegistry,
    config: TaskerConfig,
    overflow_store: Option<Arc<dyn OverflowStore>>,
}

impl BulkServiceBuilder {
    /// Builder with the built-in actions, permissive permissions and default configuration
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            permissions: Arc::new(StaticPermissions::allow_all()),
            registry: ActionRegistry::with_builtin_actions(),
            config: TaskerConfig::default(),
            overflow_store: None,
        }
    }

    pub fn with_config(mut self, config: TaskerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_action(mut self, descriptor: ActionDescriptor) -> Result<Self, BulkError> {
        self.registry.register(descriptor)?;
        Ok(self)
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Use an existing store instead of a private [`MokaOverflowStore`]
    pub fn with_overflow_store(mut self, store: Arc<dyn OverflowStore>) -> Self {
        self.overflow_store = Some(store);
        self
    }

    /// Build the topology and start its instances
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<BulkService, BulkError> {
        let (overflow_store, maintenance): (Arc<dyn OverflowStore>, Option<JoinHandle<()>>) =
            match self.overflow_store {
                Some(store) => (store, None),
                None => {
                    let store = MokaOverflowStore::from_config(&self.config.overflow);
                    let handle = store.spawn_maintenance(self.config.overflow.maintenance_interval());
                    (Arc::new(store), Some(handle))
                }
            };

        let filter: Arc<dyn RecordFilter> = Arc::new(OverflowRecordFilter::from_config(
            Arc::clone(&overflow_store),
            &self.config.overflow,
            self.config.bulk.overflow_threshold_bytes,
        ));

        let store = Arc::new(BulkStatusStore::new());
        let status_maintenance = store.spawn_maintenance(
            self.config.bulk.finished_retention(),
            self.config.bulk.status_maintenance_interval(),
        );
        let pipeline = Arc::new(PipelineContext {
            repository: self.repository,
            permissions: self.permissions,
            store: Arc::clone(&store),
            registry: Arc::new(self.registry),
            config: self.config.bulk.clone(),
        });

        let action_streams: Vec<String> = pipeline
            .registry
            .names()
            .into_iter()
            .map(streams::action_stream)
            .collect();

        let scroller_pipeline = Arc::clone(&pipeline);
        let status_store = Arc::clone(&store);
        let mut builder = TopologyBuilder::new()
            .add_stream(StreamDefinition::new(streams::COMMAND_STREAM).with_filter(Arc::clone(&filter)))
            .add_stream(StreamDefinition::new(streams::STATUS_STREAM))
            .add_computation(
                ComputationDefinition::new(
                    streams::SCROLLER_COMPUTATION,
                    Arc::new(move || {
                        Box::new(ScrollerComputation::new(Arc::clone(&scroller_pipeline)))
                            as Box<dyn Computation>
                    }),
                )
                .with_inputs([streams::COMMAND_STREAM])
                .with_outputs(
                    action_streams
                        .iter()
                        .map(String::as_str)
                        .chain([streams::STATUS_STREAM]),
                ),
            )
            .add_computation(
                ComputationDefinition::new(
                    streams::STATUS_COMPUTATION,
                    Arc::new(move || {
                        Box::new(StatusComputation::new(Arc::clone(&status_store))) as Box<dyn Computation>
                    }),
                )
                .with_inputs([streams::STATUS_STREAM])
                .with_concurrency(1),
            );

        for descriptor in pipeline.registry.descriptors() {
            let stream = streams::action_stream(descriptor.name());
            let action_name = descriptor.name().to_string();
            let factory = descriptor.factory();
            let action_pipeline = Arc::clone(&pipeline);
            builder = builder
                .add_stream(StreamDefinition::new(stream.clone()).with_filter(Arc::clone(&filter)))
                .add_computation(
                    ComputationDefinition::new(
                        stream.clone(),
                        Arc::new(move || {
                            Box::new(ActionComputation::new(
                                action_name.clone(),
                                factory(),
                                Arc::clone(&action_pipeline),
                            )) as Box<dyn Computation>
                        }),
                    )
                    .with_inputs([stream])
                    .with_outputs([streams::STATUS_STREAM])
                    .with_concurrency(
                        descriptor
                            .concurrency()
                            .unwrap_or(pipeline.config.action_concurrency),
                    ),
                );
        }

        let topology = builder.build()?;
        let processor = StreamProcessor::start(topology, &self.config.topology)?;

        info!(
            repository = %pipeline.repository.name(),
            actions = ?pipeline.registry.names(),
            overflow_store = overflow_store.provider_name(),
            "Bulk service started"
        );

        Ok(BulkService {
            pipeline,
            processor,
            overflow_store,
            maintenance: Mutex::new(maintenance),
            status_maintenance: Mutex::new(Some(status_maintenance)),
            accepting: AtomicBool::new(true),
        })
    }
}

impl std::fmt::Debug for BulkServiceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkServiceBuilder")
            .field("repository", &self.repository.name())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

/// Running bulk pipeline
pub struct BulkService {
    pipeline: Arc<PipelineContext>,
    processor: StreamProcessor,
    overflow_store: Arc<dyn OverflowStore>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    status_maintenance: Mutex<Option<JoinHandle<()>>>,
    accepting: AtomicBool,
}

impl std::fmt::Debug for BulkService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkService")
            .field("pipeline", &self.pipeline)
            .field("accepting", &self.accepting.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for BulkService {
    fn drop(&mut self) {
        let handles = [self.maintenance.get_mut().take(), self.status_maintenance.get_mut().take()];
        for handle in handles.into_iter().flatten() {
            handle.abort();
        }
    }
}

impl BulkService {
    pub fn builder(repository: Arc<dyn Repository>) -> BulkServiceBuilder {
        BulkServiceBuilder::new(repository)
    }

    /// Validate and schedule a command, returning its id
    ///
    /// Returns as soon as the command is on the command stream. Identical
    /// commands submitted twice run twice under distinct ids.
    pub async fn submit(&self, command: BulkCommand) -> Result<Uuid, BulkError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(BulkError::ShutDown);
        }

        if let Err(error) = self.validate(&command) {
            metrics::bulk::commands_rejected_total()
                .add(1, &[KeyValue::new("action", command.action.clone())]);
            warn!(action = %command.action, error = %error, "Bulk command rejected");
            return Err(error);
        }

        let mut command = command;
        command.id = Uuid::new_v4();
        command.submitted_at = Some(Utc::now());
        let command_id = command.id;
        let action = command.action.clone();
        let record = Record::from_json(command_id.to_string(), &command)?;

        self.pipeline.store.register(command);
        if let Err(error) = self.processor.append(streams::COMMAND_STREAM, record).await {
            self.pipeline.store.apply(StatusUpdate::Failed {
                command_id,
                reason: error.to_string(),
            });
            return Err(error.into());
        }

        metrics::bulk::commands_submitted_total().add(1, &[KeyValue::new("action", action.clone())]);
        log_bulk_operation(events::BULK_SUBMITTED, &command_id, &action, None);
        Ok(command_id)
    }

    fn validate(&self, command: &BulkCommand) -> Result<(), BulkError> {
        if command.target.principal.trim().is_empty() {
            return Err(BulkError::invalid_command("principal", "must not be blank"));
        }
        if command.target.repository.trim().is_empty() {
            return Err(BulkError::invalid_command("repository", "must not be blank"));
        }
        if command.bucket_size == Some(0) {
            return Err(BulkError::invalid_command("bucket_size", "must be at least 1"));
        }
        self.pipeline.registry.validate(command)?;
        if command.query.trim().is_empty() {
            return Err(BulkError::invalid_command("query", "must not be blank"));
        }
        self.pipeline
            .repository
            .validate_query(&command.query)
            .map_err(|e| BulkError::invalid_command("query", e.to_string()))
    }

    pub fn get_status(&self, command_id: Uuid) -> Option<BulkStatus> {
        self.pipeline.store.status(command_id)
    }

    /// The submitted command, while it is still running
    pub fn get_command(&self, command_id: Uuid) -> Option<BulkCommand> {
        self.pipeline.store.command(command_id)
    }

    /// Commands that have not finished
    pub fn active_commands(&self) -> Vec<BulkStatus> {
        self.pipeline.store.active()
    }

    /// Stop a command; buckets already processed stay applied
    pub fn abort(&self, command_id: Uuid) -> Result<BulkStatus, BulkError> {
        self.pipeline
            .store
            .abort(command_id)
            .ok_or(BulkError::CommandNotFound(command_id))
    }

    /// Wait until the command reaches a terminal state
    pub async fn await_completion(
        &self,
        command_id: Uuid,
        timeout: Duration,
    ) -> Result<BulkStatus, BulkError> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self
                .get_status(command_id)
                .ok_or(BulkError::CommandNotFound(command_id))?;
            if status.is_done() {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(BulkError::Timeout { command_id, timeout });
            }
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.pipeline.registry
    }

    pub fn overflow_store(&self) -> Arc<dyn OverflowStore> {
        Arc::clone(&self.overflow_store)
    }

    /// Counters of one pipeline computation, e.g. `bulk/scroller`
    pub fn computation_stats(&self, computation: &str) -> Option<ComputationStats> {
        self.processor.stats(computation)
    }

    /// Stop intake, drain the topology, then release the overflow store
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), BulkError> {
        self.accepting.store(false, Ordering::Release);
        let result = self.processor.shutdown(timeout).await;
        if let Some(handle) = self.status_maintenance.lock().take() {
            handle.abort();
        }
        let maintenance = self.maintenance.lock().take();
        if let Some(handle) = maintenance {
            handle.abort();
            self.overflow_store.shutdown().await;
        }
        info!(active_commands = self.pipeline.store.active().len(), "Bulk service stopped");
        result.map_err(BulkError::from)
    }
}
