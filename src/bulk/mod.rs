//! # Bulk Command Pipeline
//!
//! Applies one action to every document matched by a query. A submitted
//! [`BulkCommand`] is scrolled into buckets of ids, each bucket is processed
//! by the action inside one repository session, and progress is folded into
//! a [`BulkStatus`] readable through [`BulkService::get_status`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tasker_bulk::bulk::{BulkCommand, BulkService, InMemoryRepository};
//!
//! # async fn example() -> Result<(), tasker_bulk::bulk::BulkError> {
//! let repository = Arc::new(InMemoryRepository::default());
//! let service = BulkService::builder(repository).start()?;
//!
//! let command_id = service
//!     .submit(
//!         BulkCommand::new("legal_hold", "SELECT * FROM Document WHERE case = 'c-17'")
//!             .with_param("description", "Litigation c-17"),
//!     )
//!     .await?;
//! let status = service.await_completion(command_id, Duration::from_secs(30)).await?;
//! assert!(status.is_done());
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod actions;
pub mod command;
pub mod computations;
pub mod errors;
pub mod registry;
pub mod repository;
pub mod service;
pub mod status;

pub use action::{
    ActionParams, ActionSession, BucketOutcome, BulkAction, ParameterKind, ParameterSpec,
    RecordOutcome,
};
pub use actions::{LegalHoldAction, SetPropertiesAction};
pub use command::{BucketRecord, BulkCommand, ExecutionTarget};
pub use errors::{ActionError, BulkError, RepositoryError};
pub use registry::{ActionDescriptor, ActionFactory, ActionRegistry, CommandValidator};
pub use repository::{
    Document, DocumentQuery, IdScroll, InMemoryRepository, PermissionChecker, Repository,
    RepositorySession, StaticPermissions,
};
pub use service::{BulkService, BulkServiceBuilder};
pub use status::{BulkState, BulkStatus, BulkStatusStore, RecordError, StatusUpdate};
