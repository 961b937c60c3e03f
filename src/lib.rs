#![allow(clippy::doc_markdown)] // Allow technical terms like TTL, FIFO in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Bulk
//!
//! Asynchronous execution core for long-running and bulk work.
//!
//! ## Overview
//!
//! Three pieces of infrastructure that keep heavy work out of the request path:
//!
//! - a **work scheduler** running units of work in bounded per-category pools,
//!   with state tracking, identity coalescing and cooperative suspension;
//! - a **computation topology** of named streams and keyed computations, used to
//!   build the **bulk command pipeline** that fans one command out over every
//!   document a query matches, bucket by bucket;
//! - a **transient overflow store** through which oversized stream payloads
//!   travel instead of inflating the transport.
//!
//! ## Module Organization
//!
//! - [`scheduler`] - Work scheduling, states, suspension and lifecycle events
//! - [`topology`] - Streams, computations, keyed routing and record filters
//! - [`bulk`] - Bulk commands, actions, repository seams and status tracking
//! - [`overflow`] - TTL and size bounded overflow store plus its record filter
//! - [`config`] - TOML configuration with validation
//! - [`error`] - Crate-wide error type
//! - [`logging`] - Tracing subscriber setup
//! - [`metrics`] - OpenTelemetry instruments
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasker_bulk::bulk::{BulkCommand, BulkService, InMemoryRepository};
//! use tasker_bulk::config::ConfigLoader;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! tasker_bulk::logging::init_tracing();
//! let config = ConfigLoader::load_from_env()?;
//!
//! let service = BulkService::builder(Arc::new(InMemoryRepository::default()))
//!     .with_config(config)
//!     .start()?;
//! let command_id = service
//!     .submit(BulkCommand::new("set_properties", "SELECT * FROM Document").with_param("reviewed", true))
//!     .await?;
//! println!("status: {:?}", service.get_status(command_id));
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod overflow;
pub mod scheduler;
pub mod topology;

pub use config::TaskerConfig;
pub use error::{TaskerError, TaskerResult};
