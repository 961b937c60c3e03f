//! # Work Scheduler
//!
//! Asynchronous execution of long-running work with per-category bounded
//! concurrency, identity-based coalescing and cooperative suspension.

pub mod errors;
pub mod events;
pub mod instance;
pub mod manager;
pub mod state;
pub mod work;

pub use errors::SchedulingError;
pub use events::{WorkEvent, WorkRef};
pub use instance::{WorkInstance, WorkSnapshot};
pub use manager::{SchedulerStats, WorkScheduler};
pub use state::WorkState;
pub use work::{SchedulePolicy, ScheduleOutcome, Work, WorkContext};
