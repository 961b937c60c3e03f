//! # Configuration
//!
//! Dead-simple configuration loading:
//! 1. Read a TOML file from `TASKER_CONFIG_PATH` (or an explicit path)
//! 2. Substitute `${VAR}` / `${VAR:-default}` placeholders
//! 3. Deserialize to [`TaskerConfig`]; every section has defaults
//! 4. Validate with the `validator` crate plus cross-field checks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_bulk::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load_from_env()?;
//! println!("bucket size: {}", config.bulk.default_bucket_size);
//! # Ok(())
//! # }
//! ```

pub mod config_loader;
pub mod error;
pub mod tasker;

pub use config_loader::ConfigLoader;
pub use error::{ConfigResult, ConfigurationError};
pub use tasker::{
    BulkConfig, CategoryConfig, OverflowConfig, SchedulerConfig, TaskerConfig, TopologyConfig,
};
