//! Tasker bulk core configuration
//!
//! ## TOML Structure
//!
//! ```toml
//! [scheduler]
//! default_max_concurrency = 4
//! [scheduler.categories.renditions]
//! max_concurrency = 2
//!
//! [overflow]
//! max_size_bytes = 268435456
//! ttl_seconds = 3600
//!
//! [topology]
//! default_concurrency = 2
//!
//! [bulk]
//! default_bucket_size = 100
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

use super::error::{ConfigResult, ConfigurationError};
use crate::constants::defaults;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case")]
pub struct TaskerConfig {
    #[validate(nested)]
    pub scheduler: SchedulerConfig,

    #[validate(nested)]
    pub overflow: OverflowConfig,

    #[validate(nested)]
    pub topology: TopologyConfig,

    #[validate(nested)]
    pub bulk: BulkConfig,
}

impl TaskerConfig {
    /// Cross-field checks that the declarative validators cannot express
    pub fn validate_consistency(&self) -> ConfigResult<()> {
        for (name, category) in &self.scheduler.categories {
            if name.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "scheduler.categories",
                    name.clone(),
                    "category name must not be blank",
                ));
            }
            category.validate().map_err(|errors| {
                ConfigurationError::validation_error(format!(
                    "scheduler.categories.{name}: {errors}"
                ))
            })?;
        }

        if self.bulk.overflow_threshold_bytes as u64 > self.overflow.max_size_bytes {
            return Err(ConfigurationError::invalid_value(
                "bulk.overflow_threshold_bytes",
                self.bulk.overflow_threshold_bytes.to_string(),
                "threshold must not exceed overflow.max_size_bytes",
            ));
        }

        Ok(())
    }
}

/// Work scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Concurrent work bodies per category when the category is not configured
    #[validate(range(min = 1, max = 1024))]
    pub default_max_concurrency: usize,

    /// Bounded queue capacity per category
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Keep terminal instances around for inspection through `find`
    pub retain_completed: bool,

    /// Capacity of the lifecycle event broadcast channel
    #[validate(range(min = 1))]
    pub event_buffer_size: usize,

    /// Grace period granted to running work on shutdown
    #[validate(range(min = 1))]
    pub shutdown_timeout_ms: u64,

    /// Per-category overrides
    pub categories: HashMap<String, CategoryConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_concurrency: defaults::WORK_MAX_CONCURRENCY,
            queue_capacity: defaults::WORK_QUEUE_CAPACITY,
            retain_completed: false,
            event_buffer_size: 1000,
            shutdown_timeout_ms: 30_000,
            categories: HashMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Resolve the effective settings for a category
    pub fn category(&self, name: &str) -> CategoryConfig {
        self.categories.get(name).cloned().unwrap_or(CategoryConfig {
            max_concurrency: self.default_max_concurrency,
            queue_capacity: self.queue_capacity,
        })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Settings for one work category (logical queue)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CategoryConfig {
    #[validate(range(min = 1, max = 1024))]
    pub max_concurrency: usize,

    #[validate(range(min = 1))]
    pub queue_capacity: usize,
}

/// Overflow store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case")]
pub struct OverflowConfig {
    /// Upper bound on the summed payload bytes held by the store
    #[validate(range(min = 1))]
    pub max_size_bytes: u64,

    /// Time-to-live of an entry, measured from its last write
    #[validate(range(min = 1))]
    pub ttl_seconds: u64,

    /// Cadence of the background eviction pass
    #[validate(range(min = 10))]
    pub maintenance_interval_ms: u64,

    /// Prefix for keys derived by the overflow record filter
    #[validate(length(min = 1))]
    pub key_prefix: String,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: defaults::OVERFLOW_MAX_SIZE_BYTES,
            ttl_seconds: defaults::OVERFLOW_TTL_SECONDS,
            maintenance_interval_ms: defaults::OVERFLOW_MAINTENANCE_INTERVAL_MS,
            key_prefix: defaults::OVERFLOW_KEY_PREFIX.to_string(),
        }
    }
}

impl OverflowConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }
}

/// Stream topology runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case")]
pub struct TopologyConfig {
    /// Instances per computation when the computation does not say otherwise
    #[validate(range(min = 1, max = 256))]
    pub default_concurrency: usize,

    /// Bounded capacity of each instance input channel
    #[validate(range(min = 1))]
    pub channel_capacity: usize,

    /// Redelivery attempts for a record whose processing failed transiently
    #[validate(range(max = 100))]
    pub max_retries: u32,

    /// Pause between redelivery attempts
    pub retry_delay_ms: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            default_concurrency: defaults::TOPOLOGY_CONCURRENCY,
            channel_capacity: defaults::TOPOLOGY_CHANNEL_CAPACITY,
            max_retries: defaults::TOPOLOGY_MAX_RETRIES,
            retry_delay_ms: defaults::TOPOLOGY_RETRY_DELAY_MS,
        }
    }
}

impl TopologyConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Bulk command pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "snake_case")]
pub struct BulkConfig {
    /// Ids per bucket when neither the command nor the action override it
    #[validate(range(min = 1, max = 100000))]
    pub default_bucket_size: usize,

    /// Ids requested from the repository per scroll round trip
    #[validate(range(min = 1))]
    pub scroll_batch_size: usize,

    /// Records whose payload exceeds this size travel through the overflow store
    #[validate(range(min = 1))]
    pub overflow_threshold_bytes: usize,

    /// Instances per action computation
    #[validate(range(min = 1, max = 256))]
    pub action_concurrency: usize,

    /// How long the status of a finished command stays queryable
    pub finished_retention_seconds: u64,

    /// Cadence of the sweep that forgets expired finished commands
    #[validate(range(min = 1))]
    pub status_maintenance_interval_ms: u64,
}

impl BulkConfig {
    pub fn finished_retention(&self) -> Duration {
        Duration::from_secs(self.finished_retention_seconds)
    }

    pub fn status_maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.status_maintenance_interval_ms)
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            default_bucket_size: defaults::BULK_BUCKET_SIZE,
            scroll_batch_size: defaults::BULK_SCROLL_BATCH_SIZE,
            overflow_threshold_bytes: defaults::BULK_OVERFLOW_THRESHOLD_BYTES,
            action_concurrency: defaults::BULK_ACTION_CONCURRENCY,
            finished_retention_seconds: defaults::BULK_FINISHED_RETENTION_SECONDS,
            status_maintenance_interval_ms: defaults::BULK_STATUS_MAINTENANCE_INTERVAL_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TaskerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.validate_consistency().is_ok());
    }

    #[test]
    fn test_category_falls_back_to_defaults() {
        let mut config = SchedulerConfig::default();
        config.categories.insert(
            "renditions".to_string(),
            CategoryConfig {
                max_concurrency: 1,
                queue_capacity: 8,
            },
        );

        assert_eq!(config.category("renditions").max_concurrency, 1);
        assert_eq!(
            config.category("anything-else").max_concurrency,
            defaults::WORK_MAX_CONCURRENCY
        );
    }

    #[test]
    fn test_finished_retention_defaults_and_overrides() {
        let config = BulkConfig::default();
        assert_eq!(
            config.finished_retention(),
            Duration::from_secs(defaults::BULK_FINISHED_RETENTION_SECONDS)
        );

        let config: BulkConfig =
            toml::from_str("finished_retention_seconds = 60\nstatus_maintenance_interval_ms = 250").unwrap();
        assert_eq!(config.finished_retention(), Duration::from_secs(60));
        assert_eq!(config.status_maintenance_interval(), Duration::from_millis(250));

        let mut config = TaskerConfig::default();
        config.bulk.status_maintenance_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_bucket_size_is_rejected() {
        let mut config = TaskerConfig::default();
        config.bulk.default_bucket_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_larger_than_store_is_rejected() {
        let mut config = TaskerConfig::default();
        config.overflow.max_size_bytes = 10;
        config.bulk.overflow_threshold_bytes = 100;
        assert!(config.validate_consistency().is_err());
    }
}
