//! # Logging
//!
//! Console tracing for embedders and tests, written to stdout.
//!
//! - Log level derives from `TASKER_ENV` (`production` logs at info, anything
//!   else at debug) unless `RUST_LOG` is set.
//! - `TASKER_LOG_FORMAT=json` switches the console layer to JSON lines.
//! - Initialization is idempotent; a subscriber installed by the embedder wins.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("TASKER_LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initialize console tracing for the current process
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let format = LogFormat::from_env();
        let use_ansi = format == LogFormat::Pretty && std::io::stdout().is_terminal();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level(&environment)));

        let base = fmt::layer().with_target(true).with_thread_ids(true);
        let console_layer = match format {
            LogFormat::Json => base.json().with_filter(filter).boxed(),
            LogFormat::Pretty => base.with_ansi(use_ansi).with_filter(filter).boxed(),
        };

        match tracing_subscriber::registry().with(console_layer).try_init() {
            Ok(()) => tracing::info!(
                environment = %environment,
                format = ?format,
                ansi_colors = use_ansi,
                "Console logging initialized"
            ),
            Err(_) => tracing::debug!("Tracing subscriber already installed, keeping it"),
        }
    });
}

/// Deployment environment from `TASKER_ENV`, defaulting to `development`
pub fn get_environment() -> String {
    std::env::var("TASKER_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_level(environment: &str) -> &'static str {
    if environment == "production" {
        "info"
    } else {
        "debug"
    }
}

/// Log a structured work lifecycle transition
pub fn log_work_operation(
    operation: &str,
    work_id: &str,
    category: &str,
    state: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        work_id = %work_id,
        category = %category,
        state = %state,
        details = details,
        "WORK_OPERATION"
    );
}

/// Log a structured bulk command lifecycle transition
pub fn log_bulk_operation(
    operation: &str,
    command_id: &uuid::Uuid,
    action: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        command_id = %command_id,
        action = %action,
        details = details,
        "BULK_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_by_environment() {
        assert_eq!(default_level("production"), "info");
        assert_eq!(default_level("test"), "debug");
        assert_eq!(default_level("staging"), "debug");
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        assert!(TRACING_INITIALIZED.get().is_some());
    }
}
