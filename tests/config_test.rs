//! Configuration loading tests

use std::io::Write;

use tasker_bulk::config::{ConfigLoader, ConfigurationError, TaskerConfig};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_file() {
    let file = write_config(
        r#"
        [scheduler]
        default_max_concurrency = 8
        retain_completed = true

        [scheduler.categories.renditions]
        max_concurrency = 2
        queue_capacity = 32

        [overflow]
        max_size_bytes = 1048576
        ttl_seconds = 120
        key_prefix = "spill:"

        [topology]
        default_concurrency = 4
        max_retries = 5

        [bulk]
        default_bucket_size = 250
        action_concurrency = 3
        overflow_threshold_bytes = 4096
        "#,
    );

    let config = ConfigLoader::load_from_path(file.path()).unwrap();
    assert_eq!(config.scheduler.default_max_concurrency, 8);
    assert!(config.scheduler.retain_completed);
    assert_eq!(config.scheduler.category("renditions").queue_capacity, 32);
    assert_eq!(config.overflow.ttl().as_secs(), 120);
    assert_eq!(config.overflow.key_prefix, "spill:");
    assert_eq!(config.topology.max_retries, 5);
    assert_eq!(config.bulk.default_bucket_size, 250);
    assert_eq!(config.bulk.action_concurrency, 3);
}

#[test]
fn test_empty_file_yields_defaults() {
    let file = write_config("");
    let config = ConfigLoader::load_from_path(file.path()).unwrap();
    assert_eq!(config, TaskerConfig::default());
}

#[test]
fn test_environment_placeholders_are_substituted() {
    std::env::set_var("TASKER_BULK_TEST_BUCKET_SIZE", "64");
    let file = write_config(
        r#"
        [bulk]
        default_bucket_size = ${TASKER_BULK_TEST_BUCKET_SIZE}
        scroll_batch_size = ${TASKER_BULK_TEST_UNSET_BATCH:-500}
        "#,
    );

    let config = ConfigLoader::load_from_path(file.path()).unwrap();
    assert_eq!(config.bulk.default_bucket_size, 64);
    assert_eq!(config.bulk.scroll_batch_size, 500);
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = write_config(
        r#"
        [overflow]
        max_size_bytes = 100

        [bulk]
        overflow_threshold_bytes = 1000
        "#,
    );
    assert!(matches!(
        ConfigLoader::load_from_path(file.path()),
        Err(ConfigurationError::InvalidValue { .. })
    ));
}

#[test]
fn test_missing_file_is_reported() {
    let error = ConfigLoader::load_from_path(std::path::Path::new("/nonexistent/tasker.toml"))
        .unwrap_err();
    assert!(matches!(error, ConfigurationError::FileReadError { .. }));
}

#[test]
fn test_bad_toml_names_the_file() {
    let file = write_config("[bulk\n");
    match ConfigLoader::load_from_path(file.path()) {
        Err(ConfigurationError::InvalidToml { file_path, .. }) => {
            assert_eq!(file_path, file.path().display().to_string());
        }
        other => panic!("expected InvalidToml, got {other:?}"),
    }
}
