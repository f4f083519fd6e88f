//! Layered configuration loading: files, environment overlays and validation.

use std::fs;
use std::path::PathBuf;
use taskman_core::config::{
    ConfigManager, ConfigurationError, OverflowPolicy, StoreBackend, TaskmanConfig,
};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_bundled_test_environment_overlay() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config");
    let manager = ConfigManager::load_from_directory_with_env(Some(dir), "test").unwrap();
    let config = manager.config();

    assert_eq!(manager.environment(), "test");
    assert_eq!(config.engine.worker_count, 4);
    assert_eq!(config.engine.queue_depth, 256);
    assert_eq!(config.engine.overflow_policy, OverflowPolicy::Block);
    assert!(!config.audit.ops_log_enabled);
    assert_eq!(config.database.backend, StoreBackend::Memory);
}

#[test]
fn test_environment_file_overrides_base_file() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "taskman.toml",
        r#"
[engine]
worker_count = 2
queue_depth = 16

[retry]
enabled = true
task_types = ["DiskDeleteTask"]
max_attempts = 5
window_seconds = 600
"#,
    );
    write(
        &dir,
        "taskman.staging.toml",
        r#"
[engine]
queue_depth = 32
overflow_policy = "reject"

[compute]
enable_pending_delete = true
"#,
    );

    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "staging")
            .unwrap();
    let config = manager.config();
    assert_eq!(config.engine.worker_count, 2);
    assert_eq!(config.engine.queue_depth, 32);
    assert_eq!(config.engine.overflow_policy, OverflowPolicy::Reject);
    assert!(config.retry.enabled);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.window_seconds, 600);
    assert!(config.compute.enable_pending_delete);
    assert_eq!(manager.config_directory(), dir.path());
}

#[test]
fn test_missing_directory_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let manager =
        ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "production")
            .unwrap();
    assert_eq!(manager.config().engine, TaskmanConfig::default().engine);
}

#[test]
fn test_single_file_with_environment_overrides() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "engine.toml",
        r#"
[engine]
worker_count = 3

[audit]
buffer_size = 10
"#,
    );

    std::env::set_var("TASKMAN__AUDIT__BUFFER_SIZE", "77");
    std::env::set_var("TASKMAN__RETRY__TASK_TYPES", "DiskDeleteTask,GuestDeleteTask");
    let loaded = ConfigManager::load_from_file(&path);
    std::env::remove_var("TASKMAN__AUDIT__BUFFER_SIZE");
    std::env::remove_var("TASKMAN__RETRY__TASK_TYPES");

    let manager = loaded.unwrap();
    let config = manager.config();
    assert_eq!(config.engine.worker_count, 3);
    assert_eq!(config.audit.buffer_size, 77);
    assert_eq!(
        config.retry.task_types,
        vec!["DiskDeleteTask".to_string(), "GuestDeleteTask".to_string()]
    );
}

#[test]
fn test_missing_file_is_a_load_error() {
    let dir = TempDir::new().unwrap();
    let err = ConfigManager::load_from_file(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigurationError::LoadError { .. }));
}

#[test]
fn test_invalid_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "zero.toml",
        r#"
[supervision]
enabled = true
stale_task_timeout_seconds = 0
"#,
    );
    let err = ConfigManager::load_from_file(&path).unwrap_err();
    match err {
        ConfigurationError::InvalidValue { field, .. } => {
            assert_eq!(field, "supervision.stale_task_timeout_seconds")
        }
        other => panic!("unexpected error: {other}"),
    }

    let path = write(
        &dir,
        "postgres.toml",
        r#"
[database]
backend = "postgres"
"#,
    );
    let err = ConfigManager::load_from_file(&path).unwrap_err();
    assert!(matches!(
        err,
        ConfigurationError::MissingRequiredField { ref field, .. } if field == "url"
    ));

    let path = write(
        &dir,
        "policy.toml",
        r#"
[engine]
overflow_policy = "drop_oldest"
"#,
    );
    let err = ConfigManager::load_from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidStructure(_)));
}

#[test]
fn test_debug_config_masks_database_password() {
    let mut config = TaskmanConfig::default();
    config.database.backend = StoreBackend::Postgres;
    config.database.url = "postgresql://taskman:hunter2@db:5432/taskman".to_string();

    let manager = ConfigManager::from_config(config).unwrap();
    let debug = manager.debug_config();
    assert_eq!(
        debug["database"]["url"],
        "postgresql://taskman:***@db:5432/taskman"
    );
    assert!(!debug.to_string().contains("hunter2"));
}
