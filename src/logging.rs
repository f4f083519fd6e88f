//! # Tracing Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//!
//! - Console output with TTY-aware ANSI colors in development and test
//! - JSON lines in production, for log shippers
//! - Level from `LOG_LEVEL`, then `RUST_LOG`, then the environment default
//! - Component-tagged structured logging helpers for tasks and stages
//!
//! The environment comes from `TASKMAN_ENV`, then `APP_ENV`, defaulting to
//! `development`.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global subscriber once; later calls are no-ops
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let use_json = environment == "production";
        let use_ansi = !use_json && IsTerminal::is_terminal(&std::io::stdout());

        let layer = if use_json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                ansi_colors = use_ansi,
                json = use_json,
                "Console logging initialized"
            );
        }
    });
}

/// Alias kept for callers that think of this as structured logging setup
pub fn init_structured_logging() {
    init_tracing();
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("TASKMAN_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment variables or environment defaults
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level.to_lowercase();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }

    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log task operations with the component-tagged format
#[macro_export]
macro_rules! log_task {
    ($level:ident, $operation:expr, task_id: $task_id:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            task_id = ?$task_id,
            $($key = ?$value,)*
            "📋 TASK: {}", $operation
        );
    };
    ($level:ident, $operation:expr $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            "📋 TASK: {}", $operation
        );
    };
}

/// Log stage operations with the component-tagged format
#[macro_export]
macro_rules! log_stage {
    ($level:ident, $operation:expr, task_id: $task_id:expr, stage: $stage:expr, $($key:ident: $value:expr),* $(,)?) => {
        tracing::$level!(
            operation = %$operation,
            task_id = ?$task_id,
            stage = %$stage,
            $($key = ?$value,)*
            "🎯 STAGE: {} ({})", $operation, $stage
        );
    };
}

pub fn log_task_operation(
    operation: &str,
    task_id: Option<Uuid>,
    task_type: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    log_task!(info, operation,
        task_id: task_id,
        task_type: task_type,
        status: status,
        details: details
    );
}

pub fn log_stage_operation(
    operation: &str,
    task_id: Uuid,
    stage: &str,
    status: &str,
    details: Option<&str>,
) {
    log_stage!(info, operation,
        task_id: task_id,
        stage: stage,
        status: status,
        details: details
    );
}

pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = component,
        operation = operation,
        error = error,
        context = ?context,
        "❌ {}: {} failed",
        component.to_uppercase(),
        operation
    );
}
