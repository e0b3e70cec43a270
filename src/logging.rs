//! # Structured Logging Module
//!
//! Environment-aware structured logging for the pipeline threads. Output is
//! human-readable during development and JSON in production deployments.

use chrono::Utc;
use std::io::Write;
use std::sync::OnceLock;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::loader::ENVIRONMENT_VAR;
use crate::config::{LogFormat, LoggingConfig};

/// Keeps the background writer alive for the life of the process
static LOG_WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber,
/// and an already-installed global subscriber is left in place. Output goes
/// through a non-blocking writer: a logging thread owns stdout, so a slow
/// reader never stalls the real-time thread.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOG_WRITER_GUARD.get_or_init(|| {
        let environment = get_environment();
        let filter = build_filter(config, &environment);
        let (layer, guard) = output_layer(config.format, filter, std::io::stdout());

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            format = ?config.format,
            "🩺 LOGGING: vitals subscriber installed"
        );
        guard
    });
}

/// Formatting layer whose writes are handed to a background logging thread
fn output_layer<S, W>(
    format: LogFormat,
    filter: EnvFilter,
    output: W,
) -> (Box<dyn Layer<S> + Send + Sync + 'static>, WorkerGuard)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + Send + 'static,
{
    let (writer, guard) = tracing_appender::non_blocking(output);
    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_level(true)
            .with_filter(filter)
            .boxed(),
    };
    (layer, guard)
}

/// Filter precedence: configured level, then `RUST_LOG`, then environment default
fn build_filter(config: &LoggingConfig, environment: &str) -> EnvFilter {
    if let Some(level) = config.level.as_deref() {
        if let Ok(filter) = EnvFilter::try_new(level) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(get_log_level(environment)))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "test" | "development" => "debug",
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for pipeline lifecycle events
pub fn log_pipeline_event(component: &str, operation: &str, status: &str, details: Option<&str>) {
    tracing::info!(
        component = %component,
        operation = %operation,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🩺 PIPELINE_EVENT"
    );
}

/// Log structured data for durable store operations
pub fn log_storage_operation(
    operation: &str,
    table: Option<&str>,
    rows: Option<usize>,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        table = table,
        rows = rows,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "💾 STORAGE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            level: Some("warn".to_string()),
            format: LogFormat::Json,
        };
        init_structured_logging(&config);
        init_structured_logging(&config);
        log_pipeline_event("logging", "init", "ok", None);
    }

    /// Output that blocks every write until released
    struct StalledOutput {
        release: crossbeam::channel::Receiver<()>,
    }

    impl Write for StalledOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let _ = self.release.recv();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_stalled_output_does_not_block_the_caller() {
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(1);
        let (layer, guard) = output_layer(
            LogFormat::Json,
            EnvFilter::new("info"),
            StalledOutput { release: release_rx },
        );
        let subscriber = tracing_subscriber::registry().with(layer);

        let started = std::time::Instant::now();
        tracing::subscriber::with_default(subscriber, || {
            for sequence in 0..5_000u32 {
                tracing::info!(sequence, "Alarm raised");
            }
        });
        assert!(started.elapsed() < std::time::Duration::from_secs(10));

        drop(release_tx);
        drop(guard);
    }
}
