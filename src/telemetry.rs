use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. JSON output keeps the
/// current span and span list so every line carries the task and
/// correlation ids it was logged under.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    tracing::debug!(json = config.json_logs, "telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking a task to the work it triggers
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one task execution on a worker.
pub fn create_task_span(
    task_name: &'static str,
    correlation_id: &str,
    worker_id: &str,
    delivery: u32,
) -> tracing::Span {
    tracing::info_span!(
        "task",
        task.name = task_name,
        correlation.id = correlation_id,
        worker.id = worker_id,
        delivery = delivery,
    )
}
