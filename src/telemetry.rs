use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize structured logging. Emits JSON records with the current span
/// context attached, which is what the WebSocket/REST layers correlate
/// job ids against when an operator asks "why did this run fail".
pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    tracing::info!("forgequeue telemetry initialized with structured logging");
    Ok(())
}

/// Generate a correlation id for linking related log lines across a job's
/// lifecycle (enqueue, dispatch, git workflow, API response).
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one job's work, from dispatch through terminal status.
pub fn create_job_span(
    operation: &str,
    job_id: Option<&str>,
    pipeline_id: Option<&str>,
    correlation_id: Option<&str>,
) -> tracing::Span {
    tracing::info_span!(
        "job_execution",
        operation = operation,
        job.id = job_id,
        pipeline.id = pipeline_id,
        correlation.id = correlation_id,
        otel.kind = "internal"
    )
}

/// Shutdown telemetry gracefully.
pub fn shutdown_telemetry() {
    tracing::info!("forgequeue telemetry shutdown complete");
}
