use anyhow::Result;
use clap::Parser;
use forgequeue::config::{config, init_config, ForgequeueConfig};
use forgequeue::{
    init_telemetry, shutdown_telemetry, Executor, ExecutorConfig as CoreExecutorConfig, GitOverlay,
    JobRepository, RetryConfig as CoreRetryConfig, ShutdownCoordinator, SqliteJobRepository, WorkerRegistry,
};
use forgequeue::api::{self, AppState};
use forgequeue::cron::CronScheduler;
use forgequeue::doppler::SecretsHealthMonitor;
use forgequeue::events::EventBus;
use forgequeue::git::{DryRunOverlay, Git2Operations, Git2Overlay, NullPrClient, OctocrabPrClient};
use forgequeue::retry::RetryEngine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// forgequeue — in-process job queue and pipeline runner.
///
/// Pipelines are registered as library consumers of `forgequeue::Executor`;
/// this binary boots the substrate (persistence, executor, API, cron,
/// secrets monitor) with whatever pipelines have been wired in at build
/// time. With none registered it still serves a usable, empty `/api`.
#[derive(Parser, Debug)]
#[command(name = "forgequeue", about = "Job queue and pipeline runner")]
struct Cli {
    /// Path to the secrets cache file watched by the health monitor.
    #[arg(long, default_value = ".forgequeue/secrets-cache.json")]
    secrets_cache: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = init_config() {
        eprintln!("warning: failed to initialize configuration: {e}");
    }
    if let Err(e) = init_telemetry() {
        eprintln!("warning: failed to initialize telemetry: {e}");
    }

    let cli = Cli::parse();
    let cfg: ForgequeueConfig = config().map(|c| c.clone()).unwrap_or_default();

    let repository: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::connect(&cfg.database.url).await?);
    let registry = Arc::new(WorkerRegistry::new());
    let retry_engine = Arc::new(RetryEngine::new(CoreRetryConfig {
        max_absolute_attempts: cfg.retry.max_absolute_attempts,
        max_delay: Duration::from_millis(cfg.retry.max_delay_ms),
    }));
    let events = Arc::new(EventBus::new());

    let git_overlay: Option<Arc<dyn GitOverlay>> = match (&cfg.git.owner, &cfg.git.repo, &cfg.git.github_token) {
        (Some(owner), Some(repo), Some(token)) => {
            let octocrab = octocrab::Octocrab::builder().personal_token(token.clone()).build()?;
            let pr_client = Arc::new(OctocrabPrClient::new(octocrab, owner.clone(), repo.clone()));
            let ops = Arc::new(Git2Operations::new(".")?);
            let overlay = Git2Overlay::new(ops, pr_client, cfg.git.base_branch.clone(), cfg.git.branch_prefix.clone());
            if cfg.git.dry_run {
                Some(Arc::new(DryRunOverlay::new(overlay)))
            } else {
                Some(Arc::new(overlay))
            }
        }
        _ => {
            warn!("git workflow not configured (missing owner/repo/token); pipelines opting into git workflow will fail to branch");
            let _ = NullPrClient;
            None
        }
    };

    let executor = Executor::new(
        repository,
        registry.clone(),
        retry_engine,
        events.clone(),
        git_overlay,
        CoreExecutorConfig {
            max_concurrent: cfg.executor.max_concurrent,
            handler_timeout: Duration::from_millis(cfg.executor.handler_timeout_ms),
            activity_log_enabled: cfg.executor.activity_log_enabled,
        },
    );

    let dispatcher = executor.clone();
    let dispatch_handle = tokio::spawn(async move { dispatcher.run().await });

    let pipeline_ids: Vec<String> = registry.list().iter().map(|m| m.pipeline_id.clone()).collect();
    let mut cron_scheduler = CronScheduler::new(executor.clone(), &cfg.cron.timezone)?;
    for meta in registry.list() {
        if let Some(expr) = &meta.cron_expr {
            cron_scheduler.schedule(meta.pipeline_id.clone(), expr, serde_json::json!({}))?;
        }
    }
    let cron_handle = tokio::spawn(cron_scheduler.run());

    let monitor = SecretsHealthMonitor::new(cli.secrets_cache, events.clone());
    let monitor_handle = tokio::spawn(monitor.run());

    let app_state = AppState {
        executor: executor.clone(),
        events: events.clone(),
        api_key: cfg.api.api_key.clone(),
    };
    let app = api::build_router(app_state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.api.port)).await?;
    info!(port = cfg.api.port, "forgequeue listening");

    let shutdown = ShutdownCoordinator::default();
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                warn!(error = %e, "API server exited with an error");
            }
        }
        _ = shutdown.wait_for_signal() => {
            shutdown.shutdown(&executor, &pipeline_ids).await?;
        }
    }

    monitor_handle.abort();
    cron_handle.abort();
    dispatch_handle.abort();
    shutdown_telemetry();

    Ok(())
}
