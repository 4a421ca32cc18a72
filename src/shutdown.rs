use crate::executor::Executor;
use anyhow::Result;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::timeout;
use tracing::{info, warn};

/// Graceful shutdown coordinator (spec.md §4.6 "Graceful shutdown", §6
/// "entry points ... MUST call `stop()` on SIGTERM/SIGINT").
pub struct ShutdownCoordinator {
    grace_period: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ShutdownCoordinator {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Resolve when SIGINT or SIGTERM is received.
    pub async fn wait_for_signal(&self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        Ok(())
    }

    /// Stop accepting new enqueues, then wait up to the grace period for
    /// in-flight jobs to reach a terminal state before returning. Jobs
    /// still `queued` are left for the next process to pick up.
    pub async fn shutdown(&self, executor: &Executor, _pipeline_ids: &[String]) -> Result<()> {
        info!("initiating graceful shutdown");
        executor.stop_accepting();

        let wait_for_drain = async {
            loop {
                if executor.in_flight().await == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        };

        if timeout(self.grace_period, wait_for_drain).await.is_err() {
            warn!(
                grace_period_secs = self.grace_period.as_secs(),
                "grace period elapsed with jobs still running; exiting anyway"
            );
        } else {
            info!("all in-flight jobs drained cleanly");
        }

        Ok(())
    }
}
