//! C10 — Doppler Health Monitor: periodically checks the staleness of the
//! cached secrets file and emits alerts over C8 (spec.md §4.10).

use crate::events::{EventBus, JobEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const WARNING_AGE: Duration = Duration::from_secs(12 * 60 * 60);
const CRITICAL_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Healthy,
    Warning,
    Critical,
    Error,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Severity::Healthy => "healthy",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Error => "error",
        }
    }
}

/// Watches one cached-secrets file and reports its age bucket.
pub struct SecretsHealthMonitor {
    cache_path: PathBuf,
    interval: Duration,
    events: Arc<EventBus>,
}

impl SecretsHealthMonitor {
    pub fn new(cache_path: PathBuf, events: Arc<EventBus>) -> Self {
        Self {
            cache_path,
            interval: DEFAULT_INTERVAL,
            events,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Check cache age once, without scheduling. Exposed separately from
    /// [`Self::run`] so tests and the `doctor`-style diagnostic path can
    /// call it directly.
    pub fn check(&self) -> Severity {
        let metadata = match std::fs::metadata(&self.cache_path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.cache_path.display(), "no cached secrets file, assuming live provider");
                return Severity::Healthy;
            }
            Err(e) => {
                warn!(path = %self.cache_path.display(), error = %e, "failed to stat secrets cache");
                return Severity::Error;
            }
        };

        let age = match metadata.modified().and_then(|m| m.elapsed().map_err(std::io::Error::other)) {
            Ok(age) => age,
            Err(e) => {
                warn!(path = %self.cache_path.display(), error = %e, "failed to read secrets cache mtime");
                return Severity::Error;
            }
        };

        if age >= CRITICAL_AGE {
            Severity::Critical
        } else if age >= WARNING_AGE {
            Severity::Warning
        } else {
            Severity::Healthy
        }
    }

    /// Poll on `interval` until cancelled, emitting `alert:high-impact` for
    /// non-healthy checks.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let severity = self.check();
            if severity != Severity::Healthy {
                self.events.publish(JobEvent::AlertHighImpact {
                    message: format!(
                        "secrets cache at {} is {}",
                        self.cache_path.display(),
                        severity.as_str()
                    ),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::SystemTime;

    #[test]
    fn missing_file_is_healthy() {
        let monitor = SecretsHealthMonitor::new(
            PathBuf::from("/nonexistent/path/to/secrets.json"),
            Arc::new(EventBus::new()),
        );
        assert_eq!(monitor.check(), Severity::Healthy);
    }

    #[test]
    fn fresh_file_is_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        fs::write(&path, "{}").unwrap();

        let monitor = SecretsHealthMonitor::new(path, Arc::new(EventBus::new()));
        assert_eq!(monitor.check(), Severity::Healthy);
    }

    #[test]
    fn stale_file_is_flagged_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        let file = fs::File::create(&path).unwrap();
        let old = SystemTime::now() - Duration::from_secs(13 * 60 * 60);
        file.set_modified(old).unwrap();

        let monitor = SecretsHealthMonitor::new(path, Arc::new(EventBus::new()));
        assert_eq!(monitor.check(), Severity::Warning);
    }
}
