//! C3 — Retry Engine: per-job retry bookkeeping, exponential backoff, and
//! the absolute-attempt circuit breaker (spec.md §4.3).

use crate::classifier::Classification;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry scheduled; re-enqueue after the returned delay.
    Scheduled,
    /// Absolute attempt cap exceeded; job fails as circuit-broken.
    CircuitBroken,
    /// The classifier said this error is terminal.
    Fatal,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub decision: RetryDecision,
    pub delay: Duration,
    pub attempts: u32,
    /// Set once `attempts >= 3`, so the caller can emit `retry:warning`
    /// (spec.md §4.3 "Warnings") alongside its own logging.
    pub nearing_limit: bool,
}

#[derive(Debug, Clone, Default)]
struct RetryRecord {
    attempts: u32,
    last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Hard cap on attempts, independent of a job's own `max_retries`
    /// (spec.md §4.3, §9 "maxRetries vs maxAbsoluteAttempts").
    pub max_absolute_attempts: u32,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_absolute_attempts: 5,
            max_delay: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RetryMetrics {
    pub active_retries: u64,
    pub total_attempts: u64,
    pub nearing_limit: u64,
}

/// Tracks retry state for every job currently being retried. One mutex
/// guards the map (teacher precedent: a single mutex around shared
/// coordination state, not one lock per job).
pub struct RetryEngine {
    config: RetryConfig,
    records: Mutex<HashMap<String, RetryRecord>>,
    metrics: Mutex<RetryMetrics>,
}

impl RetryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            metrics: Mutex::new(RetryMetrics::default()),
        }
    }

    /// Decide what to do with a job that just failed, per spec.md §4.3's
    /// algorithm. Returns a [`RetryOutcome`] the executor acts on.
    pub async fn schedule_retry(&self, job_id: &str, classification: &Classification) -> RetryOutcome {
        if !classification.is_retryable() {
            return RetryOutcome {
                decision: RetryDecision::Fatal,
                delay: Duration::ZERO,
                attempts: 0,
                nearing_limit: false,
            };
        }

        let mut records = self.records.lock().await;
        let record = records.entry(job_id.to_string()).or_default();
        record.attempts += 1;
        record.last_attempt_at = Some(Utc::now());
        let attempts = record.attempts;
        drop(records);

        {
            let mut metrics = self.metrics.lock().await;
            metrics.total_attempts += 1;
        }

        if attempts >= self.config.max_absolute_attempts {
            return RetryOutcome {
                decision: RetryDecision::CircuitBroken,
                delay: Duration::ZERO,
                attempts,
                nearing_limit: false,
            };
        }

        let nearing_limit = attempts >= 3;
        if nearing_limit {
            warn!(job_id, attempts, max = self.config.max_absolute_attempts, "retry:warning");
            let mut metrics = self.metrics.lock().await;
            metrics.nearing_limit += 1;
        }

        let base_delay_ms = classification.suggested_delay_ms.max(5_000);
        let exp = base_delay_ms.saturating_mul(1u64 << (attempts.saturating_sub(1)).min(20));
        let capped = exp.min(self.config.max_delay.as_millis() as u64);

        let jitter_fraction = rand::rng().random_range(-0.2..=0.2);
        let jittered = (capped as f64 * (1.0 + jitter_fraction)).max(0.0) as u64;

        RetryOutcome {
            decision: RetryDecision::Scheduled,
            delay: Duration::from_millis(jittered),
            attempts,
            nearing_limit,
        }
    }

    /// Drop retry state for a job (terminal outcome, or an explicit
    /// `retry` request that resets the attempt counter to 1).
    pub async fn reset(&self, job_id: &str) {
        self.records.lock().await.remove(job_id);
    }

    pub fn max_absolute_attempts(&self) -> u32 {
        self.config.max_absolute_attempts
    }

    pub async fn active_retries(&self) -> u64 {
        self.records.lock().await.len() as u64
    }

    pub async fn metrics_snapshot(&self) -> RetryMetrics {
        let metrics = self.metrics.lock().await;
        RetryMetrics {
            active_retries: self.active_retries().await,
            total_attempts: metrics.total_attempts,
            nearing_limit: metrics.nearing_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Category, Classification};
    use crate::job::ErrorKind;

    fn retryable() -> Classification {
        Classification {
            category: Category::Retryable,
            reason: "test",
            suggested_delay_ms: 100,
            kind: ErrorKind::HandlerTransient,
        }
    }

    fn non_retryable() -> Classification {
        Classification {
            category: Category::NonRetryable,
            reason: "test",
            suggested_delay_ms: 0,
            kind: ErrorKind::HandlerPermanent,
        }
    }

    #[tokio::test]
    async fn non_retryable_classification_is_fatal() {
        let engine = RetryEngine::new(RetryConfig::default());
        let outcome = engine.schedule_retry("job-1", &non_retryable()).await;
        assert_eq!(outcome.decision, RetryDecision::Fatal);
    }

    #[tokio::test]
    async fn circuit_breaks_after_absolute_cap() {
        let engine = RetryEngine::new(RetryConfig {
            max_absolute_attempts: 5,
            max_delay: Duration::from_secs(300),
        });

        let mut last = None;
        for _ in 0..5 {
            last = Some(engine.schedule_retry("job-1", &retryable()).await);
        }
        let last = last.unwrap();
        assert_eq!(last.decision, RetryDecision::CircuitBroken);
        assert_eq!(last.attempts, 5);
    }

    #[tokio::test]
    async fn delay_grows_and_is_capped() {
        let engine = RetryEngine::new(RetryConfig {
            max_absolute_attempts: 99,
            max_delay: Duration::from_millis(500),
        });

        for _ in 0..10 {
            let outcome = engine.schedule_retry("job-1", &retryable()).await;
            assert!(outcome.delay <= Duration::from_millis(600)); // capped + jitter headroom
        }
    }

    #[tokio::test]
    async fn reset_clears_attempts() {
        let engine = RetryEngine::new(RetryConfig::default());
        engine.schedule_retry("job-1", &retryable()).await;
        assert_eq!(engine.active_retries().await, 1);
        engine.reset("job-1").await;
        assert_eq!(engine.active_retries().await, 0);
    }
}
