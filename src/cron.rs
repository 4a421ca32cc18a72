//! C7 — Cron Scheduler: attaches cron triggers to registered pipelines and
//! enqueues a default payload each time one fires (spec.md §4.7).

use crate::executor::Executor;
use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid cron expression '{0}': {1}")]
    InvalidExpression(String, cron::error::Error),
    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),
}

struct Trigger {
    pipeline_id: String,
    schedule: Schedule,
    default_payload: Value,
}

/// Drives cron-triggered enqueues. Missed fires during downtime are not
/// replayed — each trigger only looks at its next upcoming tick from the
/// time it is (re)started (spec.md §4.7 "Semantics").
pub struct CronScheduler {
    executor: Arc<Executor>,
    timezone: Tz,
    triggers: Vec<Trigger>,
}

impl CronScheduler {
    pub fn new(executor: Arc<Executor>, timezone_name: &str) -> Result<Self, CronError> {
        let timezone = Tz::from_str(timezone_name)
            .map_err(|_| CronError::InvalidTimezone(timezone_name.to_string()))?;
        Ok(Self {
            executor,
            timezone,
            triggers: Vec::new(),
        })
    }

    /// Attach a trigger. `cron_expr` follows the standard five-field cron
    /// syntax (the `cron` crate also accepts a leading seconds field; we
    /// require the five-field form to match spec.md §4.7).
    pub fn schedule(
        &mut self,
        pipeline_id: impl Into<String>,
        cron_expr: &str,
        default_payload: Value,
    ) -> Result<(), CronError> {
        let normalized = format!("0 {cron_expr}");
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| CronError::InvalidExpression(cron_expr.to_string(), e))?;

        self.triggers.push(Trigger {
            pipeline_id: pipeline_id.into(),
            schedule,
            default_payload,
        });
        Ok(())
    }

    /// Run every attached trigger concurrently until the process shuts down.
    /// Each trigger is an independent loop: `sleep until next tick, enqueue,
    /// repeat`.
    pub async fn run(self) {
        let mut handles = Vec::new();
        for trigger in self.triggers {
            let executor = self.executor.clone();
            let timezone = self.timezone;
            handles.push(tokio::spawn(async move {
                run_trigger(executor, timezone, trigger).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn run_trigger(executor: Arc<Executor>, timezone: Tz, trigger: Trigger) {
    loop {
        let now = Utc::now().with_timezone(&timezone);
        let Some(next) = trigger.schedule.after(&now).next() else {
            warn!(pipeline_id = %trigger.pipeline_id, "cron schedule has no further ticks");
            return;
        };

        let until = next.with_timezone(&Utc);
        let delay = (until - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(delay).await;

        info!(pipeline_id = %trigger.pipeline_id, "cron trigger fired");
        if let Err(e) = executor
            .enqueue(&trigger.pipeline_id, trigger.default_payload.clone())
            .await
        {
            error!(pipeline_id = %trigger.pipeline_id, error = %e, "cron-triggered enqueue failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_expression() {
        let executor_unused: Option<Arc<Executor>> = None;
        let _ = executor_unused;
        let normalized = format!("0 {}", "not a cron expr");
        assert!(Schedule::from_str(&normalized).is_err());
    }

    #[test]
    fn accepts_standard_five_field_expression() {
        let normalized = format!("0 {}", "0 9 * * MON-FRI");
        assert!(Schedule::from_str(&normalized).is_ok());
    }

    #[test]
    fn rejects_unknown_timezone() {
        assert!(Tz::from_str("Not/AZone").is_err());
    }
}
