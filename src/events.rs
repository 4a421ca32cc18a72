//! C8 — Event Bus: in-process pub/sub for job lifecycle events, fanned out
//! to WebSocket subscribers by the API layer (spec.md §4.8).

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Every event kind the executor (or retry engine, or cache) can emit.
/// `channel()` maps each variant onto the subscription channel a WebSocket
/// client filters on (spec.md §4.8 "Per-WebSocket-client subscription").
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    JobCreated { job_id: String, pipeline_id: String },
    JobStarted { job_id: String, pipeline_id: String },
    JobProgress { job_id: String, percent: u8, text: Option<String> },
    JobCompleted { job_id: String, pipeline_id: String, result: Option<Value> },
    JobFailed { job_id: String, pipeline_id: String, message: String },
    JobCancelled { job_id: String, pipeline_id: String },
    PipelineStatus { pipeline_id: String, status: String },
    RetryScheduled { job_id: String, attempts: u32, delay_ms: u64 },
    RetryWarning { job_id: String, attempts: u32, max_attempts: u32 },
    RetryCircuitOpen { job_id: String, attempts: u32 },
    CacheHit { key: String },
    CacheMiss { key: String },
    AlertHighImpact { message: String },
    StatsUpdate { pipeline_id: String },
}

impl JobEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            JobEvent::JobCreated { .. }
            | JobEvent::JobStarted { .. }
            | JobEvent::JobProgress { .. }
            | JobEvent::JobCompleted { .. }
            | JobEvent::JobFailed { .. }
            | JobEvent::JobCancelled { .. }
            | JobEvent::PipelineStatus { .. }
            | JobEvent::StatsUpdate { .. } => "scans",
            JobEvent::RetryScheduled { .. }
            | JobEvent::RetryWarning { .. }
            | JobEvent::RetryCircuitOpen { .. }
            | JobEvent::AlertHighImpact { .. } => "alerts",
            JobEvent::CacheHit { .. } | JobEvent::CacheMiss { .. } => "cache",
        }
    }

    /// The `type` tag this variant serializes under, reused as the
    /// `event_type` column when an event is written to the durable audit
    /// trail (spec.md §3 "Activity Event").
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::JobCreated { .. } => "job_created",
            JobEvent::JobStarted { .. } => "job_started",
            JobEvent::JobProgress { .. } => "job_progress",
            JobEvent::JobCompleted { .. } => "job_completed",
            JobEvent::JobFailed { .. } => "job_failed",
            JobEvent::JobCancelled { .. } => "job_cancelled",
            JobEvent::PipelineStatus { .. } => "pipeline_status",
            JobEvent::RetryScheduled { .. } => "retry_scheduled",
            JobEvent::RetryWarning { .. } => "retry_warning",
            JobEvent::RetryCircuitOpen { .. } => "retry_circuit_open",
            JobEvent::CacheHit { .. } => "cache_hit",
            JobEvent::CacheMiss { .. } => "cache_miss",
            JobEvent::AlertHighImpact { .. } => "alert_high_impact",
            JobEvent::StatsUpdate { .. } => "stats_update",
        }
    }

    /// Audit-trail severity. Failures and circuit-open events are the only
    /// ones worth flagging above `info`.
    pub fn severity(&self) -> &'static str {
        match self {
            JobEvent::JobFailed { .. } | JobEvent::RetryCircuitOpen { .. } | JobEvent::AlertHighImpact { .. } => {
                "error"
            }
            JobEvent::RetryWarning { .. } => "warning",
            _ => "info",
        }
    }
}

const CHANNEL_CAPACITY: usize = 1024;

/// Single-process publisher. Emit is synchronous and non-blocking for the
/// caller; slow subscribers drop events rather than back-pressuring C6
/// (spec.md §4.8, §5 "Event bus").
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish is infallible from the caller's perspective: with zero
    /// subscribers `send` returns an error that carries no information
    /// worth surfacing to the executor.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(JobEvent::JobCreated {
            job_id: "j1".into(),
            pipeline_id: "p1".into(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel(), "scans");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(JobEvent::CacheMiss { key: "k".into() });
    }
}
