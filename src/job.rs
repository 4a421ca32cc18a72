//! The central data model: [`Job`], its lifecycle [`JobStatus`], and the
//! supporting records the rest of the substrate is built around.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

/// `[A-Za-z0-9_-]{1,100}` — shared by job ids and pipeline ids (spec.md §3, §8 property 5).
pub static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").expect("static pattern is valid"));

/// Returns `true` when `id` is a well-formed job/pipeline identifier.
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single (category, reason, suggested retry delay) produced by the Error
/// Classifier (C1) and attached to a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    HandlerTransient,
    HandlerPermanent,
    Infrastructure,
    CircuitBroken,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::HandlerTransient => "handler_transient",
            ErrorKind::HandlerPermanent => "handler_permanent",
            ErrorKind::Infrastructure => "infrastructure",
            ErrorKind::CircuitBroken => "circuit_broken",
        }
    }
}

/// Structured failure information attached to a job once it reaches
/// `status = failed` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub kind: ErrorKind,
    pub code: Option<String>,
    pub stack: Option<String>,
    pub retryable: bool,
    pub cause: Option<String>,
}

/// One execution of a pipeline against a specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub pipeline_id: String,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_retries: u32,
    pub payload: Value,
    pub result: Option<Value>,
    pub error_info: Option<ErrorInfo>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub branch_name: Option<String>,
    pub pr_url: Option<String>,
}

impl Job {
    pub fn new(id: String, pipeline_id: String, payload: Value, max_retries: u32) -> Self {
        Self {
            id,
            pipeline_id,
            status: JobStatus::Queued,
            attempt: 1,
            max_retries,
            payload,
            result: None,
            error_info: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            next_attempt_at: None,
            branch_name: None,
            pr_url: None,
        }
    }
}

/// Aggregate counters for one pipeline, as returned by
/// `JobRepository::counts_by_pipeline` (spec.md §4.2).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub paused: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            JobStatus::Paused => self.paused += 1,
        }
    }
}

/// Commit-grouping policy a pipeline opts into at registration (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// No git workflow for this pipeline.
    None,
    /// The overlay commits once at the end of a successful run.
    SingleCommit,
    /// The pipeline calls `ctx.commit()` between stages; the overlay still
    /// performs the terminal push + PR.
    MultiCommit,
}

impl CommitPolicy {
    pub fn git_workflow_enabled(self) -> bool {
        !matches!(self, CommitPolicy::None)
    }
}

/// Static metadata registered for a pipeline (spec.md §3 "Pipeline Registration").
#[derive(Debug, Clone)]
pub struct PipelineMeta {
    pub pipeline_id: String,
    pub name: String,
    pub cron_expr: Option<String>,
    pub commit_policy: CommitPolicy,
    pub max_concurrent: usize,
    pub max_retries: u32,
}

/// One row of the durable audit trail a deployment may opt into (spec.md §3
/// "Activity Event"). Written by [`crate::repository::JobRepository::log_activity`]
/// when `ExecutorConfig::activity_log_enabled` is set; off by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub event_type: String,
    pub job_id: String,
    pub pipeline_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_url_safe_ids() {
        assert!(is_valid_id("abc-123_XYZ"));
        assert!(is_valid_id(&"a".repeat(100)));
    }

    #[test]
    fn rejects_path_traversal_and_empty() {
        assert!(!is_valid_id("../etc/passwd"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id(&"a".repeat(101)));
        assert!(!is_valid_id("has space"));
    }

    #[test]
    fn status_terminal_classification() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
    }
}
