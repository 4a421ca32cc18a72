//! C6 — Job Executor / Server Core: the lifecycle engine that accepts jobs,
//! enforces concurrency, runs pipeline handlers, persists transitions, and
//! emits events (spec.md §4.6).

use crate::classifier::{classify, ClassifiableError};
use crate::events::{EventBus, JobEvent};
use crate::git::GitOverlay;
use crate::job::{CommitPolicy, ErrorInfo, Job, JobStatus, StatusCounts};
use crate::registry::WorkerRegistry;
use crate::repository::{JobRepository, RepositoryError};
use crate::retry::{RetryDecision, RetryEngine};
use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{error, warn};

/// How long a `stats()` read is served from cache before the next caller
/// re-scans the `jobs` table (spec.md §3 supplemented "stats() aggregate
/// endpoint"; teacher precedent: `http::client::RateLimitedHttpClient`'s
/// response cache).
const STATS_CACHE_TTL: Duration = Duration::from_secs(2);

/// The error shape a pipeline handler returns. Carries enough structure for
/// C1 to classify it (spec.md §4.6 "Propagation policy").
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub code: Option<String>,
    pub status_code: Option<u16>,
    pub message: String,
    pub cause: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status_code: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl From<&HandlerError> for ClassifiableError {
    fn from(err: &HandlerError) -> Self {
        let mut c = ClassifiableError::new(err.message.clone());
        if let Some(code) = &err.code {
            c = c.with_code(code.clone());
        }
        if let Some(status) = err.status_code {
            c = c.with_status(status);
        }
        c
    }
}

/// Everything a running handler can reach: cancellation, progress
/// reporting, a structured logger scoped to this job, and (when the
/// pipeline opted in) mid-run commits (spec.md §4.6.c).
pub struct HandlerContext {
    job_id: String,
    pipeline_id: String,
    correlation_id: String,
    cancelled: watch::Receiver<bool>,
    progress: Arc<AtomicU8>,
    events: Arc<EventBus>,
    git: Option<(Arc<dyn GitOverlay>, String)>,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// A `tracing` span pre-populated with `job_id`, `pipeline_id`, and
    /// `correlation_id` — handlers enter it for the duration of their work
    /// so every log line they emit carries the same fields the executor's
    /// own lifecycle events do.
    pub fn logger(&self) -> tracing::Span {
        crate::telemetry::create_job_span(
            "handler",
            Some(&self.job_id),
            Some(&self.pipeline_id),
            Some(&self.correlation_id),
        )
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn set_progress(&self, percent: u8, text: Option<String>) {
        let percent = percent.min(100);
        self.progress.store(percent, Ordering::Relaxed);
        self.events.publish(JobEvent::JobProgress {
            job_id: self.job_id.clone(),
            percent,
            text,
        });
    }

    /// Commit staged changes under the job's branch. Only available when
    /// the owning pipeline's commit policy is `multi_commit`.
    pub async fn commit(&self, message: &str) -> Result<(), HandlerError> {
        match &self.git {
            Some((overlay, branch)) => overlay
                .commit(branch, message)
                .await
                .map_err(|e| HandlerError::new(e.to_string())),
            None => Err(HandlerError::new(
                "commit() called but this pipeline has no git workflow enabled",
            )),
        }
    }
}

/// A registered pipeline's handler. One `Worker` per `pipelineId`
/// (spec.md §9 "class-based Worker hierarchy" redesign: a flat capability
/// set, not an inheritance chain).
#[async_trait]
pub trait Worker: Send + Sync {
    async fn run(&self, payload: Value, ctx: HandlerContext) -> Result<Value, HandlerError>;
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_concurrent: usize,
    pub handler_timeout: Duration,
    /// Mirrors `config::ExecutorConfig::activity_log_enabled`; off by
    /// default (spec.md §3 "Activity Event").
    pub activity_log_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            handler_timeout: Duration::from_secs(10 * 60),
            activity_log_enabled: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("pipeline '{0}' is not registered")]
    UnknownPipeline(String),
    #[error("job '{0}' not found")]
    JobNotFound(String),
    #[error("job '{0}' is in status '{1}' and cannot be {2}")]
    InvalidTransition(String, JobStatus, &'static str),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorStats {
    pub counts: StatusCounts,
    pub capacity: usize,
    pub available: usize,
    pub in_flight: usize,
    /// Retry engine aggregates: active retries, total attempts, jobs nearing
    /// the circuit-breaker cap (spec.md §4.6 `stats()` contract).
    pub retry_metrics: crate::retry::RetryMetrics,
}

struct JobHandle {
    cancel_tx: watch::Sender<bool>,
}

/// The server core. One instance per process; pipelines register against it
/// before [`Executor::run`] is started (spec.md §9 "invert ownership").
pub struct Executor {
    repository: Arc<dyn JobRepository>,
    registry: Arc<WorkerRegistry>,
    retry: Arc<RetryEngine>,
    events: Arc<EventBus>,
    git: Option<Arc<dyn GitOverlay>>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    handler_timeout: Duration,
    activity_log_enabled: bool,
    accepting: AtomicBool,
    handles: tokio::sync::Mutex<std::collections::HashMap<String, JobHandle>>,
    dispatch_tx: tokio::sync::mpsc::UnboundedSender<String>,
    dispatch_rx: tokio::sync::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<String>>>,
    stats_cache: Cache<String, StatusCounts>,
}

impl Executor {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        registry: Arc<WorkerRegistry>,
        retry: Arc<RetryEngine>,
        events: Arc<EventBus>,
        git: Option<Arc<dyn GitOverlay>>,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        let (dispatch_tx, dispatch_rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Self {
            repository,
            registry,
            retry,
            events,
            git,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            max_concurrent: config.max_concurrent.max(1),
            handler_timeout: config.handler_timeout,
            activity_log_enabled: config.activity_log_enabled,
            accepting: AtomicBool::new(true),
            handles: tokio::sync::Mutex::new(std::collections::HashMap::new()),
            dispatch_tx,
            dispatch_rx: tokio::sync::Mutex::new(Some(dispatch_rx)),
            stats_cache: Cache::builder()
                .max_capacity(256)
                .time_to_live(STATS_CACHE_TTL)
                .build(),
        })
    }

    /// Run the dispatch loop. Call once, typically from `tokio::spawn`;
    /// returns when the process is shutting down and the channel closes.
    pub async fn run(self: &Arc<Self>) {
        let mut rx = self
            .dispatch_rx
            .lock()
            .await
            .take()
            .expect("Executor::run called more than once");

        while let Some(job_id) = rx.recv().await {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let this = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                this.execute_one(job_id).await;
            });
        }
    }

    pub async fn enqueue(
        &self,
        pipeline_id: &str,
        payload: Value,
    ) -> Result<Job, ExecutorError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ExecutorError::UnknownPipeline(pipeline_id.to_string()));
        }
        let meta = self
            .registry
            .meta(pipeline_id)
            .ok_or_else(|| ExecutorError::UnknownPipeline(pipeline_id.to_string()))?;

        let job = Job::new(
            uuid::Uuid::new_v4().to_string(),
            pipeline_id.to_string(),
            payload,
            meta.max_retries,
        );
        self.persist(&job).await?;
        self.emit(
            &job.id,
            &job.pipeline_id,
            JobEvent::JobCreated {
                job_id: job.id.clone(),
                pipeline_id: job.pipeline_id.clone(),
            },
        )
        .await;

        self.dispatch_tx
            .send(job.id.clone())
            .map_err(|_| ExecutorError::JobNotFound(job.id.clone()))?;

        Ok(job)
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), ExecutorError> {
        let mut job = self.repository.get_job(job_id).await?;
        match job.status {
            JobStatus::Queued | JobStatus::Paused => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(chrono::Utc::now());
                self.persist(&job).await?;
                self.emit(
                    &job.id,
                    &job.pipeline_id,
                    JobEvent::JobCancelled {
                        job_id: job.id.clone(),
                        pipeline_id: job.pipeline_id.clone(),
                    },
                )
                .await;
                Ok(())
            }
            JobStatus::Running => {
                let handles = self.handles.lock().await;
                if let Some(handle) = handles.get(job_id) {
                    let _ = handle.cancel_tx.send(true);
                }
                Ok(())
            }
            other => Err(ExecutorError::InvalidTransition(job_id.to_string(), other, "cancelled")),
        }
    }

    pub async fn pause(&self, job_id: &str) -> Result<(), ExecutorError> {
        let mut job = self.repository.get_job(job_id).await?;
        if job.status != JobStatus::Queued {
            return Err(ExecutorError::InvalidTransition(job_id.to_string(), job.status, "paused"));
        }
        job.status = JobStatus::Paused;
        self.persist(&job).await?;
        Ok(())
    }

    pub async fn resume(&self, job_id: &str) -> Result<(), ExecutorError> {
        let mut job = self.repository.get_job(job_id).await?;
        if job.status != JobStatus::Paused {
            return Err(ExecutorError::InvalidTransition(job_id.to_string(), job.status, "resumed"));
        }
        job.status = JobStatus::Queued;
        self.persist(&job).await?;
        self.dispatch_tx
            .send(job.id.clone())
            .map_err(|_| ExecutorError::JobNotFound(job.id))?;
        Ok(())
    }

    /// Re-enqueue a failed job, resetting its attempt counter and retry
    /// engine state (spec.md §4.9 `POST /jobs/:jobId/retry`).
    pub async fn retry_job(&self, job_id: &str) -> Result<(), ExecutorError> {
        let mut job = self.repository.get_job(job_id).await?;
        if job.status != JobStatus::Failed {
            return Err(ExecutorError::InvalidTransition(job_id.to_string(), job.status, "retried"));
        }
        self.retry.reset(job_id).await;
        job.status = JobStatus::Queued;
        job.attempt = 1;
        job.error_info = None;
        job.next_attempt_at = None;
        job.completed_at = None;
        self.persist(&job).await?;
        self.emit(
            &job.id,
            &job.pipeline_id,
            JobEvent::JobCreated {
                job_id: job.id.clone(),
                pipeline_id: job.pipeline_id.clone(),
            },
        )
        .await;
        self.dispatch_tx
            .send(job.id.clone())
            .map_err(|_| ExecutorError::JobNotFound(job.id))?;
        Ok(())
    }

    /// Aggregate counters for one pipeline. Backed by a short-TTL cache so a
    /// busy dashboard polling `GET /api/status` doesn't re-scan the `jobs`
    /// table on every tick (spec.md §3 supplemented "stats() aggregate
    /// endpoint").
    pub async fn stats(&self, pipeline_id: &str) -> Result<ExecutorStats, ExecutorError> {
        let counts = if let Some(counts) = self.stats_cache.get(pipeline_id).await {
            self.events.publish(JobEvent::CacheHit {
                key: pipeline_id.to_string(),
            });
            counts
        } else {
            self.events.publish(JobEvent::CacheMiss {
                key: pipeline_id.to_string(),
            });
            let counts = self.repository.counts_by_pipeline(pipeline_id).await?;
            self.stats_cache
                .insert(pipeline_id.to_string(), counts)
                .await;
            counts
        };

        Ok(ExecutorStats {
            counts,
            capacity: self.max_concurrent,
            available: self.semaphore.available_permits(),
            in_flight: self.in_flight().await,
            retry_metrics: self.retry.metrics_snapshot().await,
        })
    }

    /// Save a job and drop its pipeline's cached counts in the same step, so
    /// `stats()` never serves data staler than the write that just happened.
    async fn persist(&self, job: &Job) -> Result<(), RepositoryError> {
        self.repository.save_job(job).await?;
        self.stats_cache.invalidate(&job.pipeline_id).await;
        Ok(())
    }

    /// Publish a job-scoped lifecycle event and, when enabled, append it to
    /// the durable `activity_log` audit trail (spec.md §3 "Activity Event").
    /// A logging failure never fails the job — it's only reported.
    async fn emit(&self, job_id: &str, pipeline_id: &str, event: JobEvent) {
        if self.activity_log_enabled {
            let record = crate::job::ActivityRecord {
                event_type: event.event_type().to_string(),
                job_id: job_id.to_string(),
                pipeline_id: pipeline_id.to_string(),
                timestamp: chrono::Utc::now(),
                severity: event.severity().to_string(),
                payload: serde_json::to_value(&event).unwrap_or(Value::Null),
            };
            if let Err(e) = self.repository.log_activity(&record).await {
                warn!(job_id, error = %e, "failed to write activity log entry");
            }
        }
        self.events.publish(event);
    }

    /// Total jobs currently occupying a concurrency slot, across all
    /// pipelines (spec.md §4.6 "Graceful shutdown" drain check).
    pub async fn in_flight(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// `getAllStats()` (spec.md §4.4): every registered pipeline's metadata
    /// alongside its aggregated counters, in one call.
    pub async fn all_stats(&self) -> Result<Vec<(crate::job::PipelineMeta, ExecutorStats)>, ExecutorError> {
        let mut out = Vec::new();
        for meta in self.registry.list() {
            let stats = self.stats(&meta.pipeline_id).await?;
            out.push((meta.clone(), stats));
        }
        Ok(out)
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Stop accepting new enqueues. Jobs already dispatched keep running;
    /// `queued` jobs are left as-is for the next process (spec.md §4.6
    /// "Graceful shutdown").
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    async fn execute_one(&self, job_id: String) {
        let mut job = match self.repository.get_job(&job_id).await {
            Ok(j) => j,
            Err(e) => {
                error!(job_id, error = %e, "failed to load job for dispatch");
                return;
            }
        };

        // A job may have been cancelled or paused between enqueue and
        // acquiring a slot.
        if job.status != JobStatus::Queued {
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut handles = self.handles.lock().await;
            handles.insert(job_id.clone(), JobHandle { cancel_tx });
        }

        job.status = JobStatus::Running;
        job.started_at = Some(chrono::Utc::now());
        if let Err(e) = self.persist(&job).await {
            error!(job_id, error = %e, "failed to persist running transition");
        }
        self.emit(
            &job.id,
            &job.pipeline_id,
            JobEvent::JobStarted {
                job_id: job.id.clone(),
                pipeline_id: job.pipeline_id.clone(),
            },
        )
        .await;

        let commit_policy = self.registry.commit_policy(&job.pipeline_id);
        let branch = if commit_policy.git_workflow_enabled() {
            match &self.git {
                Some(overlay) => match overlay.create_job_branch(&job).await {
                    Some(branch) => {
                        job.branch_name = Some(branch.clone());
                        let _ = self.persist(&job).await;
                        Some(branch)
                    }
                    None => {
                        self.fail_job(
                            &mut job,
                            ErrorInfo {
                                message: "failed to create job branch".into(),
                                kind: crate::job::ErrorKind::Infrastructure,
                                code: None,
                                stack: None,
                                retryable: false,
                                cause: None,
                            },
                        )
                        .await;
                        self.handles.lock().await.remove(&job_id);
                        return;
                    }
                },
                None => {
                    warn!(job_id, "commit policy enabled but no git overlay configured");
                    None
                }
            }
        } else {
            None
        };

        let worker = self.registry.get(&job.pipeline_id);
        let ctx = HandlerContext {
            job_id: job.id.clone(),
            pipeline_id: job.pipeline_id.clone(),
            correlation_id: crate::telemetry::generate_correlation_id(),
            cancelled: cancel_rx,
            progress: Arc::new(AtomicU8::new(0)),
            events: self.events.clone(),
            git: match (&self.git, &branch) {
                (Some(overlay), Some(branch)) => Some((overlay.clone(), branch.clone())),
                _ => None,
            },
        };

        let outcome = match worker {
            Some(worker) => {
                tokio::time::timeout(self.handler_timeout, worker.run(job.payload.clone(), ctx)).await
            }
            None => {
                error!(job_id, pipeline_id = %job.pipeline_id, "dispatched job for unregistered pipeline");
                Ok(Err(HandlerError::new("pipeline not registered")))
            }
        };

        let cancel_requested = {
            let handles = self.handles.lock().await;
            handles
                .get(&job_id)
                .map(|h| *h.cancel_tx.borrow())
                .unwrap_or(false)
        };
        self.handles.lock().await.remove(&job_id);

        if cancel_requested {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(chrono::Utc::now());
            let _ = self.persist(&job).await;
            self.retry.reset(&job.id).await;
            self.emit(
                &job.id,
                &job.pipeline_id,
                JobEvent::JobCancelled {
                    job_id: job.id.clone(),
                    pipeline_id: job.pipeline_id.clone(),
                },
            )
            .await;
            if let (Some(overlay), Some(branch)) = (&self.git, &branch) {
                overlay.cleanup_on_failure(branch).await;
            }
            return;
        }

        match outcome {
            Ok(Ok(result)) => {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.completed_at = Some(chrono::Utc::now());
                let _ = self.persist(&job).await;
                self.retry.reset(&job.id).await;

                if let (Some(overlay), Some(branch)) = (&self.git, &job.branch_name) {
                    if commit_policy == CommitPolicy::SingleCommit {
                        let message = format!("{}: job {}", job.pipeline_id, job.id);
                        if let Err(e) = overlay.commit(branch, &message).await {
                            warn!(job_id = %job.id, error = %e, "single-commit failed");
                        }
                    }
                    let title = format!("[{}] {}", job.pipeline_id, job.id);
                    let body = format!("Automated run for job `{}`.", job.id);
                    job.pr_url = overlay.push_and_create_pr(branch, &title, &body).await;
                    let _ = self.persist(&job).await;
                }

                self.emit(
                    &job.id,
                    &job.pipeline_id,
                    JobEvent::JobCompleted {
                        job_id: job.id.clone(),
                        pipeline_id: job.pipeline_id.clone(),
                        result: job.result.clone(),
                    },
                )
                .await;
            }
            Ok(Err(handler_err)) => {
                self.handle_failure(&mut job, &branch, handler_err).await;
            }
            Err(_) => {
                self.handle_failure(
                    &mut job,
                    &branch,
                    HandlerError::new("handler exceeded timeout").with_code("ETIMEDOUT"),
                )
                .await;
            }
        }
    }

    async fn handle_failure(&self, job: &mut Job, branch: &Option<String>, err: HandlerError) {
        let classifiable: ClassifiableError = (&err).into();
        let classification = classify(&classifiable);
        let outcome = self.retry.schedule_retry(&job.id, &classification).await;

        let error_info = ErrorInfo {
            message: err.message.clone(),
            kind: classification.kind,
            code: err.code.clone(),
            stack: None,
            retryable: classification.is_retryable(),
            cause: err.cause.clone(),
        };

        match outcome.decision {
            RetryDecision::Fatal | RetryDecision::CircuitBroken => {
                if matches!(outcome.decision, RetryDecision::CircuitBroken) {
                    self.emit(
                        &job.id,
                        &job.pipeline_id,
                        JobEvent::RetryCircuitOpen {
                            job_id: job.id.clone(),
                            attempts: outcome.attempts,
                        },
                    )
                    .await;
                }
                self.fail_job(job, error_info).await;
                if let (Some(overlay), Some(branch)) = (&self.git, branch) {
                    overlay.cleanup_on_failure(branch).await;
                }
            }
            RetryDecision::Scheduled => {
                job.status = JobStatus::Queued;
                job.attempt += 1;
                job.error_info = Some(error_info);
                job.next_attempt_at = Some(chrono::Utc::now() + chrono::Duration::from_std(outcome.delay).unwrap_or_default());
                let _ = self.persist(job).await;

                self.emit(
                    &job.id,
                    &job.pipeline_id,
                    JobEvent::RetryScheduled {
                        job_id: job.id.clone(),
                        attempts: outcome.attempts,
                        delay_ms: outcome.delay.as_millis() as u64,
                    },
                )
                .await;

                if outcome.nearing_limit {
                    self.emit(
                        &job.id,
                        &job.pipeline_id,
                        JobEvent::RetryWarning {
                            job_id: job.id.clone(),
                            attempts: outcome.attempts,
                            max_attempts: self.retry.max_absolute_attempts(),
                        },
                    )
                    .await;
                }

                let job_id = job.id.clone();
                let tx = self.dispatch_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(outcome.delay).await;
                    let _ = tx.send(job_id);
                });
            }
        }
    }

    async fn fail_job(&self, job: &mut Job, error_info: ErrorInfo) {
        job.status = JobStatus::Failed;
        job.error_info = Some(error_info);
        job.completed_at = Some(chrono::Utc::now());
        let _ = self.persist(job).await;
        self.emit(
            &job.id,
            &job.pipeline_id,
            JobEvent::JobFailed {
                job_id: job.id.clone(),
                pipeline_id: job.pipeline_id.clone(),
                message: job
                    .error_info
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CommitPolicy, PipelineMeta};
    use crate::repository::SqliteJobRepository;
    use crate::retry::RetryConfig;
    use serde_json::json;

    struct EchoWorker;

    #[async_trait]
    impl Worker for EchoWorker {
        async fn run(&self, payload: Value, _ctx: HandlerContext) -> Result<Value, HandlerError> {
            Ok(payload)
        }
    }

    struct AlwaysFailWorker;

    #[async_trait]
    impl Worker for AlwaysFailWorker {
        async fn run(&self, _payload: Value, _ctx: HandlerContext) -> Result<Value, HandlerError> {
            Err(HandlerError::new("authentication failed for user"))
        }
    }

    /// Polls `ctx.is_cancelled()` until it flips, then returns success —
    /// mirrors a cooperative handler checking the cancellation flag at a
    /// safe point (spec.md §4.6.b).
    struct CancelAwareWorker;

    #[async_trait]
    impl Worker for CancelAwareWorker {
        async fn run(&self, payload: Value, ctx: HandlerContext) -> Result<Value, HandlerError> {
            for _ in 0..200 {
                if ctx.is_cancelled() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(payload)
        }
    }

    async fn build_executor(worker: Arc<dyn Worker>) -> Arc<Executor> {
        let repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::in_memory().await.unwrap());
        let mut registry = WorkerRegistry::new();
        registry
            .register(
                PipelineMeta {
                    pipeline_id: "echo".into(),
                    name: "echo".into(),
                    cron_expr: None,
                    commit_policy: CommitPolicy::None,
                    max_concurrent: 5,
                    max_retries: 3,
                },
                worker,
            )
            .unwrap();

        Executor::new(
            repo,
            Arc::new(registry),
            Arc::new(RetryEngine::new(RetryConfig::default())),
            Arc::new(EventBus::new()),
            None,
            ExecutorConfig::default(),
        )
    }

    #[tokio::test]
    async fn enqueue_and_run_completes_successfully() {
        let executor = build_executor(Arc::new(EchoWorker)).await;
        let runner = executor.clone();
        tokio::spawn(async move { runner.run().await });

        let job = executor.enqueue("echo", json!({"ok": true})).await.unwrap();

        for _ in 0..50 {
            let loaded = executor.repository.get_job(&job.id).await.unwrap();
            if loaded.status.is_terminal() {
                assert_eq!(loaded.status, JobStatus::Completed);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn non_retryable_failure_marks_job_failed() {
        let executor = build_executor(Arc::new(AlwaysFailWorker)).await;
        let runner = executor.clone();
        tokio::spawn(async move { runner.run().await });

        let job = executor.enqueue("echo", json!({})).await.unwrap();

        for _ in 0..50 {
            let loaded = executor.repository.get_job(&job.id).await.unwrap();
            if loaded.status.is_terminal() {
                assert_eq!(loaded.status, JobStatus::Failed);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn enqueue_rejects_unregistered_pipeline() {
        let executor = build_executor(Arc::new(EchoWorker)).await;
        let err = executor.enqueue("nonexistent", json!({})).await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownPipeline(_)));
    }

    #[tokio::test]
    async fn cancel_queued_job_transitions_immediately() {
        let executor = build_executor(Arc::new(EchoWorker)).await;
        // Do not start the dispatch loop: job stays queued.
        let job = executor.enqueue("echo", json!({})).await.unwrap();
        executor.cancel(&job.id).await.unwrap();
        let loaded = executor.repository.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_running_job_lands_on_cancelled_not_completed() {
        let executor = build_executor(Arc::new(CancelAwareWorker)).await;
        let runner = executor.clone();
        tokio::spawn(async move { runner.run().await });

        let job = executor.enqueue("echo", json!({})).await.unwrap();

        // Wait for the job to actually start before cancelling it — cancel()
        // on a still-queued job takes a different, already-tested path.
        for _ in 0..50 {
            let loaded = executor.repository.get_job(&job.id).await.unwrap();
            if loaded.status == JobStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        executor.cancel(&job.id).await.unwrap();

        for _ in 0..50 {
            let loaded = executor.repository.get_job(&job.id).await.unwrap();
            if loaded.status.is_terminal() {
                assert_eq!(loaded.status, JobStatus::Cancelled);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not reach a terminal state in time");
    }
}
