// forgequeue — an in-process job queue and pipeline runner for a fleet of
// repository-analysis automations on a single host.

pub mod api;
pub mod classifier;
pub mod config;
pub mod cron;
pub mod doppler;
pub mod events;
pub mod executor;
pub mod git;
pub mod job;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod shutdown;
pub mod telemetry;

pub use classifier::{classify, Category, ClassifiableError, Classification};
pub use config::{config, init_config, ForgequeueConfig};
pub use events::{EventBus, JobEvent};
pub use executor::{Executor, ExecutorConfig, ExecutorError, HandlerContext, HandlerError, Worker};
pub use git::{DryRunOverlay, Git2Operations, Git2Overlay, GitOperations, GitOverlay};
pub use job::{
    is_valid_id, ActivityRecord, CommitPolicy, ErrorInfo, ErrorKind, Job, JobStatus, PipelineMeta, StatusCounts,
};
pub use registry::{RegistryError, WorkerRegistry};
pub use repository::{JobFilter, JobPage, JobRepository, Pagination, RepositoryError, SqliteJobRepository};
pub use retry::{RetryConfig, RetryDecision, RetryEngine, RetryMetrics, RetryOutcome};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_job_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
