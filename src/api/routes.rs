//! Request handlers for the REST surface (spec.md §4.9).

use super::dto::{ok, ApiError};
use super::state::AppState;
use crate::job::{is_valid_id, Job, JobStatus};
use crate::repository::{JobFilter, Pagination};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn validate_id(id: &str) -> Result<(), ApiError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(ApiError::InvalidId(id.to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct PipelineStatusDto {
    pub pipeline_id: String,
    pub name: String,
    pub cron_expr: Option<String>,
    pub last_job: Option<Job>,
    pub counts: crate::job::StatusCounts,
}

#[derive(Debug, Serialize)]
pub struct SystemStatusDto {
    pub capacity: usize,
    pub available: usize,
    pub retry_metrics: crate::retry::RetryMetrics,
    pub pipelines: Vec<PipelineStatusDto>,
}

pub async fn get_status(State(state): State<AppState>) -> Result<Json<super::dto::Envelope<SystemStatusDto>>, ApiError> {
    let repository = state.executor.repository();

    let mut pipelines = Vec::new();
    let mut capacity = 0;
    let mut available = 0;
    let mut retry_metrics = crate::retry::RetryMetrics::default();
    for (meta, stats) in state.executor.all_stats().await? {
        capacity = stats.capacity;
        available = stats.available;
        retry_metrics = stats.retry_metrics;
        let last_job = repository.last_job(&meta.pipeline_id, None).await?;
        pipelines.push(PipelineStatusDto {
            pipeline_id: meta.pipeline_id.clone(),
            name: meta.name.clone(),
            cron_expr: meta.cron_expr.clone(),
            last_job,
            counts: stats.counts,
        });
    }

    Ok(ok(SystemStatusDto {
        capacity,
        available,
        retry_metrics,
        pipelines,
    }))
}

pub async fn list_pipelines(
    State(state): State<AppState>,
) -> Result<Json<super::dto::Envelope<Vec<PipelineStatusDto>>>, ApiError> {
    let repository = state.executor.repository();

    let mut pipelines = Vec::new();
    for (meta, stats) in state.executor.all_stats().await? {
        let last_job = repository.last_job(&meta.pipeline_id, None).await?;
        pipelines.push(PipelineStatusDto {
            pipeline_id: meta.pipeline_id.clone(),
            name: meta.name.clone(),
            cron_expr: meta.cron_expr.clone(),
            last_job,
            counts: stats.counts,
        });
    }
    Ok(ok(pipelines))
}

#[derive(Debug, Deserialize, Default)]
pub struct TriggerBody {
    #[serde(default)]
    pub parameters: Value,
}

pub async fn trigger_pipeline(
    State(state): State<AppState>,
    Path(pipeline_id): Path<String>,
    Json(body): Json<TriggerBody>,
) -> Result<Json<super::dto::Envelope<Job>>, ApiError> {
    validate_id(&pipeline_id)?;
    let job = state.executor.enqueue(&pipeline_id, body.parameters).await?;
    Ok(ok(job))
}

#[derive(Debug, Deserialize, Default)]
pub struct JobQuery {
    pub status: Option<String>,
    pub pipeline_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn parse_status(raw: &Option<String>) -> Option<JobStatus> {
    match raw.as_deref() {
        Some("queued") => Some(JobStatus::Queued),
        Some("running") => Some(JobStatus::Running),
        Some("completed") => Some(JobStatus::Completed),
        Some("failed") => Some(JobStatus::Failed),
        Some("cancelled") => Some(JobStatus::Cancelled),
        Some("paused") => Some(JobStatus::Paused),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
pub struct JobPageDto {
    pub jobs: Vec<Job>,
    pub total: u64,
    pub limit: i64,
    pub offset: i64,
}

pub async fn pipeline_jobs(
    State(state): State<AppState>,
    Path(pipeline_id): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<Json<super::dto::Envelope<JobPageDto>>, ApiError> {
    validate_id(&pipeline_id)?;
    let pagination = Pagination::sanitize(query.limit, query.offset);
    let filter = JobFilter {
        pipeline_id: Some(pipeline_id),
        status: parse_status(&query.status),
    };

    let page = state.executor.repository().list_jobs(filter, pagination).await?;
    Ok(ok(JobPageDto {
        jobs: page.jobs,
        total: page.total,
        limit: pagination.limit,
        offset: pagination.offset,
    }))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobQuery>,
) -> Result<Json<super::dto::Envelope<JobPageDto>>, ApiError> {
    if let Some(pid) = &query.pipeline_id {
        validate_id(pid)?;
    }
    let pagination = Pagination::sanitize(query.limit, query.offset);
    let filter = JobFilter {
        pipeline_id: query.pipeline_id.clone(),
        status: parse_status(&query.status),
    };

    let page = state.executor.repository().list_jobs(filter, pagination).await?;
    Ok(ok(JobPageDto {
        jobs: page.jobs,
        total: page.total,
        limit: pagination.limit,
        offset: pagination.offset,
    }))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<super::dto::Envelope<Job>>, ApiError> {
    validate_id(&job_id)?;
    let job = state.executor.repository().get_job(&job_id).await?;
    Ok(ok(job))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<super::dto::Envelope<&'static str>>, ApiError> {
    validate_id(&job_id)?;
    state.executor.cancel(&job_id).await?;
    Ok(ok("cancellation requested"))
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<super::dto::Envelope<&'static str>>, ApiError> {
    validate_id(&job_id)?;
    state.executor.retry_job(&job_id).await?;
    Ok(ok("job re-enqueued"))
}
