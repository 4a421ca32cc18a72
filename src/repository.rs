//! C2 — Job Repository: durable storage for [`Job`] rows, backed by SQLite
//! through `sqlx` (spec.md §4.2).

use crate::job::{is_valid_id, ActivityRecord, ErrorInfo, Job, JobStatus, StatusCounts};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sanitised pagination parameters (spec.md §4.2 "Pagination hardening",
/// §8 property 6): negatives clamp to 0, `limit` clamps into `[1, 1000]`,
/// non-numeric input falls back to the default of 50.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn sanitize(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = match limit {
            Some(l) if l > 0 => l.min(Self::MAX_LIMIT),
            _ => Self::DEFAULT_LIMIT,
        };
        let offset = offset.unwrap_or(0).max(0);
        Self { limit, offset }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub pipeline_id: Option<String>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: u64,
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save_job(&self, job: &Job) -> Result<(), RepositoryError>;
    async fn get_job(&self, id: &str) -> Result<Job, RepositoryError>;
    async fn list_jobs(
        &self,
        filter: JobFilter,
        pagination: Pagination,
    ) -> Result<JobPage, RepositoryError>;
    async fn counts_by_pipeline(&self, pipeline_id: &str) -> Result<StatusCounts, RepositoryError>;
    async fn last_job(
        &self,
        pipeline_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Option<Job>, RepositoryError>;
    async fn bulk_import(&self, jobs: &[Job]) -> Result<(), RepositoryError>;
    /// Append one row to the optional `activity_log` audit trail (spec.md §3
    /// "Activity Event"). Only called when a pipeline has opted in; failures
    /// are logged by the caller, never allowed to fail a job.
    async fn log_activity(&self, record: &ActivityRecord) -> Result<(), RepositoryError>;
}

/// `sqlx`/SQLite-backed implementation of [`JobRepository`].
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            info!(database_url, "creating database");
            Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("job repository migrations applied");

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, RepositoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    fn validate_id(id: &str) -> Result<(), RepositoryError> {
        if is_valid_id(id) {
            Ok(())
        } else {
            Err(RepositoryError::InvalidId(id.to_string()))
        }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, RepositoryError> {
        let status_str: String = row.try_get("status")?;
        let status = match status_str.as_str() {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            "paused" => JobStatus::Paused,
            other => {
                return Err(RepositoryError::Storage(sqlx::Error::Decode(
                    format!("unknown status '{other}'").into(),
                )))
            }
        };

        let payload: String = row.try_get("payload")?;
        let payload: Value = serde_json::from_str(&payload)?;

        let result: Option<String> = row.try_get("result")?;
        let result = result.map(|r| serde_json::from_str(&r)).transpose()?;

        let error_info: Option<String> = row.try_get("error_info")?;
        let error_info: Option<ErrorInfo> =
            error_info.map(|e| serde_json::from_str(&e)).transpose()?;

        Ok(Job {
            id: row.try_get("id")?,
            pipeline_id: row.try_get("pipeline_id")?,
            status,
            attempt: row.try_get::<i64, _>("attempt")? as u32,
            max_retries: row.try_get::<i64, _>("max_retries")? as u32,
            payload,
            result,
            error_info,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            branch_name: row.try_get("branch_name")?,
            pr_url: row.try_get("pr_url")?,
        })
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn save_job(&self, job: &Job) -> Result<(), RepositoryError> {
        Self::validate_id(&job.id)?;
        Self::validate_id(&job.pipeline_id)?;

        let payload = serde_json::to_string(&job.payload)?;
        let result = job.result.as_ref().map(serde_json::to_string).transpose()?;
        let error_info = job
            .error_info
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, pipeline_id, status, attempt, max_retries, payload, result,
                error_info, created_at, started_at, completed_at, next_attempt_at,
                branch_name, pr_url
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                attempt = excluded.attempt,
                max_retries = excluded.max_retries,
                payload = excluded.payload,
                result = excluded.result,
                error_info = excluded.error_info,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                next_attempt_at = excluded.next_attempt_at,
                branch_name = excluded.branch_name,
                pr_url = excluded.pr_url
            "#,
        )
        .bind(&job.id)
        .bind(&job.pipeline_id)
        .bind(job.status.as_str())
        .bind(job.attempt as i64)
        .bind(job.max_retries as i64)
        .bind(payload)
        .bind(result)
        .bind(error_info)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.next_attempt_at)
        .bind(&job.branch_name)
        .bind(&job.pr_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job, RepositoryError> {
        Self::validate_id(id)?;

        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        Self::row_to_job(&row)
    }

    async fn list_jobs(
        &self,
        filter: JobFilter,
        pagination: Pagination,
    ) -> Result<JobPage, RepositoryError> {
        if let Some(pid) = &filter.pipeline_id {
            Self::validate_id(pid)?;
        }

        let mut query = String::from("SELECT * FROM jobs WHERE 1=1");
        let mut count_query = String::from("SELECT COUNT(*) as total FROM jobs WHERE 1=1");
        if filter.pipeline_id.is_some() {
            query.push_str(" AND pipeline_id = ?");
            count_query.push_str(" AND pipeline_id = ?");
        }
        if filter.status.is_some() {
            query.push_str(" AND status = ?");
            count_query.push_str(" AND status = ?");
        }
        query.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        macro_rules! bind_filters {
            ($q:expr) => {{
                let mut q = $q;
                if let Some(pid) = &filter.pipeline_id {
                    q = q.bind(pid);
                }
                if let Some(status) = filter.status {
                    q = q.bind(status.as_str());
                }
                q
            }};
        }

        let rows_query = bind_filters!(sqlx::query(&query))
            .bind(pagination.limit)
            .bind(pagination.offset);
        let rows = rows_query.fetch_all(&self.pool).await?;

        let jobs = rows
            .iter()
            .map(Self::row_to_job)
            .collect::<Result<Vec<_>, _>>()?;

        let count_row = bind_filters!(sqlx::query(&count_query))
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = count_row.try_get("total")?;

        Ok(JobPage {
            jobs,
            total: total as u64,
        })
    }

    async fn counts_by_pipeline(&self, pipeline_id: &str) -> Result<StatusCounts, RepositoryError> {
        Self::validate_id(pipeline_id)?;

        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM jobs WHERE pipeline_id = ?1 GROUP BY status")
            .bind(pipeline_id)
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let status = match status.as_str() {
                "queued" => JobStatus::Queued,
                "running" => JobStatus::Running,
                "completed" => JobStatus::Completed,
                "failed" => JobStatus::Failed,
                "cancelled" => JobStatus::Cancelled,
                "paused" => JobStatus::Paused,
                _ => continue,
            };
            for _ in 0..n {
                counts.record(status);
            }
        }
        Ok(counts)
    }

    async fn last_job(
        &self,
        pipeline_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Option<Job>, RepositoryError> {
        Self::validate_id(pipeline_id)?;

        let row = if let Some(status) = status {
            sqlx::query(
                "SELECT * FROM jobs WHERE pipeline_id = ?1 AND status = ?2 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(pipeline_id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?
        } else {
            sqlx::query("SELECT * FROM jobs WHERE pipeline_id = ?1 ORDER BY created_at DESC LIMIT 1")
                .bind(pipeline_id)
                .fetch_optional(&self.pool)
                .await?
        };

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn bulk_import(&self, jobs: &[Job]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        for job in jobs {
            Self::validate_id(&job.id)?;
            Self::validate_id(&job.pipeline_id)?;

            let payload = serde_json::to_string(&job.payload)?;
            let result = job.result.as_ref().map(serde_json::to_string).transpose()?;
            let error_info = job
                .error_info
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            sqlx::query(
                r#"
                INSERT INTO jobs (
                    id, pipeline_id, status, attempt, max_retries, payload, result,
                    error_info, created_at, started_at, completed_at, next_attempt_at,
                    branch_name, pr_url
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&job.id)
            .bind(&job.pipeline_id)
            .bind(job.status.as_str())
            .bind(job.attempt as i64)
            .bind(job.max_retries as i64)
            .bind(payload)
            .bind(result)
            .bind(error_info)
            .bind(job.created_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(job.next_attempt_at)
            .bind(&job.branch_name)
            .bind(&job.pr_url)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn log_activity(&self, record: &ActivityRecord) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(&record.payload)?;

        sqlx::query(
            r#"
            INSERT INTO activity_log (event_type, job_id, pipeline_id, timestamp, severity, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.event_type)
        .bind(&record.job_id)
        .bind(&record.pipeline_id)
        .bind(record.timestamp)
        .bind(&record.severity)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn repo() -> SqliteJobRepository {
        SqliteJobRepository::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn save_and_get_roundtrips() {
        let repo = repo().await;
        let job = Job::new("job-1".into(), "pipe-1".into(), json!({"x": 1}), 3);
        repo.save_job(&job).await.unwrap();

        let loaded = repo.get_job("job-1").await.unwrap();
        assert_eq!(loaded.id, "job-1");
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.payload, json!({"x": 1}));
    }

    #[tokio::test]
    async fn get_job_rejects_invalid_id() {
        let repo = repo().await;
        let err = repo.get_job("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidId(_)));
    }

    #[tokio::test]
    async fn get_job_not_found() {
        let repo = repo().await;
        let err = repo.get_job("missing").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn pagination_is_sanitised() {
        let p = Pagination::sanitize(Some(9_999_999), Some(-5));
        assert_eq!(p.limit, Pagination::MAX_LIMIT);
        assert_eq!(p.offset, 0);

        let p = Pagination::sanitize(None, None);
        assert_eq!(p.limit, Pagination::DEFAULT_LIMIT);
        assert_eq!(p.offset, 0);
    }

    #[tokio::test]
    async fn list_jobs_filters_and_orders_desc() {
        let repo = repo().await;
        for i in 0..3 {
            let mut job = Job::new(format!("job-{i}"), "pipe-1".into(), json!({}), 3);
            job.created_at = chrono::Utc::now() + chrono::Duration::seconds(i);
            repo.save_job(&job).await.unwrap();
        }

        let page = repo
            .list_jobs(
                JobFilter {
                    pipeline_id: Some("pipe-1".into()),
                    status: None,
                },
                Pagination::sanitize(None, None),
            )
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.jobs[0].id, "job-2");
    }

    #[tokio::test]
    async fn bulk_import_is_transactional_and_idempotent() {
        let repo = repo().await;
        let jobs = vec![
            Job::new("bulk-1".into(), "pipe-1".into(), json!({}), 3),
            Job::new("bulk-2".into(), "pipe-1".into(), json!({}), 3),
        ];
        repo.bulk_import(&jobs).await.unwrap();

        assert!(repo.get_job("bulk-1").await.is_ok());
        assert!(repo.get_job("bulk-2").await.is_ok());

        // Re-importing the same rows is a no-op (ON CONFLICT DO NOTHING),
        // not an error.
        repo.bulk_import(&jobs).await.unwrap();
        let page = repo
            .list_jobs(
                JobFilter {
                    pipeline_id: Some("pipe-1".into()),
                    status: None,
                },
                Pagination::sanitize(None, None),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn counts_by_pipeline_aggregates() {
        let repo = repo().await;
        let mut a = Job::new("a".into(), "pipe-1".into(), json!({}), 3);
        a.status = JobStatus::Completed;
        let mut b = Job::new("b".into(), "pipe-1".into(), json!({}), 3);
        b.status = JobStatus::Failed;
        repo.save_job(&a).await.unwrap();
        repo.save_job(&b).await.unwrap();

        let counts = repo.counts_by_pipeline("pipe-1").await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn log_activity_inserts_a_row() {
        let repo = repo().await;
        let record = ActivityRecord {
            event_type: "job_completed".into(),
            job_id: "job-1".into(),
            pipeline_id: "pipe-1".into(),
            timestamp: chrono::Utc::now(),
            severity: "info".into(),
            payload: json!({"ok": true}),
        };
        repo.log_activity(&record).await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) as n FROM activity_log WHERE job_id = ?1")
            .bind("job-1")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        let count: i64 = row.try_get("n").unwrap();
        assert_eq!(count, 1);
    }
}
