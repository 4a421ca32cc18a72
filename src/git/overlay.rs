//! C5 — Git Workflow Manager: turns a job's work into a branch, optional
//! intermediate commits, and a pull request (spec.md §4.5).

use super::operations::GitOperations;
use super::pr::{PrClient, PrError, PrRequest};
use crate::job::Job;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum GitOverlayError {
    #[error("git operation failed: {0}")]
    Git(#[from] anyhow::Error),
    #[error("git operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("pull request host error: {0}")]
    Pr(#[from] PrError),
}

#[async_trait]
pub trait GitOverlay: Send + Sync {
    /// Create the job's feature branch. Returns `None` on failure — the
    /// caller must treat that as job-fatal (spec.md §4.5).
    async fn create_job_branch(&self, job: &Job) -> Option<String>;

    /// Stage and commit tracked changes; no-op if the tree is clean.
    async fn commit(&self, branch: &str, message: &str) -> Result<(), GitOverlayError>;

    /// Push the branch and open a PR. Push/PR failures are logged, not
    /// propagated — the caller's functional work already succeeded.
    async fn push_and_create_pr(&self, branch: &str, title: &str, body: &str) -> Option<String>;

    /// Return the working tree to the base branch after a fatal failure.
    async fn cleanup_on_failure(&self, branch: &str);
}

/// Branch name generator: `<prefix>/<pipelineId>-<jobId>-<epochSec>`.
pub fn branch_name(prefix: &str, pipeline_id: &str, job_id: &str, epoch_secs: i64) -> String {
    format!("{prefix}/{pipeline_id}-{job_id}-{epoch_secs}")
}

const BRANCH_TIMEOUT: Duration = Duration::from_secs(30);
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// `git2` + host-API backed implementation of [`GitOverlay`].
pub struct Git2Overlay {
    ops: Arc<dyn GitOperations>,
    pr_client: Arc<dyn PrClient>,
    base_branch: String,
    branch_prefix: String,
    remote: String,
}

impl Git2Overlay {
    pub fn new(
        ops: Arc<dyn GitOperations>,
        pr_client: Arc<dyn PrClient>,
        base_branch: String,
        branch_prefix: String,
    ) -> Self {
        Self {
            ops,
            pr_client,
            base_branch,
            branch_prefix,
            remote: "origin".to_string(),
        }
    }
}

#[async_trait]
impl GitOverlay for Git2Overlay {
    async fn create_job_branch(&self, job: &Job) -> Option<String> {
        let name = branch_name(&self.branch_prefix, &job.pipeline_id, &job.id, job.created_at.timestamp());
        let ops = self.ops.clone();
        let base = self.base_branch.clone();
        let name_for_blocking = name.clone();

        let result = tokio::time::timeout(
            BRANCH_TIMEOUT,
            tokio::task::spawn_blocking(move || ops.create_branch(&name_for_blocking, &base)),
        )
        .await;

        match result {
            Ok(Ok(Ok(()))) => {
                info!(job_id = %job.id, branch = %name, "created job branch");
                Some(name)
            }
            Ok(Ok(Err(e))) => {
                warn!(job_id = %job.id, error = %e, "failed to create job branch");
                None
            }
            Ok(Err(e)) => {
                warn!(job_id = %job.id, error = %e, "branch creation task panicked");
                None
            }
            Err(_) => {
                warn!(job_id = %job.id, "branch creation timed out");
                None
            }
        }
    }

    async fn commit(&self, branch: &str, message: &str) -> Result<(), GitOverlayError> {
        let ops = self.ops.clone();
        let branch = branch.to_string();
        let message = message.to_string();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            ops.checkout_branch(&branch)?;
            ops.commit_all(&message)?;
            Ok(())
        })
        .await
        .map_err(|e| GitOverlayError::Git(anyhow::anyhow!("commit task panicked: {e}")))??;

        Ok(())
    }

    async fn push_and_create_pr(&self, branch: &str, title: &str, body: &str) -> Option<String> {
        let ops = self.ops.clone();
        let remote = self.remote.clone();
        let branch_for_push = branch.to_string();

        let push_result = tokio::time::timeout(
            PUSH_TIMEOUT,
            tokio::task::spawn_blocking(move || ops.push(&remote, &branch_for_push)),
        )
        .await;

        match push_result {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                warn!(branch, error = %e, "push failed; branch preserved locally");
                return None;
            }
            Ok(Err(e)) => {
                warn!(branch, error = %e, "push task panicked; branch preserved locally");
                return None;
            }
            Err(_) => {
                warn!(branch, "push timed out; branch preserved locally");
                return None;
            }
        }

        let request = PrRequest {
            title: title.to_string(),
            head_branch: branch.to_string(),
            base_branch: self.base_branch.clone(),
            body: body.to_string(),
        };

        match self.pr_client.create_pull_request(request).await {
            Ok(url) => {
                info!(branch, pr_url = %url, "opened pull request");
                Some(url)
            }
            Err(e) => {
                warn!(branch, error = %e, "PR creation failed; branch preserved locally");
                None
            }
        }
    }

    async fn cleanup_on_failure(&self, branch: &str) {
        let ops = self.ops.clone();
        let base = self.base_branch.clone();
        let branch = branch.to_string();

        let _ = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            ops.checkout_branch(&base)?;
            ops.delete_branch(&branch, true)?;
            Ok(())
        })
        .await;
    }
}

/// Wraps any [`GitOverlay`] so remote-mutating steps (push + PR) are
/// skipped; every local step still runs (spec.md §4.5 "Dry-run").
pub struct DryRunOverlay<T: GitOverlay> {
    inner: T,
}

impl<T: GitOverlay> DryRunOverlay<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: GitOverlay> GitOverlay for DryRunOverlay<T> {
    async fn create_job_branch(&self, job: &Job) -> Option<String> {
        self.inner.create_job_branch(job).await
    }

    async fn commit(&self, branch: &str, message: &str) -> Result<(), GitOverlayError> {
        self.inner.commit(branch, message).await
    }

    async fn push_and_create_pr(&self, branch: &str, title: &str, _body: &str) -> Option<String> {
        info!(branch, title, "dry-run: skipping push and PR creation");
        Some(format!("https://dry-run.invalid/pr/{branch}"))
    }

    async fn cleanup_on_failure(&self, branch: &str) {
        self.inner.cleanup_on_failure(branch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_follows_prefix_pipeline_job_epoch_shape() {
        let name = branch_name("forgequeue", "docs-enhance", "job-42", 1_700_000_000);
        assert_eq!(name, "forgequeue/docs-enhance-job-42-1700000000");
    }
}
