//! Pull request creation, the host-API half of C5 (spec.md §4.5). Grounded on
//! the teacher's `github::pulls::PullRequestHandler`, which drives PR
//! operations through `octocrab` rather than shelling out to a host CLI.

use async_trait::async_trait;
use octocrab::Octocrab;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PrError {
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),
    #[error("PR was created but the host did not return a URL")]
    MissingUrl,
}

#[derive(Debug, Clone)]
pub struct PrRequest {
    pub title: String,
    pub head_branch: String,
    pub base_branch: String,
    pub body: String,
}

#[async_trait]
pub trait PrClient: Send + Sync {
    async fn create_pull_request(&self, request: PrRequest) -> Result<String, PrError>;
}

#[derive(Clone)]
pub struct OctocrabPrClient {
    octocrab: Octocrab,
    owner: String,
    repo: String,
}

impl OctocrabPrClient {
    pub fn new(octocrab: Octocrab, owner: String, repo: String) -> Self {
        Self {
            octocrab,
            owner,
            repo,
        }
    }
}

#[async_trait]
impl PrClient for OctocrabPrClient {
    async fn create_pull_request(&self, request: PrRequest) -> Result<String, PrError> {
        let pr = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .create(&request.title, &request.head_branch, &request.base_branch)
            .body(&request.body)
            .send()
            .await?;

        let url = pr
            .html_url
            .map(|u| u.to_string())
            .ok_or(PrError::MissingUrl)?;

        info!(pr_number = pr.number, %url, "opened pull request");
        Ok(url)
    }
}

/// Stub used by the dry-run overlay's inner client slot and by tests; never
/// reaches the network.
pub struct NullPrClient;

#[async_trait]
impl PrClient for NullPrClient {
    async fn create_pull_request(&self, request: PrRequest) -> Result<String, PrError> {
        Ok(format!(
            "https://example.invalid/pulls/{}",
            request.head_branch
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_client_returns_a_synthetic_url() {
        let client = NullPrClient;
        let url = client
            .create_pull_request(PrRequest {
                title: "t".into(),
                head_branch: "feature/x".into(),
                base_branch: "main".into(),
                body: "b".into(),
            })
            .await
            .unwrap();
        assert!(url.contains("feature/x"));
    }
}
