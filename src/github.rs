use crate::error::HttpError;
use anyhow::Result;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "streamlit").
    pub owner: String,
    /// The name of the repository (e.g., "streamlit").
    pub repo: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// The REST endpoints the dashboard consumes, one per metric family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    CodeFrequency,
    CommitActivity,
    Contributors,
    TrafficViews,
    TrafficClones,
    RepoMeta,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 6] = [
        EndpointKind::CodeFrequency,
        EndpointKind::CommitActivity,
        EndpointKind::Contributors,
        EndpointKind::TrafficViews,
        EndpointKind::TrafficClones,
        EndpointKind::RepoMeta,
    ];

    /// Request path under the API base for the given repository.
    pub fn path(&self, repo: &RepoId) -> String {
        // Sanitize inputs to prevent path traversal or unintended endpoint access
        let owner = repo.owner.trim().replace("..", "");
        let name = repo.repo.trim().replace("..", "");

        let suffix = match self {
            EndpointKind::CodeFrequency => "/stats/code_frequency",
            EndpointKind::CommitActivity => "/stats/commit_activity",
            EndpointKind::Contributors => "/stats/contributors",
            EndpointKind::TrafficViews => "/traffic/views",
            EndpointKind::TrafficClones => "/traffic/clones",
            EndpointKind::RepoMeta => "",
        };

        format!("/repos/{owner}/{name}{suffix}")
    }

    /// The stats endpoints are computed asynchronously upstream and may
    /// answer 202 until the result is ready. Traffic and repo metadata are
    /// served directly.
    pub fn is_async_computed(&self) -> bool {
        matches!(
            self,
            EndpointKind::CodeFrequency | EndpointKind::CommitActivity | EndpointKind::Contributors
        )
    }
}

/// One user-triggered fetch of a single metric for a single repository.
#[derive(Clone, Debug)]
pub struct MetricRequest {
    pub repo: RepoId,
    pub endpoint: EndpointKind,
    /// Token used for the Authorization header. `None` falls back to
    /// unauthenticated access (sharply rate-limited by GitHub).
    pub auth_token: Option<String>,
}

/// Outcome of a single successful HTTP exchange.
#[derive(Debug)]
pub enum ApiResponse {
    /// 2xx with a body: the data is ready.
    Ready(Value),
    /// 202: upstream accepted the request and is computing the statistic.
    Pending,
}

/// Issues a single authenticated GET against the GitHub REST API. The
/// polled-retry behavior for asynchronously computed statistics lives in
/// [`crate::fetcher`], not here.
#[async_trait::async_trait]
pub trait ApiFetch: Send + Sync {
    async fn fetch(&self, path: &str, token: Option<&str>) -> Result<ApiResponse, HttpError>;
}

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
}

impl GitHubClient {
    /// Builds a client against the given API base (normally
    /// `https://api.github.com`; tests point it at a local mock server).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl ApiFetch for GitHubClient {
    async fn fetch(&self, path: &str, token: Option<&str>) -> Result<ApiResponse, HttpError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .http
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, concat!("repodash/", env!("CARGO_PKG_VERSION")));

        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }

        let response = request.send().await.map_err(HttpError::Transport)?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(ApiResponse::Pending),
            status if status.is_success() => {
                let body = response
                    .json::<Value>()
                    .await
                    .map_err(HttpError::Transport)?;
                Ok(ApiResponse::Ready(body))
            }
            status => Err(HttpError::Status(status.as_u16())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths() {
        let repo = RepoId {
            owner: "octocat".to_string(),
            repo: "Hello-World".to_string(),
        };

        assert_eq!(
            EndpointKind::CodeFrequency.path(&repo),
            "/repos/octocat/Hello-World/stats/code_frequency"
        );
        assert_eq!(
            EndpointKind::TrafficViews.path(&repo),
            "/repos/octocat/Hello-World/traffic/views"
        );
        assert_eq!(
            EndpointKind::RepoMeta.path(&repo),
            "/repos/octocat/Hello-World"
        );
    }

    #[test]
    fn endpoint_path_sanitizes_traversal() {
        let repo = RepoId {
            owner: " ../evil ".to_string(),
            repo: "repo/../..".to_string(),
        };

        let path = EndpointKind::RepoMeta.path(&repo);
        assert!(
            !path.contains(".."),
            "path should strip traversal sequences: {path}"
        );
    }

    #[test]
    fn async_computed_endpoints() {
        assert!(EndpointKind::CommitActivity.is_async_computed());
        assert!(EndpointKind::Contributors.is_async_computed());
        assert!(!EndpointKind::TrafficClones.is_async_computed());
        assert!(!EndpointKind::RepoMeta.is_async_computed());
    }
}
