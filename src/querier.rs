//! Service layer for querying and caching repository metrics.
//!
//! This module implements `MetricsQuerier`, the main entry point for
//! retrieving metrics. It handles:
//! 1. Checking the in-memory payload cache for existing data.
//! 2. Fetching raw payloads through the polling fetcher on a miss.
//! 3. Applying the pure aggregators to the raw payload.
//! 4. Discarding stale in-flight results when the user has moved on to a
//!    different repository (last-request-wins).

use crate::config::AppConfig;
use crate::error::{AggregationError, MetricsError};
use crate::fetcher;
use crate::github::{EndpointKind, GitHubClient, MetricRequest, RepoId};
use crate::metrics::{
    self, CodeFrequency, CommitActivity, ContributorDetail, ContributorTotal, DateRange, RepoMeta,
    TrafficPoint,
};
use crate::snapshot::SnapshotSource;
use futures::stream::{self, StreamExt};
use moka::future::Cache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

/// Payloads are cached per (repo, endpoint, token scope): a payload fetched
/// with one token must never be served to a caller presenting a different
/// token or none at all.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub repo: RepoId,
    pub endpoint: EndpointKind,
    /// Fingerprint of the effective token, `None` for unauthenticated
    /// access. The token itself never sits in the key.
    pub token_scope: Option<String>,
}

fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Last-request-wins bookkeeping. A fetch begun for one repository is
/// superseded the moment a fetch for a different repository begins; its
/// eventual result is discarded instead of overwriting newer data.
#[derive(Debug, Default)]
struct RequestTracker {
    repo: Option<RepoId>,
    generation: u64,
}

impl RequestTracker {
    fn begin(&mut self, repo: &RepoId) -> u64 {
        if self.repo.as_ref() != Some(repo) {
            self.generation += 1;
            self.repo = Some(repo.clone());
        }
        self.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }
}

#[derive(Clone)]
pub struct MetricsQuerier {
    cache: Cache<CacheKey, Arc<Value>>,
    client: Arc<GitHubClient>,
    snapshots: Option<SnapshotSource>,
    config: AppConfig,
    tracker: Arc<Mutex<RequestTracker>>,
}

impl MetricsQuerier {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let client = GitHubClient::new(&config.github_api_base)?;

        let cache = Cache::builder()
            .max_capacity(config.cache_max_capacity)
            .time_to_live(config.cache_ttl())
            .build();

        Ok(Self {
            cache,
            client: Arc::new(client),
            snapshots: config.snapshot_dir.as_ref().map(SnapshotSource::new),
            config: config.clone(),
            tracker: Arc::new(Mutex::new(RequestTracker::default())),
        })
    }

    /// A per-request token overrides the configured one.
    fn effective_token(&self, token: Option<&str>) -> Option<String> {
        token
            .map(str::to_string)
            .or_else(|| self.config.github_token.clone())
    }

    /// Raw payload for one endpoint, read-through cached. When a snapshot
    /// directory is configured it takes precedence over the live API; a
    /// missing snapshot becomes a null payload, which every aggregator
    /// renders as an empty state.
    async fn get_raw(
        &self,
        repo: &RepoId,
        endpoint: EndpointKind,
        token: Option<&str>,
    ) -> Result<Arc<Value>, MetricsError> {
        if let Some(snapshots) = &self.snapshots {
            return match snapshots.load(endpoint) {
                Ok(payload) => Ok(Arc::new(payload)),
                Err(AggregationError::Empty) => Ok(Arc::new(Value::Null)),
                Err(e) => Err(e.into()),
            };
        }

        let token = self.effective_token(token);
        let key = CacheKey {
            repo: repo.clone(),
            endpoint,
            token_scope: token.as_deref().map(token_fingerprint),
        };
        if let Some(payload) = self.cache.get(&key).await {
            return Ok(payload);
        }

        let generation = self.tracker.lock().expect("tracker lock poisoned").begin(repo);

        let request = MetricRequest {
            repo: repo.clone(),
            endpoint,
            auth_token: token,
        };

        let fetched = fetcher::fetch_with_retry(
            self.client.as_ref(),
            &request,
            self.config.fetch_max_attempts,
            self.config.fetch_backoff(),
        )
        .await?;

        let payload = Arc::new(fetched.payload);

        let current = self
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .is_current(generation);
        if current {
            self.cache.insert(key, payload.clone()).await;
        } else {
            tracing::debug!(repo = %repo, endpoint = ?endpoint, "discarding stale fetch result");
        }

        Ok(payload)
    }

    pub async fn code_frequency(
        &self,
        repo: &RepoId,
        token: Option<&str>,
        range: Option<&DateRange>,
    ) -> Result<CodeFrequency, MetricsError> {
        let payload = self.get_raw(repo, EndpointKind::CodeFrequency, token).await?;
        Ok(metrics::code_frequency(&payload, range)?)
    }

    pub async fn commit_activity(
        &self,
        repo: &RepoId,
        token: Option<&str>,
        range: Option<&DateRange>,
    ) -> Result<CommitActivity, MetricsError> {
        let payload = self
            .get_raw(repo, EndpointKind::CommitActivity, token)
            .await?;
        Ok(metrics::commit_activity(&payload, range)?)
    }

    pub async fn contributors(
        &self,
        repo: &RepoId,
        token: Option<&str>,
    ) -> Result<Vec<ContributorTotal>, MetricsError> {
        let payload = self.get_raw(repo, EndpointKind::Contributors, token).await?;
        Ok(metrics::contributor_ranking(&payload)?)
    }

    pub async fn contributor_detail(
        &self,
        repo: &RepoId,
        login: &str,
        token: Option<&str>,
        range: Option<&DateRange>,
    ) -> Result<Option<ContributorDetail>, MetricsError> {
        let payload = self.get_raw(repo, EndpointKind::Contributors, token).await?;
        Ok(metrics::contributor_detail(&payload, login, range)?)
    }

    pub async fn traffic_views(
        &self,
        repo: &RepoId,
        token: Option<&str>,
        range: Option<&DateRange>,
    ) -> Result<Vec<TrafficPoint>, MetricsError> {
        let payload = self.get_raw(repo, EndpointKind::TrafficViews, token).await?;
        Ok(metrics::traffic(&payload, "views", range)?)
    }

    pub async fn traffic_clones(
        &self,
        repo: &RepoId,
        token: Option<&str>,
        range: Option<&DateRange>,
    ) -> Result<Vec<TrafficPoint>, MetricsError> {
        let payload = self.get_raw(repo, EndpointKind::TrafficClones, token).await?;
        Ok(metrics::traffic(&payload, "clones", range)?)
    }

    pub async fn repo_meta(
        &self,
        repo: &RepoId,
        token: Option<&str>,
    ) -> Result<Option<RepoMeta>, MetricsError> {
        let payload = self.get_raw(repo, EndpointKind::RepoMeta, token).await?;
        Ok(metrics::repo_meta(&payload)?)
    }

    /// Explicit user refresh: drop every cached payload for the repository,
    /// then warm the endpoints again with bounded concurrency. Per-endpoint
    /// failures are logged and skipped so one broken panel does not block
    /// the rest.
    pub async fn refresh(&self, repo: &RepoId, token: Option<&str>) {
        let token_scope = self
            .effective_token(token)
            .as_deref()
            .map(token_fingerprint);
        for endpoint in EndpointKind::ALL {
            self.cache
                .invalidate(&CacheKey {
                    repo: repo.clone(),
                    endpoint,
                    token_scope: token_scope.clone(),
                })
                .await;
        }

        stream::iter(EndpointKind::ALL)
            .for_each_concurrent(Some(self.config.refresh_concurrency_limit), |endpoint| {
                let repo = repo.clone();
                async move {
                    match self.get_raw(&repo, endpoint, token).await {
                        Ok(_) => {
                            tracing::info!(repo = %repo, endpoint = ?endpoint, "refreshed payload")
                        }
                        Err(e) => {
                            tracing::error!(repo = %repo, endpoint = ?endpoint, "refresh failed: {e}")
                        }
                    }
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(owner: &str, name: &str) -> RepoId {
        RepoId {
            owner: owner.to_string(),
            repo: name.to_string(),
        }
    }

    #[test]
    fn token_fingerprints_separate_cache_scopes() {
        let a = CacheKey {
            repo: repo("octocat", "Hello-World"),
            endpoint: EndpointKind::CommitActivity,
            token_scope: Some(token_fingerprint("private-token")),
        };
        let b = CacheKey {
            repo: repo("octocat", "Hello-World"),
            endpoint: EndpointKind::CommitActivity,
            token_scope: Some(token_fingerprint("other-token")),
        };
        let anonymous = CacheKey {
            token_scope: None,
            ..a.clone()
        };

        assert_ne!(a, b);
        assert_ne!(a, anonymous);
        // Same token, same scope.
        assert_eq!(token_fingerprint("private-token"), token_fingerprint("private-token"));
    }

    #[test]
    fn tracker_same_repo_shares_generation() {
        let mut tracker = RequestTracker::default();

        let g1 = tracker.begin(&repo("octocat", "Hello-World"));
        let g2 = tracker.begin(&repo("octocat", "Hello-World"));

        assert_eq!(g1, g2);
        assert!(tracker.is_current(g1));
    }

    #[test]
    fn tracker_new_repo_supersedes_older_fetches() {
        let mut tracker = RequestTracker::default();

        let stale = tracker.begin(&repo("octocat", "Hello-World"));
        let fresh = tracker.begin(&repo("rust-lang", "rust"));

        assert!(!tracker.is_current(stale));
        assert!(tracker.is_current(fresh));
    }

    #[test]
    fn tracker_returning_to_repo_starts_a_new_generation() {
        let mut tracker = RequestTracker::default();

        let first = tracker.begin(&repo("octocat", "Hello-World"));
        tracker.begin(&repo("rust-lang", "rust"));
        let second = tracker.begin(&repo("octocat", "Hello-World"));

        // The original fetch sequence stays superseded even though the user
        // came back to the same repository.
        assert!(!tracker.is_current(first));
        assert!(tracker.is_current(second));
    }
}
