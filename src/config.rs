//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment
//! (e.g., .env file). It defines the `AppConfig` struct which governs fetch
//! retry behavior, cache TTLs, and the optional on-disk snapshot source.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Base URL of the GitHub REST API. Overridden in tests to point at a
    /// mock server.
    #[serde(default = "default_api_base")]
    pub github_api_base: String,

    /// Optional GitHub Personal Access Token for higher rate limits and
    /// private repository access. A per-request Authorization header takes
    /// precedence over this value.
    pub github_token: Option<String>,

    /// Total attempts per statistics fetch while upstream reports the
    /// computation as pending (HTTP 202).
    #[serde(default = "default_fetch_max_attempts")]
    pub fetch_max_attempts: u32,

    /// Seconds to wait between attempts while a statistic is pending.
    #[serde(default = "default_fetch_backoff_seconds")]
    pub fetch_backoff_seconds: u64,

    /// Time to live for cached raw payloads in seconds.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Maximum number of entries to keep in the payload cache.
    #[serde(default = "default_cache_max_capacity")]
    pub cache_max_capacity: u64,

    /// Maximum number of concurrent endpoint fetches during an explicit
    /// refresh of a repository.
    #[serde(default = "default_refresh_concurrency_limit")]
    pub refresh_concurrency_limit: usize,

    /// Directory of CSV snapshot exports. When set, metrics are served from
    /// the snapshots instead of the live API.
    pub snapshot_dir: Option<PathBuf>,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_fetch_max_attempts() -> u32 {
    3
}

fn default_fetch_backoff_seconds() -> u64 {
    10
}

fn default_cache_ttl_seconds() -> u64 {
    600
}

fn default_cache_max_capacity() -> u64 {
    500
}

fn default_refresh_concurrency_limit() -> usize {
    4
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn cache_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.cache_ttl_seconds)
    }

    pub fn fetch_backoff(&self) -> StdDuration {
        StdDuration::from_secs(self.fetch_backoff_seconds)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github_api_base: default_api_base(),
            github_token: None,
            fetch_max_attempts: default_fetch_max_attempts(),
            fetch_backoff_seconds: default_fetch_backoff_seconds(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_max_capacity: default_cache_max_capacity(),
            refresh_concurrency_limit: default_refresh_concurrency_limit(),
            snapshot_dir: None,
        }
    }
}
