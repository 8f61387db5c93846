//! Polled retrieval of asynchronously computed statistics.
//!
//! GitHub computes the stats endpoints (commit activity, code frequency,
//! contributors) on first request and answers 202 until the result is ready.
//! This module hides that asynchrony: 202 means wait and retry, while 403 and
//! every other non-2xx status fail fast because another attempt cannot fix
//! them.

use crate::error::{FetchError, HttpError};
use crate::github::{ApiFetch, ApiResponse, MetricRequest};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

/// A raw payload plus how many backoff waits it took to obtain it.
#[derive(Debug)]
pub struct Fetched {
    pub payload: Value,
    pub backoff_waits: u32,
}

/// Fetches a metric, retrying while upstream reports the computation as
/// pending.
///
/// On 200 the payload is returned immediately. On 202 the call sleeps for
/// `backoff` and retries, up to `max_attempts` total attempts; exhausting
/// them yields [`FetchError::NotReady`]. 403, other non-2xx statuses, and
/// transport failures fail fast without any backoff.
pub async fn fetch_with_retry(
    client: &dyn ApiFetch,
    request: &MetricRequest,
    max_attempts: u32,
    backoff: Duration,
) -> Result<Fetched, FetchError> {
    let path = request.endpoint.path(&request.repo);
    let max_attempts = max_attempts.max(1);
    let mut backoff_waits = 0;

    for attempt in 1..=max_attempts {
        match client.fetch(&path, request.auth_token.as_deref()).await {
            Ok(ApiResponse::Ready(payload)) => {
                return Ok(Fetched {
                    payload,
                    backoff_waits,
                })
            }
            Ok(ApiResponse::Pending) => {
                tracing::debug!(
                    repo = %request.repo,
                    endpoint = ?request.endpoint,
                    attempt,
                    "statistics pending upstream"
                );
                if attempt < max_attempts {
                    sleep(backoff).await;
                    backoff_waits += 1;
                }
            }
            Err(HttpError::Status(403)) => return Err(FetchError::PermissionDenied),
            Err(HttpError::Status(code)) => return Err(FetchError::UpstreamError(code)),
            Err(HttpError::Transport(e)) => return Err(FetchError::Transport(e.to_string())),
        }
    }

    Err(FetchError::NotReady)
}
