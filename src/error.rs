//! Error taxonomy for the fetch and aggregation pipeline.
//!
//! The three user-facing failure classes — "not ready yet", "permission
//! denied", and "unexpected upstream failure" — require different user
//! actions and are kept distinct all the way to the HTTP response.

use thiserror::Error;

/// Failure of a single HTTP call. No retry semantics live at this level.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request never produced a usable response (DNS, TLS, connection
    /// reset, body decode failure).
    #[error("network failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response arrived with a status the caller treats as terminal.
    /// 202 is not an error; it is surfaced as
    /// [`crate::github::ApiResponse::Pending`].
    #[error("unexpected upstream status {0}")]
    Status(u16),
}

/// Failure of a polled fetch, after retry classification.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream kept answering 202 for every attempt; the statistic is still
    /// being computed and the caller should try again later.
    #[error("statistics are still being computed upstream; try again shortly")]
    NotReady,

    /// 403: an authorization problem, not a compute-pending state. Never
    /// retried.
    #[error("permission denied; check the token and repository access")]
    PermissionDenied,

    /// Any other non-2xx status. Never retried.
    #[error("upstream request failed with status {0}")]
    UpstreamError(u16),

    #[error("could not reach upstream: {0}")]
    Transport(String),
}

/// Failure of a pure aggregation step.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    /// The payload does not match the expected shape or types. Fatal to the
    /// single metric panel that requested it; other panels keep rendering.
    #[error("payload does not match the expected shape")]
    MalformedInput,

    /// No data available. Rendered as an empty-state view, never as an
    /// error message.
    #[error("no data available")]
    Empty,
}

/// Combined error returned by the querier, covering both halves of a
/// fetch-and-aggregate operation.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
}
