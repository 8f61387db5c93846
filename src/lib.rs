pub mod chat;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod github;
pub mod metrics;
pub mod querier;
pub mod snapshot;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chat::{Answer, ChatSession, Document, RepoRetrieval, Role, SessionStore};
use chrono::NaiveDate;
use config::AppConfig;
use error::{AggregationError, FetchError, MetricsError};
use github::RepoId;
use metrics::{
    CodeFrequency, CommitActivity, ContributorDetail, ContributorTotal, DateRange, RepoMeta,
    TrafficPoint,
};
use querier::MetricsQuerier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Service for querying repository metrics.
    pub querier: MetricsQuerier,
    /// Application configuration loaded from environment variables.
    pub config: AppConfig,
    /// Chat sessions, scoped per user session.
    pub sessions: SessionStore,
    /// External retrieval provider for the chat feature, if configured.
    pub retrieval: Option<Arc<dyn RepoRetrieval>>,
}

impl AppState {
    /// Initializes the application state, including the metrics querier.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let querier = MetricsQuerier::new(&config)?;
        Ok(Self {
            querier,
            config,
            sessions: SessionStore::new(),
            retrieval: None,
        })
    }

    pub fn with_retrieval(mut self, retrieval: Arc<dyn RepoRetrieval>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let serve_dir = ServeDir::new("dist").not_found_service(ServeFile::new("dist/index.html"));

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/repos/{owner}/{repo}", get(get_repo_meta))
        .route(
            "/api/repos/{owner}/{repo}/stats/code-frequency",
            get(get_code_frequency),
        )
        .route(
            "/api/repos/{owner}/{repo}/stats/commit-activity",
            get(get_commit_activity),
        )
        .route(
            "/api/repos/{owner}/{repo}/stats/contributors",
            get(get_contributors),
        )
        .route(
            "/api/repos/{owner}/{repo}/stats/contributors/{login}",
            get(get_contributor_detail),
        )
        .route(
            "/api/repos/{owner}/{repo}/traffic/views",
            get(get_traffic_views),
        )
        .route(
            "/api/repos/{owner}/{repo}/traffic/clones",
            get(get_traffic_clones),
        )
        .route("/api/repos/{owner}/{repo}/refresh", post(refresh_repo))
        .route("/api/chat/sessions", post(create_chat_session))
        .route(
            "/api/chat/sessions/{id}",
            get(get_chat_session).delete(end_chat_session),
        )
        .route("/api/chat/sessions/{id}/messages", post(post_chat_message))
        .route("/api/chat/sessions/{id}/reset", post(reset_chat_session))
        .fallback_service(serve_dir)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "repodash",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Optional date window on a metrics request; either bound may be omitted.
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl RangeQuery {
    fn to_range(&self) -> Option<DateRange> {
        if self.start.is_none() && self.end.is_none() {
            return None;
        }
        Some(DateRange {
            start: self.start.unwrap_or(NaiveDate::MIN),
            end: self.end.unwrap_or(NaiveDate::MAX),
        })
    }
}

/// A per-request Authorization header (either `token <t>` or `Bearer <t>`)
/// overrides the configured token.
fn token_override(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("token ")
        .or_else(|| value.strip_prefix("Bearer "))
        .unwrap_or(value);
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Maps the three user-facing failure classes to distinct responses. "Not
/// ready yet", "permission denied", and "unexpected upstream failure"
/// require different user actions and must never collapse into one message.
fn error_response(repo: &RepoId, e: MetricsError) -> (StatusCode, String) {
    tracing::error!(repo = %repo, "metrics request failed: {e}");
    match e {
        MetricsError::Fetch(FetchError::NotReady) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Statistics are still being computed by GitHub; try again shortly".to_string(),
        ),
        MetricsError::Fetch(FetchError::PermissionDenied) => (
            StatusCode::FORBIDDEN,
            "Permission denied: check the token and repository access".to_string(),
        ),
        MetricsError::Fetch(FetchError::UpstreamError(404)) => {
            (StatusCode::NOT_FOUND, "Repository not found".to_string())
        }
        MetricsError::Fetch(FetchError::UpstreamError(429)) => (
            StatusCode::TOO_MANY_REQUESTS,
            "GitHub rate limit exceeded".to_string(),
        ),
        MetricsError::Fetch(FetchError::UpstreamError(code)) => (
            StatusCode::BAD_GATEWAY,
            format!("Unexpected upstream failure (status {code})"),
        ),
        MetricsError::Fetch(FetchError::Transport(_)) => {
            (StatusCode::BAD_GATEWAY, "Could not reach GitHub".to_string())
        }
        MetricsError::Aggregation(AggregationError::MalformedInput) => (
            StatusCode::BAD_GATEWAY,
            "Upstream payload did not match the expected shape".to_string(),
        ),
        MetricsError::Aggregation(AggregationError::Empty) => {
            (StatusCode::NO_CONTENT, String::new())
        }
    }
}

pub async fn get_repo_meta(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Option<RepoMeta>>, (StatusCode, String)> {
    let token = token_override(&headers);
    state
        .querier
        .repo_meta(&repo_id, token.as_deref())
        .await
        .map(Json)
        .map_err(|e| error_response(&repo_id, e))
}

pub async fn get_code_frequency(
    Path(repo_id): Path<RepoId>,
    Query(range): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CodeFrequency>, (StatusCode, String)> {
    let token = token_override(&headers);
    state
        .querier
        .code_frequency(&repo_id, token.as_deref(), range.to_range().as_ref())
        .await
        .map(Json)
        .map_err(|e| error_response(&repo_id, e))
}

pub async fn get_commit_activity(
    Path(repo_id): Path<RepoId>,
    Query(range): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CommitActivity>, (StatusCode, String)> {
    let token = token_override(&headers);
    state
        .querier
        .commit_activity(&repo_id, token.as_deref(), range.to_range().as_ref())
        .await
        .map(Json)
        .map_err(|e| error_response(&repo_id, e))
}

pub async fn get_contributors(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ContributorTotal>>, (StatusCode, String)> {
    let token = token_override(&headers);
    state
        .querier
        .contributors(&repo_id, token.as_deref())
        .await
        .map(Json)
        .map_err(|e| error_response(&repo_id, e))
}

#[derive(Deserialize)]
pub struct ContributorPath {
    owner: String,
    repo: String,
    login: String,
}

pub async fn get_contributor_detail(
    Path(path): Path<ContributorPath>,
    Query(range): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ContributorDetail>, (StatusCode, String)> {
    let repo_id = RepoId {
        owner: path.owner,
        repo: path.repo,
    };
    let token = token_override(&headers);
    let detail = state
        .querier
        .contributor_detail(
            &repo_id,
            &path.login,
            token.as_deref(),
            range.to_range().as_ref(),
        )
        .await
        .map_err(|e| error_response(&repo_id, e))?;

    detail.map(Json).ok_or((
        StatusCode::NOT_FOUND,
        format!("No contributor named {}", path.login),
    ))
}

pub async fn get_traffic_views(
    Path(repo_id): Path<RepoId>,
    Query(range): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<TrafficPoint>>, (StatusCode, String)> {
    let token = token_override(&headers);
    state
        .querier
        .traffic_views(&repo_id, token.as_deref(), range.to_range().as_ref())
        .await
        .map(Json)
        .map_err(|e| error_response(&repo_id, e))
}

pub async fn get_traffic_clones(
    Path(repo_id): Path<RepoId>,
    Query(range): Query<RangeQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<TrafficPoint>>, (StatusCode, String)> {
    let token = token_override(&headers);
    state
        .querier
        .traffic_clones(&repo_id, token.as_deref(), range.to_range().as_ref())
        .await
        .map(Json)
        .map_err(|e| error_response(&repo_id, e))
}

/// Explicit user refresh: invalidates and rewarms every cached payload for
/// the repository.
pub async fn refresh_repo(
    Path(repo_id): Path<RepoId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> StatusCode {
    let token = token_override(&headers);
    state.querier.refresh(&repo_id, token.as_deref()).await;
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    repo: Option<RepoId>,
    /// Documents to hand to the retrieval provider for indexing, if any.
    #[serde(default)]
    documents: Option<Vec<Document>>,
}

pub async fn create_chat_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<ChatSession>, (StatusCode, String)> {
    let session = state.sessions.create(body.repo);

    if let (Some(retrieval), Some(documents)) = (&state.retrieval, body.documents) {
        let index = retrieval.index(documents).await.map_err(|e| {
            tracing::error!("indexing failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                "Retrieval provider failed to index the documents".to_string(),
            )
        })?;
        state.sessions.set_index(session.id, index);
    }

    Ok(Json(state.sessions.get(session.id).unwrap_or(session)))
}

pub async fn get_chat_session(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ChatSession>, StatusCode> {
    state.sessions.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
pub struct ChatMessageRequest {
    content: String,
}

pub async fn post_chat_message(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatMessageRequest>,
) -> Result<Json<Answer>, (StatusCode, String)> {
    let session = state
        .sessions
        .get(id)
        .ok_or((StatusCode::NOT_FOUND, "Unknown chat session".to_string()))?;

    let Some(retrieval) = &state.retrieval else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "No retrieval provider is configured".to_string(),
        ));
    };
    let Some(index) = &session.index else {
        return Err((
            StatusCode::CONFLICT,
            "Session has no indexed repository".to_string(),
        ));
    };

    state.sessions.append(id, Role::User, body.content.clone());

    let answer = retrieval.query(index, &body.content).await.map_err(|e| {
        tracing::error!("retrieval query failed: {e}");
        (
            StatusCode::BAD_GATEWAY,
            "Retrieval provider failed to answer".to_string(),
        )
    })?;

    state.sessions.append(id, Role::Assistant, answer.text.clone());

    Ok(Json(answer))
}

pub async fn reset_chat_session(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    if state.sessions.reset(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn end_chat_session(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> StatusCode {
    if state.sessions.end(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
