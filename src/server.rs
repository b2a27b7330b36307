//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/auth/github` | Exchange an OAuth code for a session token |
//! | `GET`  | `/github/repos` | Repositories of the session's user |
//! | `GET`  | `/github/repos/{owner}/{name}/pulls` | Open pull requests |
//! | `GET`  | `/repos/{repo_id}/status` | Index metadata |
//! | `POST` | `/index` | Reindex a repository |
//! | `POST` | `/search` | Retrieved chunks with distances |
//! | `POST` | `/ask` | Grounded answer with references |
//! | `POST` | `/review` | Review a pull request and record the run |
//! | `GET`  | `/repos/{repo_id}/metrics` | Dashboard aggregation |
//!
//! `repo_id` path segments are percent-encoded, e.g.
//! `/repos/github::acme%2Fapi/status`.
//!
//! # Sessions
//!
//! GitHub calls use the token from `Authorization: Bearer <token>`, falling
//! back to `GITHUB_TOKEN`. The server keeps no login state of its own.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "index_not_found", "message": "no index found for github::acme/api; index the repository first" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401),
//! `index_not_found` (404), `config` (500), `internal` (500),
//! `upstream` (502), `malformed_review` (502).

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use repolens_core::error::find_pipeline_error;
use repolens_core::metrics::{aggregate, DashboardSummary};
use repolens_core::models::{PrFile, PrInfo, ReviewRun};
use repolens_core::{IndexMetadata, PipelineError, RepoId, RetrievedResult};

use crate::ask::{ask, search, AskOutcome};
use crate::config::{Config, Credentials};
use crate::github::{GitHubClient, RepoSummary};
use crate::ingest::{index_target, IndexTarget, IngestReport};
use crate::llm::{create_chat_model, ChatModel};
use crate::pipeline::Pipeline;
use crate::progress::NoProgress;
use crate::review::{fetch_pr, ReviewService};
use crate::session::Session;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    chat: Arc<dyn ChatModel>,
    github: Arc<GitHubClient>,
    creds: Arc<Credentials>,
}

impl AppState {
    pub fn new(
        pipeline: Pipeline,
        chat: Arc<dyn ChatModel>,
        github: GitHubClient,
        creds: Credentials,
    ) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            chat,
            github: Arc::new(github),
            creds: Arc::new(creds),
        }
    }

    fn session(&self, headers: &HeaderMap) -> Result<Session, AppError> {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        match bearer.or(self.creds.github_token.as_deref()) {
            Some(token) => Ok(Session::new(token)),
            None => Err(AppError::new(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "GitHub session required: send Authorization: Bearer <token>",
            )),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/auth/github", post(handle_login))
        .route("/github/repos", get(handle_github_repos))
        .route("/github/repos/{owner}/{name}/pulls", get(handle_github_pulls))
        .route("/repos/{repo_id}/status", get(handle_status))
        .route("/repos/{repo_id}/metrics", get(handle_metrics))
        .route("/index", post(handle_index))
        .route("/search", post(handle_search))
        .route("/ask", post(handle_ask))
        .route("/review", post(handle_review))
        .layer(cors)
        .with_state(state)
}

/// `repolens serve`: bind `[server].bind` and serve until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let creds = Credentials::from_env();
    config.validate_credentials(&creds, true)?;

    let pipeline = Pipeline::open(config, &creds).await?;
    let chat = create_chat_model(&config.chat, &creds)?;
    let github = GitHubClient::new(&config.github)?;
    let state = AppState::new(pipeline, chat, github, creds);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "repolens server listening");
    println!("repolens server listening on http://{}", config.server.bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        let (status, code) = match find_pipeline_error(&err) {
            Some(PipelineError::IndexNotFound { .. }) => (StatusCode::NOT_FOUND, "index_not_found"),
            Some(PipelineError::MalformedReview(_)) => (StatusCode::BAD_GATEWAY, "malformed_review"),
            Some(PipelineError::Config(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            Some(PipelineError::External { .. }) => (StatusCode::BAD_GATEWAY, "upstream"),
            Some(PipelineError::InvalidRepoId(_)) => (StatusCode::BAD_REQUEST, "bad_request"),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            warn!(code, error = %message, "request failed");
        }
        Self::new(status, code, message)
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        anyhow::Error::from(err).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn parse_repo_id(raw: &str) -> Result<RepoId, AppError> {
    Ok(raw.trim().parse::<RepoId>()?)
}

fn non_empty<'a>(field: &str, value: &'a str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{} must not be empty", field)));
    }
    Ok(trimmed)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GitHub ============

#[derive(Deserialize)]
struct LoginRequest {
    code: String,
}

#[derive(Serialize)]
struct LoginResponse {
    login: Option<String>,
    access_token: String,
}

async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let code = non_empty("code", &req.code)?;
    let (client_id, client_secret) = state.creds.github_oauth_app()?;
    let session = state.github.login(client_id, client_secret, code).await?;
    Ok(Json(LoginResponse {
        login: session.login().map(str::to_string),
        access_token: session.token()?.to_string(),
    }))
}

async fn handle_github_repos(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<RepoSummary>>, AppError> {
    let session = state.session(&headers)?;
    Ok(Json(state.github.list_user_repos(&session).await?))
}

async fn handle_github_pulls(
    State(state): State<AppState>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Vec<PrInfo>>, AppError> {
    let RepoId::GitHub { owner, name } = RepoId::from_slug(&format!("{}/{}", owner, name))? else {
        return Err(AppError::bad_request("expected owner/name"));
    };
    let session = state.session(&headers)?;
    Ok(Json(state.github.list_open_prs(&session, &owner, &name).await?))
}

// ============ Index ============

async fn handle_status(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> Result<Json<IndexMetadata>, AppError> {
    let repo_id = parse_repo_id(&repo_id)?;
    match state.pipeline.index.metadata(&repo_id).await? {
        Some(meta) => Ok(Json(meta)),
        None => Err(PipelineError::IndexNotFound {
            repo_id: repo_id.to_string(),
        }
        .into()),
    }
}

#[derive(Deserialize)]
struct IndexRequest {
    repo_id: String,
    #[serde(default)]
    dry_run: bool,
}

async fn handle_index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IngestReport>, AppError> {
    let (target, session) = match parse_repo_id(&req.repo_id)? {
        RepoId::Local(path) => (IndexTarget::Local(path), None),
        RepoId::GitHub { owner, name } => {
            (IndexTarget::GitHub { owner, name }, Some(state.session(&headers)?))
        }
    };
    let report = index_target(
        &state.pipeline,
        &target,
        session.as_ref(),
        req.dry_run,
        Arc::new(NoProgress),
    )
    .await?;
    Ok(Json(report))
}

// ============ Search / Ask ============

#[derive(Deserialize)]
struct SearchRequest {
    repo_id: String,
    query: String,
    #[serde(default)]
    k: Option<usize>,
    /// Skip the relevance filter.
    #[serde(default)]
    all: bool,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<RetrievedResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let repo_id = parse_repo_id(&req.repo_id)?;
    let query = non_empty("query", &req.query)?;
    let k = req.k.unwrap_or(state.pipeline.config.retrieval.top_k);
    let results = search(&state.pipeline, &repo_id, query, k, !req.all).await?;
    Ok(Json(SearchResponse { results }))
}

#[derive(Deserialize)]
struct AskRequest {
    repo_id: String,
    question: String,
    #[serde(default)]
    k: Option<usize>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskOutcome>, AppError> {
    let repo_id = parse_repo_id(&req.repo_id)?;
    let question = non_empty("question", &req.question)?;
    let k = req.k.unwrap_or(state.pipeline.config.retrieval.top_k);
    let outcome = ask(&state.pipeline, state.chat.as_ref(), &repo_id, question, k).await?;
    Ok(Json(outcome))
}

// ============ Review / Metrics ============

#[derive(Deserialize)]
struct ReviewRequest {
    repo_id: String,
    pr_number: u64,
    #[serde(default)]
    title: Option<String>,
    /// Changed files; fetched from GitHub when absent.
    #[serde(default)]
    files: Option<Vec<PrFile>>,
}

async fn handle_review(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<ReviewRun>, AppError> {
    let repo_id = parse_repo_id(&req.repo_id)?;
    let (mut pr, files) = match req.files {
        Some(files) => (
            PrInfo {
                number: req.pr_number,
                title: String::new(),
                author: None,
                repo_id,
            },
            files,
        ),
        None => {
            let session = state.session(&headers)?;
            fetch_pr(&state.github, &session, &repo_id, req.pr_number).await?
        }
    };
    if let Some(title) = req.title {
        pr.title = title;
    }

    let run = ReviewService::new(&state.pipeline, state.chat.as_ref())
        .review(&pr, &files)
        .await?;
    Ok(Json(run))
}

async fn handle_metrics(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
) -> Result<Json<DashboardSummary>, AppError> {
    let repo_id = parse_repo_id(&repo_id)?;
    let runs = state.pipeline.metrics.load_all(&repo_id).await?;
    Ok(Json(aggregate(&runs)))
}
