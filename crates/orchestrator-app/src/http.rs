//! HTTP surface: webhook ingestion plus a small JSON operator API over the
//! session and lifecycle managers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use orchestrator_lifecycle::WebhookRejection;
use orchestrator_protocol::{IssueId, OrchestratorError, ProjectId, SessionId, WebhookRequest};
use orchestrator_session::SpawnOptions;
use orchestrator_store::SessionRecord;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::composition::App;

const DEFAULT_OUTPUT_LINES: usize = 50;

#[derive(Clone)]
pub struct HttpState {
    app: App,
    webhook_secret: Arc<str>,
}

impl HttpState {
    /// An empty secret makes every webhook fail verification.
    pub fn new(app: App, webhook_secret: impl Into<Arc<str>>) -> Self {
        Self {
            app,
            webhook_secret: webhook_secret.into(),
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/webhooks/:plugin", post(receive_webhook))
        .route("/sessions", get(list_sessions).post(spawn_session))
        .route("/sessions/:id", get(get_session).delete(terminate_session))
        .route("/sessions/:id/messages", post(send_message))
        .route("/sessions/:id/output", get(session_output))
        .with_state(state)
}

pub async fn serve(state: HttpState, bind_address: &str) -> anyhow::Result<()> {
    let address: SocketAddr = bind_address
        .parse()
        .map_err(|error| anyhow::anyhow!("invalid webhook.bind_address '{bind_address}': {error}"))?;
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "http listener started");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.into(),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(error: OrchestratorError) -> Self {
        Self {
            status: status_for(&error),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<WebhookRejection> for ApiError {
    fn from(rejection: WebhookRejection) -> Self {
        let (status, kind) = match &rejection {
            WebhookRejection::UnknownPlugin(_) => (StatusCode::NOT_FOUND, "unknown_plugin"),
            WebhookRejection::Signature(_) => (StatusCode::UNAUTHORIZED, "signature"),
            WebhookRejection::Payload(_) => (StatusCode::BAD_REQUEST, "payload"),
            WebhookRejection::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self {
            status,
            kind,
            message: rejection.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.kind, "message": self.message }));
        (self.status, body).into_response()
    }
}

pub fn status_for(error: &OrchestratorError) -> StatusCode {
    match error {
        OrchestratorError::Configuration(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::StateConflict(_) | OrchestratorError::Cancelled(_) => {
            StatusCode::CONFLICT
        }
        OrchestratorError::TransientExternal(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::PermanentExternal(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::ResourceLeak(_)
        | OrchestratorError::Workspace(_)
        | OrchestratorError::Runtime(_)
        | OrchestratorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics(State(state): State<HttpState>) -> Json<Value> {
    let bus = state.app.context().bus.snapshot();
    Json(json!({
        "lifecycle": state.app.lifecycle.perf_snapshot(),
        "event_bus": {
            "published": bus.published,
            "delivered_to_nobody": bus.delivered_to_nobody,
            "session_channels": bus.session_channels,
        },
    }))
}

async fn receive_webhook(
    State(state): State<HttpState>,
    Path(plugin): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let headers = headers.iter().filter_map(|(name, value)| {
        value
            .to_str()
            .ok()
            .map(|value| (name.as_str().to_owned(), value.to_owned()))
    });
    let request = WebhookRequest::new(headers, body.to_vec());
    let outcome = state
        .app
        .lifecycle
        .handle_webhook(&plugin, &request, &state.webhook_secret)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "event": outcome.event, "polled": outcome.polled })),
    ))
}

#[derive(Debug, Deserialize)]
struct SpawnRequest {
    project: String,
    issue: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    extra_instructions: Option<String>,
}

async fn list_sessions(State(state): State<HttpState>) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    Ok(Json(state.app.sessions.list()?))
}

async fn spawn_session(
    State(state): State<HttpState>,
    Json(request): Json<SpawnRequest>,
) -> Result<(StatusCode, Json<SessionRecord>), ApiError> {
    if request.issue.trim().is_empty() {
        return Err(ApiError::bad_request("issue must not be empty"));
    }
    let options = SpawnOptions {
        branch: request.branch,
        model: request.model,
        extra_instructions: request.extra_instructions,
    };
    let record = state
        .app
        .sessions
        .spawn(
            &ProjectId::new(request.project),
            &IssueId::new(request.issue.trim()),
            options,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_session(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    Ok(Json(state.app.sessions.get(&SessionId::new(id))?))
}

#[derive(Debug, Default, Deserialize)]
struct TerminateQuery {
    #[serde(default)]
    keep_workspace: bool,
}

async fn terminate_session(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Query(query): Query<TerminateQuery>,
) -> Result<Json<SessionRecord>, ApiError> {
    let record = state
        .app
        .sessions
        .terminate(&SessionId::new(id), !query.keep_workspace)
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    message: String,
}

async fn send_message(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<StatusCode, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    state
        .app
        .sessions
        .send(&SessionId::new(id), &request.message)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct OutputQuery {
    lines: Option<usize>,
}

async fn session_output(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Query(query): Query<OutputQuery>,
) -> Result<Json<Value>, ApiError> {
    let lines = query.lines.unwrap_or(DEFAULT_OUTPUT_LINES);
    let output = state
        .app
        .sessions
        .output(&SessionId::new(id), lines)
        .await?;
    Ok(Json(json!({ "output": output })))
}
