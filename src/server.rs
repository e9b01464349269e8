//! OpenAI-compatible HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Service, backend CLI and retrieval status |
//! | `GET`  | `/v1/models` | Static model catalog |
//! | `POST` | `/v1/chat/completions` | Chat completion, buffered or SSE |
//! | `POST` | `/api/chat/completions` | Alias of the above |
//!
//! # Error Contract
//!
//! Backend failures never surface as HTTP errors: the caller gets a normal
//! completion whose content is an `[Error: …]` sentinel. Only a body that
//! cannot be decoded is rejected:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "…" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser chat
//! frontends can call the bridge directly.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{sse::Sse, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::backend::{Backend, InvocationStatus};
use crate::config::Config;
use crate::credentials;
use crate::error::BridgeError;
use crate::models::{ChatRequest, Message};
use crate::openai::{self, ChatCompletion, StreamFramer};
use crate::prompt::{assemble, latest_user_message, load_persona, Persona};
use crate::retrieve::{open_provider, ContextProvider};

/// Process-wide state shared by every handler. Built once at startup and
/// never mutated.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub context: Arc<dyn ContextProvider>,
    pub backend: Arc<Backend>,
    pub persona: Arc<Persona>,
}

impl AppState {
    pub fn new(
        config: Config,
        context: Arc<dyn ContextProvider>,
        backend: Backend,
        persona: Persona,
    ) -> Self {
        Self {
            config: Arc::new(config),
            context,
            backend: Arc::new(backend),
            persona: Arc::new(persona),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/api/chat/completions", post(handle_chat_completions))
        .layer(cors)
        .with_state(state)
}

/// Starts the server on `config.bind_addr()` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let persona = load_persona(&config.persona)?;
    let context = open_provider(config).await;
    let backend = Backend::from_config(&config.backend);

    if !backend.program().exists() {
        warn!(cli_path = %backend.program().display(), "backend CLI not found");
    }

    let bind_addr = config.bind_addr();
    let app = build_router(AppState::new(config.clone(), context, backend, persona));

    info!(
        addr = %bind_addr,
        cli_path = %config.backend.cli_path.display(),
        rag = config.rag.enabled,
        "persona bridge listening"
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

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

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        bad_request(err.to_string())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    version: &'static str,
    subscription_type: Option<String>,
    cli_path: String,
    cli_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chromadb_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chromadb_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collections: Option<BTreeMap<String, i64>>,
}

/// Handler for `GET /health`. The retrieval fields are present only when
/// the deployment has retrieval.
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend = &state.config.backend;
    let retrieval = state.context.status().await;

    Json(HealthResponse {
        status: "healthy",
        service: state.config.server.service_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        subscription_type: credentials::subscription_type(&backend.credentials_path).await,
        cli_path: backend.cli_path.display().to_string(),
        cli_exists: state.backend.program().exists(),
        chromadb_available: retrieval.as_ref().map(|r| r.available),
        chromadb_path: retrieval.as_ref().map(|r| r.location.clone()),
        collections: retrieval.map(|r| r.collections),
    })
}

// ============ GET /v1/models ============

#[derive(Serialize)]
struct ModelList {
    object: &'static str,
    data: Vec<ModelCard>,
}

#[derive(Serialize)]
struct ModelCard {
    id: String,
    object: &'static str,
    created: i64,
    owned_by: String,
    permission: Vec<serde_json::Value>,
    root: String,
    parent: Option<String>,
}

async fn handle_models(State(state): State<AppState>) -> Json<ModelList> {
    let created = openai::unix_now();
    let data = state
        .config
        .server
        .models
        .iter()
        .map(|m| ModelCard {
            id: m.id.clone(),
            object: "model",
            created,
            owned_by: m.owned_by.clone(),
            permission: Vec::new(),
            root: m.id.clone(),
            parent: None,
        })
        .collect();

    Json(ModelList {
        object: "list",
        data,
    })
}

// ============ POST /v1/chat/completions ============

/// Handler for both chat completion routes.
///
/// Retrieval runs on the latest user message, the transcript is assembled
/// once, then the backend runs buffered or streamed depending on `stream`.
async fn handle_chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) =
        payload.map_err(|e| BridgeError::MalformedRequest(e.body_text()))?;
    let stream = request.wants_stream();

    let model = request
        .model
        .unwrap_or_else(|| state.config.server.default_model.clone());
    let messages: Vec<Message> = request.messages.into_iter().map(Message::from).collect();

    let query = latest_user_message(&messages).unwrap_or_default();
    let context = state.context.context_for(query).await;
    let prompt = assemble(&state.persona, &context, &messages);

    info!(
        model = %model,
        stream,
        messages = messages.len(),
        context_chars = context.chars().count(),
        prompt_chars = prompt.chars().count(),
        "chat completion"
    );

    if stream {
        let framer = StreamFramer::new(&model);
        let lines = state.backend.stream(&prompt);
        return Ok(Sse::new(openai::sse_events(framer, lines)).into_response());
    }

    let output = state.backend.complete(&prompt).await;
    if output.status != InvocationStatus::Ok {
        warn!(status = ?output.status, "backend returned a sentinel");
    }
    Ok(Json(ChatCompletion::new(&model, &prompt, &output.text)).into_response())
}
