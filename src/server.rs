//! HTTP service for NDA analysis and legal chat.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a question about a document |
//! | `POST` | `/analyze` | Risk analysis of an uploaded PDF (multipart part `file`) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Shared secret
//!
//! When `[server].require_secret` is true (the default), `/chat` and
//! `/analyze` require the `x-internal-secret` header to equal the value of
//! the environment variable named by `[server].secret_env`. `/health` is
//! never gated.
//!
//! # Error Contract
//!
//! ```json
//! { "detail": "Could not validate credentials" }
//! ```
//!
//! 400 malformed request or unsupported upload, 403 secret mismatch, 413
//! upload too large, 500 extraction, retrieval or model failure. An
//! unparseable analysis is not an error: it is returned with a 200 as
//! `{"error": "Failed to parse analysis", "raw_content": "..."}`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::Context;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Request, State,
    },
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, ServerConfig};
use crate::counsel::Counsel;
use crate::db;
use crate::document::{self, DocumentKind, ExtractError};
use crate::embedding;
use crate::llm;
use crate::models::ChatRequest;
use crate::retrieval::SqliteRetriever;

/// Header carrying the shared secret.
pub const SECRET_HEADER: &str = "x-internal-secret";

const INVALID_CREDENTIALS: &str = "Could not validate credentials";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    counsel: Arc<Counsel>,
    secret: Option<Arc<SecretGate>>,
    upload_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(counsel: Arc<Counsel>, secret: Option<String>, upload_dir: PathBuf) -> Self {
        Self {
            counsel,
            secret: secret.map(|s| Arc::new(SecretGate::new(&s))),
            upload_dir: Arc::new(upload_dir),
        }
    }
}

/// Starts the HTTP service.
///
/// Fails before binding if the shared secret is required but unset, or if
/// any handle cannot be built.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    // Resolve the secret first so a misconfigured deployment fails fast.
    config.server.resolve_secret()?;
    let counsel = build_counsel(config).await?;
    run_server_with(config, counsel).await
}

/// Composition root: the SQLite pool, embedding provider, retriever and
/// chat model are built once here and shared by every request.
pub async fn build_counsel(config: &Config) -> anyhow::Result<Arc<Counsel>> {
    let pool = db::connect(&config.db).await?;
    let provider = embedding::create_provider(&config.embedding)
        .context("Failed to create embedding provider")?;
    let retriever = Arc::new(SqliteRetriever::new(
        pool,
        provider,
        config.retrieval.top_k,
    ));
    let model = llm::create_chat_model(&config.llm).context("Failed to create chat model")?;

    Ok(Arc::new(Counsel::new(
        retriever,
        model,
        config.retrieval.query_prefix_chars,
    )))
}

/// Starts the HTTP service around an already-built [`Counsel`].
pub async fn run_server_with(config: &Config, counsel: Arc<Counsel>) -> anyhow::Result<()> {
    let secret = config.server.resolve_secret()?;
    let upload_dir = document::upload_dir(config.server.upload_dir.as_deref());
    let gated = secret.is_some();

    let state = AppState::new(counsel, secret, upload_dir);
    let app = router(state, &config.server);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!(bind = %bind_addr, secret_required = gated, "server listening");
    println!("Vakil server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router with every route, the secret gate, the body limit and CORS.
pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/analyze", post(handle_analyze))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_secret,
        ))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                detail: self.message,
            }),
        )
            .into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn forbidden() -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        message: INVALID_CREDENTIALS.to_string(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
}

fn upstream_error(err: anyhow::Error) -> AppError {
    let message = format!("{:#}", err);
    tracing::error!(error = %message, "request failed");
    internal(message)
}

fn extract_error(err: ExtractError) -> AppError {
    if err.is_client_error() {
        bad_request(err.to_string())
    } else {
        tracing::error!(error = %err, "document extraction failed");
        internal(err.to_string())
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    let status = err.status();
    let message = err.body_text();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError { status, message }
    } else {
        bad_request(message)
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    let status = rejection.status();
    let message = rejection.body_text();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError { status, message }
    } else {
        bad_request(message)
    }
}

// ============ Secret gate ============

type HmacSha256 = Hmac<Sha256>;

const GATE_LABEL: &[u8] = b"vakil-internal-secret";

/// Holds an HMAC tag of the expected secret. A candidate is checked by
/// recomputing the tag under its own bytes and comparing in constant time.
pub struct SecretGate {
    tag: Vec<u8>,
}

impl SecretGate {
    pub fn new(secret: &str) -> Self {
        Self {
            tag: gate_tag(secret.as_bytes()).unwrap_or_default(),
        }
    }

    pub fn matches(&self, candidate: &[u8]) -> bool {
        match HmacSha256::new_from_slice(candidate) {
            Ok(mut mac) => {
                mac.update(GATE_LABEL);
                !self.tag.is_empty() && mac.verify_slice(&self.tag).is_ok()
            }
            Err(_) => false,
        }
    }
}

fn gate_tag(key: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(GATE_LABEL);
    Some(mac.finalize().into_bytes().to_vec())
}

async fn require_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(gate) = state.secret.as_deref() {
        let provided = request
            .headers()
            .get(SECRET_HEADER)
            .map(|v| v.as_bytes());
        if !provided.is_some_and(|p| gate.matches(p)) {
            tracing::warn!(path = %request.uri().path(), "rejected request with invalid secret");
            return Err(forbidden());
        }
    }
    Ok(next.run(request).await)
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

// ============ POST /chat ============

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload.map_err(json_rejection)?;

    let answer = state
        .counsel
        .chat(&request)
        .await
        .map_err(upstream_error)?;

    Ok(Json(ChatResponse { answer }))
}

// ============ POST /analyze ============

struct Upload {
    filename: Option<String>,
    content_type: Option<String>,
    bytes: axum::body::Bytes,
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Upload {
            filename,
            content_type,
            bytes,
        });
    }
    Err(bad_request("missing multipart field: file"))
}

async fn handle_analyze(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut multipart = multipart.map_err(|e| bad_request(e.body_text()))?;
    let upload = read_upload(&mut multipart).await?;

    let kind = DocumentKind::detect(upload.content_type.as_deref(), upload.filename.as_deref())
        .map_err(extract_error)?;

    tracing::debug!(
        filename = upload.filename.as_deref().unwrap_or(""),
        bytes = upload.bytes.len(),
        ?kind,
        "analysis upload received"
    );

    let dir = Arc::clone(&state.upload_dir);
    let bytes = upload.bytes;
    let full_text = tokio::task::spawn_blocking(move || document::extract_upload(&dir, kind, &bytes))
        .await
        .map_err(|e| internal(format!("extraction task failed: {}", e)))?
        .map_err(extract_error)?;

    let outcome = state
        .counsel
        .analyze(&full_text)
        .await
        .map_err(upstream_error)?;

    Ok(Json(outcome.into_value()))
}
