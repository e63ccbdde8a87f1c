//! SecondBrain HTTP API
//!
//! Each endpoint has a thin axum handler that delegates to an inner function.
//! The inner functions are directly testable without axum dispatch.
//!
//! Endpoints:
//! - POST /api/chat: answer a conversation as a data stream
//! - GET /health: health check with knowledge store status
//! - GET /version: server version info

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{self, HeaderName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use secondbrain_core::models::ChatMessage;
use secondbrain_core::KnowledgeStore;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::chat::run_chat;
use crate::state::AppState;
use crate::stream::{StreamPart, STREAM_HEADER, STREAM_VERSION};

/// Parts buffered between the orchestrator and the response body.
const STREAM_BUFFER: usize = 64;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("SecondBrain HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Validate the conversation and start answering it in the background.
///
/// The returned receiver yields stream parts until the orchestrator is done.
pub fn chat_inner(
    state: &AppState,
    req: ChatRequest,
) -> std::result::Result<mpsc::Receiver<StreamPart>, (StatusCode, Value)> {
    if req.messages.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            json!({
                "error": "messages must not be empty",
                "status": "error",
            }),
        ));
    }

    tracing::info!(messages = req.messages.len(), "Chat request received");

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(run_chat(state.clone(), req.messages, tx));
    Ok(rx)
}

/// Inner health check: asks the knowledge store for its status.
pub async fn health_inner(store: &dyn KnowledgeStore) -> (StatusCode, Value) {
    match store.health_check().await {
        Ok(status) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": status,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, store = store.name(), "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "status": "unhealthy",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": e.to_string(),
                }),
            )
        }
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "secondbrain/1",
    })
}

/// Wrap a part receiver into a chunked data-stream response.
pub fn stream_response(rx: mpsc::Receiver<StreamPart>) -> Response {
    let body = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|part| (Ok::<_, Infallible>(Bytes::from(part.encode())), rx))
    });

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (HeaderName::from_static(STREAM_HEADER), STREAM_VERSION),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    match chat_inner(&state, req) {
        Ok(rx) => stream_response(rx),
        Err((status, body)) => (status, Json(body)).into_response(),
    }
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}
