//! HTTP surface: metadata, terminal state, and the `/ws2` upgrade.

use crate::session;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use pipeplot_core::{Broadcaster, Metadata};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler and session.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide fan-out.
    pub broadcaster: Arc<Broadcaster>,
    /// The one-per-process metadata object.
    pub metadata: Arc<Metadata>,
    /// Per-series flush interval for sessions.
    pub flush_interval: Duration,
    /// Per-series batch capacity for sessions (the effective window).
    pub batch_capacity: usize,
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metadata", get(metadata_handler))
        .route("/errors", get(errors_handler))
        .route("/ws2", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Legacy JSON endpoint mirroring the metadata frame.
async fn metadata_handler(State(state): State<AppState>) -> Json<Metadata> {
    Json((*state.metadata).clone())
}

/// Body of `GET /errors`. Field names are wire contract.
#[derive(Debug, Serialize)]
pub struct ErrorStatus {
    /// Whether the ingest has terminated (cleanly or not).
    #[serde(rename = "StreamEnded")]
    pub stream_ended: bool,
    /// Failure text; empty while live and on clean EOF.
    #[serde(rename = "StreamError")]
    pub stream_error: String,
}

async fn errors_handler(State(state): State<AppState>) -> Json<ErrorStatus> {
    let status = match state.broadcaster.terminal_state() {
        Some(terminal) => ErrorStatus {
            stream_ended: true,
            stream_error: terminal.message,
        },
        None => ErrorStatus {
            stream_ended: false,
            stream_error: String::new(),
        },
    };
    Json(status)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| session::serve_socket(socket, state))
}
