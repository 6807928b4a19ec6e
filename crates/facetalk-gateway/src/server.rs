//! Axum-based WebSocket + HTTP server.

use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use facetalk_core::types::{AvatarVariant, Voice};
use facetalk_pipeline::Pipeline;

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws/{user_id}", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/voices", get(voices_handler))
        .route("/api/test-text", post(test_text_handler))
        .route("/api/user/{user_id}/status", get(user_status_handler))
        .route("/api/user/{user_id}/disconnect", delete(disconnect_handler))
        .route("/api/system/info", get(system_info_handler))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway server and block until shutdown.
pub async fn start_gateway(state: Arc<GatewayState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket, user_id))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let report = state.pipeline.health().await;
    let degraded = report
        .services
        .values()
        .any(|status| status.starts_with("unhealthy"));

    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
        "active_connections": state.connections.count().await,
        "services": report.services,
        "timestamp": report.timestamp,
    }))
}

async fn stats_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let sessions = state.connections.list().await;
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0);

    Json(json!({
        "active_connections": sessions.len(),
        "connections": sessions,
        "uptime_secs": uptime_secs,
        "timestamp": chrono::Utc::now(),
    }))
}

async fn voices_handler() -> impl IntoResponse {
    Json(Pipeline::voices())
}

#[derive(Debug, Deserialize)]
struct TestTextRequest {
    text: String,
    #[serde(default = "default_test_user")]
    user_id: String,
    #[serde(default)]
    avatar_type: AvatarVariant,
    #[serde(default)]
    voice: Voice,
}

fn default_test_user() -> String {
    "test_user".to_string()
}

/// Run the text pipeline synchronously, bypassing the WebSocket — a
/// smoke-test surface for deployments.
async fn test_text_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<TestTextRequest>,
) -> impl IntoResponse {
    let text = req.text.trim();
    if text.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "text must not be empty"})),
        );
    }

    let cancel = CancellationToken::new();
    let result = state
        .pipeline
        .process_text(text, &req.user_id, req.avatar_type, req.voice, &cancel)
        .await;

    let status = if result.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(serde_json::to_value(&result).unwrap_or_default()))
}

async fn user_status_handler(
    Path(user_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    Json(json!({
        "user_id": user_id,
        "connected": state.connections.is_connected(&user_id).await,
        "history_turns": state.pipeline.conversations().len(&user_id).await,
    }))
}

async fn disconnect_handler(
    Path(user_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let disconnected = state.connections.disconnect(&user_id).await;
    let status = if disconnected {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (
        status,
        Json(json!({
            "user_id": user_id,
            "disconnected": disconnected,
        })),
    )
}

async fn system_info_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "service": "facetalk",
        "version": env!("CARGO_PKG_VERSION"),
        "active_connections": state.connections.count().await,
        "features": {
            "speech_to_text": true,
            "text_chat": true,
            "avatar_video": true,
            "voices": Voice::ALL.len(),
        },
    }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
