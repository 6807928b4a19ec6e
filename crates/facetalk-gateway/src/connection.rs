//! WebSocket connection lifecycle — handshake, read/write loops, dispatch.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use facetalk_core::protocol::{ClientEnvelope, ServerEnvelope};
use facetalk_core::types::PipelineResult;
use facetalk_core::{FacetalkError, Result};

use crate::state::{GatewayState, SessionHandle};

/// Decode a base64 audio payload, tolerating a data-URL prefix.
fn decode_audio_payload(audio_data: &str) -> Result<Vec<u8>> {
    let raw = match audio_data.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => audio_data,
    };
    base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(|e| FacetalkError::MalformedInput(format!("invalid base64 audio data: {e}")))
}

/// Handle a new WebSocket connection for `user_id`.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket, user_id: String) {
    info!(user_id, "New WebSocket connection");

    let (mut ws_tx, mut ws_rx) = ws.split();

    // Outbound channel for this connection; a dedicated task drains it so
    // HTTP handlers can push to the session too.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();
    let cancel = CancellationToken::new();

    let displaced = state
        .connections
        .register(&user_id, SessionHandle::new(event_tx.clone(), cancel.clone()))
        .await;
    if let Some(old) = displaced {
        old.cancel.cancel();
    }

    let welcome = ServerEnvelope::System {
        message: "Connected to avatar chat".into(),
        user_id: user_id.clone(),
        timestamp: Utc::now(),
    };
    if let Ok(json) = serde_json::to_string(&welcome) {
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            state.connections.unregister(&user_id, &event_tx).await;
            return;
        }
    }

    let send_task = tokio::spawn(async move {
        while let Some(msg) = event_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Main read loop. Messages are handled one at a time, so a user's
    // exchanges stay in order.
    loop {
        let msg_result = tokio::select! {
            _ = cancel.cancelled() => {
                info!(user_id, "Session cancelled");
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        match msg_result {
            Ok(Message::Text(text)) => {
                state.connections.touch(&user_id).await;
                match serde_json::from_str::<ClientEnvelope>(&text) {
                    Ok(envelope) => {
                        dispatch_envelope(&state, &user_id, envelope, &cancel).await;
                    }
                    Err(e) => {
                        warn!(user_id, %e, "Malformed client message");
                        state
                            .connections
                            .send(
                                &user_id,
                                &ServerEnvelope::error(format!("unrecognized message: {e}")),
                            )
                            .await;
                    }
                }
            }
            Ok(Message::Ping(_)) => {
                // Axum answers transport pings itself.
            }
            Ok(Message::Close(_)) => {
                debug!(user_id, "Client requested close");
                break;
            }
            Err(e) => {
                error!(user_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    cancel.cancel();
    state.connections.unregister(&user_id, &event_tx).await;
    info!(user_id, "WebSocket connection closed");
}

/// Route one typed message. Responses go through the connection manager, so
/// a result arriving after the session is gone is silently discarded.
async fn dispatch_envelope(
    state: &Arc<GatewayState>,
    user_id: &str,
    envelope: ClientEnvelope,
    cancel: &CancellationToken,
) {
    let connections = &state.connections;
    match envelope {
        ClientEnvelope::Ping => {
            connections.send(user_id, &ServerEnvelope::pong()).await;
        }
        ClientEnvelope::TextInput {
            text,
            avatar_type,
            voice,
        } => {
            let text = text.trim().to_string();
            if text.is_empty() {
                connections
                    .send(user_id, &ServerEnvelope::error("empty text input"))
                    .await;
                return;
            }
            connections
                .send(
                    user_id,
                    &ServerEnvelope::processing("Generating avatar response..."),
                )
                .await;

            let result = state
                .pipeline
                .process_text(&text, user_id, avatar_type, voice, cancel)
                .await;
            connections
                .send(user_id, &text_result_envelope(&text, result))
                .await;
        }
        ClientEnvelope::AudioInput {
            audio_data,
            avatar_type,
            voice,
        } => {
            let audio = match decode_audio_payload(&audio_data) {
                Ok(bytes) if !bytes.is_empty() => bytes,
                Ok(_) => {
                    connections
                        .send(user_id, &ServerEnvelope::error("empty audio payload"))
                        .await;
                    return;
                }
                Err(e) => {
                    connections
                        .send(user_id, &ServerEnvelope::error(e.to_string()))
                        .await;
                    return;
                }
            };
            connections
                .send(
                    user_id,
                    &ServerEnvelope::processing("Processing your voice message..."),
                )
                .await;

            let result = state
                .pipeline
                .process_audio(&audio, user_id, avatar_type, voice, cancel)
                .await;
            connections.send(user_id, &audio_result_envelope(result)).await;
        }
    }
}

fn text_result_envelope(user_input: &str, result: PipelineResult) -> ServerEnvelope {
    match result {
        PipelineResult::Success {
            response_text,
            avatar_video_url,
            tokens_used,
            completed_at,
            ..
        } => ServerEnvelope::TextResponse {
            user_input: user_input.to_string(),
            text: response_text,
            avatar_video_url,
            tokens_used,
            timestamp: completed_at,
        },
        PipelineResult::Failure { message, timestamp } => {
            ServerEnvelope::Error { message, timestamp }
        }
    }
}

fn audio_result_envelope(result: PipelineResult) -> ServerEnvelope {
    match result {
        PipelineResult::Success {
            transcribed_text,
            response_text,
            avatar_video_url,
            tokens_used,
            completed_at,
        } => ServerEnvelope::AudioResponse {
            transcribed_text: transcribed_text.unwrap_or_default(),
            llm_response: response_text,
            avatar_video_url,
            tokens_used,
            timestamp: completed_at,
        },
        PipelineResult::Failure { message, timestamp } => {
            ServerEnvelope::Error { message, timestamp }
        }
    }
}
