//! Gateway integration tests — start a real gateway and interact via WS + HTTP.
//!
//! Run with: `cargo test -p facetalk-gateway --test integration`

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use facetalk_core::types::{Turn, Voice};
use facetalk_core::Result;
use facetalk_pipeline::cache::NullCache;
use facetalk_pipeline::PipelineBuilder;
use facetalk_providers::null::{NullGenerator, NullRenderer, NullSynthesizer, NullTranscriber};
use facetalk_providers::{Generated, Health, ResponseGenerator, SpeechSynthesizer, Transcriber};

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct EchoTranscriber;

#[async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(&self, _audio: &[u8], _format_hint: &str) -> Result<String> {
        Ok("spoken words".into())
    }

    async fn check(&self) -> Health {
        Health::Healthy
    }
}

struct EchoGenerator;

#[async_trait]
impl ResponseGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str, _context: &[Turn]) -> Result<Generated> {
        Ok(Generated {
            text: format!("echo: {prompt}"),
            tokens_used: 3,
        })
    }

    async fn check(&self) -> Health {
        Health::Healthy
    }
}

struct SilentSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn synthesize(&self, _text: &str, _voice: Voice) -> Result<Vec<u8>> {
        Ok(vec![0u8; 32])
    }

    async fn check(&self) -> Health {
        Health::Healthy
    }
}

/// Gateway backed by stub speech/chat providers and the placeholder renderer.
async fn start_stub_gateway() -> (Arc<facetalk_gateway::GatewayState>, u16) {
    let pipeline = PipelineBuilder::new(
        Arc::new(EchoTranscriber),
        Arc::new(EchoGenerator),
        Arc::new(SilentSynthesizer),
        Arc::new(NullRenderer),
        Arc::new(NullCache),
    )
    .build();

    start_gateway_with(pipeline).await
}

/// Gateway with nothing configured — every pipeline run fails.
async fn start_unconfigured_gateway() -> (Arc<facetalk_gateway::GatewayState>, u16) {
    let pipeline = PipelineBuilder::new(
        Arc::new(NullTranscriber),
        Arc::new(NullGenerator),
        Arc::new(NullSynthesizer),
        Arc::new(NullRenderer),
        Arc::new(NullCache),
    )
    .build();

    start_gateway_with(pipeline).await
}

async fn start_gateway_with(
    pipeline: facetalk_pipeline::Pipeline,
) -> (Arc<facetalk_gateway::GatewayState>, u16) {
    let port = find_free_port();
    let state = Arc::new(facetalk_gateway::GatewayState::new(Arc::new(pipeline)));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = facetalk_gateway::start_gateway(state_clone, "127.0.0.1", port).await;
    });

    // Wait for the gateway to be ready
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (state, port)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_state, port) = start_stub_gateway().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["services"]["generation"], "healthy");
    assert_eq!(body["services"]["media_cache"], "not configured");
}

#[tokio::test]
async fn test_voices_endpoint() {
    let (_state, port) = start_stub_gateway().await;

    let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/voices"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["openai_voices"].as_array().unwrap().len(), 6);
    assert_eq!(body["avatar_types"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_system_info_endpoint() {
    let (_state, port) = start_stub_gateway().await;

    let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/api/system/info"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["service"], "facetalk");
    assert_eq!(body["features"]["avatar_video"], true);
}

#[tokio::test]
async fn test_ws_welcome_and_ping() {
    let (_state, port) = start_stub_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/alice");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");

    let msg = ws.next().await.unwrap().unwrap();
    let welcome: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(welcome["type"], "system");
    assert_eq!(welcome["user_id"], "alice");

    ws.send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();
    let msg = ws.next().await.unwrap().unwrap();
    let pong: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(pong["type"], "pong");

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_ws_text_input_round_trip() {
    let (_state, port) = start_stub_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/bob");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");

    // Skip welcome
    let _ = ws.next().await;

    let req = json!({"type": "text_input", "text": "hello there"});
    ws.send(Message::Text(req.to_string().into())).await.unwrap();

    let msg = ws.next().await.unwrap().unwrap();
    let processing: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(processing["type"], "processing");

    let msg = ws.next().await.unwrap().unwrap();
    let resp: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(resp["type"], "text_response");
    assert_eq!(resp["user_input"], "hello there");
    assert_eq!(resp["text"], "echo: hello there");
    assert_eq!(resp["tokens_used"], 3);
    assert!(resp["avatar_video_url"].as_str().unwrap().starts_with("http"));

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_ws_audio_input_round_trip() {
    let (_state, port) = start_stub_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/carol");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");

    // Skip welcome
    let _ = ws.next().await;

    // "hello" in base64
    let req = json!({"type": "audio_input", "audio_data": "aGVsbG8=", "voice": "nova"});
    ws.send(Message::Text(req.to_string().into())).await.unwrap();

    // Skip processing
    let _ = ws.next().await;

    let msg = ws.next().await.unwrap().unwrap();
    let resp: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(resp["type"], "audio_response");
    assert_eq!(resp["transcribed_text"], "spoken words");
    assert_eq!(resp["llm_response"], "echo: spoken words");

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_ws_malformed_message_yields_error() {
    let (_state, port) = start_stub_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/dave");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");

    // Skip welcome
    let _ = ws.next().await;

    ws.send(Message::Text(
        json!({"type": "video_input"}).to_string().into(),
    ))
    .await
    .unwrap();

    let msg = ws.next().await.unwrap().unwrap();
    let resp: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(resp["type"], "error");

    // The session survives a bad message.
    ws.send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();
    let msg = ws.next().await.unwrap().unwrap();
    let pong: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(pong["type"], "pong");

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_ws_empty_text_rejected_without_pipeline_run() {
    let (state, port) = start_stub_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/judy");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");
    let _ = ws.next().await;

    ws.send(Message::Text(
        json!({"type": "text_input", "text": "   "}).to_string().into(),
    ))
    .await
    .unwrap();

    let msg = ws.next().await.unwrap().unwrap();
    let resp: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(resp["type"], "error");

    // No pipeline stage ran, so no history was written.
    assert_eq!(state.pipeline.conversations().len("judy").await, 0);

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_ws_unconfigured_pipeline_reports_error() {
    let (_state, port) = start_unconfigured_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/erin");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");

    // Skip welcome
    let _ = ws.next().await;

    let req = json!({"type": "text_input", "text": "anyone home?"});
    ws.send(Message::Text(req.to_string().into())).await.unwrap();

    // Skip processing
    let _ = ws.next().await;

    let msg = ws.next().await.unwrap().unwrap();
    let resp: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(resp["type"], "error");
    assert!(resp["message"]
        .as_str()
        .unwrap()
        .contains("not configured"));

    ws.close(None).await.ok();
}

#[tokio::test]
async fn test_user_status_and_stats() {
    let (_state, port) = start_stub_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/frank");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");
    let _ = ws.next().await;

    let status: serde_json::Value =
        reqwest::get(format!("http://127.0.0.1:{port}/api/user/frank/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(status["connected"], true);
    assert_eq!(status["history_turns"], 0);

    let stats: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["active_connections"], 1);
    assert_eq!(stats["connections"][0]["user_id"], "frank");

    ws.close(None).await.ok();

    // After close the status flips back.
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let status: serde_json::Value =
            reqwest::get(format!("http://127.0.0.1:{port}/api/user/frank/status"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        if status["connected"] == false {
            return;
        }
    }
    panic!("session never unregistered after close");
}

#[tokio::test]
async fn test_admin_disconnect_closes_session() {
    let (_state, port) = start_stub_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/grace");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");
    let _ = ws.next().await;

    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("http://127.0.0.1:{port}/api/user/grace/disconnect"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["disconnected"], true);

    // The server tears the socket down.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) => break,
            Err(_) => panic!("socket not closed after admin disconnect"),
        }
    }

    // Disconnecting a user with no session is a 404.
    let resp = client
        .delete(format!("http://127.0.0.1:{port}/api/user/nobody/disconnect"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_second_connection_replaces_first() {
    let (_state, port) = start_stub_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/heidi");
    let (mut first, _) = connect_async(&url).await.expect("WS connect failed");
    let _ = first.next().await;

    let (mut second, _) = connect_async(&url).await.expect("WS connect failed");
    let _ = second.next().await;

    // Only one session registered for the user.
    let stats: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["active_connections"], 1);

    // The new session works.
    second
        .send(Message::Text(json!({"type": "ping"}).to_string().into()))
        .await
        .unwrap();
    let msg = second.next().await.unwrap().unwrap();
    let pong: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(pong["type"], "pong");

    second.close(None).await.ok();
}

#[tokio::test]
async fn test_test_text_endpoint() {
    let (_state, port) = start_stub_gateway().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{port}/api/test-text"))
        .json(&json!({"text": "smoke test"}))
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["response_text"], "echo: smoke test");

    // Empty text is rejected up front.
    let resp = client
        .post(format!("http://127.0.0.1:{port}/api/test-text"))
        .json(&json!({"text": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_conversation_memory_across_messages() {
    let (state, port) = start_stub_gateway().await;

    let url = format!("ws://127.0.0.1:{port}/ws/ivan");
    let (mut ws, _) = connect_async(&url).await.expect("WS connect failed");
    let _ = ws.next().await;

    for text in ["first", "second"] {
        ws.send(Message::Text(
            json!({"type": "text_input", "text": text}).to_string().into(),
        ))
        .await
        .unwrap();
        let _ = ws.next().await; // processing
        let _ = ws.next().await; // response
    }

    assert_eq!(state.pipeline.conversations().len("ivan").await, 4);

    ws.close(None).await.ok();
}
