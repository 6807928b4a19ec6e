//! OpenAI-backed capability clients: Whisper transcription, chat-completion
//! response generation, and TTS speech synthesis.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use facetalk_core::config::OpenAiConfig;
use facetalk_core::types::{Role, Turn, Voice};
use facetalk_core::{FacetalkError, Result};

use crate::{Generated, Health, ResponseGenerator, SpeechSynthesizer, Transcriber};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TTS_MODEL: &str = "tts-1-hd";
const DEFAULT_TRANSCRIBE_MODEL: &str = "whisper-1";

/// Response length cap — avatar replies stay short for lip-sync.
const MAX_RESPONSE_TOKENS: u32 = 150;
const TEMPERATURE: f64 = 0.8;

/// Persona framing prepended to every generation call.
const SYSTEM_PROMPT: &str = "You are a friendly, helpful AI avatar assistant. \
You speak naturally and conversationally, as if you're a real person having a \
face-to-face conversation. Keep responses concise but engaging (1-3 sentences \
typically, maximum 150 words). Be expressive and use natural speech patterns \
that will work well with lip-sync technology. Avoid using markdown, bullet \
points, or structured text - speak naturally as if talking to someone. Show \
personality and emotion in your responses while remaining helpful and \
professional. Use contractions and casual language to sound more human and \
natural.";

pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    chat_model: String,
    tts_model: String,
    transcribe_model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Build a client from config. Returns None when no API key resolves,
    /// so the caller can select the null variant instead.
    pub fn from_config(config: &OpenAiConfig) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        Some(Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            chat_model: config
                .chat_model
                .clone()
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.into()),
            tts_model: config
                .tts_model
                .clone()
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.into()),
            transcribe_model: config
                .transcribe_model
                .clone()
                .unwrap_or_else(|| DEFAULT_TRANSCRIBE_MODEL.into()),
            client: reqwest::Client::new(),
        })
    }

    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            tts_model: DEFAULT_TTS_MODEL.into(),
            transcribe_model: DEFAULT_TRANSCRIBE_MODEL.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Assemble chat messages: system prompt, then context turns, then the
    /// current user prompt.
    fn build_messages(&self, prompt: &str, context: &[Turn]) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(json!({ "role": "system", "content": SYSTEM_PROMPT }));
        for turn in context {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));
        messages
    }

    async fn provider_health(&self) -> Health {
        let resp = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => Health::Healthy,
            Ok(r) => Health::Unhealthy(format!("HTTP {}", r.status())),
            Err(e) => Health::Unhealthy(e.to_string()),
        }
    }
}

// --- chat completion response types ---

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio: &[u8], format_hint: &str) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(format!("audio.{format_hint}"))
            .mime_str(&format!("audio/{format_hint}"))
            .map_err(|e| FacetalkError::Provider(format!("invalid audio mime type: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.transcribe_model.clone())
            .text("language", "en")
            .part("file", part);

        debug!(model = %self.transcribe_model, bytes = audio.len(), "Transcribing audio");

        let resp = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| FacetalkError::Provider(format!("transcription request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FacetalkError::Provider(format!(
                "transcription API error {status}: {body}"
            )));
        }

        let body: TranscriptionResponse = resp
            .json()
            .await
            .map_err(|e| FacetalkError::Provider(format!("malformed transcription body: {e}")))?;
        Ok(body.text.trim().to_string())
    }

    async fn check(&self) -> Health {
        self.provider_health().await
    }
}

#[async_trait]
impl ResponseGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str, context: &[Turn]) -> Result<Generated> {
        let body = json!({
            "model": self.chat_model,
            "messages": self.build_messages(prompt, context),
            "max_tokens": MAX_RESPONSE_TOKENS,
            "temperature": TEMPERATURE,
            "stream": false,
        });

        debug!(model = %self.chat_model, context_turns = context.len(), "Generating response");

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| FacetalkError::Provider(format!("generation request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FacetalkError::Provider(format!(
                "generation API error {status}: {body}"
            )));
        }

        let body: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| FacetalkError::Provider(format!("malformed completion body: {e}")))?;

        let text = body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FacetalkError::Provider("completion had no content".into()))?;

        Ok(Generated {
            text,
            tokens_used: body.usage.unwrap_or_default().total_tokens,
        })
    }

    async fn check(&self) -> Health {
        self.provider_health().await
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiClient {
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>> {
        let body = json!({
            "model": self.tts_model,
            "voice": voice.as_str(),
            "input": text,
            "response_format": "wav",
        });

        debug!(model = %self.tts_model, voice = voice.as_str(), chars = text.len(), "Synthesizing speech");

        let resp = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| FacetalkError::Provider(format!("synthesis request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FacetalkError::Provider(format!(
                "synthesis API error {status}: {body}"
            )));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| FacetalkError::Provider(format!("synthesis body read failed: {e}")))?;
        Ok(audio.to_vec())
    }

    async fn check(&self) -> Health {
        self.provider_health().await
    }
}
