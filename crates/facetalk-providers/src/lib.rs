//! Capability client abstraction.
//!
//! Each external AI capability — transcription, response generation, speech
//! synthesis, avatar rendering — sits behind one trait with exactly one live
//! provider and one null fallback variant. The variant is chosen at
//! construction time from the available credentials, so business logic never
//! branches on "is this configured".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use facetalk_core::types::{AvatarVariant, Turn, Voice};
use facetalk_core::Result;

pub mod did;
pub mod null;
pub mod openai;

/// Health of one capability, as reported by the health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Unhealthy(String),
    NotConfigured,
}

impl Health {
    /// Probe-endpoint string form: `healthy|unhealthy:<reason>|not configured`.
    pub fn describe(&self) -> String {
        match self {
            Health::Healthy => "healthy".into(),
            Health::Unhealthy(reason) => format!("unhealthy: {reason}"),
            Health::NotConfigured => "not configured".into(),
        }
    }
}

/// A generated response plus the tokens it cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generated {
    pub text: String,
    pub tokens_used: u64,
}

/// Avatar render job status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
    Pending,
    Done,
    Error(String),
}

/// Speech-to-text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe raw audio bytes. `format_hint` is the container format
    /// (e.g. "webm", "wav").
    async fn transcribe(&self, audio: &[u8], format_hint: &str) -> Result<String>;

    async fn check(&self) -> Health;
}

/// Conversational response generation.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a reply to `prompt` given the recent conversation context
    /// (oldest first).
    async fn generate(&self, prompt: &str, context: &[Turn]) -> Result<Generated>;

    async fn check(&self) -> Health;
}

/// Text-to-speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: Voice) -> Result<Vec<u8>>;

    async fn check(&self) -> Health;
}

/// Talking-avatar video rendering. Rendering is a submit/poll protocol; the
/// orchestrator owns the poll loop and its wait bound.
#[async_trait]
pub trait AvatarRenderer: Send + Sync {
    /// Submit a render job for the given speech audio, returning a job id.
    async fn submit(&self, audio: &[u8], variant: AvatarVariant) -> Result<String>;

    async fn poll(&self, job_id: &str) -> Result<RenderStatus>;

    /// Retrieve the media URL of a completed job.
    async fn fetch_result(&self, job_id: &str) -> Result<String>;

    async fn check(&self) -> Health;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_describe() {
        assert_eq!(Health::Healthy.describe(), "healthy");
        assert_eq!(
            Health::Unhealthy("HTTP 500".into()).describe(),
            "unhealthy: HTTP 500"
        );
        assert_eq!(Health::NotConfigured.describe(), "not configured");
    }
}
