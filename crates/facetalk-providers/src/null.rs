//! Null capability variants, selected at construction when a provider's
//! credentials are missing. Transcription, generation, and synthesis refuse
//! with a configuration message; rendering completes immediately with a
//! clearly marked placeholder so the rest of the system stays exercisable
//! without live credentials.

use async_trait::async_trait;

use facetalk_core::types::{AvatarVariant, Turn, Voice};
use facetalk_core::{FacetalkError, Result};

use crate::{
    AvatarRenderer, Generated, Health, RenderStatus, ResponseGenerator, SpeechSynthesizer,
    Transcriber,
};

/// Placeholder video returned by [`NullRenderer`].
pub const PLACEHOLDER_VIDEO_URL: &str =
    "https://sample-videos.com/zip/10/mp4/SampleVideo_1280x720_1mb.mp4";

const MOCK_JOB_PREFIX: &str = "mock_";

pub struct NullTranscriber;

#[async_trait]
impl Transcriber for NullTranscriber {
    async fn transcribe(&self, _audio: &[u8], _format_hint: &str) -> Result<String> {
        Err(FacetalkError::Provider(
            "transcription not configured: set openai.api_key".into(),
        ))
    }

    async fn check(&self) -> Health {
        Health::NotConfigured
    }
}

pub struct NullGenerator;

#[async_trait]
impl ResponseGenerator for NullGenerator {
    async fn generate(&self, _prompt: &str, _context: &[Turn]) -> Result<Generated> {
        Err(FacetalkError::Provider(
            "response generation not configured: set openai.api_key".into(),
        ))
    }

    async fn check(&self) -> Health {
        Health::NotConfigured
    }
}

pub struct NullSynthesizer;

#[async_trait]
impl SpeechSynthesizer for NullSynthesizer {
    async fn synthesize(&self, _text: &str, _voice: Voice) -> Result<Vec<u8>> {
        Err(FacetalkError::Provider(
            "speech synthesis not configured: set openai.api_key".into(),
        ))
    }

    async fn check(&self) -> Health {
        Health::NotConfigured
    }
}

/// Renderer stand-in for deployments without rendering credentials. Jobs
/// complete immediately and resolve to [`PLACEHOLDER_VIDEO_URL`].
pub struct NullRenderer;

#[async_trait]
impl AvatarRenderer for NullRenderer {
    async fn submit(&self, _audio: &[u8], variant: AvatarVariant) -> Result<String> {
        Ok(format!(
            "{MOCK_JOB_PREFIX}{}_{}",
            variant.as_str(),
            uuid::Uuid::new_v4().simple()
        ))
    }

    async fn poll(&self, _job_id: &str) -> Result<RenderStatus> {
        Ok(RenderStatus::Done)
    }

    async fn fetch_result(&self, _job_id: &str) -> Result<String> {
        Ok(PLACEHOLDER_VIDEO_URL.to_string())
    }

    async fn check(&self) -> Health {
        Health::NotConfigured
    }
}
