//! D-ID-compatible talking-avatar renderer.
//!
//! Rendering is asynchronous on the provider side: the speech audio is
//! uploaded as a clip, a talk job is created against a per-variant source
//! image, and the job is then polled until it reports `done` or `error`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use facetalk_core::config::RenderConfig;
use facetalk_core::types::AvatarVariant;
use facetalk_core::{FacetalkError, Result};

use crate::{AvatarRenderer, Health, RenderStatus};

const DID_BASE_URL: &str = "https://api.d-id.com";

/// Per-request ceiling so a stalled provider response cannot hold a
/// connection open; the pipeline's stage and render-wait bounds still
/// apply on top of it.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

fn source_url(variant: AvatarVariant) -> &'static str {
    match variant {
        AvatarVariant::Male => {
            "https://create-images-results.d-id.com/DefaultAvatar/male_avatar.jpg"
        }
        AvatarVariant::Female => {
            "https://create-images-results.d-id.com/DefaultAvatar/female_avatar.jpg"
        }
    }
}

pub struct DidRenderer {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl DidRenderer {
    /// Build a renderer from config. Returns None when no API key resolves,
    /// so the caller can select [`crate::null::NullRenderer`] instead.
    pub fn from_config(config: &RenderConfig) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        Some(Self::new(api_key, config.base_url.as_deref()))
    }

    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DID_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Basic {}", self.api_key)
    }

    /// Upload speech audio, returning the provider-hosted audio URL.
    async fn upload_audio(&self, audio: &[u8]) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| FacetalkError::Provider(format!("invalid audio part: {e}")))?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        let resp = self
            .client
            .post(format!("{}/clips", self.base_url))
            .header("authorization", self.auth_header())
            .multipart(form)
            .send()
            .await
            .map_err(|e| FacetalkError::Provider(format!("audio upload failed: {e}")))?;

        if resp.status() != reqwest::StatusCode::CREATED {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FacetalkError::Provider(format!(
                "audio upload error {status}: {body}"
            )));
        }

        let body: ClipResponse = resp
            .json()
            .await
            .map_err(|e| FacetalkError::Provider(format!("malformed clip body: {e}")))?;
        debug!(url = %body.url, "Audio uploaded to renderer");
        Ok(body.url)
    }
}

#[derive(Debug, Deserialize)]
struct ClipResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TalkCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TalkStatus {
    status: String,
    #[serde(default)]
    result_url: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[async_trait]
impl AvatarRenderer for DidRenderer {
    async fn submit(&self, audio: &[u8], variant: AvatarVariant) -> Result<String> {
        let audio_url = self.upload_audio(audio).await?;

        let payload = json!({
            "source_url": source_url(variant),
            "script": {
                "type": "audio",
                "audio_url": audio_url,
            },
            "config": {
                "stitch": true,
                "fluent": true,
                "pad_audio": 0.0,
            },
        });

        let resp = self
            .client
            .post(format!("{}/talks", self.base_url))
            .header("authorization", self.auth_header())
            .json(&payload)
            .send()
            .await
            .map_err(|e| FacetalkError::Provider(format!("render submit failed: {e}")))?;

        if resp.status() != reqwest::StatusCode::CREATED {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FacetalkError::Provider(format!(
                "render submit error {status}: {body}"
            )));
        }

        let body: TalkCreated = resp
            .json()
            .await
            .map_err(|e| FacetalkError::Provider(format!("malformed talk body: {e}")))?;
        info!(job_id = %body.id, variant = variant.as_str(), "Render job submitted");
        Ok(body.id)
    }

    async fn poll(&self, job_id: &str) -> Result<RenderStatus> {
        let resp = self
            .client
            .get(format!("{}/talks/{job_id}", self.base_url))
            .header("authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| FacetalkError::Provider(format!("render poll failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(FacetalkError::Provider(format!(
                "render status check failed: HTTP {}",
                resp.status()
            )));
        }

        let body: TalkStatus = resp
            .json()
            .await
            .map_err(|e| FacetalkError::Provider(format!("malformed status body: {e}")))?;

        debug!(job_id, status = %body.status, "Render job status");

        match body.status.as_str() {
            "done" => Ok(RenderStatus::Done),
            "error" => Ok(RenderStatus::Error(
                body.error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown render error".into()),
            )),
            _ => Ok(RenderStatus::Pending),
        }
    }

    async fn fetch_result(&self, job_id: &str) -> Result<String> {
        let resp = self
            .client
            .get(format!("{}/talks/{job_id}", self.base_url))
            .header("authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| FacetalkError::Provider(format!("render result fetch failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(FacetalkError::Provider(format!(
                "render result fetch failed: HTTP {}",
                resp.status()
            )));
        }

        let body: TalkStatus = resp
            .json()
            .await
            .map_err(|e| FacetalkError::Provider(format!("malformed status body: {e}")))?;

        body.result_url
            .ok_or_else(|| FacetalkError::Provider("completed job had no result_url".into()))
    }

    async fn check(&self) -> Health {
        let resp = self
            .client
            .get(format!("{}/talks", self.base_url))
            .header("authorization", self.auth_header())
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await;
        match resp {
            // 401 still proves the endpoint is reachable.
            Ok(r) if r.status().is_success() || r.status() == reqwest::StatusCode::UNAUTHORIZED => {
                Health::Healthy
            }
            Ok(r) => Health::Unhealthy(format!("HTTP {}", r.status())),
            Err(e) => Health::Unhealthy(e.to_string()),
        }
    }
}
