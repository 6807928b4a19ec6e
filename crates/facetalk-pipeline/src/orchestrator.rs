//! The pipeline orchestrator.
//!
//! Sequences transcription → response generation → speech synthesis →
//! avatar rendering, consulting the conversation store between stages and
//! finishing with a best-effort media-cache write-through. Every external
//! stage carries its own timeout; any stage failure short-circuits the rest
//! and surfaces as a single `Failure` result.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use facetalk_core::config::TimeoutConfig;
use facetalk_core::conversation::ConversationStore;
use facetalk_core::types::{AvatarVariant, MediaLocator, PipelineResult, Voice};
use facetalk_core::{FacetalkError, Result};
use facetalk_providers::{
    AvatarRenderer, RenderStatus, ResponseGenerator, SpeechSynthesizer, Transcriber,
};

use crate::cache::MediaCache;
use crate::queue::{RenderJob, RenderQueue};

/// Synthesis providers reject very long inputs; text beyond this is cut and
/// marked.
pub const TTS_MAX_CHARS: usize = 4000;
const TRUNCATION_MARKER: &str = "...";

/// Per-stage timeout budgets.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    /// Applied independently to transcription, generation, synthesis, and
    /// render submission.
    pub stage: Duration,
    /// Total bound on the render poll loop.
    pub render_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            stage: Duration::from_secs(30),
            render_wait: Duration::from_secs(120),
            poll_interval: Duration::from_secs(3),
        }
    }
}

impl From<&TimeoutConfig> for StageTimeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            stage: Duration::from_secs(config.stage_secs),
            render_wait: Duration::from_secs(config.render_wait_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }
}

/// Aggregated capability health, served by the health probe.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub services: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

pub struct Pipeline {
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ResponseGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    renderer: Arc<dyn AvatarRenderer>,
    cache: Arc<dyn MediaCache>,
    queue: Option<Arc<dyn RenderQueue>>,
    conversations: ConversationStore,
    timeouts: StageTimeouts,
    http: reqwest::Client,
}

pub struct PipelineBuilder {
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ResponseGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    renderer: Arc<dyn AvatarRenderer>,
    cache: Arc<dyn MediaCache>,
    queue: Option<Arc<dyn RenderQueue>>,
    timeouts: StageTimeouts,
}

impl PipelineBuilder {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn ResponseGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        renderer: Arc<dyn AvatarRenderer>,
        cache: Arc<dyn MediaCache>,
    ) -> Self {
        Self {
            transcriber,
            generator,
            synthesizer,
            renderer,
            cache,
            queue: None,
            timeouts: StageTimeouts::default(),
        }
    }

    pub fn timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn queue(mut self, queue: Arc<dyn RenderQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            transcriber: self.transcriber,
            generator: self.generator,
            synthesizer: self.synthesizer,
            renderer: self.renderer,
            cache: self.cache,
            queue: self.queue,
            conversations: ConversationStore::new(),
            timeouts: self.timeouts,
            http: reqwest::Client::new(),
        }
    }
}

/// Cut text to the synthesis ceiling, appending a marker when cut.
pub fn truncate_for_tts(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= TTS_MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(TTS_MAX_CHARS).collect();
    format!("{cut}{TRUNCATION_MARKER}")
}

/// Run one render job to completion: submit, then poll at a fixed interval
/// until done, error, wait-bound exceeded, or the caller goes away.
///
/// The wait bound wraps the whole poll phase, so it holds even when a
/// single `poll` or `fetch_result` call hangs, and the cancellation token
/// is live at every suspension point.
pub async fn render_to_locator(
    renderer: &dyn AvatarRenderer,
    audio: &[u8],
    variant: AvatarVariant,
    timeouts: &StageTimeouts,
    cancel: &CancellationToken,
) -> Result<MediaLocator> {
    let job_id = tokio::time::timeout(timeouts.stage, renderer.submit(audio, variant))
        .await
        .map_err(|_| {
            FacetalkError::Provider(format!(
                "render submit timed out after {}s",
                timeouts.stage.as_secs()
            ))
        })??;

    let poll_to_completion = async {
        loop {
            match renderer.poll(&job_id).await? {
                RenderStatus::Done => return renderer.fetch_result(&job_id).await,
                RenderStatus::Error(message) => {
                    return Err(FacetalkError::Provider(format!(
                        "avatar rendering failed: {message}"
                    )));
                }
                RenderStatus::Pending => {}
            }
            tokio::time::sleep(timeouts.poll_interval).await;
        }
    };

    let url = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(FacetalkError::Provider(
                "render abandoned: caller disconnected".into(),
            ));
        }
        outcome = tokio::time::timeout(timeouts.render_wait, poll_to_completion) => {
            match outcome {
                Ok(result) => result?,
                Err(_) => {
                    return Err(FacetalkError::RenderTimeout {
                        waited_secs: timeouts.render_wait.as_secs(),
                    });
                }
            }
        }
    };

    Ok(MediaLocator { key: job_id, url })
}

impl Pipeline {
    /// Full pipeline for voice input: audio → transcript → response →
    /// speech → avatar video.
    pub async fn process_audio(
        &self,
        audio: &[u8],
        user_id: &str,
        variant: AvatarVariant,
        voice: Voice,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        let transcript = match self
            .stage("transcription", self.transcriber.transcribe(audio, "webm"))
            .await
        {
            Ok(text) => text,
            Err(e) => return self.fail(user_id, e),
        };
        info!(user_id, transcript = %preview(&transcript), "Audio transcribed");

        match self
            .respond_and_render(&transcript, user_id, variant, voice, cancel)
            .await
        {
            Ok((response, locator, tokens_used)) => PipelineResult::Success {
                transcribed_text: Some(transcript),
                response_text: response,
                avatar_video_url: locator.url,
                tokens_used,
                completed_at: Utc::now(),
            },
            Err(e) => self.fail(user_id, e),
        }
    }

    /// Pipeline for direct text input — identical from the context step on;
    /// the result carries no transcript.
    pub async fn process_text(
        &self,
        text: &str,
        user_id: &str,
        variant: AvatarVariant,
        voice: Voice,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        match self
            .respond_and_render(text, user_id, variant, voice, cancel)
            .await
        {
            Ok((response, locator, tokens_used)) => PipelineResult::Success {
                transcribed_text: None,
                response_text: response,
                avatar_video_url: locator.url,
                tokens_used,
                completed_at: Utc::now(),
            },
            Err(e) => self.fail(user_id, e),
        }
    }

    /// Shared tail of both pipelines: generate → record exchange →
    /// synthesize → render → cache.
    async fn respond_and_render(
        &self,
        prompt: &str,
        user_id: &str,
        variant: AvatarVariant,
        voice: Voice,
        cancel: &CancellationToken,
    ) -> Result<(String, MediaLocator, u64)> {
        let context = self.conversations.context(user_id).await;
        let generated = self
            .stage("generation", self.generator.generate(prompt, &context))
            .await?;
        info!(user_id, tokens = generated.tokens_used, "Response generated");

        self.conversations
            .append_exchange(user_id, prompt, &generated.text)
            .await;

        let speech_text = truncate_for_tts(&generated.text);
        let speech = self
            .stage("synthesis", self.synthesizer.synthesize(&speech_text, voice))
            .await?;

        let locator = self.render(&speech, variant, cancel).await?;
        let locator = self.cache_media(user_id, locator).await;

        Ok((generated.text, locator, generated.tokens_used))
    }

    /// Render via the worker pool when one is configured, inline otherwise.
    /// A queue that cannot accept work degrades to inline rendering.
    async fn render(
        &self,
        audio: &[u8],
        variant: AvatarVariant,
        cancel: &CancellationToken,
    ) -> Result<MediaLocator> {
        if let Some(queue) = &self.queue {
            match queue
                .enqueue(RenderJob {
                    audio: audio.to_vec(),
                    variant,
                })
                .await
            {
                Ok(task_id) => {
                    match queue.await_result(&task_id, self.timeouts.render_wait).await {
                        Err(FacetalkError::QueueUnavailable(reason)) => {
                            warn!(%reason, "Render queue lost the task, rendering inline");
                        }
                        other => return other,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Render queue unavailable, rendering inline");
                }
            }
        }

        render_to_locator(&*self.renderer, audio, variant, &self.timeouts, cancel).await
    }

    /// Best-effort write-through: download the rendered media from its
    /// origin and re-upload it to the cache, all within one stage budget.
    /// Any failure only forfeits CDN delivery.
    async fn cache_media(&self, user_id: &str, origin: MediaLocator) -> MediaLocator {
        if !self.cache.enabled() {
            return origin;
        }
        let write_through =
            tokio::time::timeout(self.timeouts.stage, self.try_cache(user_id, &origin))
                .await
                .unwrap_or_else(|_| {
                    Err(FacetalkError::CacheUnavailable(format!(
                        "cache write-through timed out after {}s",
                        self.timeouts.stage.as_secs()
                    )))
                });
        match write_through {
            Ok(cached) => {
                info!(user_id, url = %cached.url, "Media cached for CDN delivery");
                cached
            }
            Err(e) => {
                warn!(user_id, error = %e, "Media cache write failed, serving origin URL");
                origin
            }
        }
    }

    async fn try_cache(&self, user_id: &str, origin: &MediaLocator) -> Result<MediaLocator> {
        let resp = self
            .http
            .get(&origin.url)
            .send()
            .await
            .map_err(|e| FacetalkError::CacheUnavailable(format!("origin fetch failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(FacetalkError::CacheUnavailable(format!(
                "origin fetch error: HTTP {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FacetalkError::CacheUnavailable(format!("origin read failed: {e}")))?;

        let key = format!("avatars/{user_id}/{}.mp4", origin.key);
        self.cache.put(&key, &bytes, "video/mp4").await
    }

    /// Apply the per-stage timeout; exceeding it is that stage's failure.
    async fn stage<T>(
        &self,
        name: &str,
        call: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeouts.stage, call).await {
            Ok(result) => result,
            Err(_) => Err(FacetalkError::Provider(format!(
                "{name} timed out after {}s",
                self.timeouts.stage.as_secs()
            ))),
        }
    }

    fn fail(&self, user_id: &str, error: FacetalkError) -> PipelineResult {
        warn!(user_id, error = %error, "Pipeline failed");
        PipelineResult::failure(error.to_string())
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Capability/cache/queue health, aggregated for the health probe.
    pub async fn health(&self) -> HealthReport {
        let mut services = BTreeMap::new();
        services.insert(
            "transcription".into(),
            self.transcriber.check().await.describe(),
        );
        services.insert("generation".into(), self.generator.check().await.describe());
        services.insert(
            "synthesis".into(),
            self.synthesizer.check().await.describe(),
        );
        services.insert("rendering".into(), self.renderer.check().await.describe());
        services.insert("media_cache".into(), self.cache.check().await.describe());
        services.insert(
            "render_queue".into(),
            match &self.queue {
                Some(q) => q.check().await.describe(),
                None => "not configured".into(),
            },
        );
        HealthReport {
            services,
            timestamp: Utc::now(),
        }
    }

    /// Voice and avatar-variant enumeration for clients.
    pub fn voices() -> serde_json::Value {
        serde_json::json!({
            "openai_voices": Voice::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>(),
            "avatar_types": AvatarVariant::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>(),
        })
    }
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}
