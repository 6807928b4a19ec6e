//! Configuration loading and credential resolution.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level FaceTalk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<OpenAiConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<TimeoutConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_port() -> u16 {
    8000
}

/// OpenAI credentials and model selection for transcription, response
/// generation, and speech synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Chat model (default: "gpt-4o-mini").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<String>,

    /// Speech synthesis model (default: "tts-1-hd").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model: Option<String>,

    /// Transcription model (default: "whisper-1").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcribe_model: Option<String>,
}

impl OpenAiConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Avatar rendering provider (D-ID-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl RenderConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Blob storage for media cache write-through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Account endpoint, e.g. "https://myaccount.blob.core.windows.net".
    pub account_endpoint: String,

    #[serde(default = "default_container")]
    pub container: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sas_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sas_token_env: Option<String>,

    /// CDN endpoint fronting the container. When set, cached media is
    /// delivered through it instead of the blob URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdn_endpoint: Option<String>,
}

fn default_container() -> String {
    "avatar-media".into()
}

impl StorageConfig {
    pub fn resolve_sas_token(&self) -> Option<String> {
        resolve_secret_field(&self.sas_token, &self.sas_token_env)
    }
}

/// Render offload worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    2
}

/// Per-stage timeout budgets, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Transcription, generation, synthesis, and render-submit each get this
    /// budget independently.
    #[serde(default = "default_stage_secs")]
    pub stage_secs: u64,

    /// Total wait bound for the avatar-render poll loop.
    #[serde(default = "default_render_wait_secs")]
    pub render_wait_secs: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_stage_secs() -> u64 {
    30
}

fn default_render_wait_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    3
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stage_secs: default_stage_secs(),
            render_wait_secs: default_render_wait_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::FacetalkError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::FacetalkError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(8000)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn timeouts(&self) -> TimeoutConfig {
        self.timeouts.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/facetalk.json")).unwrap();
        assert!(config.openai.is_none());
        assert_eq!(config.gateway_port(), 8000);
    }

    #[test]
    fn test_load_json5_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // local dev overrides
                gateway: { port: 9100 },
                openai: { api_key: "sk-test", chat_model: "gpt-4o-mini" },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 9100);
        assert_eq!(
            config.openai.unwrap().resolve_api_key(),
            Some("sk-test".into())
        );
    }

    #[test]
    fn test_resolve_secret_prefers_direct_value() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("FACETALK_TEST_KEY", "from-env") };

        let direct = OpenAiConfig {
            api_key: Some("direct".into()),
            api_key_env: Some("FACETALK_TEST_KEY".into()),
            base_url: None,
            chat_model: None,
            tts_model: None,
            transcribe_model: None,
        };
        assert_eq!(direct.resolve_api_key(), Some("direct".into()));

        let via_env = OpenAiConfig {
            api_key: None,
            api_key_env: Some("FACETALK_TEST_KEY".into()),
            base_url: None,
            chat_model: None,
            tts_model: None,
            transcribe_model: None,
        };
        assert_eq!(via_env.resolve_api_key(), Some("from-env".into()));
    }

    #[test]
    fn test_timeout_defaults() {
        let t = TimeoutConfig::default();
        assert_eq!(t.stage_secs, 30);
        assert_eq!(t.render_wait_secs, 120);
        assert_eq!(t.poll_interval_secs, 3);
    }
}
