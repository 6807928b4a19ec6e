use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacetalkError {
    /// An external capability call failed or returned an unexpected shape.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Avatar rendering exceeded its wait bound.
    #[error("Avatar rendering timed out after {waited_secs}s")]
    RenderTimeout { waited_secs: u64 },

    /// The media cache is unavailable. Recoverable — callers continue
    /// without caching.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The render queue is unavailable. Recoverable — callers fall back to
    /// inline rendering.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Bad JSON, bad base64, or empty input. Rejected before any pipeline
    /// stage runs.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FacetalkError>;
