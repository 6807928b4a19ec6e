//! FaceTalk real-time wire protocol.
//!
//! All client communication is JSON-over-WebSocket. Inbound messages are
//! tagged by `type` (`text_input`, `audio_input`, `ping`); every outbound
//! message carries its own `type` tag and a UTC timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AvatarVariant, Voice};

/// Client -> server message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    TextInput {
        text: String,
        #[serde(default)]
        avatar_type: AvatarVariant,
        #[serde(default)]
        voice: Voice,
    },
    AudioInput {
        /// Base64-encoded audio bytes.
        audio_data: String,
        #[serde(default)]
        avatar_type: AvatarVariant,
        #[serde(default)]
        voice: Voice,
    },
    Ping,
}

/// Server -> client message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Sent once after a successful connection handshake.
    System {
        message: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Intermediate notification sent before the pipeline runs, so clients
    /// can mask latency.
    Processing {
        message: String,
        timestamp: DateTime<Utc>,
    },
    TextResponse {
        user_input: String,
        text: String,
        avatar_video_url: String,
        tokens_used: u64,
        timestamp: DateTime<Utc>,
    },
    AudioResponse {
        transcribed_text: String,
        llm_response: String,
        avatar_video_url: String,
        tokens_used: u64,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Pong { timestamp: DateTime<Utc> },
}

impl ServerEnvelope {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }
}
