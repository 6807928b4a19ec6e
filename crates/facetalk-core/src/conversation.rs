//! Per-user bounded conversation history.
//!
//! Histories live for the process lifetime only. Each user's history is
//! guarded by its own mutex: two exchanges for the same user serialize,
//! while different users never contend. The outer map is only write-locked
//! for the lazy insert of a new user's entry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::types::Turn;

/// Maximum retained turns per user (10 exchanges).
pub const MAX_TURNS: usize = 20;

/// Turns supplied as context to response generation.
pub const CONTEXT_TURNS: usize = 10;

#[derive(Default)]
pub struct ConversationStore {
    histories: RwLock<HashMap<String, Arc<Mutex<Vec<Turn>>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, user_id: &str) -> Arc<Mutex<Vec<Turn>>> {
        if let Some(history) = self.histories.read().await.get(user_id) {
            return history.clone();
        }
        let mut histories = self.histories.write().await;
        histories
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Snapshot of the most recent turns for prompt context. An unknown
    /// user yields an empty context.
    pub async fn context(&self, user_id: &str) -> Vec<Turn> {
        let Some(history) = self.histories.read().await.get(user_id).cloned() else {
            return Vec::new();
        };
        let history = history.lock().await;
        let skip = history.len().saturating_sub(CONTEXT_TURNS);
        history[skip..].to_vec()
    }

    /// Atomically append one user/assistant exchange, evicting the oldest
    /// turns beyond [`MAX_TURNS`].
    pub async fn append_exchange(&self, user_id: &str, user_text: &str, assistant_text: &str) {
        let entry = self.entry(user_id).await;
        let mut history = entry.lock().await;
        history.push(Turn::user(user_text));
        history.push(Turn::assistant(assistant_text));
        if history.len() > MAX_TURNS {
            let excess = history.len() - MAX_TURNS;
            history.drain(..excess);
        }
        debug!(user_id, turns = history.len(), "Appended exchange");
    }

    /// Number of retained turns for a user.
    pub async fn len(&self, user_id: &str) -> usize {
        match self.histories.read().await.get(user_id) {
            Some(history) => history.lock().await.len(),
            None => 0,
        }
    }

    pub async fn is_empty(&self, user_id: &str) -> bool {
        self.len(user_id).await == 0
    }
}
