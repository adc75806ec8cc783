use {async_trait::async_trait, murmur_sessions::HistoryEntry};

use crate::Result;

/// Produces a reply for a request given the chat's recent history.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Returns the reply text, trimmed. May contain `[FILE:<path>]` tags.
    async fn respond(&self, message: &str, history: &[HistoryEntry]) -> Result<String>;
}
