pub mod gemini;
pub mod prompts;
pub mod stt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::session::conversation::Message;

/// A lorebook entry as SillyTavern imports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoreEntry {
    pub name: String,
    pub keys: Vec<String>,
    pub content: String,
}

impl LoreEntry {
    /// Pretty JSON for pasting into a lorebook.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// The single outbound contract to the hosted model.
///
/// Every call is one round trip: no retries, no streaming. Implementations
/// pick the model for each task from the current settings at call time.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Schema-constrained generation of a lorebook entry. A reply that does
    /// not parse as `{name, keys, content}` is a `DataFormat` error.
    async fn generate_lore(&self, prompt: &str) -> Result<LoreEntry>;

    /// Image plus instruction text. An empty string means "no analysis".
    async fn analyze_image(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String>;

    /// Schema-constrained list of plot hooks for a pasted chat history.
    async fn suggest_plot_hooks(&self, history: &str) -> Result<Vec<String>>;

    /// Multi-turn chat. System-role messages are never sent as turns.
    async fn send_chat_message(
        &self,
        conversation: &[Message],
        system_instruction: &str,
    ) -> Result<String>;

    /// Verbatim transcript of a recorded utterance.
    async fn transcribe_audio(&self, audio: &[u8], mime_type: &str) -> Result<String>;
}

pub type GatewayHandle = Arc<dyn ModelGateway>;
