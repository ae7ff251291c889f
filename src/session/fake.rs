//! Scripted gateway for exercising the panel and drawer without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

use crate::ai::{LoreEntry, ModelGateway};
use crate::error::{AgentError, Result};
use crate::session::conversation::Message;

pub struct ScriptedGateway {
    /// `None` answers with a data-format failure.
    pub lore: Mutex<Option<LoreEntry>>,
    /// `Err` answers with a data-format failure carrying the text.
    pub hooks: Mutex<std::result::Result<Vec<String>, String>>,
    pub analysis: Mutex<String>,
    /// `None` answers with a network failure.
    pub chat: Mutex<Option<String>>,
    pub transcript: Mutex<String>,
    pub calls: Mutex<Vec<&'static str>>,
    pub last_conversation: Mutex<Vec<Message>>,
    hold: AtomicBool,
    release: Notify,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self {
            lore: Mutex::new(None),
            hooks: Mutex::new(Ok(Vec::new())),
            analysis: Mutex::new(String::new()),
            chat: Mutex::new(Some("ok".to_string())),
            transcript: Mutex::new(String::new()),
            calls: Mutex::new(Vec::new()),
            last_conversation: Mutex::new(Vec::new()),
            hold: AtomicBool::new(false),
            release: Notify::new(),
        }
    }
}

impl ScriptedGateway {
    /// Calls block until `release` is invoked.
    pub fn held() -> Self {
        let gateway = Self::default();
        gateway.hold.store(true, Ordering::SeqCst);
        gateway
    }

    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
        self.release.notify_one();
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub async fn wait_for_calls(&self, n: usize) {
        while self.call_count() < n {
            tokio::task::yield_now().await;
        }
    }

    async fn enter(&self, name: &'static str) {
        self.calls.lock().push(name);
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn generate_lore(&self, _prompt: &str) -> Result<LoreEntry> {
        self.enter("lore").await;
        self.lore
            .lock()
            .clone()
            .ok_or_else(|| AgentError::DataFormat("failed to parse lore entry".into()))
    }

    async fn analyze_image(&self, _image: &[u8], _mime_type: &str, _prompt: &str) -> Result<String> {
        self.enter("image").await;
        Ok(self.analysis.lock().clone())
    }

    async fn suggest_plot_hooks(&self, _history: &str) -> Result<Vec<String>> {
        self.enter("hooks").await;
        self.hooks.lock().clone().map_err(AgentError::DataFormat)
    }

    async fn send_chat_message(
        &self,
        conversation: &[Message],
        _system_instruction: &str,
    ) -> Result<String> {
        *self.last_conversation.lock() = conversation.to_vec();
        self.enter("chat").await;
        self.chat
            .lock()
            .clone()
            .ok_or_else(|| AgentError::Network("connection reset".into()))
    }

    async fn transcribe_audio(&self, _audio: &[u8], _mime_type: &str) -> Result<String> {
        self.enter("transcribe").await;
        Ok(self.transcript.lock().clone())
    }
}
