use async_trait::async_trait;
use std::sync::Arc;

use super::GatewayHandle;
use crate::capture::{MicrophoneRecorder, UtteranceRecorder};
use crate::error::Result;

/// Turns one spoken utterance into text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn listen_once(&self) -> Result<String>;
}

pub type RecognizerHandle = Arc<dyn SpeechRecognizer>;

/// Records an utterance and has the model transcribe it.
pub struct GeminiTranscriber {
    gateway: GatewayHandle,
    recorder: Arc<dyn UtteranceRecorder>,
}

impl GeminiTranscriber {
    pub fn new(gateway: GatewayHandle, recorder: Arc<dyn UtteranceRecorder>) -> Self {
        Self { gateway, recorder }
    }
}

#[async_trait]
impl SpeechRecognizer for GeminiTranscriber {
    async fn listen_once(&self) -> Result<String> {
        let clip = self.recorder.record_utterance().await?;
        log::debug!("Transcribing {} bytes of {}", clip.bytes.len(), clip.mime_type);
        let text = self.gateway.transcribe_audio(&clip.bytes, &clip.mime_type).await?;
        Ok(text.trim().to_string())
    }
}

/// Speech capability for this host: the default microphone, if there is one.
pub fn detect_recognizer(gateway: GatewayHandle) -> Option<RecognizerHandle> {
    let Some(microphone) = MicrophoneRecorder::detect() else {
        log::warn!("No audio input device; voice input disabled");
        return None;
    };
    let recorder: Arc<dyn UtteranceRecorder> = Arc::new(microphone);
    Some(Arc::new(GeminiTranscriber::new(gateway, recorder)))
}
