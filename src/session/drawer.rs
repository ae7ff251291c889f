use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::AbortHandle;

use super::conversation::{Conversation, Message, MessageKind, Role};
use super::task::{TaskHandle, TaskStatus, Ticket, TicketGuard};
use crate::ai::prompts::{
    DRAWER_GREETING, DRAWER_IMAGE_PROMPT, DRAWER_SYSTEM_INSTRUCTION, IMAGE_MESSAGE_CONTENT,
    NO_ANALYSIS,
};
use crate::ai::stt::RecognizerHandle;
use crate::ai::ModelGateway;
use crate::capture::ImageUpload;
use crate::error::{AgentError, Result};

const SPEECH_UNAVAILABLE: &str = "Speech recognition";

#[derive(Debug, Default)]
enum VoiceState {
    #[default]
    Off,
    Listening {
        generation: u64,
        task: Option<AbortHandle>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceToggle {
    Started,
    Stopped,
}

/// The floating chat surface. Owns its own conversation, independent of the
/// task panel.
#[derive(Debug)]
pub struct ChatDrawer {
    conversation: Conversation,
    compose: String,
    task: TaskHandle,
    voice: VoiceState,
    voice_generation: u64,
    notice: Option<String>,
    system_instruction: String,
}

pub type DrawerState = Arc<Mutex<ChatDrawer>>;

impl Default for ChatDrawer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatDrawer {
    /// Opens with the assistant's greeting.
    pub fn new() -> Self {
        let mut conversation = Conversation::new();
        conversation.push(Message::new(Role::Model, DRAWER_GREETING, MessageKind::Text));
        Self {
            conversation,
            compose: String::new(),
            task: TaskHandle::default(),
            voice: VoiceState::Off,
            voice_generation: 0,
            notice: None,
            system_instruction: DRAWER_SYSTEM_INSTRUCTION.to_string(),
        }
    }

    pub fn into_state(self) -> DrawerState {
        Arc::new(Mutex::new(self))
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn compose(&self) -> &str {
        &self.compose
    }

    /// The compose field stays editable while a request is pending.
    pub fn set_compose(&mut self, text: impl Into<String>) {
        self.compose = text.into();
    }

    pub fn status(&self) -> &TaskStatus {
        self.task.status()
    }

    pub fn is_loading(&self) -> bool {
        self.task.is_pending()
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.voice, VoiceState::Listening { .. })
    }

    /// Blocking notice for the user, if the last action could not complete.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    // ─── Text ────────────────────────────────────────────────────────────────

    /// Appends the user's message and hands back what to send. `None` when the
    /// compose field is blank.
    pub fn begin_send(&mut self) -> Result<Option<(Ticket, Vec<Message>, String)>> {
        if self.compose.trim().is_empty() {
            return Ok(None);
        }
        let ticket = self.task.begin()?;
        self.notice = None;

        let text = std::mem::take(&mut self.compose);
        self.conversation.push(Message::new(Role::User, text, MessageKind::Text));
        Ok(Some((
            ticket,
            self.conversation.snapshot(),
            self.system_instruction.clone(),
        )))
    }

    pub fn finish_send(&mut self, ticket: Ticket, result: &Result<String>) {
        match result {
            Ok(reply) if self.task.succeed(ticket) => {
                self.conversation
                    .push(Message::new(Role::Model, reply.clone(), MessageKind::Text));
            }
            Err(e) if self.task.fail(ticket, e) => self.notice = Some(e.user_message()),
            _ => {}
        }
    }

    // ─── Image ───────────────────────────────────────────────────────────────

    /// Appends the image message right away, ahead of the analysis.
    pub fn begin_image(&mut self, upload: &ImageUpload) -> Result<Ticket> {
        let ticket = self.task.begin()?;
        self.notice = None;
        self.conversation.push(
            Message::new(Role::User, IMAGE_MESSAGE_CONTENT, MessageKind::Image)
                .with_media(upload.data_url()),
        );
        Ok(ticket)
    }

    pub fn finish_image(&mut self, ticket: Ticket, result: &Result<String>) {
        match result {
            Ok(description) if self.task.succeed(ticket) => {
                let content = if description.trim().is_empty() {
                    NO_ANALYSIS.to_string()
                } else {
                    description.clone()
                };
                self.conversation
                    .push(Message::new(Role::Model, content, MessageKind::Text));
            }
            Err(e) if self.task.fail(ticket, e) => self.notice = Some(e.user_message()),
            _ => {}
        }
    }

    // ─── Voice ───────────────────────────────────────────────────────────────

    /// Starts listening; without a recognizer the user gets a blocking notice
    /// and the compose field is left alone.
    pub fn begin_voice(&mut self, available: bool) -> Result<u64> {
        if !available {
            let err = AgentError::CapabilityUnavailable(SPEECH_UNAVAILABLE.to_string());
            self.notice = Some(err.user_message());
            return Err(err);
        }
        self.voice_generation += 1;
        self.voice = VoiceState::Listening {
            generation: self.voice_generation,
            task: None,
        };
        Ok(self.voice_generation)
    }

    fn attach_voice_task(&mut self, generation: u64, handle: AbortHandle) {
        match &mut self.voice {
            VoiceState::Listening {
                generation: current,
                task,
            } if *current == generation => *task = Some(handle),
            _ => {}
        }
    }

    /// Returns `true` if a capture was running.
    pub fn stop_voice(&mut self) -> bool {
        match std::mem::take(&mut self.voice) {
            VoiceState::Listening { task, .. } => {
                if let Some(task) = task {
                    task.abort();
                }
                true
            }
            VoiceState::Off => false,
        }
    }

    /// A transcript extends the compose field; it never becomes a message.
    /// Results from a stopped capture are dropped.
    pub fn finish_voice(&mut self, generation: u64, result: Result<String>) {
        match &self.voice {
            VoiceState::Listening {
                generation: current,
                ..
            } if *current == generation => {}
            _ => return,
        }
        self.voice = VoiceState::Off;

        match result {
            Ok(transcript) => {
                let transcript = transcript.trim();
                if transcript.is_empty() {
                    return;
                }
                if !self.compose.is_empty() {
                    self.compose.push(' ');
                }
                self.compose.push_str(transcript);
            }
            Err(e) => {
                log::error!("Speech recognition error: {}", e);
                self.notice = Some(e.user_message());
            }
        }
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

/// Sends the compose field as a chat turn. `Ok(None)` when it was blank.
pub async fn send_message(drawer: &DrawerState, gateway: &dyn ModelGateway) -> Result<Option<String>> {
    let Some((ticket, conversation, system_instruction)) = drawer.lock().begin_send()? else {
        return Ok(None);
    };
    let guard = TicketGuard::new(drawer, ticket, |drawer: &mut ChatDrawer, ticket| {
        drawer.finish_send(ticket, &Err(AgentError::Cancelled))
    });
    log::info!("Chat turn sent ({} messages)", conversation.len());

    let result = gateway
        .send_chat_message(&conversation, &system_instruction)
        .await;
    if let Err(ref e) = result {
        log::error!("Error sending message: {}", e);
    }

    let ticket = guard.disarm();
    drawer.lock().finish_send(ticket, &result);
    result.map(Some)
}

/// Posts an image into the chat and appends the model's description.
pub async fn upload_image(
    drawer: &DrawerState,
    gateway: &dyn ModelGateway,
    upload: ImageUpload,
) -> Result<String> {
    let ticket = drawer.lock().begin_image(&upload)?;
    let guard = TicketGuard::new(drawer, ticket, |drawer: &mut ChatDrawer, ticket| {
        drawer.finish_image(ticket, &Err(AgentError::Cancelled))
    });
    log::info!("Image posted to chat ({})", upload.mime_type);

    let result = gateway
        .analyze_image(&upload.bytes, &upload.mime_type, DRAWER_IMAGE_PROMPT)
        .await;
    if let Err(ref e) = result {
        log::error!("Analysis failed: {}", e);
    }

    let ticket = guard.disarm();
    drawer.lock().finish_image(ticket, &result);
    result
}

/// Starts or stops voice capture. Must be called inside a Tokio runtime; the
/// capture runs as a background task that can be aborted by toggling again.
pub fn toggle_voice(drawer: &DrawerState, recognizer: Option<RecognizerHandle>) -> Result<VoiceToggle> {
    if drawer.lock().stop_voice() {
        log::info!("Voice capture stopped");
        return Ok(VoiceToggle::Stopped);
    }

    let generation = drawer.lock().begin_voice(recognizer.is_some())?;
    let Some(recognizer) = recognizer else {
        return Err(AgentError::CapabilityUnavailable(SPEECH_UNAVAILABLE.to_string()));
    };
    log::info!("Voice capture started");

    let state = drawer.clone();
    let handle = tokio::spawn(async move {
        let result = recognizer.listen_once().await;
        state.lock().finish_voice(generation, result);
    });
    drawer.lock().attach_voice_task(generation, handle.abort_handle());

    Ok(VoiceToggle::Started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::stt::SpeechRecognizer;
    use crate::capture::upload::fixtures::png_bytes;
    use crate::session::fake::ScriptedGateway;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    struct SlowRecognizer {
        text: String,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SpeechRecognizer for SlowRecognizer {
        async fn listen_once(&self) -> Result<String> {
            self.release.notified().await;
            Ok(self.text.clone())
        }
    }

    fn kinds(drawer: &ChatDrawer) -> Vec<(Role, MessageKind)> {
        drawer.messages().iter().map(|m| (m.role, m.kind)).collect()
    }

    #[test]
    fn opens_with_greeting() {
        let drawer = ChatDrawer::new();
        assert_eq!(drawer.messages().len(), 1);
        assert_eq!(drawer.messages()[0].role, Role::Model);
        assert_eq!(drawer.messages()[0].content, DRAWER_GREETING);
    }

    #[tokio::test]
    async fn send_appends_user_then_model() {
        let gateway = ScriptedGateway::default();
        *gateway.chat.lock() = Some("Try the Gilded Eel.".into());
        let drawer = ChatDrawer::new().into_state();
        drawer.lock().set_compose("Name a tavern");

        let reply = send_message(&drawer, &gateway).await.unwrap();
        assert_eq!(reply.as_deref(), Some("Try the Gilded Eel."));

        let drawer = drawer.lock();
        assert_eq!(drawer.compose(), "");
        let contents: Vec<&str> = drawer.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec![DRAWER_GREETING, "Name a tavern", "Try the Gilded Eel."]);

        let sent = gateway.last_conversation.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].content, "Name a tavern");
    }

    #[tokio::test]
    async fn blank_compose_is_noop() {
        let gateway = ScriptedGateway::default();
        let drawer = ChatDrawer::new().into_state();
        drawer.lock().set_compose("  ");
        assert_eq!(send_message(&drawer, &gateway).await.unwrap(), None);
        assert_eq!(gateway.call_count(), 0);
        assert_eq!(drawer.lock().messages().len(), 1);
    }

    #[tokio::test]
    async fn submissions_rejected_while_pending() {
        let gateway = Arc::new(ScriptedGateway::held());
        let drawer = ChatDrawer::new().into_state();
        drawer.lock().set_compose("first");

        let first = tokio::spawn({
            let drawer = drawer.clone();
            let gateway = gateway.clone();
            async move { send_message(&drawer, gateway.as_ref()).await }
        });
        gateway.wait_for_calls(1).await;

        drawer.lock().set_compose("second");
        let second = send_message(&drawer, gateway.as_ref()).await;
        assert!(matches!(second, Err(AgentError::Busy)));
        let upload = ImageUpload::from_bytes(png_bytes()).unwrap();
        assert!(matches!(
            upload_image(&drawer, gateway.as_ref(), upload).await,
            Err(AgentError::Busy)
        ));
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(drawer.lock().compose(), "second");

        gateway.release();
        first.await.unwrap().unwrap();
        assert!(!drawer.lock().is_loading());
        send_message(&drawer, gateway.as_ref()).await.unwrap();
        assert_eq!(gateway.call_count(), 2);
    }

    #[tokio::test]
    async fn dropped_send_releases_the_drawer() {
        let gateway = Arc::new(ScriptedGateway::held());
        *gateway.chat.lock() = Some("Welcome back.".into());
        let drawer = ChatDrawer::new().into_state();
        drawer.lock().set_compose("Are you there?");

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            send_message(&drawer, gateway.as_ref()),
        )
        .await;
        assert!(timed_out.is_err());
        {
            let drawer = drawer.lock();
            assert!(!drawer.is_loading());
            assert!(drawer.notice().unwrap().contains("retry"));
        }

        gateway.release();
        drawer.lock().set_compose("Hello again");
        let reply = send_message(&drawer, gateway.as_ref()).await.unwrap();
        assert_eq!(reply.as_deref(), Some("Welcome back."));
        assert_eq!(drawer.lock().status(), &TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn dropped_upload_releases_the_drawer() {
        let gateway = Arc::new(ScriptedGateway::held());
        let drawer = ChatDrawer::new().into_state();

        let upload = ImageUpload::from_bytes(png_bytes()).unwrap();
        let pending = upload_image(&drawer, gateway.as_ref(), upload);
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), pending)
            .await
            .is_err());

        assert!(matches!(drawer.lock().status(), TaskStatus::Failed(_)));
        gateway.release();
        let upload = ImageUpload::from_bytes(png_bytes()).unwrap();
        assert!(upload_image(&drawer, gateway.as_ref(), upload).await.is_ok());
    }

    #[tokio::test]
    async fn image_upload_appends_image_then_text() {
        let gateway = ScriptedGateway::default();
        *gateway.analysis.lock() = "A misty harbor at dawn.".into();
        let drawer = ChatDrawer::new().into_state();

        let upload = ImageUpload::from_bytes(png_bytes()).unwrap();
        let data_url = upload.data_url();
        upload_image(&drawer, &gateway, upload).await.unwrap();

        let drawer = drawer.lock();
        assert_eq!(
            kinds(&drawer)[1..].to_vec(),
            vec![(Role::User, MessageKind::Image), (Role::Model, MessageKind::Text)]
        );
        assert_eq!(drawer.messages()[1].media_url.as_deref(), Some(data_url.as_str()));
        assert_eq!(drawer.messages()[2].content, "A misty harbor at dawn.");
    }

    #[tokio::test]
    async fn empty_analysis_renders_fallback() {
        let gateway = ScriptedGateway::default();
        let drawer = ChatDrawer::new().into_state();
        let upload = ImageUpload::from_bytes(png_bytes()).unwrap();
        upload_image(&drawer, &gateway, upload).await.unwrap();
        assert_eq!(drawer.lock().messages().last().unwrap().content, NO_ANALYSIS);
    }

    #[tokio::test]
    async fn failed_chat_surfaces_notice() {
        let gateway = ScriptedGateway::default();
        *gateway.chat.lock() = None;
        let drawer = ChatDrawer::new().into_state();
        drawer.lock().set_compose("hello?");

        assert!(send_message(&drawer, &gateway).await.is_err());
        let drawer = drawer.lock();
        assert!(drawer.notice().unwrap().contains("retry"));
        assert!(matches!(drawer.status(), TaskStatus::Failed(_)));
        assert_eq!(drawer.messages().len(), 2);
    }

    #[test]
    fn voice_without_capability_is_blocking_notice() {
        let drawer = ChatDrawer::new().into_state();
        drawer.lock().set_compose("draft");

        let err = toggle_voice(&drawer, None).unwrap_err();
        assert!(matches!(err, AgentError::CapabilityUnavailable(_)));

        let drawer = drawer.lock();
        assert_eq!(drawer.compose(), "draft");
        assert!(!drawer.is_recording());
        assert!(drawer.notice().unwrap().contains("Speech recognition"));
    }

    #[tokio::test]
    async fn transcript_appends_to_compose() {
        let release = Arc::new(Notify::new());
        let recognizer: RecognizerHandle = Arc::new(SlowRecognizer {
            text: "the lantern flickers".into(),
            release: release.clone(),
        });
        let drawer = ChatDrawer::new().into_state();
        drawer.lock().set_compose("Describe how");

        assert_eq!(
            toggle_voice(&drawer, Some(recognizer)).unwrap(),
            VoiceToggle::Started
        );
        assert!(drawer.lock().is_recording());

        release.notify_one();
        while drawer.lock().is_recording() {
            tokio::task::yield_now().await;
        }

        let drawer = drawer.lock();
        assert_eq!(drawer.compose(), "Describe how the lantern flickers");
        assert_eq!(drawer.messages().len(), 1);
    }

    #[tokio::test]
    async fn stopped_capture_discards_result() {
        let release = Arc::new(Notify::new());
        let recognizer: RecognizerHandle = Arc::new(SlowRecognizer {
            text: "ignored".into(),
            release: release.clone(),
        });
        let drawer = ChatDrawer::new().into_state();

        toggle_voice(&drawer, Some(recognizer.clone())).unwrap();
        assert_eq!(toggle_voice(&drawer, Some(recognizer)).unwrap(), VoiceToggle::Stopped);
        release.notify_one();
        tokio::task::yield_now().await;

        let drawer = drawer.lock();
        assert!(!drawer.is_recording());
        assert_eq!(drawer.compose(), "");
    }

    #[test]
    fn late_result_for_old_capture_is_ignored() {
        let mut drawer = ChatDrawer::new();
        let old = drawer.begin_voice(true).unwrap();
        drawer.stop_voice();
        let _current = drawer.begin_voice(true).unwrap();

        drawer.finish_voice(old, Ok("stale".into()));
        assert!(drawer.is_recording());
        assert_eq!(drawer.compose(), "");
    }
}
