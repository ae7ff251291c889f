use std::path::Path;

use crate::ai::prompts::{VisionMode, NO_ANALYSIS};
use crate::ai::stt::RecognizerHandle;
use crate::ai::GatewayHandle;
use crate::capture::ImageUpload;
use crate::config::{self, ModelTask, SettingsState};
use crate::error::AgentError;
use crate::session::{drawer, panel, DrawerState, PanelState, Tab, TaskStatus, VoiceToggle};

const HELP: &str = "\
Panel:
  /tab <vision|lore|brainstorm|settings>  switch pane
  /mode <character|setting>               vision analysis mode
  /vision <image path>                    analyze an image in the vision pane
  /lore <prompt>                          generate a lorebook entry
  /hooks <chat history>                   suggest plot hooks
  /model [<task> <model id>]              show or change per-task models
Drawer:
  <text>                                  chat with the agent
  /send                                   send the compose field as-is
  /image <image path>                     post an image into the chat
  /voice                                  start or stop voice input
  /history                                show the chat
  /quit";

/// Terminal front-end over the panel and the drawer.
pub struct Shell {
    pub settings: SettingsState,
    pub panel: PanelState,
    pub drawer: DrawerState,
    pub gateway: GatewayHandle,
    pub recognizer: Option<RecognizerHandle>,
}

pub enum Outcome {
    Continue(String),
    Quit,
}

fn status_line(status: &TaskStatus) -> Option<String> {
    match status {
        TaskStatus::Failed(message) => Some(format!("! {}", message)),
        TaskStatus::Pending => Some("Consulting AI...".to_string()),
        _ => None,
    }
}

fn error_text(e: &AgentError) -> String {
    format!("! {}", e.user_message())
}

impl Shell {
    pub async fn handle_line(&self, line: &str) -> Outcome {
        let line = line.trim();
        if line.is_empty() {
            return Outcome::Continue(String::new());
        }

        let (command, rest) = match line.strip_prefix('/') {
            Some(cmd) => {
                let mut split = cmd.splitn(2, char::is_whitespace);
                let name = split.next().unwrap_or_default();
                (Some(name), split.next().unwrap_or_default().trim())
            }
            None => (None, line),
        };

        let output = match command {
            None => self.chat(rest).await,
            Some("quit") | Some("exit") => return Outcome::Quit,
            Some("help") => HELP.to_string(),
            Some("tab") => self.select_tab(rest),
            Some("mode") => match rest.parse::<VisionMode>() {
                Ok(mode) => {
                    self.panel.lock().set_vision_mode(mode);
                    format!("Vision mode: {:?}", mode)
                }
                Err(e) => format!("! {}", e),
            },
            Some("vision") => self.vision(rest).await,
            Some("lore") => self.lore(rest).await,
            Some("hooks") => self.hooks(rest).await,
            Some("model") => self.model(rest),
            Some("send") => self.send().await,
            Some("image") => self.image(rest).await,
            Some("voice") => self.voice(),
            Some("history") => self.history(),
            Some(other) => format!("! Unknown command /{} (try /help)", other),
        };
        Outcome::Continue(output)
    }

    fn select_tab(&self, name: &str) -> String {
        match name.parse::<Tab>() {
            Ok(tab) => {
                self.panel.lock().select_tab(tab);
                if tab == Tab::Settings {
                    self.model("")
                } else {
                    format!("Active tab: {}", tab)
                }
            }
            Err(e) => format!("! {}", e),
        }
    }

    async fn vision(&self, path: &str) -> String {
        if path.is_empty() {
            return "! Usage: /vision <image path>".to_string();
        }
        self.panel.lock().select_tab(Tab::Vision);
        let upload = match ImageUpload::read(Path::new(path)).await {
            Ok(upload) => upload,
            Err(e) => return error_text(&e),
        };
        match panel::analyze_upload(&self.panel, self.gateway.as_ref(), upload).await {
            Ok(description) if description.trim().is_empty() => {
                NO_ANALYSIS.to_string()
            }
            Ok(description) => description,
            Err(e) => error_text(&e),
        }
    }

    async fn lore(&self, prompt: &str) -> String {
        {
            let mut state = self.panel.lock();
            state.select_tab(Tab::Lore);
            state.set_lore_prompt(prompt);
        }
        match panel::generate_lore(&self.panel, self.gateway.as_ref()).await {
            Ok(Some(entry)) => entry.to_pretty_json(),
            Ok(None) => "Describe a kingdom, a relic, or an event for a Lorebook entry.".to_string(),
            Err(e) => error_text(&e),
        }
    }

    async fn hooks(&self, history: &str) -> String {
        {
            let mut state = self.panel.lock();
            state.select_tab(Tab::Brainstorm);
            state.set_history(history.replace("\\n", "\n"));
        }
        match panel::brainstorm(&self.panel, self.gateway.as_ref()).await {
            Ok(Some(hooks)) if hooks.is_empty() => "No plot hooks suggested.".to_string(),
            Ok(Some(hooks)) => hooks
                .iter()
                .enumerate()
                .map(|(i, hook)| format!("{}. {}", i + 1, hook))
                .collect::<Vec<_>>()
                .join("\n"),
            Ok(None) => "Paste chat history to get plot hook suggestions.".to_string(),
            Err(e) => error_text(&e),
        }
    }

    fn model(&self, args: &str) -> String {
        if args.is_empty() {
            let settings = config::get_settings(&self.settings);
            return ModelTask::ALL
                .iter()
                .map(|task| format!("{:<10} {}", task, settings.model_for(*task)))
                .collect::<Vec<_>>()
                .join("\n");
        }

        let mut parts = args.split_whitespace();
        let (Some(task), Some(model)) = (parts.next(), parts.next()) else {
            return "! Usage: /model <vision|lore|brainstorm|chat> <model id>".to_string();
        };
        let task = match task.parse::<ModelTask>() {
            Ok(task) => task,
            Err(e) => return format!("! {}", e),
        };
        match config::update_model(&self.settings, task, model) {
            Ok(settings) => format!("{} now uses {}", task, settings.model_for(task)),
            Err(e) => error_text(&e),
        }
    }

    async fn chat(&self, text: &str) -> String {
        {
            let mut drawer = self.drawer.lock();
            let compose = match drawer.compose() {
                "" => text.to_string(),
                draft => format!("{} {}", draft, text),
            };
            drawer.set_compose(compose);
        }
        self.send().await
    }

    async fn send(&self) -> String {
        match drawer::send_message(&self.drawer, self.gateway.as_ref()).await {
            Ok(Some(reply)) => reply,
            Ok(None) => String::new(),
            Err(e) => error_text(&e),
        }
    }

    async fn image(&self, path: &str) -> String {
        if path.is_empty() {
            return "! Usage: /image <image path>".to_string();
        }
        let upload = match ImageUpload::read(Path::new(path)).await {
            Ok(upload) => upload,
            Err(e) => return error_text(&e),
        };
        match drawer::upload_image(&self.drawer, self.gateway.as_ref(), upload).await {
            Ok(_) => self
                .drawer
                .lock()
                .messages()
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default(),
            Err(e) => error_text(&e),
        }
    }

    fn voice(&self) -> String {
        match drawer::toggle_voice(&self.drawer, self.recognizer.clone()) {
            Ok(VoiceToggle::Started) => "Listening... (/voice again to stop)".to_string(),
            Ok(VoiceToggle::Stopped) => {
                format!("Stopped. Compose: {}", self.drawer.lock().compose())
            }
            Err(e) => {
                let mut drawer = self.drawer.lock();
                let notice = drawer.notice().map(str::to_string);
                drawer.dismiss_notice();
                format!("! {}", notice.unwrap_or_else(|| e.to_string()))
            }
        }
    }

    fn history(&self) -> String {
        let drawer = self.drawer.lock();
        let mut lines: Vec<String> = drawer
            .messages()
            .iter()
            .map(|m| {
                let who = match m.role {
                    crate::session::Role::User => "You",
                    _ => "Gemini Agent",
                };
                let time = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(m.timestamp)
                    .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
                    .unwrap_or_default();
                let media = if m.media_url.is_some() { " [image]" } else { "" };
                format!("{} • {}{}: {}", who, time, media, m.content)
            })
            .collect();
        if !drawer.compose().is_empty() {
            lines.push(format!("(draft) {}", drawer.compose()));
        }
        if let Some(line) = status_line(drawer.status()) {
            lines.push(line);
        }
        lines.join("\n")
    }
}
