use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::task::{TaskHandle, TaskStatus, Ticket, TicketGuard};
use crate::ai::prompts::VisionMode;
use crate::ai::{LoreEntry, ModelGateway};
use crate::capture::ImageUpload;
use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Vision,
    Lore,
    Brainstorm,
    Settings,
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vision => "vision",
            Self::Lore => "lore",
            Self::Brainstorm => "brainstorm",
            Self::Settings => "settings",
        };
        f.write_str(name)
    }
}

impl FromStr for Tab {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vision" => Ok(Self::Vision),
            "lore" => Ok(Self::Lore),
            "brainstorm" | "hooks" => Ok(Self::Brainstorm),
            "settings" => Ok(Self::Settings),
            other => Err(format!("unknown tab '{}'", other)),
        }
    }
}

#[derive(Debug, Default)]
pub struct VisionPane {
    pub mode: VisionMode,
    /// Data URL of the last uploaded image.
    pub preview: Option<String>,
    pub description: String,
    pub task: TaskHandle,
}

#[derive(Debug, Default)]
pub struct LorePane {
    pub prompt: String,
    pub entry: Option<LoreEntry>,
    pub task: TaskHandle,
}

#[derive(Debug, Default)]
pub struct BrainstormPane {
    pub history: String,
    pub hooks: Vec<String>,
    pub task: TaskHandle,
}

/// Tabbed task panel. Each pane keeps its own task handle and result slot;
/// a new request overwrites the slot, and a failure clears it.
#[derive(Debug, Default)]
pub struct PanelController {
    active_tab: Tab,
    pub vision: VisionPane,
    pub lore: LorePane,
    pub brainstorm: BrainstormPane,
}

pub type PanelState = Arc<Mutex<PanelController>>;

impl PanelController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_state(self) -> PanelState {
        Arc::new(Mutex::new(self))
    }

    pub fn active_tab(&self) -> Tab {
        self.active_tab
    }

    pub fn select_tab(&mut self, tab: Tab) {
        self.active_tab = tab;
    }

    /// Whether any pane is waiting on the model.
    pub fn is_busy(&self) -> bool {
        self.vision.task.is_pending() || self.lore.task.is_pending() || self.brainstorm.task.is_pending()
    }

    // ─── Vision ──────────────────────────────────────────────────────────────

    pub fn set_vision_mode(&mut self, mode: VisionMode) {
        self.vision.mode = mode;
    }

    /// Records the preview before the analysis request goes out.
    pub fn begin_vision(&mut self, upload: &ImageUpload) -> Result<(Ticket, VisionMode)> {
        let ticket = self.vision.task.begin()?;
        self.vision.preview = Some(upload.data_url());
        Ok((ticket, self.vision.mode))
    }

    pub fn finish_vision(&mut self, ticket: Ticket, result: &Result<String>) {
        let pane = &mut self.vision;
        match result {
            Ok(description) if pane.task.succeed(ticket) => pane.description = description.clone(),
            Err(e) if pane.task.fail(ticket, e) => pane.description.clear(),
            _ => {}
        }
    }

    // ─── Lore ────────────────────────────────────────────────────────────────

    pub fn set_lore_prompt(&mut self, prompt: impl Into<String>) {
        self.lore.prompt = prompt.into();
    }

    /// `None` when the prompt is blank and nothing should be sent.
    pub fn begin_lore(&mut self) -> Result<Option<(Ticket, String)>> {
        if self.lore.prompt.trim().is_empty() {
            return Ok(None);
        }
        let ticket = self.lore.task.begin()?;
        Ok(Some((ticket, self.lore.prompt.clone())))
    }

    pub fn finish_lore(&mut self, ticket: Ticket, result: &Result<LoreEntry>) {
        let pane = &mut self.lore;
        match result {
            Ok(entry) if pane.task.succeed(ticket) => pane.entry = Some(entry.clone()),
            Err(e) if pane.task.fail(ticket, e) => pane.entry = None,
            _ => {}
        }
    }

    // ─── Brainstorm ──────────────────────────────────────────────────────────

    pub fn set_history(&mut self, history: impl Into<String>) {
        self.brainstorm.history = history.into();
    }

    pub fn begin_brainstorm(&mut self) -> Result<Option<(Ticket, String)>> {
        if self.brainstorm.history.trim().is_empty() {
            return Ok(None);
        }
        let ticket = self.brainstorm.task.begin()?;
        Ok(Some((ticket, self.brainstorm.history.clone())))
    }

    pub fn finish_brainstorm(&mut self, ticket: Ticket, result: &Result<Vec<String>>) {
        let pane = &mut self.brainstorm;
        match result {
            Ok(hooks) if pane.task.succeed(ticket) => pane.hooks = hooks.clone(),
            Err(e) if pane.task.fail(ticket, e) => pane.hooks.clear(),
            _ => {}
        }
    }

    pub fn status_of(&self, tab: Tab) -> Option<&TaskStatus> {
        match tab {
            Tab::Vision => Some(self.vision.task.status()),
            Tab::Lore => Some(self.lore.task.status()),
            Tab::Brainstorm => Some(self.brainstorm.task.status()),
            Tab::Settings => None,
        }
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────
//
// Each command checks its guard under the lock, releases the lock for the
// round trip, then re-locks to publish the result. A command dropped mid-flight
// fails its ticket so the pane can be resubmitted.

/// Analyzes an already-read image with the pane's current mode.
pub async fn analyze_upload(
    panel: &PanelState,
    gateway: &dyn ModelGateway,
    upload: ImageUpload,
) -> Result<String> {
    let (ticket, mode) = panel.lock().begin_vision(&upload)?;
    let guard = TicketGuard::new(panel, ticket, |panel: &mut PanelController, ticket| {
        panel.finish_vision(ticket, &Err(AgentError::Cancelled))
    });
    log::info!("Vision analysis started ({:?}, {})", mode, upload.mime_type);

    let result = gateway
        .analyze_image(&upload.bytes, &upload.mime_type, mode.prompt())
        .await;
    if let Err(ref e) = result {
        log::error!("Vision analysis failed: {}", e);
    }

    let ticket = guard.disarm();
    panel.lock().finish_vision(ticket, &result);
    result
}

/// Returns `Ok(None)` without calling the model when the prompt is blank.
pub async fn generate_lore(panel: &PanelState, gateway: &dyn ModelGateway) -> Result<Option<LoreEntry>> {
    let Some((ticket, prompt)) = panel.lock().begin_lore()? else {
        return Ok(None);
    };
    let guard = TicketGuard::new(panel, ticket, |panel: &mut PanelController, ticket| {
        panel.finish_lore(ticket, &Err(AgentError::Cancelled))
    });
    log::info!("Lore generation started");

    let result = gateway.generate_lore(&prompt).await;
    if let Err(ref e) = result {
        log::error!("Lore generation failed: {}", e);
    }

    let ticket = guard.disarm();
    panel.lock().finish_lore(ticket, &result);
    result.map(Some)
}

/// Returns `Ok(None)` without calling the model when the history is blank.
pub async fn brainstorm(panel: &PanelState, gateway: &dyn ModelGateway) -> Result<Option<Vec<String>>> {
    let Some((ticket, history)) = panel.lock().begin_brainstorm()? else {
        return Ok(None);
    };
    let guard = TicketGuard::new(panel, ticket, |panel: &mut PanelController, ticket| {
        panel.finish_brainstorm(ticket, &Err(AgentError::Cancelled))
    });
    log::info!("Plot hook brainstorm started ({} chars of history)", history.len());

    let result = gateway.suggest_plot_hooks(&history).await;
    if let Err(ref e) = result {
        log::error!("Plot hook suggestion failed: {}", e);
    }

    let ticket = guard.disarm();
    panel.lock().finish_brainstorm(ticket, &result);
    result.map(Some)
}
