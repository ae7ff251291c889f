use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AgentError, Result};

pub const DEFAULT_FLASH_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_PRO_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const SETTINGS_FILE: &str = "settings.json";
const APP_DIR: &str = "gemini-agent";

/// The tasks that each pick their own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTask {
    Vision,
    Lore,
    Brainstorm,
    Chat,
}

impl ModelTask {
    pub const ALL: [ModelTask; 4] = [Self::Vision, Self::Lore, Self::Brainstorm, Self::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::Lore => "lore",
            Self::Brainstorm => "brainstorm",
            Self::Chat => "chat",
        }
    }
}

impl fmt::Display for ModelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ModelTask {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vision" => Ok(Self::Vision),
            "lore" => Ok(Self::Lore),
            "brainstorm" | "hooks" => Ok(Self::Brainstorm),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown task '{}'", other)),
        }
    }
}

fn default_flash() -> String {
    DEFAULT_FLASH_MODEL.to_string()
}

fn default_pro() -> String {
    DEFAULT_PRO_MODEL.to_string()
}

/// Model identifier per task. Missing keys in the settings file fall back to
/// their own default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_flash")]
    pub vision: String,
    #[serde(default = "default_flash")]
    pub lore: String,
    #[serde(default = "default_pro")]
    pub brainstorm: String,
    #[serde(default = "default_flash")]
    pub chat: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            vision: default_flash(),
            lore: default_flash(),
            brainstorm: default_pro(),
            chat: default_flash(),
        }
    }
}

impl AppSettings {
    pub fn model_for(&self, task: ModelTask) -> &str {
        match task {
            ModelTask::Vision => &self.vision,
            ModelTask::Lore => &self.lore,
            ModelTask::Brainstorm => &self.brainstorm,
            ModelTask::Chat => &self.chat,
        }
    }

    fn slot_mut(&mut self, task: ModelTask) -> &mut String {
        match task {
            ModelTask::Vision => &mut self.vision,
            ModelTask::Lore => &mut self.lore,
            ModelTask::Brainstorm => &mut self.brainstorm,
            ModelTask::Chat => &mut self.chat,
        }
    }

    /// Returns `true` when the stored value actually changed.
    pub fn set_model(&mut self, task: ModelTask, model: &str) -> bool {
        let slot = self.slot_mut(task);
        if slot.as_str() == model {
            return false;
        }
        *slot = model.to_string();
        true
    }
}

/// Settings bound to the file they are persisted in.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: AppSettings,
}

pub type SettingsState = Arc<Mutex<SettingsStore>>;

impl SettingsStore {
    /// Loads `settings.json` from `dir`, writing defaults when the file is absent.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(SETTINGS_FILE);
        let settings = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    log::warn!("Ignoring unreadable settings at {}: {}", path.display(), e);
                    AppSettings::default()
                }),
                Err(e) => {
                    log::warn!("Failed to read {}: {}", path.display(), e);
                    AppSettings::default()
                }
            }
        } else {
            let store = Self {
                path,
                settings: AppSettings::default(),
            };
            if let Err(e) = store.save() {
                log::warn!("Could not write default settings: {}", e);
            }
            return store;
        };

        Self { path, settings }
    }

    /// Settings directory under the platform config dir.
    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
    }

    pub fn into_state(self) -> SettingsState {
        Arc::new(Mutex::new(self))
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model_for(&self, task: ModelTask) -> String {
        self.settings.model_for(task).to_string()
    }

    /// Writes through to disk immediately; the next gateway call sees the change.
    pub fn set_model(&mut self, task: ModelTask, model: &str) -> Result<()> {
        let model = model.trim();
        if model.is_empty() {
            return Err(AgentError::DataFormat(format!(
                "model identifier for {} must not be empty",
                task
            )));
        }
        if self.settings.set_model(task, model) {
            log::info!("Model for {} set to {}", task, model);
        }
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::io(format!("creating {}", parent.display()), e))?;
        }
        let content = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| AgentError::DataFormat(e.to_string()))?;
        std::fs::write(&self.path, content)
            .map_err(|e| AgentError::io(format!("writing {}", self.path.display()), e))
    }
}

pub fn get_settings(state: &SettingsState) -> AppSettings {
    state.lock().settings().clone()
}

/// Settings pane write: persisted before returning.
pub fn update_model(state: &SettingsState, task: ModelTask, model: &str) -> Result<AppSettings> {
    let mut store = state.lock();
    store.set_model(task, model)?;
    Ok(store.settings().clone())
}

/// Connection settings for the gateway. The credential is only ever read from
/// the environment.
#[derive(Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let api_key = ["GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|key| !key.trim().is_empty())
            .unwrap_or_default();

        let base_url = std::env::var("GEMINI_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self { api_key, base_url }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_keys_take_per_key_defaults() {
        let settings: AppSettings = serde_json::from_str(r#"{"lore":"custom-lore"}"#).unwrap();
        assert_eq!(settings.lore, "custom-lore");
        assert_eq!(settings.vision, DEFAULT_FLASH_MODEL);
        assert_eq!(settings.brainstorm, DEFAULT_PRO_MODEL);
        assert_eq!(settings.chat, DEFAULT_FLASH_MODEL);
    }

    #[test]
    fn load_writes_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path());
        assert_eq!(store.settings(), &AppSettings::default());
        assert!(dir.path().join(SETTINGS_FILE).exists());
    }

    #[test]
    fn setting_same_model_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::load(dir.path());

        store.set_model(ModelTask::Chat, "gemini-2.5-pro").unwrap();
        let first = std::fs::read_to_string(store.path()).unwrap();
        store.set_model(ModelTask::Chat, "gemini-2.5-pro").unwrap();
        let second = std::fs::read_to_string(store.path()).unwrap();

        assert_eq!(first, second);
        let value: serde_json::Value = serde_json::from_str(&second).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 4);
        assert_eq!(object["chat"], "gemini-2.5-pro");
    }

    #[test]
    fn changes_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = SettingsStore::load(dir.path());
            store.set_model(ModelTask::Vision, "gemini-2.5-flash").unwrap();
        }
        let reloaded = SettingsStore::load(dir.path());
        assert_eq!(reloaded.model_for(ModelTask::Vision), "gemini-2.5-flash");
    }

    #[test]
    fn empty_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::load(dir.path());
        assert!(store.set_model(ModelTask::Lore, "   ").is_err());
        assert_eq!(store.model_for(ModelTask::Lore), DEFAULT_FLASH_MODEL);
    }

    #[test]
    fn task_names_parse() {
        assert_eq!("hooks".parse::<ModelTask>().unwrap(), ModelTask::Brainstorm);
        assert_eq!("Vision".parse::<ModelTask>().unwrap(), ModelTask::Vision);
        assert!("settings".parse::<ModelTask>().is_err());
    }
}
