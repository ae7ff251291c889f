use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DRAWER_SYSTEM_INSTRUCTION: &str = "You are a helpful AI assistant for roleplayers. \
     You help with world-building, character lore, and brainstorming within SillyTavern.";

pub const DRAWER_GREETING: &str =
    "Hello! I am your Gemini Agent extension. How can I assist your roleplay today?";

pub const DRAWER_IMAGE_PROMPT: &str =
    "Please describe this image in the context of a roleplaying game character or setting.";

pub const IMAGE_MESSAGE_CONTENT: &str = "Analyzed an image.";

pub const NO_ANALYSIS: &str = "No analysis available.";

pub const TRANSCRIBE_PROMPT: &str = "Transcribe this spoken utterance verbatim. \
     Reply with the transcript only, without quotes or commentary.";

/// How the vision pane reads an uploaded image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionMode {
    #[default]
    Character,
    Setting,
}

impl VisionMode {
    pub fn prompt(&self) -> &'static str {
        match self {
            Self::Character => {
                "Analyze this character art. Provide a detailed SillyTavern-style character \
                 description including physical traits, clothing, and suggested personality \
                 based on the visual cues."
            }
            Self::Setting => {
                "Analyze this setting image. Provide a vivid, sensory-rich scene description \
                 for a roleplaying game context."
            }
        }
    }
}

impl std::str::FromStr for VisionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "character" | "char" => Ok(Self::Character),
            "setting" | "scene" => Ok(Self::Setting),
            other => Err(format!("unknown vision mode '{}'", other)),
        }
    }
}

pub fn lore_prompt(subject: &str) -> String {
    format!(
        "Generate a SillyTavern compatible Lorebook entry for: {}.\n\
         Return a JSON object with keys: \"name\" (string), \"keys\" (array of trigger keywords), \
         and \"content\" (the actual lore description).",
        subject
    )
}

pub fn lore_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": { "type": "STRING" },
            "keys": { "type": "ARRAY", "items": { "type": "STRING" } },
            "content": { "type": "STRING" }
        },
        "required": ["name", "keys", "content"]
    })
}

pub fn plot_hooks_prompt(history: &str) -> String {
    format!(
        "Based on this roleplay history, suggest 3 distinct and exciting plot hooks or next actions:\n\n{}",
        history
    )
}

pub fn plot_hooks_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": { "type": "STRING" }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lore_schema_requires_all_fields() {
        let schema = lore_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(required, vec!["name", "keys", "content"]);
        assert_eq!(schema["properties"]["keys"]["type"], "ARRAY");
    }

    #[test]
    fn vision_modes_have_distinct_prompts() {
        assert_ne!(VisionMode::Character.prompt(), VisionMode::Setting.prompt());
        assert_eq!("scene".parse::<VisionMode>().unwrap(), VisionMode::Setting);
    }
}
