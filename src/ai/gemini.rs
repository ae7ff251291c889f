use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{prompts, LoreEntry, ModelGateway};
use crate::config::{GatewayConfig, ModelTask, SettingsState};
use crate::error::{AgentError, Result};
use crate::session::conversation::{Message, Role};

const MAX_ERROR_BODY: usize = 800;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("valid fence regex")
});

// ─── Wire format ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    fn inline(bytes: &[u8], mime_type: &str) -> Self {
        Self::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.to_string(),
                data: STANDARD.encode(bytes),
            },
        }
    }
}

impl GenerateContentRequest {
    fn plain(prompt: String) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![Part::text(prompt)],
            }],
            system_instruction: None,
            generation_config: None,
        }
    }

    fn with_schema(prompt: String, schema: serde_json::Value) -> Self {
        Self {
            generation_config: Some(GenerationConfig {
                response_mime_type: "application/json",
                response_schema: schema,
            }),
            ..Self::plain(prompt)
        }
    }

    fn multipart(bytes: &[u8], mime_type: &str, prompt: &str) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![Part::inline(bytes, mime_type), Part::text(prompt)],
            }],
            system_instruction: None,
            generation_config: None,
        }
    }

    fn chat(contents: Vec<Content>, system_instruction: &str) -> Self {
        let system_instruction = if system_instruction.trim().is_empty() {
            None
        } else {
            Some(SystemInstruction {
                parts: vec![Part::text(system_instruction)],
            })
        };
        Self {
            contents,
            system_instruction,
            generation_config: None,
        }
    }
}

/// Maps a conversation onto Gemini turns: system entries are dropped,
/// consecutive entries of the same role are merged so turns alternate, and
/// the sequence starts with a user turn.
fn chat_contents(conversation: &[Message]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();

    for message in conversation {
        let role = match message.role {
            Role::System => continue,
            Role::User => "user",
            Role::Model => "model",
        };
        if contents.is_empty() && role == "model" {
            continue;
        }
        match contents.last_mut() {
            Some(last) if last.role == role => last.parts.push(Part::text(message.content.clone())),
            _ => contents.push(Content {
                role,
                parts: vec![Part::text(message.content.clone())],
            }),
        }
    }

    contents
}

fn reply_text(response: GenerateContentResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Parses a JSON reply, tolerating a surrounding Markdown code fence.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    let body = match CODE_FENCE.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
        None => text.trim(),
    };
    if body.is_empty() {
        return Err(AgentError::DataFormat(format!("empty reply for {}", what)));
    }
    serde_json::from_str(body)
        .map_err(|e| AgentError::DataFormat(format!("failed to parse {}: {}", what, e)))
}

fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

// ─── Gateway ─────────────────────────────────────────────────────────────────

/// `ModelGateway` over the Gemini `generateContent` REST endpoint.
pub struct GeminiGateway {
    http: Client,
    config: GatewayConfig,
    settings: SettingsState,
}

impl GeminiGateway {
    pub fn new(config: GatewayConfig, settings: SettingsState) -> Self {
        Self {
            http: Client::new(),
            config,
            settings,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    async fn generate(&self, task: ModelTask, request: &GenerateContentRequest) -> Result<String> {
        if self.config.api_key.is_empty() {
            return Err(AgentError::MissingCredential);
        }

        let model = self.settings.lock().model_for(task);
        log::debug!(
            "Gemini {} request to {} ({} turns)",
            task,
            model,
            request.contents.len()
        );

        let response = self
            .http
            .post(self.endpoint(&model))
            .header("x-goog-api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AgentError::DataFormat(format!("Failed to parse Gemini response: {}", e)))?;

        Ok(reply_text(body))
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    async fn generate_lore(&self, prompt: &str) -> Result<LoreEntry> {
        let request =
            GenerateContentRequest::with_schema(prompts::lore_prompt(prompt), prompts::lore_schema());
        let text = self.generate(ModelTask::Lore, &request).await?;
        parse_json_reply(&text, "lore entry")
    }

    async fn analyze_image(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<String> {
        let request = GenerateContentRequest::multipart(image, mime_type, prompt);
        self.generate(ModelTask::Vision, &request).await
    }

    async fn suggest_plot_hooks(&self, history: &str) -> Result<Vec<String>> {
        let request = GenerateContentRequest::with_schema(
            prompts::plot_hooks_prompt(history),
            prompts::plot_hooks_schema(),
        );
        let text = self.generate(ModelTask::Brainstorm, &request).await?;
        parse_json_reply(&text, "plot hooks")
    }

    async fn send_chat_message(
        &self,
        conversation: &[Message],
        system_instruction: &str,
    ) -> Result<String> {
        let contents = chat_contents(conversation);
        if contents.is_empty() {
            return Err(AgentError::DataFormat(
                "conversation has no user turn to send".to_string(),
            ));
        }
        let request = GenerateContentRequest::chat(contents, system_instruction);
        self.generate(ModelTask::Chat, &request).await
    }

    async fn transcribe_audio(&self, audio: &[u8], mime_type: &str) -> Result<String> {
        let request = GenerateContentRequest::multipart(audio, mime_type, prompts::TRANSCRIBE_PROMPT);
        let text = self.generate(ModelTask::Chat, &request).await?;
        Ok(text.trim().to_string())
    }
}
