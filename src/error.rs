use thiserror::Error;

/// Failures surfaced by the gateway, the capture helpers and the UI state.
///
/// None of these are fatal: each one is scoped to the single operation that
/// produced it and ends up in the owning pane's or drawer's `Failed` state.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Gemini request failed: {0}")]
    Network(String),

    #[error("Gemini API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected response format: {0}")]
    DataFormat(String),

    #[error("{0} is not available in this environment")]
    CapabilityUnavailable(String),

    #[error("Gemini API key not configured. Set GEMINI_API_KEY (or API_KEY) in the environment.")]
    MissingCredential,

    #[error("A request is already in flight")]
    Busy,

    #[error("Request cancelled before it finished")]
    Cancelled,

    #[error("Audio capture failed: {0}")]
    Audio(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl AgentError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Transport and format failures can be retried as-is by the user.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Api { .. } | Self::DataFormat(_) | Self::Cancelled
        )
    }

    /// Text shown in a pane or drawer after the operation failed.
    pub fn user_message(&self) -> String {
        if self.is_retryable() {
            format!("Generation failed, retry. ({})", self)
        } else {
            self.to_string()
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
