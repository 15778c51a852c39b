use serde::{Deserialize, Serialize};

/// Token identifier as produced by a session's tokenizer.
pub type TokenId = u32;

/// Identity and source location of a loadable model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    /// Catalog identifier, no spaces (e.g. "smollm-135m-4bit")
    pub id: String,
    /// Hub repository the weights are fetched from
    pub repo_id: String,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, repo_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            repo_id: repo_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Sampling and streaming configuration for one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    pub temperature: f32,
    /// Nucleus-sampling threshold
    pub top_p: f32,
    pub repetition_penalty: f32,
    /// Number of trailing tokens the repetition penalty looks at
    pub repetition_context_size: usize,
    /// Generation stops once this many tokens have been produced
    pub max_tokens: usize,
    /// Partial output is surfaced every N tokens
    pub display_every_n_tokens: usize,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            repetition_penalty: 1.0,
            repetition_context_size: 64,
            max_tokens: 240,
            display_every_n_tokens: 4,
        }
    }
}

/// Decision returned by the per-token callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDisposition {
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub token_count: usize,
    pub tokens_per_second: f64,
}
