//! The chat completion seam.
//!
//! Every model call in the crate goes through [`ChatCompletion`], so the
//! planner, the executor's synthesis step and prompt functions can all be
//! driven by a deterministic stub instead of a live endpoint.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::chat_history::{ChatHistory, ToolCall};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a completion call. The caller decides whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// Credentials were rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The service throttled the request (HTTP 429).
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimit { retry_after_secs: Option<u64> },

    /// Network trouble or a server-side error.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The service rejected the request.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The client is not configured well enough to make a call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The model asked for function calls where text was expected.
    #[error("model requested {0} function call(s) but none were offered")]
    UnexpectedToolCalls(usize),
}

// ---------------------------------------------------------------------------
// Tool schema & response
// ---------------------------------------------------------------------------

/// A function offered to the model for automatic calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    /// OpenAI-style `{"type": "function", "function": {...}}` entry.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// What the model answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatResponse {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

impl ChatResponse {
    /// The text answer, or an error if the model asked for function calls.
    pub fn into_text(self) -> Result<String, CompletionError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::ToolCalls(calls) => Err(CompletionError::UnexpectedToolCalls(calls.len())),
        }
    }
}

// ---------------------------------------------------------------------------
// ChatCompletion trait
// ---------------------------------------------------------------------------

/// A hosted (or stubbed) chat completion service.
#[async_trait]
pub trait ChatCompletion: Send + Sync + fmt::Debug {
    /// Deployment or model identifier.
    fn model_id(&self) -> &str;

    /// Complete a conversation, optionally offering tools.
    async fn complete_chat(
        &self,
        history: &ChatHistory,
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, CompletionError>;

    /// One system + user exchange returning text.
    ///
    /// An empty system prompt is left out.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, CompletionError> {
        let mut history = ChatHistory::new();
        if !system_prompt.is_empty() {
            history.add_system_message(system_prompt);
        }
        history.add_user_message(user_prompt);
        self.complete_chat(&history, &[]).await?.into_text()
    }
}
