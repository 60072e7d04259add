//! Scripted completion service.
//!
//! Replays queued responses in order and records every request, which makes
//! planner and executor behaviour reproducible without a network.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::chat_history::{ChatHistory, ToolCall};
use super::completion::{ChatCompletion, ChatResponse, CompletionError, ToolDefinition};

/// A request observed by [`ScriptedCompletion`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub history: ChatHistory,
    pub tool_names: Vec<String>,
}

/// Deterministic [`ChatCompletion`] that answers from a queue.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    model: String,
    replies: Mutex<VecDeque<Result<ChatResponse, CompletionError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self {
            model: "scripted".to_string(),
            ..Self::default()
        }
    }

    /// Queue a text reply.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.replies.lock().push_back(Ok(ChatResponse::Text(text.into())));
        self
    }

    /// Queue a function-call reply.
    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.replies.lock().push_back(Ok(ChatResponse::ToolCalls(calls)));
        self
    }

    /// Queue a failure.
    pub fn with_error(self, error: CompletionError) -> Self {
        self.replies.lock().push_back(Err(error));
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedCompletion {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete_chat(
        &self,
        history: &ChatHistory,
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, CompletionError> {
        self.requests.lock().push(RecordedRequest {
            history: history.clone(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        self.replies.lock().pop_front().unwrap_or_else(|| {
            Err(CompletionError::InvalidResponse(
                "scripted completion has no replies left".to_string(),
            ))
        })
    }
}
