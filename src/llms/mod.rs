//! LLM integration: the [`ChatCompletion`] seam, chat history, the Azure
//! OpenAI provider and a scripted provider for offline use.

pub mod chat_history;
pub mod completion;
pub mod providers;
pub mod scripted;

pub use chat_history::{ChatHistory, ChatMessage, Role, ToolCall};
pub use completion::{ChatCompletion, ChatResponse, CompletionError, ToolDefinition};
pub use providers::AzureChatCompletion;
pub use scripted::ScriptedCompletion;
