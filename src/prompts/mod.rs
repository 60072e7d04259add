//! Prompt templates and the prompt-backed capabilities built from them.

pub mod function;
pub mod template;

pub use function::PromptFunction;
pub use template::{PromptTemplate, TemplateError};
