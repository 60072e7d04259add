//! Hosted chat completion providers.

pub mod azure;

pub use azure::AzureChatCompletion;
