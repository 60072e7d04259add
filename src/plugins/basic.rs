//! Prompt-backed plugins: greetings, contact cards and a chat turn.

use std::sync::Arc;

use crate::capabilities::{Capability, Plugin};
use crate::llms::ChatCompletion;
use crate::prompts::PromptFunction;

const GREETING_TEMPLATE: &str = "Write a short, friendly greeting for {{$name}}, who is {{$age}} years old. \
Mention their age in a natural way.";

const CONTACT_TEMPLATE: &str = "Create a neatly formatted contact card from these details.
Name: {{$name}}
Phone: {{$contact_number}}
Email: {{$email_id}}
Address: {{$address}}";

const CHAT_TEMPLATE: &str = "{{$chat_history}}
user: {{$query}}
assistant:";

/// System prompt of the chat sample.
pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant";

/// `greeting(name, age)` and `contact_information(name, contact_number, email_id, address)`.
#[derive(Debug, Clone)]
pub struct BasicPlugin {
    service: Arc<dyn ChatCompletion>,
}

impl BasicPlugin {
    pub fn new(service: Arc<dyn ChatCompletion>) -> Self {
        Self { service }
    }
}

impl Plugin for BasicPlugin {
    fn functions(&self) -> Vec<Capability> {
        vec![
            PromptFunction::new(
                "greeting",
                "Generate a greeting for a person given their name and age.",
                GREETING_TEMPLATE,
                self.service.clone(),
            )
            .describe("name", "the person's name")
            .describe("age", "the person's age")
            .into_capability(),
            PromptFunction::new(
                "contact_information",
                "Generate formatted contact information from a person's details.",
                CONTACT_TEMPLATE,
                self.service.clone(),
            )
            .describe("name", "the person's name")
            .describe("contact_number", "the phone number")
            .describe("email_id", "the email address")
            .describe("address", "the postal address")
            .into_capability(),
        ]
    }
}

/// `AIChat(chat_history, query)`: one conversational turn.
#[derive(Debug, Clone)]
pub struct ChatPlugin {
    service: Arc<dyn ChatCompletion>,
}

impl ChatPlugin {
    pub fn new(service: Arc<dyn ChatCompletion>) -> Self {
        Self { service }
    }
}

impl Plugin for ChatPlugin {
    fn functions(&self) -> Vec<Capability> {
        vec![PromptFunction::new(
            "AIChat",
            "Answer the user's latest message given the conversation so far.",
            CHAT_TEMPLATE,
            self.service.clone(),
        )
        .with_system_prompt(CHAT_SYSTEM_PROMPT)
        .describe("chat_history", "the conversation so far")
        .describe("query", "the user's latest message")
        .into_capability()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityInvoker, FailureKind, KernelArguments};
    use crate::llms::{ChatHistory, ScriptedCompletion};

    #[tokio::test]
    async fn test_greeting_prompt() {
        let service = Arc::new(ScriptedCompletion::new().with_text("Hey kuljot, 18 looks good on you!"));
        let greeting = BasicPlugin::new(service.clone()).functions().remove(0);
        assert_eq!(greeting.name(), "greeting");

        let result = CapabilityInvoker::new()
            .invoke(&greeting, KernelArguments::new().with("name", "kuljot").with("age", "18"))
            .await
            .unwrap();
        assert_eq!(result.text(), "Hey kuljot, 18 looks good on you!");

        let prompt = service.requests()[0].history.messages()[0].content.clone().unwrap_or_default();
        assert!(prompt.contains("kuljot, who is 18 years old"));
    }

    #[tokio::test]
    async fn test_contact_requires_all_fields() {
        let service = Arc::new(ScriptedCompletion::new());
        let contact = BasicPlugin::new(service.clone()).functions().remove(1);
        assert_eq!(contact.parameters().len(), 4);

        let err = CapabilityInvoker::new()
            .invoke(&contact, KernelArguments::new().with("name", "kuljot"))
            .await
            .unwrap_err();
        assert!(matches!(err.kind, FailureKind::MissingArgument { .. }));
        assert!(service.requests().is_empty());
    }

    #[tokio::test]
    async fn test_chat_turn_includes_history() {
        let service = Arc::new(ScriptedCompletion::new().with_text("Paris."));
        let chat = ChatPlugin::new(service.clone()).functions().remove(0);

        let mut history = ChatHistory::new();
        history.add_user_message("I am planning a trip to France.");
        history.add_assistant_message("Sounds great!");

        let args = KernelArguments::new()
            .with("chat_history", history.to_string())
            .with("query", "What is its capital?");
        let result = CapabilityInvoker::new().invoke(&chat, args).await.unwrap();
        assert_eq!(result.text(), "Paris.");

        let request = &service.requests()[0];
        let messages = request.history.messages();
        assert_eq!(messages[0].content.as_deref(), Some(CHAT_SYSTEM_PROMPT));
        let prompt = messages[1].content.clone().unwrap_or_default();
        assert!(prompt.contains("user: I am planning a trip to France."));
        assert!(prompt.ends_with("user: What is its capital?\nassistant:"));
    }
}
