//! Prompt functions: a template rendered from the arguments and sent to the
//! completion service, exposed as an ordinary [`Capability`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::template::PromptTemplate;
use crate::capabilities::{Capability, FunctionError, KernelArguments, NativeFunction, ParameterSpec};
use crate::llms::ChatCompletion;

/// Builder for a template-backed capability.
#[derive(Debug, Clone)]
pub struct PromptFunction {
    name: String,
    description: String,
    template: PromptTemplate,
    system_prompt: Option<String>,
    parameter_descriptions: HashMap<String, String>,
    service: Arc<dyn ChatCompletion>,
}

impl PromptFunction {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        template: impl Into<String>,
        service: Arc<dyn ChatCompletion>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            template: PromptTemplate::new(template),
            system_prompt: None,
            parameter_descriptions: HashMap::new(),
            service,
        }
    }

    /// Send `prompt` as the system message of every call.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Describe a template variable for the planner and tool schema.
    pub fn describe(mut self, variable: impl Into<String>, description: impl Into<String>) -> Self {
        self.parameter_descriptions.insert(variable.into(), description.into());
        self
    }

    /// Turn the prompt into a capability whose parameters are the template's
    /// variables (all required strings).
    pub fn into_capability(self) -> Capability {
        let parameters: Vec<ParameterSpec> = self
            .template
            .variables()
            .into_iter()
            .map(|variable| {
                let description = self
                    .parameter_descriptions
                    .get(&variable)
                    .cloned()
                    .unwrap_or_else(|| format!("value for {}", variable));
                ParameterSpec::string(variable, description)
            })
            .collect();

        let body = PromptBody {
            template: self.template,
            system_prompt: self.system_prompt.unwrap_or_default(),
            service: self.service,
        };
        parameters
            .into_iter()
            .fold(Capability::new(self.name, self.description, Arc::new(body)), |cap, p| {
                cap.with_parameter(p)
            })
            .with_returns("the model's text response")
    }
}

struct PromptBody {
    template: PromptTemplate,
    system_prompt: String,
    service: Arc<dyn ChatCompletion>,
}

#[async_trait]
impl NativeFunction for PromptBody {
    async fn call(&self, arguments: &KernelArguments) -> Result<Value, FunctionError> {
        let prompt = self.template.render(arguments)?;
        log::debug!(
            "Rendering prompt function via {} ({} chars)",
            self.service.model_id(),
            prompt.len()
        );
        let text = self.service.complete(&self.system_prompt, &prompt).await?;
        Ok(Value::String(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityInvoker;
    use crate::llms::{Role, ScriptedCompletion};

    #[tokio::test]
    async fn test_prompt_function_renders_and_completes() {
        let service = Arc::new(ScriptedCompletion::new().with_text("Hello kuljot!"));
        let cap = PromptFunction::new(
            "greeting",
            "Greet a person",
            "Write a greeting for {{$name}} aged {{$age}}.",
            service.clone(),
        )
        .with_system_prompt("Be warm.")
        .describe("name", "the person's name")
        .into_capability();

        assert_eq!(cap.parameters().len(), 2);
        assert_eq!(cap.parameters()[0].description, "the person's name");

        let args = KernelArguments::new().with("name", "kuljot").with("age", "18");
        let result = CapabilityInvoker::new().invoke(&cap, args).await.unwrap();
        assert_eq!(result.text(), "Hello kuljot!");

        let requests = service.requests();
        let messages = requests[0].history.messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[1].content.as_deref(),
            Some("Write a greeting for kuljot aged 18.")
        );
    }

    #[tokio::test]
    async fn test_completion_failure_is_body_failure() {
        let service = Arc::new(
            ScriptedCompletion::new().with_error(crate::llms::CompletionError::Auth("401".into())),
        );
        let cap = PromptFunction::new("echo", "Echo", "{{$text}}", service).into_capability();
        let err = CapabilityInvoker::new()
            .invoke(&cap, KernelArguments::new().with("text", "hi"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("authentication failed"));
    }
}
