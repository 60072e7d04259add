//! Automatic function calling.
//!
//! With [`FunctionChoice::Auto`] every registered capability is offered to
//! the model as a tool. Each round, the calls the model asks for run
//! concurrently as one independent plan, their results go back as tool
//! messages, and the model is asked again, until it answers in text.

use serde_json::Value;

use super::{Kernel, KernelError};
use crate::capabilities::{ArgValue, QualifiedName};
use crate::llms::{ChatHistory, ChatResponse, ToolCall, ToolDefinition};
use crate::planning::{ExecutionMode, Plan, PlanStep, StepOutcome};

/// Rounds of tool calls before the model is asked to answer without tools.
pub const MAX_AUTO_INVOKE_ROUNDS: usize = 5;

/// Whether the model may call registered capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionChoice {
    /// Plain completion.
    #[default]
    None,
    /// Offer every capability and run the calls the model makes.
    Auto,
}

impl Kernel {
    /// Send `prompt` to the model, optionally letting it call capabilities.
    pub async fn invoke_prompt(&self, prompt: &str, choice: FunctionChoice) -> Result<String, KernelError> {
        let service = self.service()?;
        let mut history = ChatHistory::new();
        history.add_user_message(prompt);

        if choice == FunctionChoice::None {
            return Ok(service.complete_chat(&history, &[]).await?.into_text()?);
        }

        let tools: Vec<ToolDefinition> = self
            .registry
            .list(None)
            .iter()
            .map(|cap| cap.tool_definition())
            .collect();

        for round in 1..=MAX_AUTO_INVOKE_ROUNDS {
            let calls = match service.complete_chat(&history, &tools).await? {
                ChatResponse::Text(text) => return Ok(text),
                ChatResponse::ToolCalls(calls) => calls,
            };
            log::info!(
                "Round {}: model requested {} function call(s): {}",
                round,
                calls.len(),
                calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
            );

            let outputs = self.run_tool_calls(prompt, &calls).await?;
            history.add_tool_calls(calls.clone());
            for (call, output) in calls.iter().zip(outputs) {
                history.add_tool_result(call.id.clone(), output);
            }
        }

        log::warn!(
            "Function calling stopped after {} rounds; requesting a final answer",
            MAX_AUTO_INVOKE_ROUNDS
        );
        Ok(service.complete_chat(&history, &[]).await?.into_text()?)
    }

    /// Run one round of tool calls concurrently; one text output per call.
    async fn run_tool_calls(&self, prompt: &str, calls: &[ToolCall]) -> Result<Vec<String>, KernelError> {
        let steps = calls
            .iter()
            .map(|call| {
                let name = QualifiedName::parse(&call.name).unwrap_or_else(|| QualifiedName::new("", &call.name));
                let mut step = PlanStep::new(name);
                if let Value::Object(arguments) = &call.arguments {
                    step.arguments = arguments
                        .iter()
                        .map(|(k, v)| (k.clone(), ArgValue::Literal(v.clone())))
                        .collect();
                }
                step
            })
            .collect();

        let result = self
            .executor()
            .execute(Plan::from_steps(prompt, steps), ExecutionMode::Parallel)
            .await?;

        Ok(result
            .steps
            .into_iter()
            .map(|report| match report.outcome {
                StepOutcome::Succeeded(result) => result.text(),
                StepOutcome::Failed(failure) => format!("Error: {}", failure),
                StepOutcome::NotAttempted => "Error: not attempted".to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::{Role, ScriptedCompletion};
    use crate::plugins::{BasicPlugin, MathPlugin};
    use serde_json::json;
    use std::sync::Arc;

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    fn kernel(service: Arc<ScriptedCompletion>) -> Kernel {
        Kernel::builder()
            .with_service(service.clone())
            .add_plugin("MathPlugin", &MathPlugin)
            .unwrap()
            .add_plugin("basic_plugin", &BasicPlugin::new(service))
            .unwrap()
            .build()
    }

    #[tokio::test]
    async fn test_plain_prompt() {
        let service = Arc::new(ScriptedCompletion::new().with_text("hi"));
        let answer = kernel(service.clone())
            .invoke_prompt("say hi", FunctionChoice::None)
            .await
            .unwrap();
        assert_eq!(answer, "hi");
        assert!(service.requests()[0].tool_names.is_empty());
    }

    #[tokio::test]
    async fn test_auto_runs_calls_and_feeds_results_back() {
        let service = Arc::new(
            ScriptedCompletion::new()
                .with_tool_calls(vec![
                    call("call_1", "basic_plugin-greeting", json!({"name": "kuljot", "age": "19"})),
                    call("call_2", "MathPlugin-Divide", json!({"number1": 10, "number2": 2})),
                ])
                // consumed by the greeting prompt function
                .with_text("Hello kuljot, 19 years young!")
                .with_text("Hello kuljot! 10 divided by 2 is 5."),
        );
        let answer = kernel(service.clone())
            .invoke_prompt(
                "greet kuljot who is of age 19 and tell me how much is 10 divided by 2",
                FunctionChoice::Auto,
            )
            .await
            .unwrap();
        assert_eq!(answer, "Hello kuljot! 10 divided by 2 is 5.");

        let requests = service.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].tool_names.len(), 7);
        assert!(requests[0].tool_names.contains(&"MathPlugin-Divide".to_string()));

        let final_history = requests[2].history.messages();
        assert_eq!(final_history.len(), 4);
        assert_eq!(final_history[1].tool_calls.len(), 2);
        assert_eq!(final_history[2].role, Role::Tool);
        assert_eq!(final_history[2].content.as_deref(), Some("Hello kuljot, 19 years young!"));
        assert_eq!(final_history[3].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(final_history[3].content.as_deref(), Some("5.0"));
    }

    #[tokio::test]
    async fn test_failed_call_is_reported_to_model() {
        let service = Arc::new(
            ScriptedCompletion::new()
                .with_tool_calls(vec![call("c1", "MathPlugin-Divide", json!({"number1": 1, "number2": 0}))])
                .with_text("Cannot divide by zero."),
        );
        let answer = kernel(service.clone())
            .invoke_prompt("1/0?", FunctionChoice::Auto)
            .await
            .unwrap();
        assert_eq!(answer, "Cannot divide by zero.");

        let tool_message = service.requests()[1].history.messages()[2].content.clone().unwrap_or_default();
        assert!(tool_message.starts_with("Error: MathPlugin.Divide (step 1)"));
        assert!(tool_message.contains("division by zero"));
    }

    #[tokio::test]
    async fn test_round_limit_forces_text_answer() {
        let mut script = ScriptedCompletion::new();
        for i in 0..MAX_AUTO_INVOKE_ROUNDS {
            script = script.with_tool_calls(vec![call(&format!("c{}", i), "MathPlugin-Sqrt", json!({"number1": 4}))]);
        }
        let service = Arc::new(script.with_text("done"));

        let answer = kernel(service.clone())
            .invoke_prompt("loop", FunctionChoice::Auto)
            .await
            .unwrap();
        assert_eq!(answer, "done");

        let requests = service.requests();
        assert_eq!(requests.len(), MAX_AUTO_INVOKE_ROUNDS + 1);
        assert!(requests.last().unwrap().tool_names.is_empty());
    }
}
