//! Azure OpenAI chat completion provider.
//!
//! Talks to a deployment's `chat/completions` endpoint with an `api-key`
//! header. Azure uses the OpenAI chat format, so request building and
//! response parsing follow that shape, including native tool calls.
//!
//! # Retries
//!
//! Network errors, 5xx responses and 429s are retried with exponential
//! backoff up to `max_retries` times. After a 429 the wait is at least the
//! server's `Retry-After`. Authentication failures and other 4xx
//! responses are returned immediately.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AzureOpenAiSettings;
use crate::llms::chat_history::{ChatHistory, ChatMessage, ToolCall};
use crate::llms::completion::{ChatCompletion, ChatResponse, CompletionError, ToolDefinition};

/// Default API version when none is configured.
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

// ---------------------------------------------------------------------------
// AzureChatCompletion provider
// ---------------------------------------------------------------------------

/// Azure OpenAI chat completion client.
///
/// # Example
///
/// ```ignore
/// let settings = AzureOpenAiSettings::from_env()?;
/// let service = AzureChatCompletion::from_settings(&settings);
/// let text = service.complete("You are terse.", "Say hi").await?;
/// ```
#[derive(Clone)]
pub struct AzureChatCompletion {
    /// Resource endpoint, e.g. `https://myresource.openai.azure.com`.
    endpoint: String,
    /// Deployment name; also reported as the model id.
    deployment: String,
    api_key: String,
    api_version: String,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Maximum tokens in response.
    pub max_tokens: Option<u32>,
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub initial_backoff: Duration,
    http: reqwest::Client,
}

impl std::fmt::Debug for AzureChatCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureChatCompletion")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl AzureChatCompletion {
    /// Create a provider for one deployment.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            deployment: deployment.into(),
            api_key: api_key.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            temperature: None,
            max_tokens: None,
            max_retries: 2,
            initial_backoff: Duration::from_secs(1),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create a provider from validated settings.
    pub fn from_settings(settings: &AzureOpenAiSettings) -> Self {
        Self::new(&settings.endpoint, &settings.api_key, &settings.deployment)
            .with_api_version(&settings.api_version)
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Get the full API URL for chat completions.
    pub fn api_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint.trim_end_matches('/'),
            self.deployment,
            self.api_version
        )
    }

    /// Build the OpenAI-compatible request body.
    fn build_request_body(&self, history: &ChatHistory, tools: &[ToolDefinition]) -> Value {
        let messages: Vec<Value> = history.messages().iter().map(wire_message).collect();
        let mut body = serde_json::json!({ "messages": messages });

        if let Some(temp) = self.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolDefinition::to_wire).collect());
            body["tool_choice"] = serde_json::json!("auto");
        }

        body
    }

    /// Parse a chat completion response into text or tool calls.
    fn parse_response(response: &Value) -> Result<ChatResponse, CompletionError> {
        if let Some(error) = response.get("error") {
            let msg = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown Azure API error");
            return Err(CompletionError::InvalidResponse(msg.to_string()));
        }

        let message = response
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| CompletionError::InvalidResponse("no message in response choices".into()))?;

        if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
            if !calls.is_empty() {
                return calls.iter().map(parse_tool_call).collect::<Result<Vec<_>, _>>().map(ChatResponse::ToolCalls);
            }
        }

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| CompletionError::InvalidResponse("message has no text content".into()))?;
        Ok(ChatResponse::Text(content.to_string()))
    }

    /// Extract token usage from a chat completion response.
    fn extract_token_usage(response: &Value) -> HashMap<&'static str, i64> {
        let mut usage = HashMap::new();
        if let Some(usage_obj) = response.get("usage") {
            let field = |name: &str| usage_obj.get(name).and_then(|v| v.as_i64()).unwrap_or(0);
            let prompt = field("prompt_tokens");
            let completion = field("completion_tokens");
            usage.insert("prompt_tokens", prompt);
            usage.insert("completion_tokens", completion);
            usage.insert(
                "total_tokens",
                usage_obj
                    .get("total_tokens")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(prompt + completion),
            );
        }
        usage
    }
}

#[async_trait]
impl ChatCompletion for AzureChatCompletion {
    fn model_id(&self) -> &str {
        &self.deployment
    }

    async fn complete_chat(
        &self,
        history: &ChatHistory,
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, CompletionError> {
        if self.api_key.trim().is_empty() {
            return Err(CompletionError::Configuration(
                "Azure OpenAI API key not set. Set AZURE_OPENAI_API_KEY.".into(),
            ));
        }

        log::debug!(
            "AzureChatCompletion.complete_chat: deployment={}, messages={}, tools={}",
            self.deployment,
            history.len(),
            tools.len(),
        );

        let body = self.build_request_body(history, tools);
        let url = self.api_url();

        // Retry loop with exponential backoff
        let mut last_error = CompletionError::Transient("no attempt made".into());
        let mut retry_delay = self.initial_backoff;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let wait = match &last_error {
                    CompletionError::RateLimit {
                        retry_after_secs: Some(secs),
                    } => retry_delay.max(Duration::from_secs(*secs)),
                    _ => retry_delay,
                };
                log::warn!(
                    "Azure API retry attempt {} after {:?} ({})",
                    attempt,
                    wait,
                    last_error
                );
                tokio::time::sleep(wait).await;
                retry_delay *= 2;
            }

            let response = match self
                .http
                .post(&url)
                .header("api-key", self.api_key.as_str())
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = CompletionError::Transient(e.to_string());
                    continue;
                }
            };

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after_secs = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                last_error = CompletionError::RateLimit { retry_after_secs };
                continue;
            }

            if status.is_server_error() {
                last_error = CompletionError::Transient(format!("Azure API server error: {}", status));
                continue;
            }

            let response_text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    last_error = CompletionError::Transient(e.to_string());
                    continue;
                }
            };

            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                return Err(CompletionError::Auth(format!("Azure API returned {}", status)));
            }

            if status.is_client_error() {
                return Err(CompletionError::Api {
                    status: status.as_u16(),
                    message: truncate(&response_text, 500),
                });
            }

            let response_json: Value = serde_json::from_str(&response_text).map_err(|e| {
                CompletionError::InvalidResponse(format!(
                    "failed to parse Azure response: {} - Body: {}",
                    e,
                    truncate(&response_text, 500)
                ))
            })?;

            let usage = Self::extract_token_usage(&response_json);
            if !usage.is_empty() {
                log::debug!("Azure usage: {:?}", usage);
            }

            return Self::parse_response(&response_json);
        }

        Err(last_error)
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// Convert a history message into the OpenAI wire format.
fn wire_message(message: &ChatMessage) -> Value {
    let mut wire = serde_json::json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|call| {
                    serde_json::json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = serde_json::json!(id);
    }
    wire
}

/// Parse one `tool_calls[]` entry; arguments arrive as a JSON string.
fn parse_tool_call(call: &Value) -> Result<ToolCall, CompletionError> {
    let id = call.get("id").and_then(|v| v.as_str()).unwrap_or_default();
    let function = call
        .get("function")
        .ok_or_else(|| CompletionError::InvalidResponse("tool call without function".into()))?;
    let name = function
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CompletionError::InvalidResponse("tool call without name".into()))?;

    let arguments = match function.get("arguments") {
        Some(Value::String(raw)) if raw.trim().is_empty() => Value::Object(Default::default()),
        Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|e| {
            CompletionError::InvalidResponse(format!("arguments of '{}' are not JSON: {}", name, e))
        })?,
        Some(other) => other.clone(),
        None => Value::Object(Default::default()),
    };

    Ok(ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    })
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
