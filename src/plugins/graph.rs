//! Microsoft Graph calendar plugin.
//!
//! `ListCalendarEvents(user_query)` reads the signed-in user's events from
//! Graph and asks the completion service to answer the query from them.
//!
//! The bearer token is acquired outside the crate (device-code flow, CLI,
//! ...) and handed in as a read-only [`GraphCredential`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::capabilities::{Capability, FunctionError, KernelArguments, NativeFunction, ParameterSpec, Plugin};
use crate::config::{GraphSettings, DEFAULT_GRAPH_BASE_URL};
use crate::llms::ChatCompletion;

/// Fields requested for each event.
const EVENT_FIELDS: &str = "subject,body,bodyPreview,organizer,attendees,start,end,location";

const CALENDAR_SYSTEM_PROMPT: &str = "You are a helpful AI assistant meant to assist the user by answering their \
queries related to the calendar events in the Microsoft Graph API. You will be presented with the user's query and \
the JSON response of the Graph API. Extract information from that JSON response based on the query and present it \
to the user in a readable format.";

// ---------------------------------------------------------------------------
// GraphCredential
// ---------------------------------------------------------------------------

/// An access token for Microsoft Graph. Immutable; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct GraphCredential {
    token: String,
}

impl GraphCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for GraphCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GraphCredential(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// GraphPlugin
// ---------------------------------------------------------------------------

/// Plugin exposing `ListCalendarEvents`.
#[derive(Debug, Clone)]
pub struct GraphPlugin {
    inner: Arc<CalendarEvents>,
}

impl GraphPlugin {
    pub fn new(credential: GraphCredential, service: Arc<dyn ChatCompletion>) -> Self {
        Self::with_base_url(credential, service, DEFAULT_GRAPH_BASE_URL)
    }

    /// Point the plugin at another Graph host (tests, national clouds).
    pub fn with_base_url(
        credential: GraphCredential,
        service: Arc<dyn ChatCompletion>,
        base_url: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            inner: Arc::new(CalendarEvents {
                credential,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                service,
                http,
            }),
        }
    }

    pub fn from_settings(settings: &GraphSettings, service: Arc<dyn ChatCompletion>) -> Self {
        Self::with_base_url(GraphCredential::new(&settings.access_token), service, &settings.base_url)
    }
}

impl Plugin for GraphPlugin {
    fn functions(&self) -> Vec<Capability> {
        vec![Capability::new(
            "ListCalendarEvents",
            "To list the calendar events of the user such as meetings etc.",
            self.inner.clone(),
        )
        .with_parameter(ParameterSpec::string("user_query", "the query of the user"))
        .with_returns("the answer to the query as text")]
    }
}

struct CalendarEvents {
    credential: GraphCredential,
    base_url: String,
    service: Arc<dyn ChatCompletion>,
    http: reqwest::Client,
}

impl fmt::Debug for CalendarEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalendarEvents")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl CalendarEvents {
    fn events_url(&self) -> String {
        format!("{}/v1.0/me/events?$select={}", self.base_url, EVENT_FIELDS)
    }

    async fn fetch_events(&self) -> Result<Value, FunctionError> {
        let response = self
            .http
            .get(self.events_url())
            .header("Authorization", self.credential.authorization())
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| FunctionError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 {
            return Err(FunctionError::Request(
                "Graph rejected the access token (401 Unauthorized)".to_string(),
            ));
        }
        if status == 403 {
            return Err(FunctionError::Request(
                "insufficient Graph permissions, Calendars.Read is required (403 Forbidden)".to_string(),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FunctionError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            let snippet: String = body.chars().take(300).collect();
            return Err(FunctionError::Request(format!("Graph returned {}: {}", status, snippet)));
        }

        serde_json::from_str(&body)
            .map_err(|e| FunctionError::Request(format!("Graph returned invalid JSON: {}", e)))
    }
}

#[async_trait]
impl NativeFunction for CalendarEvents {
    async fn call(&self, arguments: &KernelArguments) -> Result<Value, FunctionError> {
        let query = arguments.get_text("user_query")?;
        let events = self.fetch_events().await?;
        log::debug!(
            "Fetched {} calendar event(s)",
            events.get("value").and_then(|v| v.as_array()).map_or(0, Vec::len)
        );

        let prompt = format!(
            "The user query is: {}. The JSON response from the Graph API is: {}. Extract information from the \
             JSON response based on the user query and present it to the user in a readable format.",
            query, events
        );
        let answer = self.service.complete(CALENDAR_SYSTEM_PROMPT, &prompt).await?;
        Ok(Value::String(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityInvoker, FailureKind};
    use crate::llms::ScriptedCompletion;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn list_events(plugin: &GraphPlugin) -> Capability {
        plugin.functions().remove(0)
    }

    #[test]
    fn test_credential_is_redacted() {
        let credential = GraphCredential::new("eyJ0eXAi.secret");
        assert!(!format!("{:?}", credential).contains("secret"));
    }

    #[tokio::test]
    async fn test_list_calendar_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1.0/me/events"))
            .and(query_param("$select", EVENT_FIELDS))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [{"subject": "Standup", "start": {"dateTime": "2024-05-01T09:00:00"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = Arc::new(ScriptedCompletion::new().with_text("Your last meeting was Standup."));
        let plugin = GraphPlugin::with_base_url(GraphCredential::new("test-token"), service.clone(), server.uri());

        let result = CapabilityInvoker::new()
            .invoke(
                &list_events(&plugin),
                KernelArguments::new().with("user_query", "what was my last meeting"),
            )
            .await
            .unwrap();
        assert_eq!(result.text(), "Your last meeting was Standup.");

        let prompt = service.requests()[0].history.messages()[1].content.clone().unwrap_or_default();
        assert!(prompt.contains("what was my last meeting"));
        assert!(prompt.contains("Standup"));
    }

    #[tokio::test]
    async fn test_unauthorized_names_the_cause() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let service = Arc::new(ScriptedCompletion::new());
        let plugin = GraphPlugin::with_base_url(GraphCredential::new("expired"), service.clone(), server.uri());
        let err = CapabilityInvoker::new()
            .invoke(&list_events(&plugin), KernelArguments::new().with("user_query", "list events"))
            .await
            .unwrap_err();

        match err.kind {
            FailureKind::Body { message } => assert!(message.contains("401")),
            other => panic!("expected body failure, got {:?}", other),
        }
        assert!(service.requests().is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_names_the_permission() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let plugin = GraphPlugin::with_base_url(
            GraphCredential::new("t"),
            Arc::new(ScriptedCompletion::new()),
            server.uri(),
        );
        let err = CapabilityInvoker::new()
            .invoke(&list_events(&plugin), KernelArguments::new().with("user_query", "q"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Calendars.Read"));
    }
}
