//! Typed settings read from the environment.
//!
//! The binary loads a `.env` file first, so values may come from either
//! place. Every reader has a `from_lookup` twin taking a key lookup function,
//! which keeps tests away from the process environment.

use std::fmt;

use thiserror::Error;

/// Default Azure OpenAI API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

/// Default Microsoft Graph base URL.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com";

/// Configuration problems, reported before any outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Read a required, non-blank value.
fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

/// Read an optional value; blank counts as absent.
fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn http_url(key: &'static str, value: String) -> Result<String, ConfigError> {
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("expected an http(s) URL, got '{}'", value),
        })
    }
}

// ---------------------------------------------------------------------------
// Azure OpenAI
// ---------------------------------------------------------------------------

/// Connection settings for the Azure OpenAI chat deployment.
#[derive(Clone, PartialEq, Eq)]
pub struct AzureOpenAiSettings {
    /// `AZURE_OPENAI_ENDPOINT`
    pub endpoint: String,
    /// `AZURE_OPENAI_API_KEY`
    pub api_key: String,
    /// `AZURE_OPENAI_CHAT_COMPLETION_MODEL`
    pub deployment: String,
    /// `AZURE_OPENAI_API_VERSION`
    pub api_version: String,
}

impl AzureOpenAiSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            endpoint: http_url("AZURE_OPENAI_ENDPOINT", required(&lookup, "AZURE_OPENAI_ENDPOINT")?)?,
            api_key: required(&lookup, "AZURE_OPENAI_API_KEY")?,
            deployment: required(&lookup, "AZURE_OPENAI_CHAT_COMPLETION_MODEL")?,
            api_version: optional(&lookup, "AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
        })
    }
}

impl fmt::Debug for AzureOpenAiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureOpenAiSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Microsoft Graph
// ---------------------------------------------------------------------------

/// Settings for the calendar sample. The token is acquired elsewhere.
#[derive(Clone, PartialEq, Eq)]
pub struct GraphSettings {
    /// `GRAPH_ACCESS_TOKEN`
    pub access_token: String,
    /// `GRAPH_BASE_URL`
    pub base_url: String,
}

impl GraphSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = optional(&lookup, "GRAPH_BASE_URL").unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string());
        Ok(Self {
            access_token: required(&lookup, "GRAPH_ACCESS_TOKEN")?,
            base_url: http_url("GRAPH_BASE_URL", base_url)?,
        })
    }
}

impl fmt::Debug for GraphSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSettings")
            .field("access_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AI project (reported only)
// ---------------------------------------------------------------------------

/// Agent-service settings. Read and reported; no client uses them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSettings {
    /// `AI_PROJECT_CONNECTION_STRING`
    pub connection_string: Option<String>,
    /// `BING_CONNECTION_NAME`
    pub bing_connection_name: Option<String>,
}

impl ProjectSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            connection_string: optional(&lookup, "AI_PROJECT_CONNECTION_STRING"),
            bing_connection_name: optional(&lookup, "BING_CONNECTION_NAME"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.connection_string.is_some() && self.bing_connection_name.is_some()
    }
}
