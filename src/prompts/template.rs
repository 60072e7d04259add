//! Prompt templates with `{{$variable}}` placeholders.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::capabilities::arguments::{value_to_text, KernelArguments};

static VARIABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*\$([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("Invalid regex")
});

/// Errors raised while rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template variable '{0}' has no value")]
    MissingVariable(String),
}

/// A prompt with `{{$name}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Placeholder names in order of first appearance, without duplicates.
    pub fn variables(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for cap in VARIABLE_PATTERN.captures_iter(&self.text) {
            let name = cap[1].to_string();
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    /// Substitute every placeholder from `arguments`.
    ///
    /// String values are inserted verbatim, other JSON values compactly.
    pub fn render(&self, arguments: &KernelArguments) -> Result<String, TemplateError> {
        if let Some(missing) = self.variables().into_iter().find(|v| !arguments.contains(v)) {
            return Err(TemplateError::MissingVariable(missing));
        }

        let rendered = VARIABLE_PATTERN.replace_all(&self.text, |cap: &regex::Captures<'_>| {
            arguments.get(&cap[1]).map(value_to_text).unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}
