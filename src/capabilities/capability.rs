//! Capability definition: a named, invocable unit with a parameter schema.
//!
//! A capability is either native Rust code or a rendered prompt sent to the
//! completion service. Both share the same shape, so the registry, planner
//! and executor never need to know which one they are running.
//!
//! ```ignore
//! let add = Capability::from_fn("Add", "Add two numbers.", |args| {
//!     Ok(json!(args.get_f64("number1")? + args.get_f64("number2")?))
//! })
//! .with_parameter(ParameterSpec::number("number1", "the first number to add"))
//! .with_parameter(ParameterSpec::number("number2", "the second number to add"));
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::arguments::KernelArguments;
use crate::llms::{CompletionError, ToolDefinition};
use crate::prompts::TemplateError;

// ---------------------------------------------------------------------------
// QualifiedName
// ---------------------------------------------------------------------------

/// Namespaced identity of a capability: `namespace.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `ns.Name` or the function-calling form `ns-Name`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (namespace, name) = text.split_once('.').or_else(|| text.split_once('-'))?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }

    /// Name used when offering the capability as a tool (`ns-Name`).
    ///
    /// Function-calling APIs reject dots in tool names.
    pub fn tool_name(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Informal parameter type, rendered into planner prompts and tool schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
}

impl ParameterType {
    /// JSON schema type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }
}

/// One declared parameter of a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    /// A required parameter must be present in the argument bag (or have a default).
    pub required: bool,
    /// Value used when the argument is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        param_type: ParameterType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type,
            required: true,
            default: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParameterType::String)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParameterType::Number)
    }

    /// Make the parameter optional with the given default.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }

    /// Make the parameter optional without a default.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

// ---------------------------------------------------------------------------
// FunctionError
// ---------------------------------------------------------------------------

/// Failure raised by a capability body.
#[derive(Debug, Error)]
pub enum FunctionError {
    /// An argument was present but unusable, or absent when read.
    #[error("invalid argument '{name}': {message}")]
    InvalidArgument { name: String, message: String },

    /// The completion service failed while the body was calling it.
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    /// A prompt template could not be rendered.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// An outbound HTTP request failed.
    #[error("request failed: {0}")]
    Request(String),

    /// Any other failure reported by the body.
    #[error("{0}")]
    Failed(String),
}

impl FunctionError {
    pub(crate) fn missing(name: &str) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            message: "argument is missing".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// NativeFunction
// ---------------------------------------------------------------------------

/// The callable body of a capability.
#[async_trait]
pub trait NativeFunction: Send + Sync {
    async fn call(&self, arguments: &KernelArguments) -> Result<Value, FunctionError>;
}

/// Adapter turning a synchronous closure into a [`NativeFunction`].
pub struct FnFunction<F>(pub F);

#[async_trait]
impl<F> NativeFunction for FnFunction<F>
where
    F: Fn(&KernelArguments) -> Result<Value, FunctionError> + Send + Sync,
{
    async fn call(&self, arguments: &KernelArguments) -> Result<Value, FunctionError> {
        (self.0)(arguments)
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// A registered function: identity, description, parameter schema and body.
///
/// The namespace is assigned when the capability is registered; a capability
/// built by hand lives in the empty namespace until then.
#[derive(Clone)]
pub struct Capability {
    namespace: String,
    name: String,
    description: String,
    parameters: Vec<ParameterSpec>,
    returns: Option<String>,
    body: Arc<dyn NativeFunction>,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("returns", &self.returns)
            .finish()
    }
}

impl Capability {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        body: Arc<dyn NativeFunction>,
    ) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            returns: None,
            body,
        }
    }

    /// Create a capability from a synchronous closure.
    pub fn from_fn<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&KernelArguments) -> Result<Value, FunctionError> + Send + Sync + 'static,
    {
        Self::new(name, description, Arc::new(FnFunction(func)))
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Describe the return value (shown to the planner).
    pub fn with_returns(mut self, description: impl Into<String>) -> Self {
        self.returns = Some(description.into());
        self
    }

    pub(crate) fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn returns(&self) -> Option<&str> {
        self.returns.as_deref()
    }

    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(&self.namespace, &self.name)
    }

    pub(crate) fn body(&self) -> &Arc<dyn NativeFunction> {
        &self.body
    }

    /// Render this capability for the planner's function manual.
    pub fn manual_entry(&self) -> String {
        let mut entry = format!("{}:\n  description: {}\n", self.qualified_name(), self.description);
        if self.parameters.is_empty() {
            entry.push_str("  inputs: none\n");
        } else {
            entry.push_str("  inputs:\n");
            for p in &self.parameters {
                let optional = if p.required { "" } else { ", optional" };
                entry.push_str(&format!(
                    "    - {} ({}{}): {}\n",
                    p.name,
                    p.param_type.as_str(),
                    optional,
                    p.description
                ));
            }
        }
        if let Some(returns) = &self.returns {
            entry.push_str(&format!("  returns: {}\n", returns));
        }
        entry
    }

    /// JSON-schema tool definition for automatic function calling.
    pub fn tool_definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            properties.insert(
                p.name.clone(),
                serde_json::json!({
                    "type": p.param_type.as_str(),
                    "description": p.description,
                }),
            );
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }

        ToolDefinition {
            name: self.qualified_name().tool_name(),
            description: self.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// A group of capabilities registered together under one namespace.
pub trait Plugin {
    fn functions(&self) -> Vec<Capability>;
}

impl Plugin for Vec<Capability> {
    fn functions(&self) -> Vec<Capability> {
        self.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
