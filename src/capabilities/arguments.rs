//! Argument bags passed to capabilities.
//!
//! Two shapes exist. [`ArgumentBag`] is what a plan step declares: each value
//! is either a literal or a reference to an earlier step's output.
//! [`KernelArguments`] is what a capability body receives once every
//! reference has been resolved to a concrete JSON value.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::capability::FunctionError;

/// Matches a whole-value variable reference such as `$SUM` or `$step1`.
static REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*)$").expect("Invalid regex"));

// ---------------------------------------------------------------------------
// ArgValue / ArgumentBag
// ---------------------------------------------------------------------------

/// A declared argument value inside a plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgValue {
    /// A concrete value passed through unchanged.
    Literal(Value),
    /// The output of an earlier step, by variable name (without the `$`).
    Reference(String),
}

impl ArgValue {
    /// Build a reference to the output variable `name`.
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into().trim_start_matches('$').to_string())
    }

    /// Interpret a value produced by the model.
    ///
    /// A string consisting solely of `$IDENT` becomes a reference; anything
    /// else is a literal.
    pub fn from_model_value(value: Value) -> Self {
        if let Value::String(s) = &value {
            if let Some(caps) = REFERENCE_RE.captures(s.trim()) {
                return Self::Reference(caps[1].to_string());
            }
        }
        Self::Literal(value)
    }

    /// The referenced variable, if this is a reference.
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Self::Reference(name) => Some(name),
            Self::Literal(_) => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Value::String(s)) => write!(f, "{:?}", s),
            Self::Literal(v) => write!(f, "{}", v),
            Self::Reference(name) => write!(f, "${}", name),
        }
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        Self::Literal(Value::String(value))
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        Self::Literal(serde_json::json!(value))
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Literal(serde_json::json!(value))
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        Self::Literal(serde_json::json!(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        Self::Literal(Value::Bool(value))
    }
}

/// Declared arguments of a plan step, keyed by parameter name.
pub type ArgumentBag = BTreeMap<String, ArgValue>;

// ---------------------------------------------------------------------------
// KernelArguments
// ---------------------------------------------------------------------------

/// Resolved arguments handed to a capability body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelArguments(BTreeMap<String, Value>);

impl KernelArguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Fetch an argument as text.
    ///
    /// Strings come back verbatim; other JSON values are rendered compactly.
    pub fn get_text(&self, name: &str) -> Result<String, FunctionError> {
        match self.0.get(name) {
            Some(value) => Ok(value_to_text(value)),
            None => Err(FunctionError::missing(name)),
        }
    }

    /// Fetch an argument as a float, coercing numeric strings.
    pub fn get_f64(&self, name: &str) -> Result<f64, FunctionError> {
        match self.0.get(name) {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| FunctionError::InvalidArgument {
                name: name.to_string(),
                message: format!("{} is not representable as a float", n),
            }),
            Some(Value::String(s)) => {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| FunctionError::InvalidArgument {
                        name: name.to_string(),
                        message: format!("expected a number, got {:?}", s),
                    })
            }
            Some(other) => Err(FunctionError::InvalidArgument {
                name: name.to_string(),
                message: format!("expected a number, got {}", other),
            }),
            None => Err(FunctionError::missing(name)),
        }
    }
}

/// Render a JSON value as prompt text: strings verbatim, the rest compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for KernelArguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for KernelArguments {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl IntoIterator for KernelArguments {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
