//! Capability Invoker: validates arguments and runs a capability body.
//!
//! The invoker never lets a body failure escape as an error of its own: every
//! outcome comes back as an [`ExecutionResult`] value, so one failing step
//! cannot disturb the registry or its siblings.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::arguments::KernelArguments;
use super::capability::{Capability, QualifiedName};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of a single capability invocation.
pub type ExecutionResult = Result<FunctionResult, ExecutionFailure>;

/// A successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub capability: QualifiedName,
    pub value: Value,
    pub elapsed_ms: u64,
}

impl FunctionResult {
    /// The value as display text (strings verbatim).
    pub fn text(&self) -> String {
        super::arguments::value_to_text(&self.value)
    }
}

/// Why an invocation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// A required parameter had no value and no default.
    MissingArgument { parameter: String },
    /// A `$VAR` reference had no value when the step ran.
    UnresolvedReference { variable: String },
    /// The step named a capability the registry does not know.
    UnknownCapability,
    /// The body did not finish within the configured limit.
    Timeout { millis: u64 },
    /// The body returned an error.
    Body { message: String },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingArgument { parameter } => {
                write!(f, "missing required argument '{}'", parameter)
            }
            Self::UnresolvedReference { variable } => {
                write!(f, "variable '${}' has no value", variable)
            }
            Self::UnknownCapability => write!(f, "capability is not registered"),
            Self::Timeout { millis } => write!(f, "timed out after {}ms", millis),
            Self::Body { message } => write!(f, "{}", message),
        }
    }
}

/// A failed invocation with enough context to diagnose it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{capability}{}: {kind}", .step.map(|i| format!(" (step {})", i + 1)).unwrap_or_default())]
pub struct ExecutionFailure {
    pub capability: QualifiedName,
    /// Zero-based step index when the invocation ran inside a plan.
    pub step: Option<usize>,
    pub kind: FailureKind,
}

impl ExecutionFailure {
    pub fn new(capability: QualifiedName, kind: FailureKind) -> Self {
        Self {
            capability,
            step: None,
            kind,
        }
    }

    pub fn at_step(mut self, index: usize) -> Self {
        self.step = Some(index);
        self
    }
}

// ---------------------------------------------------------------------------
// CapabilityInvoker
// ---------------------------------------------------------------------------

/// Runs capabilities with argument validation and an optional time limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityInvoker {
    timeout: Option<Duration>,
}

impl CapabilityInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit every invocation to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Invoke `capability` with `arguments`.
    ///
    /// Missing required arguments are reported before the body runs.
    pub async fn invoke(&self, capability: &Capability, arguments: KernelArguments) -> ExecutionResult {
        let name = capability.qualified_name();
        let arguments = prepare_arguments(capability, arguments)
            .map_err(|kind| ExecutionFailure::new(name.clone(), kind))?;

        log::debug!("Invoking {} with {} argument(s)", name, arguments.len());
        let started = Instant::now();
        let call = capability.body().call(&arguments);

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::warn!("{} timed out after {:?}", name, limit);
                    return Err(ExecutionFailure::new(
                        name,
                        FailureKind::Timeout {
                            millis: limit.as_millis() as u64,
                        },
                    ));
                }
            },
            None => call.await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(value) => {
                log::debug!("{} finished in {}ms", name, elapsed_ms);
                Ok(FunctionResult {
                    capability: name,
                    value,
                    elapsed_ms,
                })
            }
            Err(e) => {
                log::warn!("{} failed: {}", name, e);
                Err(ExecutionFailure::new(
                    name,
                    FailureKind::Body {
                        message: e.to_string(),
                    },
                ))
            }
        }
    }
}

/// Apply defaults and check that every required parameter is present.
fn prepare_arguments(
    capability: &Capability,
    mut arguments: KernelArguments,
) -> Result<KernelArguments, FailureKind> {
    for parameter in capability.parameters() {
        if arguments.contains(&parameter.name) {
            continue;
        }
        if let Some(default) = &parameter.default {
            arguments.insert(parameter.name.clone(), default.clone());
        } else if parameter.required {
            return Err(FailureKind::MissingArgument {
                parameter: parameter.name.clone(),
            });
        }
    }
    Ok(arguments)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::capability::{FunctionError, NativeFunction, ParameterSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts how often its body actually ran.
    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NativeFunction for Counting {
        async fn call(&self, arguments: &KernelArguments) -> Result<Value, FunctionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(arguments.get_f64("number1")? * 2.0))
        }
    }

    fn counting() -> (Capability, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cap = Capability::new("Double", "Double a number", Arc::new(Counting { calls: calls.clone() }))
            .with_parameter(ParameterSpec::number("number1", "the number"))
            .in_namespace("math");
        (cap, calls)
    }

    #[tokio::test]
    async fn test_missing_argument_skips_body() {
        let (cap, calls) = counting();
        let err = CapabilityInvoker::new()
            .invoke(&cap, KernelArguments::new().with("other", 1))
            .await
            .unwrap_err();

        assert_eq!(
            err.kind,
            FailureKind::MissingArgument {
                parameter: "number1".into()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(err.to_string(), "math.Double: missing required argument 'number1'");
    }

    #[tokio::test]
    async fn test_default_fills_missing_argument() {
        let cap = Capability::from_fn("Greet", "Greet", |args| {
            Ok(json!(format!("hello {}", args.get_text("name")?)))
        })
        .with_parameter(ParameterSpec::string("name", "who").with_default("world"));

        let result = CapabilityInvoker::new()
            .invoke(&cap, KernelArguments::new())
            .await
            .unwrap();
        assert_eq!(result.text(), "hello world");
    }

    #[tokio::test]
    async fn test_body_error_becomes_failure() {
        let cap = Capability::from_fn("Boom", "Always fails", |_| {
            Err(FunctionError::Failed("kaboom".into()))
        })
        .in_namespace("test");

        let err = CapabilityInvoker::new()
            .invoke(&cap, KernelArguments::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Body { message: "kaboom".into() });
        assert_eq!(err.clone().at_step(1).to_string(), "test.Boom (step 2): kaboom");
    }

    #[tokio::test]
    async fn test_repeated_invocation_is_stable() {
        let (cap, calls) = counting();
        let invoker = CapabilityInvoker::new();
        let args = KernelArguments::new().with("number1", 21);

        let first = invoker.invoke(&cap, args.clone()).await.unwrap();
        let second = invoker.invoke(&cap, args).await.unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(first.value.as_f64(), Some(42.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct Sleepy;

    #[async_trait]
    impl NativeFunction for Sleepy {
        async fn call(&self, _arguments: &KernelArguments) -> Result<Value, FunctionError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let cap = Capability::new("Slow", "Sleeps", Arc::new(Sleepy)).in_namespace("test");
        let err = CapabilityInvoker::new()
            .with_timeout(Duration::from_millis(20))
            .invoke(&cap, KernelArguments::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Timeout { millis: 20 });
    }
}
