//! # Kernel
//!
//! The facade the samples talk to. A kernel owns a frozen capability
//! registry, an optional completion service and the invoker settings, and
//! offers direct invocation, planning, plan execution and automatic
//! function calling on top of them.
//!
//! ```ignore
//! let service: Arc<dyn ChatCompletion> = Arc::new(AzureChatCompletion::from_settings(&settings));
//! let kernel = Kernel::builder()
//!     .with_service(service.clone())
//!     .add_plugin("MathPlugin", &MathPlugin)?
//!     .add_plugin("basic_plugin", &BasicPlugin::new(service))?
//!     .build();
//!
//! let plan = kernel.create_plan("add 2 and 3 then multiply by 4").await?;
//! let result = kernel.execute_plan(plan, ExecutionMode::Sequential).await?;
//! ```

pub mod function_calling;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::capabilities::{
    Capability, CapabilityInvoker, CapabilityRegistry, ExecutionFailure, FunctionResult, KernelArguments, Plugin,
    RegistryError,
};
use crate::llms::{ChatCompletion, CompletionError};
use crate::planning::{
    AggregatedResult, ExecutionError, ExecutionMode, Plan, PlanExecutor, PlannerConfig, PlannerError,
    SequentialPlanner,
};

pub use function_calling::{FunctionChoice, MAX_AUTO_INVOKE_ROUNDS};

// ---------------------------------------------------------------------------
// KernelError
// ---------------------------------------------------------------------------

/// Any failure surfaced by the kernel facade.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A directly invoked capability failed.
    #[error(transparent)]
    Invocation(#[from] ExecutionFailure),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// The operation needs a completion service and none was configured.
    #[error("no chat completion service configured")]
    NoService,
}

// ---------------------------------------------------------------------------
// KernelBuilder
// ---------------------------------------------------------------------------

/// Assembles a [`Kernel`]. Registration happens only here.
#[derive(Debug, Default)]
pub struct KernelBuilder {
    registry: CapabilityRegistry,
    service: Option<Arc<dyn ChatCompletion>>,
    invoker: CapabilityInvoker,
}

impl KernelBuilder {
    pub fn with_service(mut self, service: Arc<dyn ChatCompletion>) -> Self {
        self.service = Some(service);
        self
    }

    /// Limit every capability invocation to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.invoker = self.invoker.with_timeout(timeout);
        self
    }

    pub fn add_plugin<P: Plugin + ?Sized>(mut self, namespace: &str, plugin: &P) -> Result<Self, KernelError> {
        self.registry.add_plugin(namespace, plugin)?;
        Ok(self)
    }

    pub fn register(mut self, namespace: &str, capability: Capability) -> Result<Self, KernelError> {
        self.registry.register(namespace, capability)?;
        Ok(self)
    }

    pub fn build(self) -> Kernel {
        log::info!(
            "Kernel built with {} capabilities in {} namespace(s)",
            self.registry.len(),
            self.registry.namespaces().len()
        );
        Kernel {
            registry: Arc::new(self.registry),
            service: self.service,
            invoker: self.invoker,
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// Frozen registry plus services. Cheap to clone and share.
#[derive(Debug, Clone)]
pub struct Kernel {
    registry: Arc<CapabilityRegistry>,
    service: Option<Arc<dyn ChatCompletion>>,
    invoker: CapabilityInvoker,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn service(&self) -> Result<&Arc<dyn ChatCompletion>, KernelError> {
        self.service.as_ref().ok_or(KernelError::NoService)
    }

    /// Invoke one capability directly.
    pub async fn invoke(
        &self,
        namespace: &str,
        name: &str,
        arguments: KernelArguments,
    ) -> Result<FunctionResult, KernelError> {
        let capability = self.registry.resolve(namespace, name)?;
        Ok(self.invoker.invoke(&capability, arguments).await?)
    }

    pub fn planner(&self) -> Result<SequentialPlanner, KernelError> {
        Ok(SequentialPlanner::new(self.registry.clone(), self.service()?.clone()))
    }

    pub async fn create_plan(&self, goal: &str) -> Result<Plan, KernelError> {
        self.create_plan_with(PlannerConfig::default(), goal).await
    }

    pub async fn create_plan_with(&self, config: PlannerConfig, goal: &str) -> Result<Plan, KernelError> {
        Ok(self.planner()?.with_config(config).create_plan(goal).await?)
    }

    pub fn executor(&self) -> PlanExecutor {
        PlanExecutor::new(self.registry.clone()).with_invoker(self.invoker)
    }

    pub async fn execute_plan(&self, plan: Plan, mode: ExecutionMode) -> Result<AggregatedResult, KernelError> {
        Ok(self.executor().execute(plan, mode).await?)
    }

    /// Execute, then ask the model for a single answer built from the results.
    pub async fn execute_plan_with_synthesis(
        &self,
        plan: Plan,
        mode: ExecutionMode,
    ) -> Result<AggregatedResult, KernelError> {
        let executor = self.executor().with_synthesis(self.service()?.clone());
        Ok(executor.execute(plan, mode).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::FailureKind;
    use crate::llms::ScriptedCompletion;
    use crate::planning::PlanState;
    use crate::plugins::{BasicPlugin, MathPlugin};

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
    async fn test_direct_invoke() {
        let kernel = kernel(Arc::new(ScriptedCompletion::new()));
        let result = kernel
            .invoke("MathPlugin", "Sqrt", KernelArguments::new().with("number1", 4))
            .await
            .unwrap();
        assert_eq!(result.value.as_f64(), Some(2.0));
    }

    #[tokio::test]
    async fn test_invoke_errors() {
        let kernel = kernel(Arc::new(ScriptedCompletion::new()));
        assert!(matches!(
            kernel.invoke("MathPlugin", "Power", KernelArguments::new()).await,
            Err(KernelError::Registry(RegistryError::UnknownCapability { .. }))
        ));
        match kernel.invoke("MathPlugin", "Add", KernelArguments::new()).await {
            Err(KernelError::Invocation(failure)) => {
                assert!(matches!(failure.kind, FailureKind::MissingArgument { .. }))
            }
            other => panic!("expected invocation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_plugin_rejected() {
        let result = Kernel::builder()
            .add_plugin("MathPlugin", &MathPlugin)
            .unwrap()
            .add_plugin("MathPlugin", &MathPlugin);
        assert!(matches!(
            result,
            Err(KernelError::Registry(RegistryError::DuplicateCapability { .. }))
        ));
    }

    #[tokio::test]
    async fn test_plan_and_execute_goal() {
        let service = Arc::new(ScriptedCompletion::new().with_text(
            r#"```json
[
  {"capability": "MathPlugin.Add", "description": "Add 2 and 3", "arguments": {"number1": 2, "number2": 3}, "output": "SUM"},
  {"capability": "MathPlugin.Multiply", "description": "Multiply the sum by 4", "arguments": {"number1": "$SUM", "number2": 4}}
]
```"#,
        ));
        let kernel = kernel(service);

        let plan = kernel.create_plan("add 2 and 3 then multiply by 4").await.unwrap();
        let result = kernel.execute_plan(plan, ExecutionMode::Sequential).await.unwrap();

        assert_eq!(result.state, PlanState::Completed);
        assert_eq!(result.results().last().unwrap().value.as_f64(), Some(20.0));
    }

    #[tokio::test]
    async fn test_execute_with_synthesis() {
        let service = Arc::new(
            ScriptedCompletion::new()
                .with_text(r#"[{"capability": "MathPlugin.Sqrt", "arguments": {"number1": 16}}]"#)
                .with_text("The square root of 16 is 4."),
        );
        let kernel = kernel(service);
        let plan = kernel.create_plan("what is the square root of 16").await.unwrap();
        let result = kernel
            .execute_plan_with_synthesis(plan, ExecutionMode::Auto)
            .await
            .unwrap();
        assert_eq!(result.answer.as_deref(), Some("The square root of 16 is 4."));
    }

    #[tokio::test]
    async fn test_planning_needs_service() {
        let kernel = Kernel::builder().add_plugin("MathPlugin", &MathPlugin).unwrap().build();
        assert!(matches!(kernel.create_plan("x").await, Err(KernelError::NoService)));
    }
}
