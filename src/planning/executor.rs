//! Plan Executor: runs a resolved plan and aggregates the outcome.
//!
//! # Modes
//!
//! - **Sequential**: steps run in order. Each output is bound to the step's
//!   output variable and to `step{N}`, and later steps read those through
//!   `$VAR` references. The first failure stops the run; the remaining
//!   steps are reported as not attempted.
//! - **Parallel**: every step is dispatched at once and joined. Only plans
//!   whose steps do not read each other's outputs qualify. A failing step
//!   does not cancel its siblings.
//! - **Auto**: parallel for independent plans of more than one step,
//!   sequential otherwise.
//!
//! Step failures never surface as `Err`; they are recorded in the
//! [`AggregatedResult`]. `Err` is reserved for misuse (wrong plan state,
//! dependent plan in parallel mode).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ExecutionError;
use super::plan::{step_variable, Plan, PlanState, PlanStep};
use super::result::{AggregatedResult, StepOutcome, StepReport};
use crate::capabilities::{
    ArgValue, CapabilityInvoker, CapabilityRegistry, ExecutionFailure, ExecutionResult, FailureKind,
    KernelArguments,
};
use crate::llms::{ChatCompletion, CompletionError};

const SYNTHESIS_PROMPT: &str = "You combine the results of executed steps into one answer to the user's goal. \
Use only the results given. If a step failed or was not attempted, say briefly what could not be done.";

/// How the steps of a plan are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
    Auto,
}

// ---------------------------------------------------------------------------
// PlanExecutor
// ---------------------------------------------------------------------------

/// Runs plans against a registry.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    registry: Arc<CapabilityRegistry>,
    invoker: CapabilityInvoker,
    synthesizer: Option<Arc<dyn ChatCompletion>>,
}

impl PlanExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            registry,
            invoker: CapabilityInvoker::new(),
            synthesizer: None,
        }
    }

    pub fn with_invoker(mut self, invoker: CapabilityInvoker) -> Self {
        self.invoker = invoker;
        self
    }

    /// Finish every run with one model call that turns the step results
    /// into a single answer.
    pub fn with_synthesis(mut self, service: Arc<dyn ChatCompletion>) -> Self {
        self.synthesizer = Some(service);
        self
    }

    /// Execute a resolved plan.
    pub async fn execute(&self, mut plan: Plan, mode: ExecutionMode) -> Result<AggregatedResult, ExecutionError> {
        if plan.state() != PlanState::Resolved {
            return Err(ExecutionError::NotResolved(plan.state()));
        }

        let mode = match mode {
            ExecutionMode::Auto if plan.is_independent() && plan.len() > 1 => ExecutionMode::Parallel,
            ExecutionMode::Auto => ExecutionMode::Sequential,
            other => other,
        };
        if mode == ExecutionMode::Parallel {
            if let Some((step, variable)) = plan.first_dependency() {
                return Err(ExecutionError::DependentSteps {
                    step,
                    variable: variable.to_string(),
                });
            }
        }

        plan.transition(PlanState::Executing)?;
        log::info!(
            "Executing plan {} ({} step(s), {:?})",
            plan.id,
            plan.len(),
            mode
        );
        let started_at = Utc::now();

        let steps = match mode {
            ExecutionMode::Parallel => self.run_parallel(&plan.steps).await,
            _ => self.run_sequential(&plan.steps).await,
        };

        let completed = steps
            .iter()
            .all(|s| matches!(s.outcome, StepOutcome::Succeeded(_)));
        plan.transition(if completed {
            PlanState::Completed
        } else {
            PlanState::Failed
        })?;

        let mut result = AggregatedResult {
            plan_id: plan.id,
            goal: plan.goal.clone(),
            mode,
            steps,
            state: plan.state(),
            answer: None,
            synthesis_warning: None,
            started_at,
            finished_at: started_at,
        };

        match &self.synthesizer {
            Some(service) => match synthesize(service.as_ref(), &result).await {
                Ok(answer) => result.answer = Some(answer),
                Err(e) => {
                    log::warn!("Synthesis failed for plan {}: {}", plan.id, e);
                    result.answer = Some(result.raw_results());
                    result.synthesis_warning = Some(format!("synthesis failed: {}", e));
                }
            },
            None if completed && mode == ExecutionMode::Sequential => {
                result.answer = result.results().last().map(|r| r.text());
            }
            None => {}
        }

        result.finished_at = Utc::now();
        log::info!(
            "Plan {} {} in {}ms",
            plan.id,
            result.state,
            result.elapsed_ms()
        );
        Ok(result)
    }

    async fn run_sequential(&self, steps: &[PlanStep]) -> Vec<StepReport> {
        let mut variables: HashMap<String, Value> = HashMap::new();
        let mut reports = Vec::with_capacity(steps.len());
        let mut failed = false;

        for (index, step) in steps.iter().enumerate() {
            let outcome = if failed {
                StepOutcome::NotAttempted
            } else {
                match self.run_step(index, step, &variables).await {
                    Ok(result) => {
                        if let Some(output) = &step.output {
                            variables.insert(output.clone(), result.value.clone());
                        }
                        variables.insert(step_variable(index), result.value.clone());
                        StepOutcome::Succeeded(result)
                    }
                    Err(failure) => {
                        log::warn!("Stopping plan at step {}: {}", index + 1, failure);
                        failed = true;
                        StepOutcome::Failed(failure)
                    }
                }
            };
            reports.push(report(index, step, outcome));
        }

        reports
    }

    async fn run_parallel(&self, steps: &[PlanStep]) -> Vec<StepReport> {
        let no_variables = HashMap::new();
        let outcomes = join_all(
            steps
                .iter()
                .enumerate()
                .map(|(index, step)| self.run_step(index, step, &no_variables)),
        )
        .await;

        steps
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (step, outcome))| {
                let outcome = match outcome {
                    Ok(result) => StepOutcome::Succeeded(result),
                    Err(failure) => StepOutcome::Failed(failure),
                };
                report(index, step, outcome)
            })
            .collect()
    }

    /// Resolve references, look up the capability and invoke it.
    async fn run_step(&self, index: usize, step: &PlanStep, variables: &HashMap<String, Value>) -> ExecutionResult {
        let fail = |kind: FailureKind| -> ExecutionResult {
            Err(ExecutionFailure::new(step.capability.clone(), kind).at_step(index))
        };

        let mut arguments = KernelArguments::new();
        for (name, value) in &step.arguments {
            match value {
                ArgValue::Literal(v) => arguments.insert(name.clone(), v.clone()),
                ArgValue::Reference(variable) => match variables.get(variable) {
                    Some(v) => arguments.insert(name.clone(), v.clone()),
                    None => {
                        return fail(FailureKind::UnresolvedReference {
                            variable: variable.clone(),
                        })
                    }
                },
            }
        }

        let capability = match self.registry.resolve_name(&step.capability) {
            Ok(capability) => capability,
            Err(_) => return fail(FailureKind::UnknownCapability),
        };

        log::debug!("Step {}: {}", index + 1, step.capability);
        self.invoker
            .invoke(&capability, arguments)
            .await
            .map_err(|failure| failure.at_step(index))
    }
}

fn report(index: usize, step: &PlanStep, outcome: StepOutcome) -> StepReport {
    StepReport {
        index,
        capability: step.capability.clone(),
        description: step.description.clone(),
        output: step.output.clone(),
        outcome,
    }
}

async fn synthesize(service: &dyn ChatCompletion, result: &AggregatedResult) -> Result<String, CompletionError> {
    let user_prompt = format!("Goal: {}\n\nResults:\n{}", result.goal, result.raw_results());
    service.complete(SYNTHESIS_PROMPT, &user_prompt).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Capability, FunctionError, QualifiedName};
    use crate::llms::ScriptedCompletion;
    use crate::plugins::MathPlugin;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn math(name: &str) -> QualifiedName {
        QualifiedName::new("MathPlugin", name)
    }

    fn registry_with(extra: Vec<Capability>) -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new();
        registry.add_plugin("MathPlugin", &MathPlugin).unwrap();
        registry.add_plugin("test", &extra).unwrap();
        Arc::new(registry)
    }

    fn add_then_multiply() -> Plan {
        Plan::from_steps(
            "add 2 and 3 then multiply by 4",
            vec![
                PlanStep::new(math("Add"))
                    .with_argument("number1", 2)
                    .with_argument("number2", 3)
                    .with_output("SUM"),
                PlanStep::new(math("Multiply"))
                    .with_argument("number1", ArgValue::reference("SUM"))
                    .with_argument("number2", 4),
            ],
        )
    }

    #[tokio::test]
    async fn test_sequential_threads_outputs() {
        let executor = PlanExecutor::new(registry_with(vec![]));
        let result = executor
            .execute(add_then_multiply(), ExecutionMode::Sequential)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.state, PlanState::Completed);
        assert_eq!(result.results().count(), 2);
        assert_eq!(result.answer.as_deref(), Some("20.0"));
        assert_eq!(result.results().last().unwrap().value.as_f64(), Some(20.0));
    }

    #[tokio::test]
    async fn test_positional_step_variables() {
        let plan = Plan::from_steps(
            "g",
            vec![
                PlanStep::new(math("Sqrt")).with_argument("number1", 81),
                PlanStep::new(math("Sqrt")).with_argument("number1", ArgValue::reference("step1")),
            ],
        );
        let result = PlanExecutor::new(registry_with(vec![]))
            .execute(plan, ExecutionMode::Sequential)
            .await
            .unwrap();
        assert_eq!(result.answer.as_deref(), Some("3.0"));
    }

    #[tokio::test]
    async fn test_sequential_fail_fast() {
        let third_calls = Arc::new(AtomicUsize::new(0));
        let counter = third_calls.clone();
        let extra = vec![
            Capability::from_fn("Fail", "Always fails", |_| Err(FunctionError::Failed("boom".into()))),
            Capability::from_fn("Count", "Counts calls", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("counted"))
            }),
        ];
        let plan = Plan::from_steps(
            "three steps",
            vec![
                PlanStep::new(math("Sqrt")).with_argument("number1", 4),
                PlanStep::new(QualifiedName::new("test", "Fail")),
                PlanStep::new(QualifiedName::new("test", "Count")),
            ],
        );

        let result = PlanExecutor::new(registry_with(extra))
            .execute(plan, ExecutionMode::Sequential)
            .await
            .unwrap();

        assert_eq!(result.state, PlanState::Failed);
        assert!(matches!(result.steps[0].outcome, StepOutcome::Succeeded(_)));
        let failure = result.first_failure().unwrap();
        assert_eq!(failure.step, Some(1));
        assert_eq!(failure.capability, QualifiedName::new("test", "Fail"));
        assert_eq!(result.steps[2].outcome, StepOutcome::NotAttempted);
        assert_eq!(result.not_attempted(), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.answer, None);
    }

    #[tokio::test]
    async fn test_parallel_reports_every_outcome() {
        let plan = Plan::from_steps(
            "root of 16 and a division by zero",
            vec![
                PlanStep::new(math("Sqrt")).with_argument("number1", 16),
                PlanStep::new(math("Divide"))
                    .with_argument("number1", 1)
                    .with_argument("number2", 0),
                PlanStep::new(math("Add"))
                    .with_argument("number1", 1)
                    .with_argument("number2", 1),
            ],
        );

        let result = PlanExecutor::new(registry_with(vec![]))
            .execute(plan, ExecutionMode::Parallel)
            .await
            .unwrap();

        assert_eq!(result.mode, ExecutionMode::Parallel);
        assert_eq!(result.state, PlanState::Failed);
        match &result.steps[0].outcome {
            StepOutcome::Succeeded(r) => assert_eq!(r.value.as_f64(), Some(4.0)),
            other => panic!("expected success, got {:?}", other),
        }
        assert!(matches!(result.steps[1].outcome, StepOutcome::Failed(_)));
        assert!(matches!(result.steps[2].outcome, StepOutcome::Succeeded(_)));
        assert_eq!(result.answer, None);
    }

    #[tokio::test]
    async fn test_parallel_rejects_dependent_plan() {
        let err = PlanExecutor::new(registry_with(vec![]))
            .execute(add_then_multiply(), ExecutionMode::Parallel)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExecutionError::DependentSteps {
                step: 1,
                variable: "SUM".into()
            }
        );
    }

    #[tokio::test]
    async fn test_auto_mode_selection() {
        let executor = PlanExecutor::new(registry_with(vec![]));
        let result = executor
            .execute(add_then_multiply(), ExecutionMode::Auto)
            .await
            .unwrap();
        assert_eq!(result.mode, ExecutionMode::Sequential);

        let independent = Plan::from_steps(
            "g",
            vec![
                PlanStep::new(math("Sqrt")).with_argument("number1", 9),
                PlanStep::new(math("Sqrt")).with_argument("number1", 4),
            ],
        );
        let result = executor.execute(independent, ExecutionMode::Auto).await.unwrap();
        assert_eq!(result.mode, ExecutionMode::Parallel);
    }

    #[tokio::test]
    async fn test_only_resolved_plans_run() {
        let err = PlanExecutor::new(registry_with(vec![]))
            .execute(Plan::new("unresolved"), ExecutionMode::Sequential)
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::NotResolved(PlanState::Created));
    }

    #[tokio::test]
    async fn test_unknown_capability_is_step_failure() {
        let plan = Plan::from_steps("g", vec![PlanStep::new(math("Power"))]);
        let result = PlanExecutor::new(registry_with(vec![]))
            .execute(plan, ExecutionMode::Sequential)
            .await
            .unwrap();
        assert_eq!(result.first_failure().unwrap().kind, FailureKind::UnknownCapability);
    }

    #[tokio::test]
    async fn test_synthesis_answer() {
        let service = Arc::new(ScriptedCompletion::new().with_text("The answer is 20."));
        let executor = PlanExecutor::new(registry_with(vec![])).with_synthesis(service.clone());
        let result = executor
            .execute(add_then_multiply(), ExecutionMode::Sequential)
            .await
            .unwrap();

        assert_eq!(result.answer.as_deref(), Some("The answer is 20."));
        assert_eq!(result.synthesis_warning, None);
        let prompt = service.requests()[0].history.messages()[1]
            .content
            .clone()
            .unwrap_or_default();
        assert!(prompt.contains("Goal: add 2 and 3 then multiply by 4"));
        assert!(prompt.contains("2. MathPlugin.Multiply: 20.0"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_falls_back_to_raw_results() {
        let service = Arc::new(ScriptedCompletion::new().with_error(CompletionError::Transient("down".into())));
        let executor = PlanExecutor::new(registry_with(vec![])).with_synthesis(service);
        let result = executor
            .execute(add_then_multiply(), ExecutionMode::Sequential)
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(
            result.answer.as_deref(),
            Some("1. MathPlugin.Add: 5.0\n2. MathPlugin.Multiply: 20.0")
        );
        assert!(result.synthesis_warning.unwrap().contains("down"));
    }
}
