//! Goal-to-Plan Resolver.
//!
//! [`SequentialPlanner`] describes every eligible capability to the model,
//! asks for an ordered list of calls that achieves the goal, and validates
//! the answer against the registry before handing back a resolved [`Plan`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::error::PlannerError;
use super::parser::{parse_plan, RawStep};
use super::plan::{step_variable, Plan, PlanState, PlanStep};
use crate::capabilities::{ArgValue, Capability, CapabilityRegistry, QualifiedName};
use crate::llms::ChatCompletion;

const PLANNER_INSTRUCTIONS: &str = r#"You are a planner. Build a plan that achieves the user's goal using ONLY the functions listed below.

Answer with a JSON array and nothing else. Each element is one function call:
{"capability": "<namespace>.<Name>", "description": "<what this step does>", "arguments": {"<parameter>": <value>}, "output": "<VARIABLE>"}

Rules:
- Steps run in order.
- To use the result of an earlier step, give it an "output" name and pass "$<VARIABLE>" as the argument value.
- Supply every parameter that is not marked optional.
- Use literal values taken from the goal wherever possible.
- Omit "output" when no later step needs the result."#;

// ---------------------------------------------------------------------------
// PlannerConfig
// ---------------------------------------------------------------------------

/// Planner options.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Namespaces hidden from the planner.
    pub excluded_namespaces: Vec<String>,
    /// Functions hidden from the planner, as `Name` or `namespace.Name`.
    pub excluded_functions: Vec<String>,
    /// Drop steps naming unknown capabilities instead of failing.
    pub allow_missing_functions: bool,
    /// Completion attempts when the answer cannot be parsed (at least 1).
    pub max_attempts: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            excluded_namespaces: Vec::new(),
            excluded_functions: Vec::new(),
            allow_missing_functions: false,
            max_attempts: 1,
        }
    }
}

impl PlannerConfig {
    pub fn exclude_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.excluded_namespaces.push(namespace.into());
        self
    }

    pub fn exclude_function(mut self, function: impl Into<String>) -> Self {
        self.excluded_functions.push(function.into());
        self
    }

    pub fn allow_missing_functions(mut self, allow: bool) -> Self {
        self.allow_missing_functions = allow;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn is_excluded(&self, capability: &Capability) -> bool {
        let qualified = capability.qualified_name().to_string();
        self.excluded_namespaces.iter().any(|ns| ns == capability.namespace())
            || self
                .excluded_functions
                .iter()
                .any(|f| f == capability.name() || *f == qualified)
    }
}

// ---------------------------------------------------------------------------
// SequentialPlanner
// ---------------------------------------------------------------------------

/// Turns a natural-language goal into an ordered plan with one model call.
#[derive(Debug, Clone)]
pub struct SequentialPlanner {
    registry: Arc<CapabilityRegistry>,
    service: Arc<dyn ChatCompletion>,
    config: PlannerConfig,
}

impl SequentialPlanner {
    pub fn new(registry: Arc<CapabilityRegistry>, service: Arc<dyn ChatCompletion>) -> Self {
        Self {
            registry,
            service,
            config: PlannerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Capabilities the planner may use.
    pub fn eligible(&self) -> Vec<Arc<Capability>> {
        self.registry
            .list(None)
            .into_iter()
            .filter(|cap| !self.config.is_excluded(cap))
            .collect()
    }

    /// The function manual shown to the model.
    pub fn function_manual(&self) -> String {
        self.eligible()
            .iter()
            .map(|cap| cap.manual_entry())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn system_prompt(&self) -> String {
        format!(
            "{}\n\n[AVAILABLE FUNCTIONS]\n\n{}",
            PLANNER_INSTRUCTIONS,
            self.function_manual()
        )
    }

    /// Resolve `goal` into a plan.
    pub async fn create_plan(&self, goal: &str) -> Result<Plan, PlannerError> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(PlannerError::EmptyGoal);
        }

        let mut plan = Plan::new(goal);
        plan.transition(PlanState::Resolving)?;
        log::info!("Planning goal: {}", goal);

        let system_prompt = self.system_prompt();
        let mut attempt = 0;
        let raw_steps = loop {
            attempt += 1;
            let answer = self.service.complete(&system_prompt, goal).await?;
            match parse_plan(&answer) {
                Ok(steps) => break steps,
                Err(reason) if attempt < self.config.max_attempts => {
                    log::warn!(
                        "Planner attempt {}/{} unparsable: {}",
                        attempt,
                        self.config.max_attempts,
                        reason
                    );
                }
                Err(reason) => return Err(PlannerError::UnparsablePlan(reason)),
            }
        };

        plan.steps = self.resolve_steps(raw_steps)?;
        if plan.steps.is_empty() {
            return Err(PlannerError::EmptyPlan);
        }
        if let Some((step, variable)) = plan.first_undefined_reference() {
            return Err(PlannerError::UndefinedVariable {
                step,
                variable: variable.to_string(),
            });
        }

        plan.transition(PlanState::Resolved)?;
        log::info!("Plan {} resolved with {} step(s)", plan.id, plan.len());
        Ok(plan)
    }

    /// Check each raw step against the registry and convert its arguments.
    fn resolve_steps(&self, raw_steps: Vec<RawStep>) -> Result<Vec<PlanStep>, PlannerError> {
        let total = raw_steps.len();
        let mut steps = Vec::with_capacity(total);
        let mut origins = Vec::with_capacity(total);

        for (index, raw) in raw_steps.into_iter().enumerate() {
            let capability = QualifiedName::parse(&raw.capability)
                .and_then(|name| self.registry.resolve_name(&name).ok())
                .filter(|cap| !self.config.is_excluded(cap));

            let capability = match capability {
                Some(cap) => cap,
                None if self.config.allow_missing_functions => {
                    log::warn!("Dropping step {}: unknown capability '{}'", index + 1, raw.capability);
                    continue;
                }
                None => {
                    return Err(PlannerError::UnknownCapability {
                        step: index,
                        name: raw.capability,
                    })
                }
            };

            for parameter in capability.parameters() {
                if parameter.required
                    && parameter.default.is_none()
                    && !raw.arguments.contains_key(&parameter.name)
                {
                    log::warn!(
                        "Step {} ({}) omits required argument '{}'",
                        index + 1,
                        capability.qualified_name(),
                        parameter.name
                    );
                }
            }

            let mut step = PlanStep::new(capability.qualified_name());
            step.description = raw
                .description
                .filter(|d| !d.trim().is_empty())
                .or_else(|| Some(capability.description().to_string()).filter(|d| !d.is_empty()));
            step.arguments = raw
                .arguments
                .into_iter()
                .map(|(name, value): (String, Value)| (name, ArgValue::from_model_value(value)))
                .collect();
            step.output = raw.output;
            steps.push(step);
            origins.push(index);
        }

        if steps.len() < total {
            renumber_positional_references(&mut steps, &origins, total)?;
        }
        Ok(steps)
    }
}

/// Rewrite `$stepN` references written against the model's numbering after
/// some steps were dropped. Reading a dropped step's output is an error.
fn renumber_positional_references(
    steps: &mut [PlanStep],
    origins: &[usize],
    total: usize,
) -> Result<(), PlannerError> {
    let mut positions: HashMap<String, Option<String>> =
        (0..total).map(|original| (step_variable(original), None)).collect();
    for (new, original) in origins.iter().enumerate() {
        positions.insert(step_variable(*original), Some(step_variable(new)));
    }

    for (index, step) in steps.iter_mut().enumerate() {
        for value in step.arguments.values_mut() {
            let Some(variable) = value.as_reference().map(str::to_string) else {
                continue;
            };
            match positions.get(&variable) {
                Some(Some(renamed)) => *value = ArgValue::reference(renamed.clone()),
                Some(None) => return Err(PlannerError::UndefinedVariable { step: index, variable }),
                None => {}
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
