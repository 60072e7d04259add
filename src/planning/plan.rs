//! Plan model: an ordered list of capability invocations for one goal.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::PlanStateError;
use crate::capabilities::{ArgValue, ArgumentBag, QualifiedName};

// ---------------------------------------------------------------------------
// PlanState
// ---------------------------------------------------------------------------

/// Lifecycle of a plan.
///
/// `Created -> Resolving -> Resolved -> Executing -> Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Created,
    Resolving,
    Resolved,
    Executing,
    Completed,
    Failed,
}

impl PlanState {
    pub fn can_transition_to(self, next: PlanState) -> bool {
        use PlanState::*;
        matches!(
            (self, next),
            (Created, Resolving)
                | (Resolving, Resolved)
                | (Resolved, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Resolving => "resolving",
            Self::Resolved => "resolved",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// PlanStep
// ---------------------------------------------------------------------------

/// One capability invocation inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub capability: QualifiedName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: ArgumentBag,
    /// Variable the step's output is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PlanStep {
    pub fn new(capability: QualifiedName) -> Self {
        Self {
            capability,
            description: None,
            arguments: ArgumentBag::new(),
            output: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Bind the output to `variable` (a leading `$` is dropped).
    pub fn with_output(mut self, variable: impl Into<String>) -> Self {
        self.output = Some(variable.into().trim_start_matches('$').to_string());
        self
    }

    /// Variables this step reads.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.arguments.values().filter_map(ArgValue::as_reference)
    }
}

/// `- {description} using {ns.Name} with parameters: {args}`
impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = self
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(|d| d.replace('.', ""))
            .unwrap_or_else(|| "No description".to_string());
        let arguments: Vec<String> = self
            .arguments
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect();
        write!(
            f,
            "- {} using {} with parameters: {{{}}}",
            description,
            self.capability,
            arguments.join(", ")
        )
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// An ordered sequence of steps meant to satisfy a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    state: PlanState,
}

impl Plan {
    /// An empty plan in the `Created` state.
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            steps: Vec::new(),
            state: PlanState::Created,
        }
    }

    /// A hand-built plan, already `Resolved` and ready to execute.
    pub fn from_steps(goal: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            steps,
            state: PlanState::Resolved,
            ..Self::new(goal)
        }
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Move to `next`, rejecting anything but the next lifecycle state.
    pub fn transition(&mut self, next: PlanState) -> Result<(), PlanStateError> {
        if !self.state.can_transition_to(next) {
            return Err(PlanStateError {
                from: self.state,
                to: next,
            });
        }
        log::debug!("Plan {} {} -> {}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// The first step (and variable) that reads another step's output.
    pub fn first_dependency(&self) -> Option<(usize, &str)> {
        self.steps
            .iter()
            .enumerate()
            .find_map(|(i, step)| step.references().next().map(|v| (i, v)))
    }

    /// True when no step reads another step's output.
    pub fn is_independent(&self) -> bool {
        self.first_dependency().is_none()
    }

    /// The first reference that no earlier step defines.
    ///
    /// A step defines its output variable and `step{N}` (1-based).
    pub fn first_undefined_reference(&self) -> Option<(usize, &str)> {
        let mut defined: HashSet<String> = HashSet::new();
        for (i, step) in self.steps.iter().enumerate() {
            if let Some(variable) = step.references().find(|v| !defined.contains(*v)) {
                return Some((i, variable));
            }
            if let Some(output) = &step.output {
                defined.insert(output.clone());
            }
            defined.insert(step_variable(i));
        }
        None
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// Positional variable bound to the output of step `index` (0-based): `step1`, `step2`, ...
pub fn step_variable(index: usize) -> String {
    format!("step{}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_then_multiply() -> Plan {
        Plan::from_steps(
            "add 2 and 3 then multiply by 4",
            vec![
                PlanStep::new(QualifiedName::new("MathPlugin", "Add"))
                    .with_argument("number1", 2)
                    .with_argument("number2", 3)
                    .with_output("$SUM"),
                PlanStep::new(QualifiedName::new("MathPlugin", "Multiply"))
                    .with_argument("number1", ArgValue::reference("SUM"))
                    .with_argument("number2", 4),
            ],
        )
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut plan = Plan::new("goal");
        assert_eq!(plan.state(), PlanState::Created);
        plan.transition(PlanState::Resolving).unwrap();
        plan.transition(PlanState::Resolved).unwrap();
        plan.transition(PlanState::Executing).unwrap();
        plan.transition(PlanState::Failed).unwrap();
        assert!(plan.state().is_terminal());

        let err = plan.transition(PlanState::Executing).unwrap_err();
        assert_eq!(err.from, PlanState::Failed);
        assert_eq!(err.to_string(), "illegal plan transition from failed to executing");
    }

    #[test]
    fn test_cannot_skip_resolution() {
        let mut plan = Plan::new("goal");
        assert!(plan.transition(PlanState::Executing).is_err());
        assert_eq!(plan.state(), PlanState::Created);
    }

    #[test]
    fn test_dependency_detection() {
        let plan = add_then_multiply();
        assert!(!plan.is_independent());
        assert_eq!(plan.first_dependency(), Some((1, "SUM")));
        assert_eq!(plan.first_undefined_reference(), None);
        assert_eq!(plan.steps[0].output.as_deref(), Some("SUM"));
    }

    #[test]
    fn test_undefined_reference_and_positional_variables() {
        let plan = Plan::from_steps(
            "g",
            vec![
                PlanStep::new(QualifiedName::new("m", "A")).with_argument("x", ArgValue::reference("step2")),
                PlanStep::new(QualifiedName::new("m", "B")),
            ],
        );
        assert_eq!(plan.first_undefined_reference(), Some((0, "step2")));

        let plan = Plan::from_steps(
            "g",
            vec![
                PlanStep::new(QualifiedName::new("m", "A")),
                PlanStep::new(QualifiedName::new("m", "B")).with_argument("x", ArgValue::reference("step1")),
            ],
        );
        assert_eq!(plan.first_undefined_reference(), None);
    }

    #[test]
    fn test_step_display() {
        let step = PlanStep::new(QualifiedName::new("basic_plugin", "greeting"))
            .with_description("Generate a greeting.")
            .with_argument("name", "kuljot")
            .with_argument("age", ArgValue::reference("AGE"));
        assert_eq!(
            step.to_string(),
            r#"- Generate a greeting using basic_plugin.greeting with parameters: {age: $AGE, name: "kuljot"}"#
        );

        let bare = PlanStep::new(QualifiedName::new("m", "A"));
        assert_eq!(bare.to_string(), "- No description using m.A with parameters: {}");
    }
}
