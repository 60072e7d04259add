//! Planning and plan execution errors.

use thiserror::Error;

use super::plan::PlanState;
use crate::llms::CompletionError;

/// A plan was asked to move between lifecycle states that are not adjacent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal plan transition from {from} to {to}")]
pub struct PlanStateError {
    pub from: PlanState,
    pub to: PlanState,
}

/// Errors raised while turning a goal into a plan.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The goal was blank; the model was not called.
    #[error("goal is empty")]
    EmptyGoal,

    /// The model's answer could not be read as a plan.
    #[error("could not parse plan: {0}")]
    UnparsablePlan(String),

    /// The model produced a plan without any usable steps.
    #[error("plan has no steps")]
    EmptyPlan,

    /// A step names a capability that is not registered (or is excluded).
    #[error("step {} uses unknown capability '{name}'", .step + 1)]
    UnknownCapability { step: usize, name: String },

    /// A step references a variable no earlier step produces.
    #[error("step {} references undefined variable '${variable}'", .step + 1)]
    UndefinedVariable { step: usize, variable: String },

    /// The completion call failed.
    #[error("planner completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    State(#[from] PlanStateError),
}

/// Misuse of the executor. Step failures are never reported this way; they
/// are part of the [`AggregatedResult`](super::AggregatedResult).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Only resolved plans can be executed.
    #[error("plan is {0}, expected resolved")]
    NotResolved(PlanState),

    /// Parallel mode was requested for a plan whose steps depend on each other.
    #[error("step {} depends on '${variable}' and cannot run in parallel", .step + 1)]
    DependentSteps { step: usize, variable: String },

    #[error(transparent)]
    State(#[from] PlanStateError),
}
