//! Aggregated outcome of running a plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::executor::ExecutionMode;
use super::plan::PlanState;
use crate::capabilities::{ExecutionFailure, FunctionResult, QualifiedName};

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded(FunctionResult),
    Failed(ExecutionFailure),
    /// An earlier step failed in sequential mode.
    NotAttempted,
}

/// Per-step entry of an [`AggregatedResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Zero-based position in the plan.
    pub index: usize,
    pub capability: QualifiedName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub outcome: StepOutcome,
}

impl StepReport {
    /// One line for synthesis prompts and terminal output.
    pub fn summary_line(&self) -> String {
        let n = self.index + 1;
        match &self.outcome {
            StepOutcome::Succeeded(result) => format!("{}. {}: {}", n, self.capability, result.text()),
            StepOutcome::Failed(failure) => format!("{}. {} failed: {}", n, self.capability, failure.kind),
            StepOutcome::NotAttempted => format!("{}. {} was not attempted", n, self.capability),
        }
    }
}

/// Combined outcome of every step in a plan, partial failures included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub plan_id: Uuid,
    pub goal: String,
    /// The mode the steps actually ran in.
    pub mode: ExecutionMode,
    pub steps: Vec<StepReport>,
    /// `Completed` or `Failed`.
    pub state: PlanState,
    /// Synthesized answer, or the last value of a completed sequential run.
    pub answer: Option<String>,
    /// Set when synthesis was requested but failed.
    pub synthesis_warning: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AggregatedResult {
    pub fn is_success(&self) -> bool {
        self.state == PlanState::Completed
    }

    /// Successful step results in plan order.
    pub fn results(&self) -> impl Iterator<Item = &FunctionResult> {
        self.steps.iter().filter_map(|s| match &s.outcome {
            StepOutcome::Succeeded(result) => Some(result),
            _ => None,
        })
    }

    /// Step failures in plan order.
    pub fn failures(&self) -> impl Iterator<Item = &ExecutionFailure> {
        self.steps.iter().filter_map(|s| match &s.outcome {
            StepOutcome::Failed(failure) => Some(failure),
            _ => None,
        })
    }

    pub fn first_failure(&self) -> Option<&ExecutionFailure> {
        self.failures().next()
    }

    pub fn not_attempted(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::NotAttempted))
            .count()
    }

    /// The collected results as text, one line per step.
    pub fn raw_results(&self) -> String {
        self.steps
            .iter()
            .map(StepReport::summary_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
