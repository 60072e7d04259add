//! # Planning
//!
//! Turning goals into plans and running them.
//!
//! 1. [`SequentialPlanner::create_plan`] asks the model for an ordered list of
//!    capability calls and validates it against the registry
//! 2. [`PlanExecutor::execute`] runs the steps sequentially or in parallel
//! 3. The outcome comes back as an [`AggregatedResult`], optionally with a
//!    synthesized answer

pub mod error;
pub mod executor;
pub mod parser;
pub mod plan;
pub mod planner;
pub mod result;

pub use error::{ExecutionError, PlanStateError, PlannerError};
pub use executor::{ExecutionMode, PlanExecutor};
pub use plan::{Plan, PlanState, PlanStep};
pub use planner::{PlannerConfig, SequentialPlanner};
pub use result::{AggregatedResult, StepOutcome, StepReport};
