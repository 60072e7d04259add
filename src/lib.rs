//! # kernelflow
//!
//! Orchestrates named capabilities (native functions and prompt templates)
//! behind a hosted chat-completion service.
//!
//! A goal in natural language is resolved into an ordered plan by the model,
//! and the plan is run step by step (sequential, fail-fast) or fanned out
//! concurrently (independent steps). An optional final model call turns the
//! step results into one answer.
//!
//! ## Layout
//!
//! - [`capabilities`]: capability definitions, the registry and the invoker
//! - [`planning`]: the goal-to-plan resolver and the plan executor
//! - [`llms`]: the chat completion seam, Azure OpenAI and a scripted stub
//! - [`prompts`]: `{{$variable}}` templates and prompt-backed capabilities
//! - [`kernel`]: the facade tying registry, services and planning together
//! - [`plugins`]: Math, prompt, chat and Graph calendar plugins
//! - [`config`]: settings read from the environment

pub mod capabilities;
pub mod config;
pub mod kernel;
pub mod llms;
pub mod planning;
pub mod plugins;
pub mod prompts;

pub use capabilities::{
    ArgValue, Capability, CapabilityInvoker, CapabilityRegistry, ExecutionFailure, ExecutionResult, FunctionResult,
    KernelArguments, ParameterSpec, Plugin, QualifiedName,
};
pub use kernel::{FunctionChoice, Kernel, KernelBuilder, KernelError};
pub use llms::{AzureChatCompletion, ChatCompletion, ChatHistory, ScriptedCompletion};
pub use planning::{
    AggregatedResult, ExecutionMode, Plan, PlanExecutor, PlanState, PlanStep, PlannerConfig, SequentialPlanner,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
