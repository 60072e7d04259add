//! # Capabilities
//!
//! Named, invocable units of functionality and the registry that holds them.
//!
//! ## Resolution Flow
//!
//! 1. Plugins are registered under a namespace while the kernel is built
//! 2. `CapabilityRegistry::resolve("MathPlugin", "Add")` returns the `Capability`
//! 3. `CapabilityInvoker::invoke(cap, args)` validates the arguments and runs the body
//! 4. The outcome comes back as an `ExecutionResult` value, success or failure

pub mod arguments;
pub mod capability;
pub mod error;
pub mod invoker;
pub mod registry;

pub use arguments::{ArgValue, ArgumentBag, KernelArguments};
pub use capability::{
    Capability, FnFunction, FunctionError, NativeFunction, ParameterSpec, ParameterType, Plugin,
    QualifiedName,
};
pub use error::RegistryError;
pub use invoker::{CapabilityInvoker, ExecutionFailure, ExecutionResult, FailureKind, FunctionResult};
pub use registry::CapabilityRegistry;
