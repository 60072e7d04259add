//! Capability registry errors.

use thiserror::Error;

/// Errors raised while registering or resolving capabilities.
///
/// These are programmer errors in how the kernel is assembled and are
/// reported at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A capability with the same name already exists in the namespace.
    #[error("capability '{namespace}.{name}' is already registered")]
    DuplicateCapability { namespace: String, name: String },

    /// No capability with this name exists in the namespace.
    #[error("unknown capability '{namespace}.{name}'")]
    UnknownCapability { namespace: String, name: String },

    /// A namespace or function name is not a plain identifier.
    #[error("invalid {kind} name '{value}': expected letters, digits or '_'")]
    InvalidName { kind: &'static str, value: String },
}
