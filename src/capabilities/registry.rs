//! Capability Registry: resolves `namespace.name` to a registered capability.
//!
//! The registry is populated once while the kernel is being built and is
//! read-only afterwards: the kernel holds it behind an `Arc` and exposes no
//! mutation, so concurrent plan steps can share it without locking.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use super::capability::{Capability, Plugin, QualifiedName};
use super::error::RegistryError;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("Invalid regex"));

/// Capabilities indexed by namespace, then by name.
///
/// Ordered maps keep listings (and therefore planner prompts) deterministic.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    namespaces: BTreeMap<String, BTreeMap<String, Arc<Capability>>>,
}

impl CapabilityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under `namespace`.
    ///
    /// Fails without touching the registry if the name is already taken.
    pub fn register(
        &mut self,
        namespace: &str,
        capability: Capability,
    ) -> Result<Arc<Capability>, RegistryError> {
        validate_identifier("namespace", namespace)?;
        validate_identifier("function", capability.name())?;

        let taken = self
            .namespaces
            .get(namespace)
            .map_or(false, |functions| functions.contains_key(capability.name()));
        if taken {
            return Err(RegistryError::DuplicateCapability {
                namespace: namespace.to_string(),
                name: capability.name().to_string(),
            });
        }

        let capability = Arc::new(capability.in_namespace(namespace));
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(capability.name().to_string(), Arc::clone(&capability));
        log::debug!("Registered capability {}", capability.qualified_name());
        Ok(capability)
    }

    /// Register every function of a plugin under `namespace`.
    ///
    /// All-or-nothing: if any function clashes (with the registry or with a
    /// sibling in the same plugin) nothing from the plugin is registered.
    pub fn add_plugin<P: Plugin + ?Sized>(
        &mut self,
        namespace: &str,
        plugin: &P,
    ) -> Result<usize, RegistryError> {
        validate_identifier("namespace", namespace)?;
        let functions = plugin.functions();

        let existing = self.namespaces.get(namespace);
        let mut seen = std::collections::HashSet::new();
        for function in &functions {
            validate_identifier("function", function.name())?;
            let taken = existing.map_or(false, |m| m.contains_key(function.name()));
            if taken || !seen.insert(function.name().to_string()) {
                return Err(RegistryError::DuplicateCapability {
                    namespace: namespace.to_string(),
                    name: function.name().to_string(),
                });
            }
        }

        let count = functions.len();
        for function in functions {
            self.register(namespace, function)?;
        }
        log::info!("Added plugin '{}' with {} function(s)", namespace, count);
        Ok(count)
    }

    /// Resolve a capability by namespace and name.
    pub fn resolve(&self, namespace: &str, name: &str) -> Result<Arc<Capability>, RegistryError> {
        self.namespaces
            .get(namespace)
            .and_then(|functions| functions.get(name))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCapability {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    /// Resolve by qualified name.
    pub fn resolve_name(&self, name: &QualifiedName) -> Result<Arc<Capability>, RegistryError> {
        self.resolve(&name.namespace, &name.name)
    }

    /// Resolve `ns.Name` or `ns-Name`.
    pub fn resolve_qualified(&self, text: &str) -> Result<Arc<Capability>, RegistryError> {
        let name = QualifiedName::parse(text).ok_or_else(|| RegistryError::UnknownCapability {
            namespace: String::new(),
            name: text.to_string(),
        })?;
        self.resolve_name(&name)
    }

    /// List capabilities, optionally restricted to one namespace.
    pub fn list(&self, namespace: Option<&str>) -> Vec<Arc<Capability>> {
        match namespace {
            Some(ns) => self
                .namespaces
                .get(ns)
                .map(|functions| functions.values().cloned().collect())
                .unwrap_or_default(),
            None => self
                .namespaces
                .values()
                .flat_map(|functions| functions.values().cloned())
                .collect(),
        }
    }

    /// Registered namespaces in order.
    pub fn namespaces(&self) -> Vec<&str> {
        self.namespaces.keys().map(String::as_str).collect()
    }

    /// Get the total number of registered capabilities.
    pub fn len(&self) -> usize {
        self.namespaces.values().map(BTreeMap::len).sum()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_identifier(kind: &'static str, value: &str) -> Result<(), RegistryError> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(RegistryError::InvalidName {
            kind,
            value: value.to_string(),
        })
    }
}
