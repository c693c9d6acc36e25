//! Adapter registry
//!
//! Maps adapter identities to factories so an adapter can be chosen by name,
//! typically from a configuration file or a CLI flag.

use super::error::AdapterResult;
use super::{Adapter, AdapterKind, LocalAdapter, MemoryAdapter};
use crate::error::{ConduitError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[cfg(feature = "object-store")]
use super::ObjectStoreAdapter;

/// Factory function type for creating adapters from JSON configuration
pub type AdapterFactory = Arc<dyn Fn(&Value) -> AdapterResult<Arc<dyn Adapter>> + Send + Sync>;

/// Registry of adapter factories
///
/// Built-in adapters (`local`, `memory` and, with the `object-store` feature,
/// `object-store`) are registered on construction.
///
/// # Example
///
/// ```no_run
/// use conduit::adapter::AdapterRegistry;
/// use serde_json::json;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = AdapterRegistry::new();
/// let adapter = registry.create("local", &json!({ "root": "/var/data" }))?;
/// assert_eq!(adapter.identity(), "local");
/// # Ok(())
/// # }
/// ```
pub struct AdapterRegistry {
    factories: RwLock<HashMap<String, AdapterFactory>>,
}

impl AdapterRegistry {
    /// Create a registry with the built-in adapters
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_builtin();
        registry
    }

    /// Create a registry with nothing registered
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    fn register_builtin(&self) {
        self.register_kind::<LocalAdapter>();
        self.register_kind::<MemoryAdapter>();

        #[cfg(feature = "object-store")]
        self.register_kind::<ObjectStoreAdapter>();
    }

    /// Register an adapter type under its own identity
    pub fn register_kind<A: AdapterKind>(&self) {
        self.register(
            A::IDENTITY,
            Arc::new(|config: &Value| {
                Ok(Arc::new(A::from_config(config)?) as Arc<dyn Adapter>)
            }),
        );
    }

    /// Register a custom adapter factory
    ///
    /// A later registration under the same identity replaces the earlier one.
    ///
    /// # Example
    ///
    /// ```ignore
    /// registry.register("my-adapter", Arc::new(|config| {
    ///     Ok(Arc::new(MyAdapter::new(config)?) as Arc<dyn Adapter>)
    /// }));
    /// ```
    pub fn register(&self, identity: impl Into<String>, factory: AdapterFactory) {
        let identity = identity.into();
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if factories.insert(identity.clone(), factory).is_some() {
            tracing::warn!(%identity, "Adapter registered twice; replacing earlier factory");
        }
    }

    /// Unregister an adapter
    pub fn unregister(&self, identity: &str) -> bool {
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        factories.remove(identity).is_some()
    }

    /// Check if an adapter is registered
    pub fn is_registered(&self, identity: &str) -> bool {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.contains_key(identity)
    }

    /// List all registered identities, sorted
    pub fn list_adapters(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut identities: Vec<String> = factories.keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Create an adapter by identity
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::UnknownAdapter` if nothing is registered under
    /// `identity`, or `ConduitError::Adapter` if the factory rejects `config`.
    pub fn create(&self, identity: &str, config: &Value) -> Result<Arc<dyn Adapter>> {
        let factory = {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            factories.get(identity).cloned()
        };

        match factory {
            Some(factory) => {
                tracing::debug!(%identity, "Creating adapter");
                Ok(factory(config)?)
            }
            None => Err(ConduitError::UnknownAdapter(identity.to_string())),
        }
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
