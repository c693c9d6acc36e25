//! Transform registry
//!
//! Maps transform identities to factories. Pipelines resolve identities here
//! when `use_transform` is called and instantiate a fresh transform per stage
//! per transfer.

use super::{Checksum, Compress, Progress, Transform, TransformKind};
use crate::error::{IdentityKind, Result};
use crate::identity;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Factory function type for creating transforms from registration options
pub type TransformFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Transform>> + Send + Sync>;

/// Registry of transform factories
///
/// Registering an identity twice replaces the earlier factory.
pub struct TransformRegistry {
    factories: RwLock<HashMap<String, TransformFactory>>,
}

impl TransformRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with `checksum`, `compress` and `progress` registered
    ///
    /// The built-in `progress` has no listener; register
    /// [`Progress::factory`] to receive events.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.insert(Checksum::IDENTITY.to_string(), kind_factory::<Checksum>());
        registry.insert(Compress::IDENTITY.to_string(), kind_factory::<Compress>());
        registry.insert(Progress::IDENTITY.to_string(), kind_factory::<Progress>());
        registry
    }

    /// Register a transform type under its own identity
    pub fn register<T: TransformKind>(&self) -> Result<()> {
        self.register_factory(T::IDENTITY, kind_factory::<T>())
    }

    /// Register a custom factory
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::InvalidIdentity` if `identity` is unusable.
    pub fn register_factory(
        &self,
        identity: impl Into<String>,
        factory: TransformFactory,
    ) -> Result<()> {
        let identity = identity.into();
        identity::validate(IdentityKind::Transform, &identity)?;
        self.insert(identity, factory);
        Ok(())
    }

    fn insert(&self, identity: String, factory: TransformFactory) {
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if factories.insert(identity.clone(), factory).is_some() {
            tracing::warn!(%identity, "Transform registered twice; replacing earlier factory");
        } else {
            tracing::debug!(%identity, "Registered transform");
        }
    }

    /// Look up the factory for `identity`
    pub fn get(&self, identity: &str) -> Option<TransformFactory> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.get(identity).cloned()
    }

    pub fn is_registered(&self, identity: &str) -> bool {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.contains_key(identity)
    }

    pub fn unregister(&self, identity: &str) -> bool {
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        factories.remove(identity).is_some()
    }

    /// List all registered identities, sorted
    pub fn list_transforms(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        let mut identities: Vec<String> = factories.keys().cloned().collect();
        identities.sort();
        identities
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.list_transforms())
            .finish()
    }
}

fn kind_factory<T: TransformKind>() -> TransformFactory {
    Arc::new(|options: &Value| Ok(Box::new(T::new(options)?) as Box<dyn Transform>))
}
