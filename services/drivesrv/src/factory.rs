//! Controller Factory Module
//!
//! Name-keyed registry of controller constructors. Adding a drive type
//! requires only 2 changes:
//! 1. Implement `StepperController` for the new drive
//! 2. Register its constructor in `ControllerFactory::with_builtin()`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use errors::{DriveError, DriveResult};
use stepdrive_link::Transport;
use tracing::debug;

use crate::controller::{ControllerId, StepperController};
use crate::crk525::{self, Crk525};

/// Builds a controller with the given id on the shared transport
pub type ControllerConstructor = Arc<
    dyn Fn(ControllerId, Arc<dyn Transport>) -> DriveResult<Arc<dyn StepperController>>
        + Send
        + Sync,
>;

/// Type names are matched case-insensitively
pub fn normalize_type_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

// ============================================================================
// Controller Factory
// ============================================================================

/// Registry of controller types
///
/// Uses DashMap for thread-safe concurrent access during controller creation.
pub struct ControllerFactory {
    constructors: DashMap<String, ControllerConstructor, RandomState>,
    next_id: AtomicU64,
}

impl Default for ControllerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self {
            constructors: DashMap::with_hasher(RandomState::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a factory with every built-in drive type registered
    pub fn with_builtin() -> Self {
        let factory = Self::new();
        factory.constructors.insert(
            normalize_type_name(crk525::TYPE_NAME),
            Arc::new(Crk525::create) as ControllerConstructor,
        );
        factory
    }

    /// Register a constructor under `name`
    pub fn register(&self, name: &str, constructor: ControllerConstructor) -> DriveResult<()> {
        let normalized = normalize_type_name(name);
        match self.constructors.entry(normalized) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(DriveError::DuplicateControllerType(entry.key().clone()))
            },
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                debug!("Controller type '{}' registered", entry.key());
                entry.insert(constructor);
                Ok(())
            },
        }
    }

    /// Check if a controller type is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.contains_key(&normalize_type_name(name))
    }

    /// Registered type names, sorted
    pub fn list_available_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Create a controller by type name
    ///
    /// # Returns
    /// * `Ok(Arc<dyn StepperController>)` - Controller with a fresh id, no bus address
    /// * `Err(DriveError::UnknownControllerType)` - If the type is not registered
    pub fn create_by_name(
        &self,
        name: &str,
        transport: Arc<dyn Transport>,
    ) -> DriveResult<Arc<dyn StepperController>> {
        // Clone the constructor out so no map shard stays locked during construction
        let constructor = self
            .constructors
            .get(&normalize_type_name(name))
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DriveError::UnknownControllerType(name.to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        constructor(id, transport)
    }
}

impl std::fmt::Debug for ControllerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerFactory")
            .field("types", &self.list_available_type_names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use stepdrive_link::SimulatedBus;

    fn transport() -> Arc<dyn Transport> {
        Arc::new(SimulatedBus::new())
    }

    #[test]
    fn test_builtin_types() {
        let factory = ControllerFactory::with_builtin();
        assert_eq!(factory.list_available_type_names(), vec!["CRK525"]);
        assert!(factory.is_registered("crk525"));
        assert!(!ControllerFactory::new().is_registered("CRK525"));
    }

    #[test]
    fn test_create_allocates_fresh_ids() {
        let factory = ControllerFactory::with_builtin();
        let a = factory.create_by_name("CRK525", transport()).unwrap();
        let b = factory.create_by_name("crk525", transport()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.type_name(), "CRK525");
        assert_eq!(a.core().bus_address(), None);
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        let factory = ControllerFactory::with_builtin();
        let err = factory
            .register("Crk525", Arc::new(Crk525::create) as ControllerConstructor)
            .unwrap_err();
        assert!(matches!(err, DriveError::DuplicateControllerType(name) if name == "CRK525"));

        let err = factory.create_by_name("CRK999", transport()).unwrap_err();
        assert!(matches!(err, DriveError::UnknownControllerType(name) if name == "CRK999"));
    }

    #[test]
    fn test_register_custom_alias() {
        let factory = ControllerFactory::new();
        factory
            .register("crk525-focus", Arc::new(Crk525::create) as ControllerConstructor)
            .unwrap();
        assert_eq!(factory.list_available_type_names(), vec!["CRK525-FOCUS"]);
        assert!(factory.create_by_name("CRK525-FOCUS", transport()).is_ok());
    }
}
