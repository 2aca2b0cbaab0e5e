//! Reset dependencies
//!
//! Some register writes only take effect after the drive is reset (power
//! cycle, parameter initialisation). A [`ResetLock`] stays locked while any
//! [`ResetDependency`] holds it; the dependency is reset when the caller
//! reports that the corresponding reset happened.
//!
//! A dependency may list overrides: resetting it also releases the overrides'
//! holds on every lock it released itself, recursively.

use std::collections::BTreeMap;
use std::sync::Arc;

use errors::{DriveError, DriveResult};
use parking_lot::Mutex;
use tracing::debug;

/// Locked while at least one dependency holds it
#[derive(Debug, Default)]
pub struct ResetLock {
    name: String,
    holders: Mutex<Vec<String>>,
}

impl ResetLock {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            holders: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_locked(&self) -> bool {
        !self.holders.lock().is_empty()
    }

    /// Tags of the dependencies still holding this lock
    pub fn holding_resets(&self) -> Vec<String> {
        self.holders.lock().clone()
    }

    fn hold(&self, tag: &str) {
        self.holders.lock().push(tag.to_string());
    }

    fn release(&self, tag: &str) {
        let mut holders = self.holders.lock();
        if let Some(pos) = holders.iter().position(|holder| holder == tag) {
            holders.remove(pos);
        }
    }
}

/// A pending reset, identified by its tag
#[derive(Debug)]
pub struct ResetDependency {
    tag: String,
    overrides: Vec<Arc<ResetDependency>>,
    locks: Mutex<Vec<Arc<ResetLock>>>,
}

impl ResetDependency {
    pub fn new(tag: impl Into<String>) -> Arc<Self> {
        Self::with_overrides(tag, Vec::new())
    }

    pub fn with_overrides(tag: impl Into<String>, overrides: Vec<Arc<ResetDependency>>) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.into(),
            overrides,
            locks: Mutex::new(Vec::new()),
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Hold `lock` until this dependency is reset; holding twice is a no-op
    pub fn add(&self, lock: &Arc<ResetLock>) {
        let mut locks = self.locks.lock();
        if locks.iter().any(|held| Arc::ptr_eq(held, lock)) {
            return;
        }
        lock.hold(&self.tag);
        locks.push(Arc::clone(lock));
        debug!("Reset dependency '{}' now holds '{}'", self.tag, lock.name());
    }

    pub fn is_pending(&self) -> bool {
        !self.locks.lock().is_empty()
    }

    /// Release every held lock, and the overrides' holds on the same locks
    pub fn reset(&self) {
        let locks = std::mem::take(&mut *self.locks.lock());
        for lock in &locks {
            self.release_single(lock);
        }
        if !locks.is_empty() {
            debug!("Reset dependency '{}' released {} lock(s)", self.tag, locks.len());
        }
    }

    fn release_single(&self, lock: &Arc<ResetLock>) {
        lock.release(&self.tag);
        for dependency in &self.overrides {
            dependency.override_reset(lock);
        }
    }

    fn override_reset(&self, lock: &Arc<ResetLock>) {
        let held = {
            let mut locks = self.locks.lock();
            match locks.iter().position(|held| Arc::ptr_eq(held, lock)) {
                Some(pos) => {
                    locks.remove(pos);
                    true
                },
                None => false,
            }
        };
        if held {
            self.release_single(lock);
        }
    }
}

/// Tag-keyed set of a controller's reset dependencies
#[derive(Debug, Default)]
pub struct ResetRegistry {
    dependencies: Mutex<BTreeMap<String, Arc<ResetDependency>>>,
}

impl ResetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dependency: Arc<ResetDependency>) -> DriveResult<()> {
        let mut dependencies = self.dependencies.lock();
        let tag = dependency.tag().to_string();
        if dependencies.contains_key(&tag) {
            return Err(DriveError::DuplicateResetDependency(tag));
        }
        dependencies.insert(tag, dependency);
        Ok(())
    }

    pub fn get(&self, tag: &str) -> DriveResult<Arc<ResetDependency>> {
        self.dependencies
            .lock()
            .get(tag)
            .cloned()
            .ok_or_else(|| DriveError::UnknownResetDependency(tag.to_string()))
    }

    /// Report that the reset identified by `tag` was performed
    pub fn reset_dependency(&self, tag: &str) -> DriveResult<()> {
        self.get(tag)?.reset();
        Ok(())
    }

    /// Report that every registered reset was performed
    pub fn reset_all(&self) {
        let dependencies: Vec<_> = self.dependencies.lock().values().cloned().collect();
        for dependency in dependencies {
            dependency.reset();
        }
    }

    /// Tags of dependencies that still hold at least one lock
    pub fn pending(&self) -> Vec<String> {
        self.dependencies
            .lock()
            .values()
            .filter(|dependency| dependency.is_pending())
            .map(|dependency| dependency.tag().to_string())
            .collect()
    }

    pub fn tags(&self) -> Vec<String> {
        self.dependencies.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_lock_held_until_every_holder_resets() {
        let lock = ResetLock::new("system");
        let power = ResetDependency::new("power-cycle");
        let nv = ResetDependency::new("nv-write");

        power.add(&lock);
        power.add(&lock);
        nv.add(&lock);
        assert!(lock.is_locked());
        assert_eq!(lock.holding_resets(), vec!["power-cycle", "nv-write"]);

        power.reset();
        assert!(lock.is_locked());
        assert_eq!(lock.holding_resets(), vec!["nv-write"]);

        nv.reset();
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_override_releases_shared_locks_recursively() {
        let shared = ResetLock::new("shared");
        let other = ResetLock::new("other");

        let inner = ResetDependency::new("inner");
        let middle = ResetDependency::with_overrides("middle", vec![Arc::clone(&inner)]);
        let outer = ResetDependency::with_overrides("outer", vec![Arc::clone(&middle)]);

        inner.add(&shared);
        inner.add(&other);
        middle.add(&shared);
        outer.add(&shared);

        outer.reset();
        assert!(!shared.is_locked());
        assert!(!middle.is_pending());
        // inner keeps the lock outer never held
        assert!(other.is_locked());
        assert!(inner.is_pending());
    }

    #[test]
    fn test_registry() {
        let registry = ResetRegistry::new();
        let lock = ResetLock::new("system");
        let power = ResetDependency::new("power-cycle");
        registry.register(Arc::clone(&power)).unwrap();

        assert!(matches!(
            registry.register(ResetDependency::new("power-cycle")),
            Err(DriveError::DuplicateResetDependency(_))
        ));
        assert!(matches!(
            registry.reset_dependency("unknown"),
            Err(DriveError::UnknownResetDependency(_))
        ));

        power.add(&lock);
        assert_eq!(registry.pending(), vec!["power-cycle"]);
        registry.reset_all();
        assert!(registry.pending().is_empty());
        assert!(!lock.is_locked());
    }
}
