//! Process-wide single-instance slots.
//!
//! The overlay window and the lookup engine must each exist at most once.
//! A `Registry` owns that one instance: `ensure` creates it on first use and
//! returns the existing one afterwards, `dispose` hands it back for teardown.
//! Creation happens on the owning event thread, so the guard only has to make
//! check-and-create atomic.

use std::sync::{Arc, Mutex, MutexGuard};

pub struct Registry<T: ?Sized> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    // Recover from poisoning - the slot holds no invariant a panic could break
    fn slot(&self) -> MutexGuard<'_, Option<Arc<T>>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the live instance, creating it with `create` if there is none.
    pub fn ensure<F>(&self, create: F) -> Arc<T>
    where
        F: FnOnce() -> Arc<T>,
    {
        let mut slot = self.slot();
        if let Some(existing) = slot.as_ref() {
            return Arc::clone(existing);
        }
        let created = create();
        *slot = Some(Arc::clone(&created));
        created
    }

    /// Like [`Registry::ensure`], but creation may fail; nothing is stored on failure.
    pub fn try_ensure<E, F>(&self, create: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<Arc<T>, E>,
    {
        let mut slot = self.slot();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let created = create()?;
        *slot = Some(Arc::clone(&created));
        Ok(created)
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.slot().clone()
    }

    /// Removes and returns the instance. The caller decides when it is dropped.
    pub fn dispose(&self) -> Option<Arc<T>> {
        self.slot().take()
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_ensure_creates_once() {
        let registry: Registry<String> = Registry::new();
        let calls = Cell::new(0);
        let first = registry.ensure(|| {
            calls.set(calls.get() + 1);
            Arc::new("engine".to_string())
        });
        let second = registry.ensure(|| {
            calls.set(calls.get() + 1);
            Arc::new("other".to_string())
        });
        assert_eq!(calls.get(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_get_before_ensure_is_none() {
        let registry: Registry<u32> = Registry::new();
        assert!(registry.get().is_none());
        assert!(!registry.is_active());
    }

    #[test]
    fn test_dispose_empties_slot() {
        let registry: Registry<u32> = Registry::new();
        registry.ensure(|| Arc::new(7));
        assert_eq!(registry.dispose().as_deref(), Some(&7));
        assert!(registry.dispose().is_none());
        assert_eq!(*registry.ensure(|| Arc::new(8)), 8);
    }

    #[test]
    fn test_try_ensure_failure_leaves_slot_empty() {
        let registry: Registry<u32> = Registry::new();
        let result: Result<Arc<u32>, &str> = registry.try_ensure(|| Err("no window"));
        assert!(result.is_err());
        assert!(!registry.is_active());
    }

    #[test]
    fn test_holds_trait_objects() {
        let registry: Registry<dyn Fn() -> u32 + Send + Sync> = Registry::new();
        let f = registry.ensure(|| Arc::new(|| 3u32) as Arc<dyn Fn() -> u32 + Send + Sync>);
        assert_eq!(f(), 3);
    }
}
