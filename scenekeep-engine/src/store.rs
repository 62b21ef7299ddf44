//! Durable store boundary and an in-memory implementation.
//!
//! The store is synchronous and string keyed, like the browser's origin-scoped
//! `localStorage`. Implementations use interior mutability so a handle can be
//! shared between the repository and whoever inspects the store.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;

/// Roughly what browsers grant a single origin.
pub const DEFAULT_QUOTA_UNITS: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("quota exceeded writing '{key}': need {needed} units, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Synchronous string-keyed persistent store.
pub trait DurableStore {
    /// Read a value; missing keys are `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read at all.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous value under the same key.
    ///
    /// # Errors
    ///
    /// Returns an error on quota exhaustion or backend failure.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the removal.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Enumerate every key currently held.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be enumerated.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

impl<T: DurableStore + ?Sized> DurableStore for Rc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).keys()
    }
}

fn units(text: &str) -> usize {
    text.encode_utf16().count()
}

/// In-memory store with a capacity ceiling and read/write fault injection.
///
/// Cloning yields another handle onto the same entries, which is how tests
/// simulate a process restart: drop the engine, keep the store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Rc<RefCell<BTreeMap<String, String>>>,
    quota_units: usize,
    fail_writes: Rc<Cell<bool>>,
    fail_reads: Rc<Cell<bool>>,
    writes: Rc<Cell<usize>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_quota(DEFAULT_QUOTA_UNITS)
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_quota(quota_units: usize) -> Self {
        Self {
            entries: Rc::new(RefCell::new(BTreeMap::new())),
            quota_units,
            fail_writes: Rc::new(Cell::new(false)),
            fail_reads: Rc::new(Cell::new(false)),
            writes: Rc::new(Cell::new(0)),
        }
    }

    /// Make every subsequent `set` fail until switched back off.
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.set(failing);
    }

    /// Make every subsequent `get` fail until switched back off.
    pub fn set_failing_reads(&self, failing: bool) {
        self.fail_reads.set(failing);
    }

    /// Number of successful `set` calls since creation.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    #[must_use]
    pub fn used_units(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .map(|(k, v)| units(k) + units(v))
            .sum()
    }

    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads.get() {
            return Err(StoreError::Backend(format!("injected read failure for '{key}'")));
        }
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.get() {
            return Err(StoreError::Backend(format!("injected write failure for '{key}'")));
        }
        let existing = self
            .entries
            .borrow()
            .get(key)
            .map_or(0, |old| units(key) + units(old));
        let used = self.used_units() - existing;
        let needed = units(key) + units(value);
        let available = self.quota_units.saturating_sub(used);
        if needed > available {
            return Err(StoreError::QuotaExceeded {
                key: key.to_string(),
                needed,
                available,
            });
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}
