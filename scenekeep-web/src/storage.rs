//! `localStorage`-backed [`DurableStore`].

use scenekeep_engine::{DurableStore, StoreError};
use wasm_bindgen::JsValue;
use web_sys::Storage;

use crate::dom;

/// Browsers report an exhausted origin quota under either name.
const QUOTA_ERROR_NAMES: [&str; 2] = ["QuotaExceededError", "NS_ERROR_DOM_QUOTA_REACHED"];

/// Map a failed `setItem` to the engine's storage error taxonomy.
#[must_use]
pub fn classify_write_error(
    key: &str,
    value_units: usize,
    exception_name: Option<&str>,
    message: String,
) -> StoreError {
    match exception_name {
        Some(name) if QUOTA_ERROR_NAMES.contains(&name) => StoreError::QuotaExceeded {
            key: key.to_string(),
            needed: value_units,
            available: 0,
        },
        Some("SecurityError") => StoreError::Unavailable(message),
        _ => StoreError::Backend(message),
    }
}

#[derive(Debug, Clone)]
pub struct LocalStorageStore {
    storage: Storage,
}

impl LocalStorageStore {
    #[must_use]
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Open the origin's `localStorage`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when storage is disabled, e.g. in
    /// some private browsing modes.
    pub fn open() -> Result<Self, StoreError> {
        dom::local_storage()
            .map(Self::new)
            .map_err(|err| StoreError::Unavailable(dom::js_error_message(&err)))
    }
}

fn backend(err: &JsValue) -> StoreError {
    StoreError::Backend(dom::js_error_message(err))
}

impl DurableStore for LocalStorageStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.storage.get_item(key).map_err(|err| backend(&err))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.storage.set_item(key, value).map_err(|err| {
            let name = dom::dom_exception_name(&err);
            let error = classify_write_error(
                key,
                key.encode_utf16().count() + value.encode_utf16().count(),
                name.as_deref(),
                dom::js_error_message(&err),
            );
            log::warn!("localStorage write failed: {error}");
            error
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.storage.remove_item(key).map_err(|err| backend(&err))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let len = self.storage.length().map_err(|err| backend(&err))?;
        let mut keys = Vec::with_capacity(len as usize);
        for index in 0..len {
            if let Some(key) = self.storage.key(index).map_err(|err| backend(&err))? {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
