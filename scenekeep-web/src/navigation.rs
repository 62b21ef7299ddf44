//! Reload detection through the Navigation Timing API.

use scenekeep_engine::EntryMode;
use wasm_bindgen::JsValue;

use crate::dom;

/// Anything other than an explicit `"reload"` counts as a fresh entry.
#[must_use]
pub fn classify_navigation_type(kind: Option<&str>) -> EntryMode {
    match kind {
        Some("reload") => EntryMode::Reload,
        _ => EntryMode::Fresh,
    }
}

fn navigation_type() -> Option<String> {
    let performance = dom::window()?.performance()?;
    let entry = performance.get_entries_by_type("navigation").get(0);
    if entry.is_undefined() {
        return None;
    }
    js_sys::Reflect::get(&entry, &JsValue::from_str("type"))
        .ok()?
        .as_string()
}

/// How the current page load reached the scene.
#[must_use]
pub fn entry_mode() -> EntryMode {
    let kind = navigation_type();
    log::debug!("navigation type: {kind:?}");
    classify_navigation_type(kind.as_deref())
}
