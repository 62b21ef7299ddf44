#![forbid(unsafe_code)]
//! Browser bindings for the scenekeep engine.
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod dom;
pub mod host;
pub mod navigation;
pub mod storage;

pub use host::{HostError, SceneHandle, SceneHost};
pub use navigation::classify_navigation_type;
pub use storage::{LocalStorageStore, classify_write_error};

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}
