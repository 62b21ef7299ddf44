#![cfg(target_arch = "wasm32")]

use scenekeep_engine::{DurableStore, EngineConfig, EntryMode, UiDirective};
use scenekeep_web::{LocalStorageStore, SceneHandle, SceneHost, dom};
use wasm_bindgen_test::*;

wasm_bindgen_test::wasm_bindgen_test_configure!(run_in_browser);

fn store() -> LocalStorageStore {
    let store = LocalStorageStore::open().expect("localStorage");
    for key in store.keys().expect("keys") {
        if key.contains(":kid-web:") || key.starts_with("scenekeep-test") {
            store.delete(&key).expect("delete");
        }
    }
    store
}

#[wasm_bindgen_test]
fn local_storage_store_round_trips_values() {
    let store = store();
    store.set("scenekeep-test-key", "value").expect("set");
    assert_eq!(
        store.get("scenekeep-test-key").expect("get").as_deref(),
        Some("value")
    );
    assert!(store.keys().expect("keys").iter().any(|k| k == "scenekeep-test-key"));
    store.delete("scenekeep-test-key").expect("delete");
    assert_eq!(store.get("scenekeep-test-key").expect("get"), None);
}

#[wasm_bindgen_test]
fn host_persists_through_local_storage() {
    let now = dom::now_ms();
    let config = EngineConfig::default_config();
    let mut host = SceneHost::new(store(), config).expect("host");
    host.open("kid-web", "ganesha_temple", "vakratunda_gate", EntryMode::Fresh, now)
        .expect("open");
    host.dispatch_json(
        r#"{"type":"increment","flag":"stonesClicked","by":2}"#,
        now + 1,
    )
    .expect("dispatch");
    assert!(host.exit(now + 2).is_some_and(|report| report.written()));

    let reopened_store = LocalStorageStore::open().expect("localStorage");
    let mut reopened = SceneHost::new(reopened_store, config).expect("host");
    reopened
        .open("kid-web", "ganesha_temple", "vakratunda_gate", EntryMode::Reload, now + 10)
        .expect("reopen");
    let session = reopened.session().expect("session");
    assert!(session.flag("stonesClicked").is_some());
    assert_eq!(reopened.delete_profile("kid-web").expect("delete"), 1);
}


#[wasm_bindgen_test]
fn handle_exposes_reconstructed_directives() {
    let now = dom::now_ms();
    let config = EngineConfig::default_config();
    let mut host = SceneHost::new(store(), config).expect("host");
    host.open("kid-web", "ganesha_temple", "vakratunda_gate", EntryMode::Fresh, now)
        .expect("open");
    host.dispatch_json(
        r#"{"type":"increment","flag":"stonesClicked","by":1}"#,
        now + 1,
    )
    .expect("dispatch");
    assert!(host.exit(now + 2).is_some_and(|report| report.written()));

    let mut handle =
        SceneHandle::open("kid-web", "ganesha_temple", "vakratunda_gate").expect("handle");
    let directives: Vec<UiDirective> =
        serde_wasm_bindgen::from_value(handle.entry_directives().expect("directives"))
            .expect("decode");
    assert!(
        directives
            .iter()
            .any(|d| matches!(d, UiDirective::ResumeAt { phase } if phase.as_str() == "door1_active"))
    );

    handle.exit().expect("exit");
    let directives: Vec<UiDirective> =
        serde_wasm_bindgen::from_value(handle.entry_directives().expect("directives"))
            .expect("decode");
    assert!(directives.is_empty());
}
