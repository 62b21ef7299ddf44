#[cfg(target_arch = "wasm32")]
use scenekeep_web::dom;
use scenekeep_engine::{
    EngineConfig, EntryMode, MemoryStore, ResumeSource, StoreError, UiDirective,
};
use scenekeep_web::{SceneHost, classify_navigation_type, classify_write_error};

#[cfg(target_arch = "wasm32")]
#[test]
fn dom_helpers_find_window() {
    assert!(dom::window().is_some());
    assert!(dom::now_ms() > 0);
}

#[test]
fn only_reload_navigation_counts_as_reload() {
    assert_eq!(classify_navigation_type(Some("reload")), EntryMode::Reload);
    assert_eq!(classify_navigation_type(Some("navigate")), EntryMode::Fresh);
    assert_eq!(classify_navigation_type(Some("back_forward")), EntryMode::Fresh);
    assert_eq!(classify_navigation_type(None), EntryMode::Fresh);
}

#[test]
fn write_errors_map_to_store_error_kinds() {
    for name in ["QuotaExceededError", "NS_ERROR_DOM_QUOTA_REACHED"] {
        let err = classify_write_error("k", 42, Some(name), "full".into());
        assert!(matches!(err, StoreError::QuotaExceeded { needed: 42, .. }), "{name}");
    }
    assert!(matches!(
        classify_write_error("k", 1, Some("SecurityError"), "denied".into()),
        StoreError::Unavailable(msg) if msg == "denied"
    ));
    assert!(matches!(
        classify_write_error("k", 1, None, "boom".into()),
        StoreError::Backend(_)
    ));
}

fn syllable(index: usize, syllable: &str) -> String {
    format!(
        r#"{{"type":"syllable_placed","flag":"door1SyllablesPlaced","syllable":"{syllable}","index":{index}}}"#
    )
}

#[test]
fn host_round_trips_json_events_and_resumes_after_reload() {
    let store = MemoryStore::new();
    let config = EngineConfig::default_config();
    let mut host = SceneHost::new(store.clone(), config).unwrap();
    let report = host
        .open("kid-1", "ganesha_temple", "vakratunda_gate", EntryMode::Fresh, 0)
        .unwrap();
    assert_eq!(report.source, ResumeSource::New);

    let mut last = String::new();
    for (index, part) in ["Va", "kra", "tun", "da"].iter().enumerate() {
        last = host.dispatch_json(&syllable(index, part), 100).unwrap();
    }
    assert!(last.contains("word_learned"), "{last}");
    let flushed = host.tick(100 + config.debounce_ms).flushed;
    assert_eq!(flushed.len(), 1);
    drop(host);

    let mut reopened = SceneHost::new(store, config).unwrap();
    let report = reopened
        .open("kid-1", "ganesha_temple", "vakratunda_gate", EntryMode::Reload, 5_000)
        .unwrap();
    assert_eq!(report.source, ResumeSource::Resumed);
    assert!(report
        .directives
        .iter()
        .any(|d| matches!(d, UiDirective::ShowSymbolDiscovery { word, .. } if word == "vakratunda")));
    assert_eq!(reopened.session().unwrap().phase.as_str(), "door1_complete");
    assert_eq!(reopened.entry_report(), Some(&report));

    let progress = reopened.zone_progress("kid-1", "ganesha_temple").unwrap();
    assert_eq!(progress.scenes_started, 1);
    assert!(progress.learned_words.contains("vakratunda"));
}

#[test]
fn host_rejects_malformed_events_and_unknown_scenes() {
    let mut host = SceneHost::new(MemoryStore::new(), EngineConfig::default_config()).unwrap();
    assert!(host
        .open("kid-1", "ganesha_temple", "no_such_scene", EntryMode::Fresh, 0)
        .is_err());
    host.open("kid-1", "ganesha_temple", "vakratunda_gate", EntryMode::Fresh, 0)
        .unwrap();
    let err = host.dispatch_json(r#"{"type":"teleport"}"#, 10).unwrap_err();
    assert!(err.to_string().contains("invalid JSON"));
    assert!(host.session().unwrap().flags.is_empty());
}

#[test]
fn deleting_a_profile_removes_its_records() {
    let store = MemoryStore::new();
    let mut host = SceneHost::new(store.clone(), EngineConfig::default_config()).unwrap();
    host.open("kid-1", "ganesha_temple", "vakratunda_gate", EntryMode::Fresh, 0)
        .unwrap();
    host.dispatch_json(&syllable(0, "Va"), 10).unwrap();
    assert!(host.exit(20).is_some_and(|r| r.written()));
    assert!(!store.is_empty());
    assert_eq!(host.delete_profile("kid-1").unwrap(), 1);
    assert!(store.is_empty());
}

#[test]
fn entry_report_lasts_until_exit_and_reset_is_durable() {
    let store = MemoryStore::new();
    let config = EngineConfig::default_config();
    let mut host = SceneHost::new(store.clone(), config).unwrap();
    assert!(host.entry_report().is_none());
    host.open("kid-1", "ganesha_temple", "vakratunda_gate", EntryMode::Fresh, 0)
        .unwrap();
    host.dispatch_json(&syllable(0, "Va"), 10).unwrap();
    host.tick(10 + config.debounce_ms);
    host.dispatch_json(r#"{"type":"reset"}"#, 2_000).unwrap();
    host.exit(2_100);
    assert!(host.entry_report().is_none());

    let report = host
        .open("kid-1", "ganesha_temple", "vakratunda_gate", EntryMode::Reload, 3_000)
        .unwrap();
    assert_eq!(report.source, ResumeSource::ResetMarker);
    assert_eq!(host.entry_report().map(|r| r.source), Some(ResumeSource::ResetMarker));
    assert!(host.session().unwrap().flags.is_empty());
}
