//! Scene host: the engine plus its scene catalog, with the JSON surface the
//! page script talks to.

use scenekeep_engine::{
    DurableStore, EffectList, EngineConfig, EngineError, EntryMode, EntryReport, FlushReport,
    ProfileId, SceneCatalog, SceneEngine, SceneEvent, SceneKey, SceneSession, TickReport, ZoneId,
    ZoneProgress,
};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;

use crate::dom;
use crate::navigation;
use crate::storage::LocalStorageStore;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<HostError> for JsValue {
    fn from(err: HostError) -> Self {
        Self::from_str(&err.to_string())
    }
}

pub struct SceneHost<S: DurableStore> {
    engine: SceneEngine<S>,
    catalog: SceneCatalog,
    /// What the last `open` reconstructed; cleared on exit.
    entry: Option<EntryReport>,
}

impl<S: DurableStore> SceneHost<S> {
    /// # Errors
    ///
    /// Fails if the embedded scene catalog does not validate.
    pub fn new(store: S, config: EngineConfig) -> Result<Self, HostError> {
        let catalog = SceneCatalog::builtin().map_err(EngineError::from)?;
        Ok(Self {
            engine: SceneEngine::new(store, config),
            catalog,
            entry: None,
        })
    }

    pub const fn engine(&self) -> &SceneEngine<S> {
        &self.engine
    }

    /// Open a built-in scene for a profile.
    ///
    /// # Errors
    ///
    /// Unknown scenes and malformed identifiers are reported.
    pub fn open(
        &mut self,
        profile: &str,
        zone: &str,
        scene: &str,
        mode: EntryMode,
        now_ms: u64,
    ) -> Result<EntryReport, HostError> {
        let key = SceneKey::parse_parts(profile, zone, scene).map_err(EngineError::from)?;
        let definition = self
            .catalog
            .require(scene)
            .map_err(EngineError::from)?
            .clone();
        let report = self.engine.enter(key, &definition, mode, now_ms)?;
        self.entry = Some(report.clone());
        Ok(report)
    }

    /// Reconstruction output of the open scene, for the view to act on.
    pub const fn entry_report(&self) -> Option<&EntryReport> {
        self.entry.as_ref()
    }

    /// # Errors
    ///
    /// Refused events and missing scenes are reported.
    pub fn dispatch(&mut self, event: SceneEvent, now_ms: u64) -> Result<EffectList, HostError> {
        Ok(self.engine.dispatch(event, now_ms)?)
    }

    /// Dispatch an event given as JSON, returning the effects as JSON.
    ///
    /// # Errors
    ///
    /// Malformed events, refused events and missing scenes are reported.
    pub fn dispatch_json(&mut self, event: &str, now_ms: u64) -> Result<String, HostError> {
        let event: SceneEvent = serde_json::from_str(event)?;
        let effects = self.dispatch(event, now_ms)?;
        Ok(serde_json::to_string(&effects)?)
    }

    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        self.engine.tick(now_ms)
    }

    pub fn overlay_visibility(&mut self, visible: bool, now_ms: u64) -> bool {
        self.engine.overlay_visibility(visible, now_ms)
    }

    pub fn dismiss(&mut self, now_ms: u64) -> bool {
        self.engine.external_dismiss(now_ms)
    }

    /// # Errors
    ///
    /// Reported when no scene is open.
    pub fn play_again(&mut self, now_ms: u64) -> Result<EffectList, HostError> {
        Ok(self.engine.play_again(now_ms)?)
    }

    pub fn exit(&mut self, now_ms: u64) -> Option<FlushReport> {
        self.entry = None;
        self.engine.exit(now_ms)
    }

    pub fn session(&self) -> Option<&SceneSession> {
        self.engine.session()
    }

    /// # Errors
    ///
    /// Malformed identifiers and store failures are reported.
    pub fn zone_progress(&self, profile: &str, zone: &str) -> Result<ZoneProgress, HostError> {
        let profile = ProfileId::new(profile).map_err(EngineError::from)?;
        let zone = ZoneId::new(zone).map_err(EngineError::from)?;
        Ok(self
            .engine
            .repository()
            .zone_progress(&profile, &zone)
            .map_err(EngineError::from)?)
    }

    /// # Errors
    ///
    /// Malformed identifiers and store failures are reported.
    pub fn delete_profile(&self, profile: &str) -> Result<usize, HostError> {
        let profile = ProfileId::new(profile).map_err(EngineError::from)?;
        Ok(self
            .engine
            .repository()
            .delete_profile(&profile)
            .map_err(EngineError::from)?)
    }
}

fn to_js<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value).map_err(|err| JsValue::from_str(&err.to_string()))
}

type SharedHost = Rc<RefCell<SceneHost<LocalStorageStore>>>;

/// Handle the page script holds for the open scene.
#[wasm_bindgen]
pub struct SceneHandle {
    host: SharedHost,
    ticker: Option<(i32, Closure<dyn FnMut()>)>,
}

#[wasm_bindgen]
impl SceneHandle {
    /// Open a scene against `localStorage`, detecting reloads automatically.
    ///
    /// # Errors
    ///
    /// Fails when storage is unavailable or the scene is unknown.
    #[wasm_bindgen(constructor)]
    pub fn open(profile: &str, zone: &str, scene: &str) -> Result<SceneHandle, JsValue> {
        let store = LocalStorageStore::open().map_err(|err| JsValue::from_str(&err.to_string()))?;
        let mut host = SceneHost::new(store, EngineConfig::default_config())?;
        let report = host.open(profile, zone, scene, navigation::entry_mode(), dom::now_ms())?;
        log::info!("scene opened: {:?}", report.source);
        Ok(Self {
            host: Rc::new(RefCell::new(host)),
            ticker: None,
        })
    }

    /// UI directives reconstructed when the scene was opened, in priority
    /// order; an empty list after `exit`.
    ///
    /// # Errors
    ///
    /// Reported when the host is busy.
    #[wasm_bindgen(js_name = entryDirectives)]
    pub fn entry_directives(&self) -> Result<JsValue, JsValue> {
        let host = self
            .host
            .try_borrow()
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        let directives = host
            .entry_report()
            .map_or(&[][..], |report| report.directives.as_slice());
        to_js(&directives)
    }

    /// The live session, or `null` once the scene is closed.
    ///
    /// # Errors
    ///
    /// Reported when the host is busy.
    #[wasm_bindgen(js_name = session)]
    pub fn session_js(&self) -> Result<JsValue, JsValue> {
        let host = self
            .host
            .try_borrow()
            .map_err(|err| JsValue::from_str(&err.to_string()))?;
        to_js(&host.session())
    }

    /// # Errors
    ///
    /// Malformed or refused events are reported as strings.
    pub fn dispatch(&self, event: JsValue) -> Result<JsValue, JsValue> {
        let event: SceneEvent = serde_wasm_bindgen::from_value(event)?;
        let effects = self
            .host
            .try_borrow_mut()
            .map_err(|err| JsValue::from_str(&err.to_string()))?
            .dispatch(event, dom::now_ms())?;
        to_js(&effects)
    }

    #[wasm_bindgen(js_name = overlayVisibility)]
    pub fn overlay_visibility(&self, visible: bool) -> bool {
        self.host
            .try_borrow_mut()
            .is_ok_and(|mut host| host.overlay_visibility(visible, dom::now_ms()))
    }

    pub fn dismiss(&self) -> bool {
        self.host
            .try_borrow_mut()
            .is_ok_and(|mut host| host.dismiss(dom::now_ms()))
    }

    /// # Errors
    ///
    /// Reported when the host is busy or no scene is open.
    #[wasm_bindgen(js_name = playAgain)]
    pub fn play_again(&self) -> Result<JsValue, JsValue> {
        let effects = self
            .host
            .try_borrow_mut()
            .map_err(|err| JsValue::from_str(&err.to_string()))?
            .play_again(dom::now_ms())?;
        to_js(&effects)
    }

    /// Call `on_tick(report)` every `interval_ms` with anything that happened.
    ///
    /// # Errors
    ///
    /// Fails if the browser refuses to schedule the interval.
    #[wasm_bindgen(js_name = startTicking)]
    pub fn start_ticking(&mut self, interval_ms: i32, on_tick: js_sys::Function) -> Result<(), JsValue> {
        self.stop_ticking();
        let host = Rc::clone(&self.host);
        let callback = Closure::<dyn FnMut()>::new(move || {
            let report = match host.try_borrow_mut() {
                Ok(mut host) => host.tick(dom::now_ms()),
                Err(_) => return,
            };
            if report.is_idle() {
                return;
            }
            match to_js(&report) {
                Ok(value) => {
                    if let Err(err) = on_tick.call1(&JsValue::NULL, &value) {
                        dom::console_error(&dom::js_error_message(&err));
                    }
                }
                Err(err) => dom::console_error(&dom::js_error_message(&err)),
            }
        });
        let handle = dom::set_interval(&callback, interval_ms)?;
        self.ticker = Some((handle, callback));
        Ok(())
    }

    #[wasm_bindgen(js_name = stopTicking)]
    pub fn stop_ticking(&mut self) {
        if let Some((handle, _callback)) = self.ticker.take() {
            dom::clear_interval(handle);
        }
    }

    /// Flush and close the scene.
    ///
    /// # Errors
    ///
    /// Reported when the host is busy.
    pub fn exit(&mut self) -> Result<JsValue, JsValue> {
        self.stop_ticking();
        let report = self
            .host
            .try_borrow_mut()
            .map_err(|err| JsValue::from_str(&err.to_string()))?
            .exit(dom::now_ms());
        to_js(&report)
    }

    /// # Errors
    ///
    /// Malformed identifiers and store failures are reported.
    #[wasm_bindgen(js_name = zoneProgress)]
    pub fn zone_progress(&self, profile: &str, zone: &str) -> Result<JsValue, JsValue> {
        let progress = self
            .host
            .try_borrow()
            .map_err(|err| JsValue::from_str(&err.to_string()))?
            .zone_progress(profile, zone)?;
        to_js(&progress)
    }
}
