//! Single façade that owns the active scene and wires the reducer,
//! persistence, reconstruction, deferred actions and hints together.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::deferred::{DeferredActionCoordinator, DeferredFire};
use crate::error::EngineError;
use crate::hints::{HintChange, HintDescriptor, HintScheduler};
use crate::key::SceneKey;
use crate::machine::{EffectList, EffectRequest, SceneEvent, SceneMachine};
use crate::persist::{FlushReport, PersistStats, PersistenceController};
use crate::reconstruct::{EntryMode, ResumeSource, UiDirective, reconstruct};
use crate::repository::{LoadedRecord, SceneRepository};
use crate::scene::SceneDefinition;
use crate::session::SceneSession;
use crate::store::DurableStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReport {
    pub key: SceneKey,
    pub mode: EntryMode,
    pub source: ResumeSource,
    pub directives: Vec<UiDirective>,
}

/// Everything that happened during one timer tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub flushed: Vec<FlushReport>,
    pub fired: Option<DeferredFire>,
    pub effects: EffectList,
    pub hint: Option<HintChange>,
}

impl TickReport {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.flushed.is_empty() && self.fired.is_none() && self.effects.is_empty() && self.hint.is_none()
    }
}

#[derive(Debug, Clone)]
struct ActiveScene {
    definition: SceneDefinition,
    session: SceneSession,
    hints: HintScheduler,
    /// A replay was requested and the marker has not been cleared yet.
    reset_marker_set: bool,
}

pub struct SceneEngine<S: DurableStore> {
    config: EngineConfig,
    repository: SceneRepository<S>,
    persistence: PersistenceController,
    deferred: DeferredActionCoordinator,
    active: Option<ActiveScene>,
}

impl<S: DurableStore> SceneEngine<S> {
    pub const fn new(store: S, config: EngineConfig) -> Self {
        Self {
            repository: SceneRepository::new(store),
            persistence: PersistenceController::new(config.debounce_ms),
            deferred: DeferredActionCoordinator::new(config.dismiss_delay_ms),
            active: None,
            config,
        }
    }

    pub fn with_defaults(store: S) -> Self {
        Self::new(store, EngineConfig::default_config())
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn repository(&self) -> &SceneRepository<S> {
        &self.repository
    }

    pub const fn stats(&self) -> PersistStats {
        self.persistence.stats()
    }

    pub fn session(&self) -> Option<&SceneSession> {
        self.active.as_ref().map(|active| &active.session)
    }

    pub fn definition(&self) -> Option<&SceneDefinition> {
        self.active.as_ref().map(|active| &active.definition)
    }

    pub fn current_hint(&self) -> Option<&HintDescriptor> {
        self.active.as_ref()?.hints.current()
    }

    pub fn pending_writes(&self) -> usize {
        self.persistence.pending_count()
    }

    /// Open a scene, reconstructing whatever the store holds for it.
    ///
    /// Storage and corruption problems never fail entry; the scene starts
    /// fresh instead. Entering another scene first exits the current one.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Definition`] if `definition` is invalid.
    pub fn enter(
        &mut self,
        key: SceneKey,
        definition: &SceneDefinition,
        mode: EntryMode,
        now_ms: u64,
    ) -> Result<EntryReport, EngineError> {
        definition.validate()?;
        if self.active.is_some() {
            self.exit(now_ms);
        }

        let loaded = self.repository.load(&key, definition).unwrap_or_else(|err| {
            log::warn!("could not read record for {key}: {err}");
            LoadedRecord::Missing
        });
        let marker = self.repository.has_reset_marker(&key).unwrap_or_else(|err| {
            log::warn!("could not read reset marker for {key}: {err}");
            false
        });
        let reconstruction = reconstruct(definition, &key, &loaded, marker, mode, now_ms);

        let mut reset_marker_set = false;
        if reconstruction.clear_reset_marker {
            // A stale record may survive a failed delete during the replay request.
            if let Err(err) = self.repository.delete(&key) {
                log::warn!("could not delete stale record for {key}: {err}");
            }
            if let Err(err) = self.repository.clear_reset(&key) {
                log::warn!("could not clear reset marker for {key}: {err}");
                reset_marker_set = true;
            }
            self.persistence.forget(&key);
        } else if reconstruction.source == ResumeSource::Resumed {
            self.persistence.note_persisted(&key, loaded.record());
        } else {
            self.persistence.note_persisted(&key, None);
        }
        if reconstruction.begin_grace {
            self.persistence
                .begin_reload_grace(&key, now_ms + self.config.reload_grace_ms);
        }

        self.deferred.cancel();
        if reconstruction.seeded.directive.is_some() {
            self.deferred
                .set_pending(key.clone(), reconstruction.seeded.pending_action.clone());
        }

        let mut hints = HintScheduler::new(
            &definition.hints,
            self.config.hint_cadence_ms,
            self.config.hint_delay_ms,
        );
        hints.restart(now_ms);

        log::info!(
            "entered {key} ({mode:?}, {:?}) at phase {}",
            reconstruction.source,
            reconstruction.seeded.phase
        );
        self.active = Some(ActiveScene {
            definition: definition.clone(),
            session: reconstruction.seeded,
            hints,
            reset_marker_set,
        });
        Ok(EntryReport {
            key,
            mode,
            source: reconstruction.source,
            directives: reconstruction.directives,
        })
    }

    /// Feed one event through the reducer and persist the result.
    /// [`SceneEvent::Reset`] is a durable replay, same as [`Self::play_again`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoActiveScene`] before `enter`, and
    /// [`EngineError::Invariant`] when the event is refused; the session is
    /// unchanged in both cases.
    pub fn dispatch(&mut self, event: SceneEvent, now_ms: u64) -> Result<EffectList, EngineError> {
        if self.active.is_none() {
            return Err(EngineError::NoActiveScene);
        }
        if event == SceneEvent::Reset {
            return self.play_again(now_ms);
        }
        let Some(active) = self.active.as_mut() else {
            return Err(EngineError::NoActiveScene);
        };
        let label = event.label();
        let transition = SceneMachine::new(&active.definition)
            .apply(&active.session, event, now_ms)
            .map_err(|violation| {
                log::error!("{label} refused on {}: {violation}", active.session.key);
                violation
            })?;

        let before = std::mem::replace(&mut active.session, transition.session);
        let session = &active.session;
        if session.directive != before.directive {
            match &session.directive {
                Some(_) => self
                    .deferred
                    .set_pending(session.key.clone(), session.pending_action.clone()),
                None => {
                    self.deferred.cancel();
                }
            }
        }

        if transition.autosave {
            self.persistence
                .on_session_changed(session, &active.definition, now_ms);
        }
        if session.completed && !session.same_state(&before) {
            let report = self
                .persistence
                .flush_terminal(&self.repository, session, now_ms);
            clear_marker_after_write(&self.repository, active, &report);
        }
        if before.phase != active.session.phase {
            active.hints.restart(now_ms);
        }
        Ok(transition.effects)
    }

    /// Level-triggered overlay visibility from the view.
    pub fn overlay_visibility(&mut self, visible: bool, now_ms: u64) -> bool {
        self.deferred.observe_overlay(visible, now_ms)
    }

    /// The overlay's own dismiss callback.
    pub fn external_dismiss(&mut self, now_ms: u64) -> bool {
        self.deferred.on_external_dismiss(now_ms)
    }

    /// Drive every timer: due writes, deferred actions, hints.
    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        let mut report = TickReport {
            flushed: self.persistence.poll(&self.repository, now_ms),
            ..TickReport::default()
        };
        if let Some(active) = self.active.as_mut() {
            for flush in &report.flushed {
                clear_marker_after_write(&self.repository, active, flush);
            }
        }

        if let Some(fire) = self.deferred.poll(now_ms) {
            let current = self
                .active
                .as_ref()
                .is_some_and(|active| active.session.key == fire.key && active.session.directive.is_some());
            if current {
                match self.dispatch(SceneEvent::DirectiveAcknowledged, now_ms) {
                    Ok(effects) => report.effects = effects,
                    Err(err) => log::error!("deferred acknowledgment failed: {err}"),
                }
            }
            report.fired = Some(fire);
        }

        if let Some(active) = self.active.as_mut() {
            report.hint = active.hints.tick(&active.session, now_ms);
        }
        report
    }

    /// Replay the scene from the start: cancel timers, leave a reset marker,
    /// drop the record and reset the live session.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoActiveScene`] before `enter`. Storage failures
    /// are logged; the in-memory reset always happens.
    pub fn play_again(&mut self, now_ms: u64) -> Result<EffectList, EngineError> {
        let Some(active) = self.active.as_mut() else {
            return Err(EngineError::NoActiveScene);
        };
        let key = active.session.key.clone();
        self.persistence.forget(&key);
        self.deferred.cancel();
        if let Err(err) = self.repository.mark_reset(&key) {
            log::warn!("could not write reset marker for {key}: {err}");
        }
        if let Err(err) = self.repository.delete(&key) {
            log::warn!("could not delete record for {key}: {err}");
        }
        active.reset_marker_set = true;
        active.session = SceneSession::fresh(key.clone(), &active.definition, now_ms);
        active.hints.restart(now_ms);
        log::info!("replaying {key}");
        let mut effects = EffectList::new();
        effects.push(EffectRequest::PhaseEntered {
            phase: active.session.phase.clone(),
        });
        Ok(effects)
    }

    /// Leave the scene: flush its pending write, then cancel its timers.
    pub fn exit(&mut self, now_ms: u64) -> Option<FlushReport> {
        let mut active = self.active.take()?;
        let key = active.session.key.clone();
        let report = self.persistence.flush_now(&self.repository, &key, now_ms);
        if let Some(report) = &report {
            clear_marker_after_write(&self.repository, &mut active, report);
        }
        self.persistence.cancel(&key);
        self.deferred.cancel();
        log::info!("exited {key}");
        report
    }
}

fn clear_marker_after_write<S: DurableStore>(
    repository: &SceneRepository<S>,
    active: &mut ActiveScene,
    report: &FlushReport,
) {
    if !active.reset_marker_set || !report.written() || report.key != active.session.key {
        return;
    }
    match repository.clear_reset(&report.key) {
        Ok(()) => active.reset_marker_set = false,
        Err(err) => log::warn!("could not clear reset marker for {}: {err}", report.key),
    }
}
