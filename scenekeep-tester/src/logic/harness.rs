//! One scene under test: an engine over an in-memory store, a virtual clock,
//! and the checks that run after every step.

use anyhow::{Context, Result, ensure};
use scenekeep_engine::{
    Directive, EffectRequest, EngineError, EntryMode, EntryReport, MemoryStore, ResumeSource,
    SceneDefinition, SceneEngine, SceneEvent, SceneKey, SceneSession, TickReport, reconstruct,
};
use twox_hash::XxHash64;

pub const PROFILE: &str = "tester";

pub struct Harness {
    store: MemoryStore,
    definition: SceneDefinition,
    key: SceneKey,
    engine: SceneEngine<MemoryStore>,
    now: u64,
    awards: usize,
    fireworks: usize,
    reloads: usize,
    refused: usize,
}

impl Harness {
    /// Enter `definition` fresh on an empty store.
    ///
    /// # Errors
    ///
    /// Fails when the scene cannot be entered.
    pub fn start(definition: SceneDefinition) -> Result<Self> {
        let key = SceneKey::parse_parts(PROFILE, &definition.zone, &definition.id)?;
        let store = MemoryStore::new();
        let mut engine = SceneEngine::with_defaults(store.clone());
        engine
            .enter(key.clone(), &definition, EntryMode::Fresh, 0)
            .with_context(|| format!("entering {key}"))?;
        Ok(Self {
            store,
            definition,
            key,
            engine,
            now: 0,
            awards: 0,
            fireworks: 0,
            reloads: 0,
            refused: 0,
        })
    }

    pub const fn now(&self) -> u64 {
        self.now
    }

    pub const fn reloads(&self) -> usize {
        self.reloads
    }

    pub const fn refused(&self) -> usize {
        self.refused
    }

    pub const fn awards(&self) -> usize {
        self.awards
    }

    pub const fn definition(&self) -> &SceneDefinition {
        &self.definition
    }

    pub const fn engine(&self) -> &SceneEngine<MemoryStore> {
        &self.engine
    }

    pub fn session(&self) -> Result<&SceneSession> {
        self.engine.session().context("no active scene")
    }

    pub fn phase(&self) -> Result<&str> {
        Ok(self.session()?.phase.as_str())
    }

    pub fn items(&self, flag: &str) -> Result<Vec<String>> {
        Ok(self.session()?.items(flag).to_vec())
    }

    pub fn directive(&self) -> Result<Option<&Directive>> {
        Ok(self.session()?.directive.as_ref())
    }

    /// Dispatch an event that must be accepted.
    pub fn send(&mut self, event: SceneEvent) -> Result<()> {
        self.now += 1;
        let label = event.label();
        let effects = self
            .engine
            .dispatch(event, self.now)
            .with_context(|| format!("{label} refused at {}ms", self.now))?;
        self.observe(&effects)
    }

    /// Dispatch an event that may be refused. A refusal must leave the
    /// session untouched, and a second overlay is never accepted.
    pub fn try_send(&mut self, event: SceneEvent) -> Result<bool> {
        self.now += 1;
        let before = self.session()?.clone();
        let label = event.label();
        let occupied = before.directive.is_some() && matches!(event, SceneEvent::ShowDirective { .. });
        match self.engine.dispatch(event, self.now) {
            Ok(effects) => {
                if occupied {
                    ensure!(
                        self.session()? == &before,
                        "a second overlay was accepted over {:?}",
                        before.directive
                    );
                }
                self.observe(&effects)?;
                Ok(true)
            }
            Err(EngineError::Invariant(violation)) => {
                ensure!(
                    self.session()? == &before,
                    "refused {label} ({violation}) still changed the session"
                );
                self.refused += 1;
                Ok(false)
            }
            Err(err) => Err(err).with_context(|| format!("{label} failed at {}ms", self.now)),
        }
    }

    pub fn tick(&mut self, elapsed_ms: u64) -> Result<TickReport> {
        self.now += elapsed_ms;
        let report = self.engine.tick(self.now);
        self.observe(&report.effects)?;
        Ok(report)
    }

    /// Let every pending write land, including any held by the reload grace.
    pub fn settle(&mut self) -> Result<()> {
        let config = *self.engine.config();
        self.tick(config.debounce_ms.max(config.reload_grace_ms) + 1)?;
        Ok(())
    }

    pub fn overlay_flash(&mut self) -> Result<()> {
        self.now += 1;
        self.engine.overlay_visibility(true, self.now);
        self.now += 5;
        self.engine.overlay_visibility(false, self.now);
        self.check()
    }

    /// Dismiss the active overlay and wait for its deferred action.
    pub fn acknowledge(&mut self) -> Result<()> {
        ensure!(self.directive()?.is_some(), "nothing to acknowledge");
        self.now += 1;
        ensure!(
            self.engine.external_dismiss(self.now),
            "dismiss was not tracked for {:?}",
            self.directive()?
        );
        let delay = self.engine.config().dismiss_delay_ms;
        let report = self.tick(delay)?;
        ensure!(report.fired.is_some(), "deferred action did not fire");
        Ok(())
    }

    pub fn play_again(&mut self) -> Result<()> {
        self.now += 1;
        let effects = self.engine.play_again(self.now)?;
        self.observe(&effects)?;
        ensure!(
            self.session()?.is_empty(&self.definition),
            "replay left progress behind"
        );
        Ok(())
    }

    /// Drop the engine without flushing and enter again, as a page reload.
    pub fn reload(&mut self) -> Result<EntryReport> {
        self.reenter(false)
    }

    /// Leave the scene cleanly, then enter again. Nothing may be lost.
    pub fn exit_and_reenter(&mut self) -> Result<EntryReport> {
        self.reenter(true)
    }

    fn reenter(&mut self, clean: bool) -> Result<EntryReport> {
        let before = self.session()?.clone();
        if clean {
            self.engine.exit(self.now);
        }
        let durable = self.engine.repository().load_raw(&self.key)?;
        if before.completed {
            ensure!(
                durable.as_ref().is_some_and(|record| record.is_completed()),
                "completion was not written immediately"
            );
        }

        let at = self.now;
        let first = self.reconstruction_digest(at)?;
        ensure!(
            self.reconstruction_digest(at)? == first,
            "reconstruction is not idempotent"
        );

        self.now += 1;
        let mut engine = SceneEngine::with_defaults(self.store.clone());
        let report = engine
            .enter(self.key.clone(), &self.definition, EntryMode::Reload, self.now)
            .with_context(|| format!("re-entering {}", self.key))?;
        self.engine = engine;
        self.reloads += 1;
        if report.source != ResumeSource::ResetMarker {
            ensure!(
                self.reconstruction_digest(at)? == first,
                "entering rewrote the durable record"
            );
        }

        let after = self.session()?;
        if durable.is_some_and(|record| record.is_completed()) {
            ensure!(after.completed, "completed scene reopened as in progress");
            ensure!(
                after.stars == self.definition.reward_stars,
                "stars changed across reload: {}",
                after.stars
            );
        }
        if clean {
            ensure!(after.phase == before.phase, "phase lost on clean exit");
            ensure!(after.stars == before.stars, "stars lost on clean exit");
            ensure!(after.completed == before.completed, "completion lost on clean exit");
            ensure!(
                after.learned_words == before.learned_words,
                "learned words lost on clean exit"
            );
        }
        self.check()?;
        Ok(report)
    }

    fn reconstruction_digest(&self, at_ms: u64) -> Result<u64> {
        let repository = self.engine.repository();
        let loaded = repository.load(&self.key, &self.definition)?;
        let marker = repository.has_reset_marker(&self.key)?;
        let outcome = reconstruct(
            &self.definition,
            &self.key,
            &loaded,
            marker,
            EntryMode::Reload,
            at_ms,
        );
        let bytes = serde_json::to_vec(&(&outcome.seeded, &outcome.directives, outcome.source))?;
        Ok(XxHash64::oneshot(0, &bytes))
    }

    fn observe(&mut self, effects: &[EffectRequest]) -> Result<()> {
        for effect in effects {
            match effect {
                EffectRequest::AwardStars { .. } => self.awards += 1,
                EffectRequest::Fireworks => self.fireworks += 1,
                _ => {}
            }
        }
        if !self.session()?.completed {
            self.awards = 0;
            self.fireworks = 0;
        }
        ensure!(
            self.awards <= 1 && self.fireworks <= 1,
            "completion rewarded {} times with {} fireworks",
            self.awards,
            self.fireworks
        );
        self.check()
    }

    /// Checks that must hold after every step.
    pub fn check(&self) -> Result<()> {
        let session = self.session()?;
        let definition = &self.definition;
        ensure!(
            definition.has_phase(&session.phase),
            "unknown phase {}",
            session.phase
        );
        ensure!(
            session.pending_action.is_none() || session.directive.is_some(),
            "pending action {:?} without an overlay",
            session.pending_action
        );
        if session.completed {
            ensure!(
                definition.is_terminal(&session.phase),
                "completed on non-terminal phase {}",
                session.phase
            );
            ensure!(
                session.stars == definition.reward_stars,
                "completed with {} stars",
                session.stars
            );
        } else {
            ensure!(session.stars == 0, "{} stars before completion", session.stars);
        }
        Ok(())
    }
}
