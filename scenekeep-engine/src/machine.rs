//! Pure reducer over [`SceneSession`].
//!
//! `apply` never touches storage, timers or the view; it returns the next
//! session together with the side effects the caller should perform.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::scene::SceneDefinition;
use crate::session::{Directive, FlagValue, PendingAction, PhaseId, READY_FLAG, SceneSession};

/// Input from the mini-game view, the overlay layer or the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SceneEvent {
    /// Place `syllable` at slot `index` of the item list `flag`.
    SyllablePlaced {
        flag: String,
        syllable: String,
        index: usize,
    },
    /// Report tracing/collection progress; only ever moves forward.
    MinigameProgress { flag: String, percent: u8 },
    Increment { flag: String, by: u32 },
    SetFlag { flag: String, value: FlagValue },
    Advance { to: PhaseId },
    ShowDirective {
        directive: Directive,
        #[serde(default)]
        then: Option<PendingAction>,
    },
    DirectiveAcknowledged,
    ResumePendingAction,
    Reset,
}

impl SceneEvent {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SyllablePlaced { .. } => "syllable_placed",
            Self::MinigameProgress { .. } => "minigame_progress",
            Self::Increment { .. } => "increment",
            Self::SetFlag { .. } => "set_flag",
            Self::Advance { .. } => "advance",
            Self::ShowDirective { .. } => "show_directive",
            Self::DirectiveAcknowledged => "directive_acknowledged",
            Self::ResumePendingAction => "resume_pending_action",
            Self::Reset => "reset",
        }
    }
}

/// Side effect requested from the view. The machine never performs these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum EffectRequest {
    Sparkle,
    PlayCue { cue: String },
    WordLearned { word: String },
    AwardStars { stars: u32 },
    Fireworks,
    PhaseEntered { phase: PhaseId },
    Rejected { reason: String },
}

pub type EffectList = SmallVec<[EffectRequest; 4]>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("cannot show {requested} while {active} is still active")]
    DirectiveOccupied {
        active: &'static str,
        requested: &'static str,
    },
    #[error("no transition from '{from}' to '{to}'")]
    IllegalTransition { from: PhaseId, to: PhaseId },
    #[error("phase '{0}' is not part of this scene")]
    UnknownPhase(PhaseId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub session: SceneSession,
    pub effects: EffectList,
    /// The session changed in a way the persistence controller should see.
    pub autosave: bool,
}

impl Transition {
    fn unchanged(session: &SceneSession, effects: EffectList) -> Self {
        Self {
            session: session.clone(),
            effects,
            autosave: false,
        }
    }
}

/// Reducer bound to one scene definition.
#[derive(Debug, Clone, Copy)]
pub struct SceneMachine<'a> {
    definition: &'a SceneDefinition,
}

impl<'a> SceneMachine<'a> {
    #[must_use]
    pub const fn new(definition: &'a SceneDefinition) -> Self {
        Self { definition }
    }

    #[must_use]
    pub const fn definition(&self) -> &'a SceneDefinition {
        self.definition
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns an [`InvariantViolation`] when the event would break directive
    /// exclusivity or the transition table; `session` is left as it was.
    pub fn apply(
        &self,
        session: &SceneSession,
        event: SceneEvent,
        now_ms: u64,
    ) -> Result<Transition, InvariantViolation> {
        let mut effects = EffectList::new();
        if session.completed
            && !matches!(event, SceneEvent::DirectiveAcknowledged | SceneEvent::Reset)
        {
            log::debug!("ignoring {} on completed scene {}", event.label(), session.key);
            return Ok(Transition::unchanged(session, effects));
        }

        let mut next = session.clone();
        match event {
            SceneEvent::SyllablePlaced {
                flag,
                syllable,
                index,
            } => {
                let placed = next.items(&flag).len();
                let expected = self.definition.expected_sequence(&next.phase, &flag);
                if index != placed {
                    effects.push(EffectRequest::Rejected {
                        reason: format!("slot {index} is not the next open slot ({placed})"),
                    });
                    return Ok(Transition::unchanged(session, effects));
                }
                if let Some(expected) = expected
                    && expected.get(index) != Some(&syllable)
                {
                    effects.push(EffectRequest::Rejected {
                        reason: format!("'{syllable}' does not belong in slot {index}"),
                    });
                    return Ok(Transition::unchanged(session, effects));
                }
                let slot = next
                    .flags
                    .entry(flag)
                    .or_insert_with(|| FlagValue::Items(Vec::new()));
                match slot {
                    FlagValue::Items(items) => items.push(syllable.clone()),
                    other => *other = FlagValue::Items(vec![syllable.clone()]),
                }
                effects.push(EffectRequest::Sparkle);
                effects.push(EffectRequest::PlayCue { cue: syllable });
                self.evaluate_rules(&mut next, &mut effects);
            }
            SceneEvent::MinigameProgress { flag, percent } => {
                let percent = percent.min(100);
                let current = match next.flag(&flag) {
                    Some(FlagValue::Percent(value)) => *value,
                    _ => 0,
                };
                if percent > current {
                    next.flags.insert(flag, FlagValue::Percent(percent));
                }
                self.evaluate_rules(&mut next, &mut effects);
            }
            SceneEvent::Increment { flag, by } => {
                let current = next.flag(&flag).map_or(0, FlagValue::magnitude);
                next.flags
                    .insert(flag, FlagValue::Count(current.saturating_add(by)));
                effects.push(EffectRequest::Sparkle);
                self.evaluate_rules(&mut next, &mut effects);
            }
            SceneEvent::SetFlag { flag, value } => {
                next.flags.insert(flag, value);
                self.evaluate_rules(&mut next, &mut effects);
            }
            SceneEvent::Advance { to } => {
                if let Some(active) = &next.directive {
                    return Err(InvariantViolation::DirectiveOccupied {
                        active: active.label(),
                        requested: "phase advance",
                    });
                }
                self.advance(&mut next, to, &mut effects)?;
                self.evaluate_rules(&mut next, &mut effects);
            }
            SceneEvent::ShowDirective { directive, then } => {
                if let Some(active) = &next.directive {
                    return Err(InvariantViolation::DirectiveOccupied {
                        active: active.label(),
                        requested: directive.label(),
                    });
                }
                if let Some(action) = &then {
                    if !self.definition.has_phase(&action.target) {
                        return Err(InvariantViolation::UnknownPhase(action.target.clone()));
                    }
                    // The action runs from the current phase once acknowledged.
                    if action.target != next.phase
                        && !self.definition.can_transition(&next.phase, &action.target)
                    {
                        return Err(InvariantViolation::IllegalTransition {
                            from: next.phase.clone(),
                            to: action.target.clone(),
                        });
                    }
                }
                Self::show(&mut next, directive, then, &mut effects);
            }
            SceneEvent::DirectiveAcknowledged => {
                let Some(directive) = next.directive.take() else {
                    log::debug!("acknowledgment with no active directive on {}", session.key);
                    return Ok(Transition::unchanged(session, effects));
                };
                log::debug!("{} acknowledged on {}", directive.label(), session.key);
                if let Some(action) = next.pending_action.take() {
                    self.run_action(&mut next, &action, &mut effects)?;
                }
            }
            SceneEvent::ResumePendingAction => {
                let Some(action) = next.ready_action() else {
                    log::debug!("nothing to resume on {}", session.key);
                    return Ok(Transition::unchanged(session, effects));
                };
                if let Some(active) = &next.directive {
                    return Err(InvariantViolation::DirectiveOccupied {
                        active: active.label(),
                        requested: action.kind.label(),
                    });
                }
                next.flags.remove(READY_FLAG);
                self.run_action(&mut next, &action, &mut effects)?;
            }
            SceneEvent::Reset => {
                next = SceneSession::fresh(session.key.clone(), self.definition, now_ms);
                effects.push(EffectRequest::PhaseEntered {
                    phase: next.phase.clone(),
                });
            }
        }

        let changed = !next.same_state(session);
        if changed {
            next.last_mutated_at_ms = now_ms;
        }
        Ok(Transition {
            autosave: changed && !next.completed,
            session: next,
            effects,
        })
    }

    fn advance(
        &self,
        session: &mut SceneSession,
        to: PhaseId,
        effects: &mut EffectList,
    ) -> Result<(), InvariantViolation> {
        if !self.definition.has_phase(&to) {
            return Err(InvariantViolation::UnknownPhase(to));
        }
        if !self.definition.can_transition(&session.phase, &to) {
            return Err(InvariantViolation::IllegalTransition {
                from: session.phase.clone(),
                to,
            });
        }
        self.enter_phase(session, to, effects);
        Ok(())
    }

    fn run_action(
        &self,
        session: &mut SceneSession,
        action: &PendingAction,
        effects: &mut EffectList,
    ) -> Result<(), InvariantViolation> {
        if session.phase == action.target {
            return Ok(());
        }
        log::debug!("running {} on {}", action.kind.label(), session.key);
        self.advance(session, action.target.clone(), effects)?;
        self.evaluate_rules(session, effects);
        Ok(())
    }

    fn enter_phase(&self, session: &mut SceneSession, phase: PhaseId, effects: &mut EffectList) {
        session.progress_percentage = self.definition.progress_percentage(&phase);
        effects.push(EffectRequest::PhaseEntered {
            phase: phase.clone(),
        });
        let terminal = self.definition.is_terminal(&phase);
        session.phase = phase;
        if terminal && !session.completed {
            session.completed = true;
            session.progress_percentage = 100;
            session.stars = self.definition.reward_stars;
            session.pending_action = None;
            session.directive = Some(Directive::CompletionScreen);
            effects.push(EffectRequest::AwardStars {
                stars: session.stars,
            });
            effects.push(EffectRequest::Fireworks);
            log::info!(
                "scene {} complete with {} stars",
                session.key,
                session.stars
            );
        }
    }

    fn show(
        session: &mut SceneSession,
        directive: Directive,
        then: Option<PendingAction>,
        effects: &mut EffectList,
    ) {
        if let Directive::SymbolDiscovery { word } = &directive
            && session.learned_words.insert(word.clone())
        {
            effects.push(EffectRequest::WordLearned { word: word.clone() });
        }
        session.directive = Some(directive);
        session.pending_action = then;
    }

    /// Fire auto-advance rules until none applies. Rules never fire while a
    /// directive is owed, so a rule's overlay cannot displace another.
    fn evaluate_rules(&self, session: &mut SceneSession, effects: &mut EffectList) {
        for _ in 0..self.definition.phases.len() {
            if session.directive.is_some() || session.completed {
                return;
            }
            let Some(rule) = self
                .definition
                .rules_for(&session.phase)
                .find(|rule| rule.when.holds(session))
                .cloned()
            else {
                return;
            };
            // Validated definitions only hold rules along existing edges.
            if !self.definition.can_transition(&rule.phase, &rule.advance_to) {
                log::error!("rule for {} has no edge to {}", rule.phase, rule.advance_to);
                return;
            }
            self.enter_phase(session, rule.advance_to, effects);
            if let Some(directive) = rule.then_show {
                Self::show(session, directive, rule.then_pending, effects);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SceneKey;
    use crate::scene::SceneCatalog;
    use crate::session::ActionKind;

    fn gate() -> SceneDefinition {
        SceneCatalog::builtin()
            .unwrap()
            .require("vakratunda_gate")
            .unwrap()
            .clone()
    }

    fn start(def: &SceneDefinition) -> SceneSession {
        let key = SceneKey::parse_parts("p1", "ganesha_temple", "vakratunda_gate").unwrap();
        SceneSession::fresh(key, def, 0)
    }

    fn place(flag: &str, syllable: &str, index: usize) -> SceneEvent {
        SceneEvent::SyllablePlaced {
            flag: flag.into(),
            syllable: syllable.into(),
            index,
        }
    }

    #[test]
    fn door_sequence_completes_and_shows_discovery() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let mut session = start(&def);
        for (i, syllable) in ["Va", "kra", "tun"].iter().enumerate() {
            let t = machine
                .apply(&session, place("door1SyllablesPlaced", syllable, i), 10)
                .unwrap();
            assert!(t.autosave);
            session = t.session;
        }
        assert_eq!(session.phase.as_str(), "door1_active");

        let t = machine
            .apply(&session, place("door1SyllablesPlaced", "da", 3), 20)
            .unwrap();
        assert_eq!(t.session.phase.as_str(), "door1_complete");
        assert_eq!(
            t.session.directive,
            Some(Directive::SymbolDiscovery {
                word: "vakratunda".into()
            })
        );
        assert_eq!(
            t.session.pending_action,
            Some(PendingAction::new(ActionKind::StartMinigame, "minigame1_active"))
        );
        assert!(t.effects.contains(&EffectRequest::WordLearned {
            word: "vakratunda".into()
        }));
        assert_eq!(t.session.last_mutated_at_ms, 20);
    }

    #[test]
    fn out_of_order_syllables_are_rejected_without_change() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let session = start(&def);
        let t = machine
            .apply(&session, place("door1SyllablesPlaced", "kra", 0), 5)
            .unwrap();
        assert!(!t.autosave);
        assert_eq!(t.session, session);
        assert!(matches!(t.effects[0], EffectRequest::Rejected { .. }));

        let t = machine
            .apply(&session, place("door1SyllablesPlaced", "Va", 2), 5)
            .unwrap();
        assert!(matches!(t.effects[0], EffectRequest::Rejected { .. }));
    }

    #[test]
    fn second_directive_is_refused() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let mut session = start(&def);
        session.directive = Some(Directive::SidebarHighlight {
            word: "vakratunda".into(),
        });
        let err = machine
            .apply(
                &session,
                SceneEvent::ShowDirective {
                    directive: Directive::CompletionScreen,
                    then: None,
                },
                1,
            )
            .unwrap_err();
        assert!(matches!(err, InvariantViolation::DirectiveOccupied { .. }));
    }

    #[test]
    fn directive_with_unreachable_action_is_refused() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let session = start(&def);
        let err = machine
            .apply(
                &session,
                SceneEvent::ShowDirective {
                    directive: Directive::SidebarHighlight {
                        word: "vakratunda".into(),
                    },
                    then: Some(PendingAction::new(ActionKind::StartFinale, "finale")),
                },
                1,
            )
            .unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::IllegalTransition {
                from: "door1_active".into(),
                to: "finale".into(),
            }
        );

        let t = machine
            .apply(
                &session,
                SceneEvent::ShowDirective {
                    directive: Directive::SidebarHighlight {
                        word: "vakratunda".into(),
                    },
                    then: Some(PendingAction::new(ActionKind::StartNextDoor, "door1_complete")),
                },
                2,
            )
            .unwrap();
        let acked = machine
            .apply(&t.session, SceneEvent::DirectiveAcknowledged, 3)
            .unwrap();
        assert!(acked.session.directive.is_none());
        assert!(acked.session.pending_action.is_none());
        assert_eq!(acked.session.phase.as_str(), "door1_complete");
    }

    #[test]
    fn acknowledgment_clears_pair_and_runs_action() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let mut session = start(&def);
        session.phase = PhaseId::from("door1_complete");
        session.directive = Some(Directive::SymbolDiscovery {
            word: "vakratunda".into(),
        });
        session.pending_action = Some(PendingAction::new(
            ActionKind::StartMinigame,
            "minigame1_active",
        ));
        let t = machine
            .apply(&session, SceneEvent::DirectiveAcknowledged, 3)
            .unwrap();
        assert!(t.session.directive.is_none());
        assert!(t.session.pending_action.is_none());
        assert_eq!(t.session.phase.as_str(), "minigame1_active");

        let again = machine
            .apply(&t.session, SceneEvent::DirectiveAcknowledged, 4)
            .unwrap();
        assert!(!again.autosave);
    }

    #[test]
    fn illegal_and_unknown_advances_are_refused() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let session = start(&def);
        assert!(matches!(
            machine.apply(&session, SceneEvent::Advance { to: "finale".into() }, 1),
            Err(InvariantViolation::IllegalTransition { .. })
        ));
        assert!(matches!(
            machine.apply(&session, SceneEvent::Advance { to: "attic".into() }, 1),
            Err(InvariantViolation::UnknownPhase(_))
        ));
    }

    #[test]
    fn finale_completes_once_and_freezes_session() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let mut session = start(&def);
        session.phase = PhaseId::from("finale");
        session.flags.insert("stonesClicked".into(), FlagValue::Count(4));
        let t = machine
            .apply(
                &session,
                SceneEvent::Increment {
                    flag: "stonesClicked".into(),
                    by: 1,
                },
                50,
            )
            .unwrap();
        assert!(t.session.completed);
        assert_eq!(t.session.stars, 3);
        assert_eq!(t.session.progress_percentage, 100);
        assert_eq!(t.session.directive, Some(Directive::CompletionScreen));
        assert!(!t.autosave, "terminal writes bypass the debounce");
        let awards = t
            .effects
            .iter()
            .filter(|e| matches!(e, EffectRequest::AwardStars { .. }))
            .count();
        assert_eq!(awards, 1);

        let ignored = machine
            .apply(
                &t.session,
                SceneEvent::Increment {
                    flag: "stonesClicked".into(),
                    by: 1,
                },
                60,
            )
            .unwrap();
        assert_eq!(ignored.session, t.session);
        assert!(ignored.effects.is_empty());
    }

    #[test]
    fn minigame_progress_is_monotonic_and_clamped() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let mut session = start(&def);
        session.phase = PhaseId::from("minigame1_active");
        let progress = |percent| SceneEvent::MinigameProgress {
            flag: "minigame1Trace".into(),
            percent,
        };
        let t = machine.apply(&session, progress(60), 1).unwrap();
        let t = machine.apply(&t.session, progress(30), 2).unwrap();
        assert_eq!(t.session.flags["minigame1Trace"], FlagValue::Percent(60));
        assert!(!t.autosave);
        let t = machine.apply(&t.session, progress(250), 3).unwrap();
        assert_eq!(t.session.phase.as_str(), "minigame1_complete");
        assert!(matches!(
            t.session.directive,
            Some(Directive::GameCoachPending { .. })
        ));
    }

    #[test]
    fn resume_runs_parked_action_once() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let mut session = start(&def);
        session.phase = PhaseId::from("minigame1_complete");
        session.flags.insert(
            READY_FLAG.into(),
            FlagValue::Text(PendingAction::new(ActionKind::StartLearning, "learning1").ready_token()),
        );
        let t = machine
            .apply(&session, SceneEvent::ResumePendingAction, 9)
            .unwrap();
        assert_eq!(t.session.phase.as_str(), "learning1");
        assert!(t.session.flag(READY_FLAG).is_none());
        let t = machine
            .apply(&t.session, SceneEvent::ResumePendingAction, 10)
            .unwrap();
        assert!(!t.autosave);
    }

    #[test]
    fn rediscovering_a_word_does_not_count_twice() {
        let def = gate();
        let machine = SceneMachine::new(&def);
        let mut session = start(&def);
        session.learned_words.insert("vakratunda".into());
        let t = machine
            .apply(
                &session,
                SceneEvent::ShowDirective {
                    directive: Directive::SymbolDiscovery {
                        word: "vakratunda".into(),
                    },
                    then: None,
                },
                1,
            )
            .unwrap();
        assert_eq!(t.session.learned_words.len(), 1);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn events_deserialize_from_tagged_json() {
        let event: SceneEvent = serde_json::from_str(
            r#"{"type":"syllable_placed","flag":"door1SyllablesPlaced","syllable":"Va","index":0}"#,
        )
        .unwrap();
        assert_eq!(event, place("door1SyllablesPlaced", "Va", 0));
        let event: SceneEvent = serde_json::from_str(r#"{"type":"reset"}"#).unwrap();
        assert_eq!(event, SceneEvent::Reset);
    }
}
