//! Static per-scene data: phases, transition table, auto-advance rules.
//!
//! Definitions are plain JSON so every scene shares one engine instead of
//! carrying its own orchestration code.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::hints::{HintCondition, HintDescriptor};
use crate::session::{Directive, PendingAction, PhaseId, SceneSession};

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("scene definition JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scene '{scene}' needs at least two phases")]
    TooFewPhases { scene: String },
    #[error("scene '{scene}' lists phase '{phase}' more than once")]
    DuplicatePhase { scene: String, phase: PhaseId },
    #[error("scene '{scene}' references unknown phase '{phase}'")]
    UnknownPhase { scene: String, phase: PhaseId },
    #[error("scene '{scene}' transition {from} -> {to} does not move forward")]
    BackEdge {
        scene: String,
        from: PhaseId,
        to: PhaseId,
    },
    #[error("scene '{scene}' rule for '{phase}' advances along a missing edge to '{to}'")]
    RuleWithoutEdge {
        scene: String,
        phase: PhaseId,
        to: PhaseId,
    },
    #[error("scene '{scene}' rule into terminal phase '{phase}' cannot show its own overlay")]
    TerminalRuleOverlay { scene: String, phase: PhaseId },
    #[error("scene '{scene}' rule for '{phase}' parks an action without an overlay to guard it")]
    PendingWithoutOverlay { scene: String, phase: PhaseId },
    #[error("scene '{scene}' has no scene named '{requested}' in its catalog")]
    NotInCatalog { scene: String, requested: String },
}

/// Predicate over session flags that completes a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The item list equals `items` exactly, in order.
    Sequence { flag: String, items: Vec<String> },
    /// The flag's magnitude reaches `value`.
    AtLeast { flag: String, value: u32 },
    IsTrue { flag: String },
}

impl Condition {
    #[must_use]
    pub fn holds(&self, session: &SceneSession) -> bool {
        match self {
            Self::Sequence { flag, items } => session.items(flag) == items.as_slice(),
            Self::AtLeast { flag, value } => {
                session.flag(flag).is_some_and(|v| v.magnitude() >= *value)
            }
            Self::IsTrue { flag } => session.flag(flag).is_some_and(|v| v.is_true()),
        }
    }

    #[must_use]
    pub fn flag(&self) -> &str {
        match self {
            Self::Sequence { flag, .. } | Self::AtLeast { flag, .. } | Self::IsTrue { flag } => {
                flag
            }
        }
    }
}

/// "While in `phase`, once `when` holds, move to `advance_to`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceRule {
    pub phase: PhaseId,
    pub when: Condition,
    pub advance_to: PhaseId,
    #[serde(default)]
    pub then_show: Option<Directive>,
    #[serde(default)]
    pub then_pending: Option<PendingAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDefinition {
    pub id: String,
    pub zone: String,
    #[serde(default)]
    pub title: String,
    /// Ordered; first is initial, last is terminal.
    pub phases: Vec<PhaseId>,
    pub transitions: Vec<(PhaseId, PhaseId)>,
    #[serde(default)]
    pub rules: Vec<AdvanceRule>,
    #[serde(default = "default_reward_stars")]
    pub reward_stars: u32,
    #[serde(default)]
    pub hints: Vec<HintDescriptor>,
}

const fn default_reward_stars() -> u32 {
    3
}

impl SceneDefinition {
    /// Parse and validate a definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the JSON is malformed or the
    /// definition is structurally invalid.
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Check phases, the transition DAG, rules and hints.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let scene = || self.id.clone();
        if self.phases.len() < 2 {
            return Err(DefinitionError::TooFewPhases { scene: scene() });
        }
        let mut seen = HashSet::new();
        for phase in &self.phases {
            if !seen.insert(phase) {
                return Err(DefinitionError::DuplicatePhase {
                    scene: scene(),
                    phase: phase.clone(),
                });
            }
        }
        let known = |phase: &PhaseId| -> Result<usize, DefinitionError> {
            self.phase_index(phase)
                .ok_or_else(|| DefinitionError::UnknownPhase {
                    scene: scene(),
                    phase: phase.clone(),
                })
        };
        // Forward-only edges over an ordered list cannot form a cycle.
        for (from, to) in &self.transitions {
            if known(from)? >= known(to)? {
                return Err(DefinitionError::BackEdge {
                    scene: scene(),
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }
        for rule in &self.rules {
            known(&rule.phase)?;
            known(&rule.advance_to)?;
            if !self.can_transition(&rule.phase, &rule.advance_to) {
                return Err(DefinitionError::RuleWithoutEdge {
                    scene: scene(),
                    phase: rule.phase.clone(),
                    to: rule.advance_to.clone(),
                });
            }
            if self.is_terminal(&rule.advance_to)
                && (rule.then_show.is_some() || rule.then_pending.is_some())
            {
                return Err(DefinitionError::TerminalRuleOverlay {
                    scene: scene(),
                    phase: rule.advance_to.clone(),
                });
            }
            if let Some(pending) = &rule.then_pending {
                if rule.then_show.is_none() {
                    return Err(DefinitionError::PendingWithoutOverlay {
                        scene: scene(),
                        phase: rule.phase.clone(),
                    });
                }
                known(&pending.target)?;
            }
        }
        for hint in &self.hints {
            for phase in hint.when.phases() {
                known(phase)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn initial_phase(&self) -> &PhaseId {
        &self.phases[0]
    }

    #[must_use]
    pub fn terminal_phase(&self) -> &PhaseId {
        &self.phases[self.phases.len() - 1]
    }

    #[must_use]
    pub fn is_terminal(&self, phase: &PhaseId) -> bool {
        phase == self.terminal_phase()
    }

    #[must_use]
    pub fn phase_index(&self, phase: &PhaseId) -> Option<usize> {
        self.phases.iter().position(|p| p == phase)
    }

    #[must_use]
    pub fn has_phase(&self, phase: &PhaseId) -> bool {
        self.phase_index(phase).is_some()
    }

    #[must_use]
    pub fn can_transition(&self, from: &PhaseId, to: &PhaseId) -> bool {
        self.transitions.iter().any(|(f, t)| f == from && t == to)
    }

    /// Share of the phase sequence completed when `phase` is active.
    #[must_use]
    pub fn progress_percentage(&self, phase: &PhaseId) -> u8 {
        let Some(index) = self.phase_index(phase) else {
            return 0;
        };
        let span = self.phases.len().saturating_sub(1).max(1);
        let pct = (index * 100 + span / 2) / span;
        u8::try_from(pct.min(100)).unwrap_or(100)
    }

    /// Rules that apply while `phase` is active, in declaration order.
    pub fn rules_for<'a, 'p>(
        &'a self,
        phase: &'p PhaseId,
    ) -> impl Iterator<Item = &'a AdvanceRule> + use<'a, 'p> {
        self.rules.iter().filter(move |rule| &rule.phase == phase)
    }

    /// Expected item sequence for `flag` while `phase` is active, if a
    /// sequence rule governs it.
    #[must_use]
    pub fn expected_sequence(&self, phase: &PhaseId, flag: &str) -> Option<&[String]> {
        self.rules_for(phase).find_map(|rule| match &rule.when {
            Condition::Sequence { flag: f, items } if f == flag => Some(items.as_slice()),
            _ => None,
        })
    }
}

impl HintCondition {
    fn phases(&self) -> Vec<&PhaseId> {
        match self {
            Self::PhaseIs { phase } => vec![phase],
            Self::All { of } | Self::Any { of } => of.iter().flat_map(Self::phases).collect(),
            Self::Not { inner } => inner.phases(),
            Self::FlagBelow { .. } | Self::NoDirective => Vec::new(),
        }
    }
}

/// Scene definitions shipped with the engine.
#[derive(Debug, Clone)]
pub struct SceneCatalog {
    scenes: Vec<SceneDefinition>,
}

impl SceneCatalog {
    /// Parse the embedded scene assets.
    ///
    /// # Errors
    ///
    /// Returns an error if an embedded definition fails validation.
    pub fn builtin() -> Result<Self, DefinitionError> {
        let sources = [
            include_str!("../assets/scenes/vakratunda_gate.json"),
            include_str!("../assets/scenes/modak_garden.json"),
        ];
        let scenes = sources
            .iter()
            .map(|json| SceneDefinition::from_json(json))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { scenes })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SceneDefinition> {
        self.scenes.iter().find(|scene| scene.id == id)
    }

    /// # Errors
    ///
    /// Returns [`DefinitionError::NotInCatalog`] for unknown ids.
    pub fn require(&self, id: &str) -> Result<&SceneDefinition, DefinitionError> {
        self.get(id).ok_or_else(|| DefinitionError::NotInCatalog {
            scene: "catalog".to_string(),
            requested: id.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneDefinition> {
        self.scenes.iter()
    }
}
