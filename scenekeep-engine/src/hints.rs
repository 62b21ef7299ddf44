//! Hint/coach rotation.
//!
//! Hints are advisory and deliberately not persisted; after a reload the
//! scheduler simply starts over from the seeded session.

use serde::{Deserialize, Serialize};

use crate::session::{PhaseId, SceneSession};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintCondition {
    PhaseIs { phase: PhaseId },
    /// Flag magnitude strictly below `value`; a missing flag counts as zero.
    FlagBelow { flag: String, value: u32 },
    NoDirective,
    All { of: Vec<HintCondition> },
    Any { of: Vec<HintCondition> },
    Not { inner: Box<HintCondition> },
}

impl HintCondition {
    #[must_use]
    pub fn holds(&self, session: &SceneSession) -> bool {
        match self {
            Self::PhaseIs { phase } => &session.phase == phase,
            Self::FlagBelow { flag, value } => {
                session.flag(flag).map_or(0, |v| v.magnitude()) < *value
            }
            Self::NoDirective => session.directive.is_none(),
            Self::All { of } => of.iter().all(|c| c.holds(session)),
            Self::Any { of } => of.iter().any(|c| c.holds(session)),
            Self::Not { inner } => !inner.holds(session),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintDescriptor {
    pub id: String,
    /// Higher wins.
    #[serde(default)]
    pub priority: u32,
    pub message_key: String,
    pub when: HintCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum HintChange {
    Show { id: String, message_key: String },
    Hide { id: String },
}

/// Re-evaluates hint conditions on a fixed cadence.
#[derive(Debug, Clone)]
pub struct HintScheduler {
    hints: Vec<HintDescriptor>,
    cadence_ms: u64,
    show_delay_ms: u64,
    current: Option<usize>,
    next_eval_at_ms: u64,
    /// Candidate and the time it became eligible.
    candidate: Option<(usize, u64)>,
    /// Hint dropped by a restart whose hide has not been reported yet.
    hidden: Option<String>,
}

impl HintScheduler {
    #[must_use]
    pub fn new(hints: &[HintDescriptor], cadence_ms: u64, show_delay_ms: u64) -> Self {
        let mut hints = hints.to_vec();
        // Stable sort keeps declaration order among equal priorities.
        hints.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            hints,
            cadence_ms: cadence_ms.max(1),
            show_delay_ms,
            current: None,
            next_eval_at_ms: 0,
            candidate: None,
            hidden: None,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<&HintDescriptor> {
        self.current.map(|index| &self.hints[index])
    }

    /// Forget everything, e.g. after a phase change or a scene reset. A
    /// visible hint is hidden on the next tick.
    pub fn restart(&mut self, now_ms: u64) {
        if let Some(index) = self.current.take() {
            self.hidden = Some(self.hints[index].id.clone());
        }
        self.candidate = None;
        self.next_eval_at_ms = now_ms;
    }

    /// Run one evaluation if the cadence allows; returns the visible change.
    pub fn tick(&mut self, session: &SceneSession, now_ms: u64) -> Option<HintChange> {
        if let Some(id) = self.hidden.take() {
            return Some(HintChange::Hide { id });
        }
        if now_ms < self.next_eval_at_ms {
            return None;
        }
        self.next_eval_at_ms = now_ms + self.cadence_ms;

        if let Some(index) = self.current {
            if self.hints[index].when.holds(session) {
                return None;
            }
            self.current = None;
            // Restart the "show next eligible hint after delay" timer.
            self.candidate = None;
            return Some(HintChange::Hide {
                id: self.hints[index].id.clone(),
            });
        }

        let best = self.hints.iter().position(|hint| hint.when.holds(session));
        match (best, self.candidate) {
            (None, _) => {
                self.candidate = None;
                None
            }
            (Some(index), Some((candidate, since))) if candidate == index => {
                if now_ms.saturating_sub(since) < self.show_delay_ms {
                    return None;
                }
                self.candidate = None;
                self.current = Some(index);
                let hint = &self.hints[index];
                log::debug!("showing hint {}", hint.id);
                Some(HintChange::Show {
                    id: hint.id.clone(),
                    message_key: hint.message_key.clone(),
                })
            }
            (Some(index), _) => {
                self.candidate = Some((index, now_ms));
                None
            }
        }
    }
}
