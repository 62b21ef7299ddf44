//! Debounced, per-key persistence of scene sessions.
//!
//! Every accepted change cancels the key's pending write and schedules a new
//! one, so a burst of mutations lands as a single write of the last state.
//! Timers are due timestamps; the host drives them through [`PersistenceController::poll`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::key::SceneKey;
use crate::record::SceneRecord;
use crate::repository::{SaveOutcome, SceneRepository};
use crate::scene::SceneDefinition;
use crate::session::SceneSession;
use crate::store::DurableStore;

/// Why a change was not scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Suppression {
    /// The session was never seeded by entry or reconstruction.
    NotInitialized,
    /// The stored record is already completed.
    AlreadyCompleted,
    /// Completion is written through `flush_terminal` instead.
    Completed,
    /// Nothing worth writing.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    Scheduled { due_at_ms: u64, replaced: bool },
    Suppressed(Suppression),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    Written,
    KeptCompleted,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub key: SceneKey,
    pub outcome: FlushOutcome,
    pub at_ms: u64,
}

impl FlushReport {
    #[must_use]
    pub const fn written(&self) -> bool {
        matches!(self.outcome, FlushOutcome::Written)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistStats {
    pub scheduled: u64,
    /// Schedules that replaced a write still waiting for its timer.
    pub coalesced: u64,
    pub suppressed: u64,
    pub written: u64,
    pub kept_completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    record: SceneRecord,
    due_at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PersistenceController {
    debounce_ms: u64,
    pending: BTreeMap<SceneKey, PendingWrite>,
    grace_until: BTreeMap<SceneKey, u64>,
    completed: BTreeSet<SceneKey>,
    stats: PersistStats,
}

impl PersistenceController {
    #[must_use]
    pub const fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            pending: BTreeMap::new(),
            grace_until: BTreeMap::new(),
            completed: BTreeSet::new(),
            stats: PersistStats {
                scheduled: 0,
                coalesced: 0,
                suppressed: 0,
                written: 0,
                kept_completed: 0,
                failed: 0,
                cancelled: 0,
            },
        }
    }

    #[must_use]
    pub const fn stats(&self) -> PersistStats {
        self.stats
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn due_at(&self, key: &SceneKey) -> Option<u64> {
        self.pending.get(key).map(|write| write.due_at_ms)
    }

    /// Schedule a debounced write of `session`, or explain why not.
    pub fn on_session_changed(
        &mut self,
        session: &SceneSession,
        definition: &SceneDefinition,
        now_ms: u64,
    ) -> ScheduleDecision {
        let suppression = if !session.initialized {
            Some(Suppression::NotInitialized)
        } else if self.completed.contains(&session.key) {
            Some(Suppression::AlreadyCompleted)
        } else if session.completed {
            Some(Suppression::Completed)
        } else if session.is_empty(definition) {
            Some(Suppression::Empty)
        } else {
            None
        };
        if let Some(reason) = suppression {
            log::debug!("not scheduling write for {}: {reason:?}", session.key);
            self.stats.suppressed += 1;
            if reason == Suppression::Empty && self.pending.remove(&session.key).is_some() {
                self.stats.cancelled += 1;
            }
            return ScheduleDecision::Suppressed(reason);
        }

        let grace = self.grace_until.get(&session.key).copied().unwrap_or(0);
        let due_at_ms = (now_ms + self.debounce_ms).max(grace);
        let replaced = self
            .pending
            .insert(
                session.key.clone(),
                PendingWrite {
                    record: SceneRecord::from_session(session),
                    due_at_ms,
                },
            )
            .is_some();
        self.stats.scheduled += 1;
        if replaced {
            self.stats.coalesced += 1;
        }
        ScheduleDecision::Scheduled {
            due_at_ms,
            replaced,
        }
    }

    /// Run every write whose timer has elapsed.
    pub fn poll<S: DurableStore>(
        &mut self,
        repository: &SceneRepository<S>,
        now_ms: u64,
    ) -> Vec<FlushReport> {
        let due: Vec<SceneKey> = self
            .pending
            .iter()
            .filter(|(_, write)| write.due_at_ms <= now_ms)
            .map(|(key, _)| key.clone())
            .collect();
        due.into_iter()
            .filter_map(|key| {
                let write = self.pending.remove(&key)?;
                Some(self.write(repository, key, write.record, now_ms))
            })
            .collect()
    }

    /// Write the pending snapshot for `key` right away.
    pub fn flush_now<S: DurableStore>(
        &mut self,
        repository: &SceneRepository<S>,
        key: &SceneKey,
        now_ms: u64,
    ) -> Option<FlushReport> {
        let write = self.pending.remove(key)?;
        Some(self.write(repository, key.clone(), write.record, now_ms))
    }

    /// Write a completed session immediately, dropping any debounced write.
    pub fn flush_terminal<S: DurableStore>(
        &mut self,
        repository: &SceneRepository<S>,
        session: &SceneSession,
        now_ms: u64,
    ) -> FlushReport {
        self.pending.remove(&session.key);
        self.write(
            repository,
            session.key.clone(),
            SceneRecord::from_session(session),
            now_ms,
        )
    }

    /// Drop the pending write for `key`; true if one was waiting.
    pub fn cancel(&mut self, key: &SceneKey) -> bool {
        let cancelled = self.pending.remove(key).is_some();
        if cancelled {
            self.stats.cancelled += 1;
        }
        cancelled
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        self.stats.cancelled += count as u64;
        count
    }

    /// Hold writes for `key` back until `until_ms`.
    pub fn begin_reload_grace(&mut self, key: &SceneKey, until_ms: u64) {
        self.grace_until.insert(key.clone(), until_ms);
        if let Some(write) = self.pending.get_mut(key) {
            write.due_at_ms = write.due_at_ms.max(until_ms);
        }
    }

    /// Tell the controller what the store already holds for `key`.
    pub fn note_persisted(&mut self, key: &SceneKey, record: Option<&SceneRecord>) {
        if record.is_some_and(SceneRecord::is_completed) {
            self.completed.insert(key.clone());
        } else {
            self.completed.remove(key);
        }
    }

    /// Forget everything about `key`, as after the scene is reset.
    pub fn forget(&mut self, key: &SceneKey) {
        self.cancel(key);
        self.grace_until.remove(key);
        self.completed.remove(key);
    }

    fn write<S: DurableStore>(
        &mut self,
        repository: &SceneRepository<S>,
        key: SceneKey,
        record: SceneRecord,
        now_ms: u64,
    ) -> FlushReport {
        let completed = record.is_completed();
        let outcome = match repository.save(&key, record) {
            Ok(SaveOutcome::Written) => {
                self.stats.written += 1;
                if completed {
                    self.completed.insert(key.clone());
                }
                FlushOutcome::Written
            }
            Ok(SaveOutcome::KeptCompleted) => {
                self.stats.kept_completed += 1;
                self.completed.insert(key.clone());
                FlushOutcome::KeptCompleted
            }
            Err(err) => {
                // The in-memory session stays authoritative; the next change
                // schedules a fresh attempt.
                log::warn!("failed to persist {key}: {err}");
                self.stats.failed += 1;
                FlushOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        FlushReport {
            key,
            outcome,
            at_ms: now_ms,
        }
    }
}
