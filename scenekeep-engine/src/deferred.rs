//! Fires a scene's deferred step once its overlay has been dismissed.
//!
//! Visibility is reported by the overlay layer as a level; only the
//! shown-to-hidden edge arms the timer, so repeated "hidden" reports or an
//! overlay that never rendered cannot fire an action twice.

use serde::{Deserialize, Serialize};

use crate::key::SceneKey;
use crate::session::PendingAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissTrigger {
    OverlayHidden,
    ExternalDismiss,
}

/// The tracked overlay was dismissed and its delay has elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredFire {
    pub key: SceneKey,
    pub action: Option<PendingAction>,
    pub trigger: DismissTrigger,
}

#[derive(Debug, Clone)]
struct Tracked {
    key: SceneKey,
    action: Option<PendingAction>,
    seen_visible: bool,
    due: Option<(u64, DismissTrigger)>,
}

#[derive(Debug, Clone)]
pub struct DeferredActionCoordinator {
    dismiss_delay_ms: u64,
    tracked: Option<Tracked>,
}

impl DeferredActionCoordinator {
    #[must_use]
    pub const fn new(dismiss_delay_ms: u64) -> Self {
        Self {
            dismiss_delay_ms,
            tracked: None,
        }
    }

    /// Start watching the overlay of `key`; `action` runs after it closes.
    pub fn set_pending(&mut self, key: SceneKey, action: Option<PendingAction>) {
        self.tracked = Some(Tracked {
            key,
            action,
            seen_visible: false,
            due: None,
        });
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.tracked.is_some()
    }

    #[must_use]
    pub fn due_at(&self) -> Option<u64> {
        self.tracked.as_ref()?.due.map(|(at, _)| at)
    }

    /// Report overlay visibility. Returns true when this report armed the timer.
    pub fn observe_overlay(&mut self, visible: bool, now_ms: u64) -> bool {
        let delay = self.dismiss_delay_ms;
        let Some(tracked) = self.tracked.as_mut() else {
            return false;
        };
        if visible {
            tracked.seen_visible = true;
            // Shown again before the delay ran out.
            tracked.due = None;
            return false;
        }
        if !tracked.seen_visible || tracked.due.is_some() {
            return false;
        }
        tracked.seen_visible = false;
        tracked.due = Some((now_ms + delay, DismissTrigger::OverlayHidden));
        true
    }

    /// The overlay's own dismiss callback fired; no visibility edge needed.
    pub fn on_external_dismiss(&mut self, now_ms: u64) -> bool {
        let delay = self.dismiss_delay_ms;
        match self.tracked.as_mut() {
            Some(tracked) if tracked.due.is_none() => {
                tracked.due = Some((now_ms + delay, DismissTrigger::ExternalDismiss));
                true
            }
            _ => false,
        }
    }

    pub fn poll(&mut self, now_ms: u64) -> Option<DeferredFire> {
        let (due_at, trigger) = self.tracked.as_ref()?.due?;
        if now_ms < due_at {
            return None;
        }
        let tracked = self.tracked.take()?;
        Some(DeferredFire {
            key: tracked.key,
            action: tracked.action,
            trigger,
        })
    }

    pub fn cancel(&mut self) -> bool {
        self.tracked.take().is_some()
    }
}
