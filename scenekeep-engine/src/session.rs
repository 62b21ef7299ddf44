//! Live, in-memory state of one active scene.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::key::SceneKey;
use crate::scene::SceneDefinition;

/// Flag reserved for reconstruction: names the pending action that lost its
/// directive during an interruption and is waiting to be resumed.
pub const READY_FLAG: &str = "readyFor";

/// Name of one step in a scene's fixed phase sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(String);

impl PhaseId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhaseId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Step-local progress value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagValue {
    Bool(bool),
    Count(u32),
    /// Always within `0..=100`.
    Percent(u8),
    Items(Vec<String>),
    Text(String),
}

impl FlagValue {
    /// Numeric view used by threshold conditions.
    #[must_use]
    pub fn magnitude(&self) -> u32 {
        match self {
            Self::Bool(value) => u32::from(*value),
            Self::Count(value) => *value,
            Self::Percent(value) => u32::from(*value),
            Self::Items(items) => u32::try_from(items.len()).unwrap_or(u32::MAX),
            Self::Text(text) => u32::from(!text.is_empty()),
        }
    }

    #[must_use]
    pub fn items(&self) -> Option<&[String]> {
        match self {
            Self::Items(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_true(&self) -> bool {
        matches!(self, Self::Bool(true))
    }
}

pub type Flags = BTreeMap<String, FlagValue>;

/// Which popup/card a [`Directive::Popup`] shows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupKind {
    Card { id: String },
    FinalCelebration,
}

/// The single overlay or announcement currently owed to the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Directive {
    SymbolDiscovery { word: String },
    SidebarHighlight { word: String },
    Popup { popup: PopupKind },
    GameCoachPending { coach: String },
    CompletionScreen,
}

impl Directive {
    /// Coach messages are never replayed after an interruption; they are
    /// stripped from persisted snapshots while their pending action is kept.
    #[must_use]
    pub const fn is_replayable(&self) -> bool {
        !matches!(self, Self::GameCoachPending { .. })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SymbolDiscovery { .. } => "symbol_discovery",
            Self::SidebarHighlight { .. } => "sidebar_highlight",
            Self::Popup { .. } => "popup",
            Self::GameCoachPending { .. } => "game_coach_pending",
            Self::CompletionScreen => "completion_screen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    StartNextDoor,
    StartMinigame,
    StartLearning,
    StartFinale,
}

impl ActionKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StartNextDoor => "start_next_door",
            Self::StartMinigame => "start_minigame",
            Self::StartLearning => "start_learning",
            Self::StartFinale => "start_finale",
        }
    }
}

/// Deferred transition that fires once the current directive is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub target: PhaseId,
}

impl PendingAction {
    #[must_use]
    pub fn new(kind: ActionKind, target: impl Into<PhaseId>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }

    /// Encoding stored in [`READY_FLAG`], e.g. `start_next_door>door2_active`.
    #[must_use]
    pub fn ready_token(&self) -> String {
        format!("{}>{}", self.kind.label(), self.target)
    }

    #[must_use]
    pub fn from_ready_token(token: &str) -> Option<Self> {
        let (kind, target) = token.split_once('>')?;
        let kind = match kind {
            "start_next_door" => ActionKind::StartNextDoor,
            "start_minigame" => ActionKind::StartMinigame,
            "start_learning" => ActionKind::StartLearning,
            "start_finale" => ActionKind::StartFinale,
            _ => return None,
        };
        if target.is_empty() {
            return None;
        }
        Some(Self::new(kind, target))
    }
}

/// Live state of one active scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSession {
    pub key: SceneKey,
    pub phase: PhaseId,
    #[serde(default)]
    pub flags: Flags,
    #[serde(default)]
    pub directive: Option<Directive>,
    #[serde(default)]
    pub pending_action: Option<PendingAction>,
    #[serde(default)]
    pub stars: u32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub progress_percentage: u8,
    #[serde(default)]
    pub learned_words: BTreeSet<String>,
    #[serde(default)]
    pub last_mutated_at_ms: u64,
    /// False until the session has been seeded by entry or reconstruction.
    #[serde(skip)]
    pub initialized: bool,
}

impl SceneSession {
    /// Brand-new session at the definition's initial phase.
    #[must_use]
    pub fn fresh(key: SceneKey, definition: &SceneDefinition, now_ms: u64) -> Self {
        Self {
            key,
            phase: definition.initial_phase().clone(),
            flags: Flags::new(),
            directive: None,
            pending_action: None,
            stars: 0,
            completed: false,
            progress_percentage: 0,
            learned_words: BTreeSet::new(),
            last_mutated_at_ms: now_ms,
            initialized: true,
        }
    }

    /// A session with nothing worth persisting.
    #[must_use]
    pub fn is_empty(&self, definition: &SceneDefinition) -> bool {
        &self.phase == definition.initial_phase()
            && self.flags.is_empty()
            && self.learned_words.is_empty()
            && self.stars == 0
            && self.directive.is_none()
            && !self.completed
    }

    #[must_use]
    pub fn flag(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }

    #[must_use]
    pub fn items(&self, name: &str) -> &[String] {
        self.flags
            .get(name)
            .and_then(FlagValue::items)
            .unwrap_or(&[])
    }

    /// Action parked by reconstruction, waiting for the view to resume it.
    #[must_use]
    pub fn ready_action(&self) -> Option<PendingAction> {
        match self.flags.get(READY_FLAG) {
            Some(FlagValue::Text(token)) => PendingAction::from_ready_token(token),
            _ => None,
        }
    }

    /// Same state ignoring the mutation timestamp.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.key == other.key
            && self.phase == other.phase
            && self.flags == other.flags
            && self.directive == other.directive
            && self.pending_action == other.pending_action
            && self.stars == other.stars
            && self.completed == other.completed
            && self.progress_percentage == other.progress_percentage
            && self.learned_words == other.learned_words
    }
}
