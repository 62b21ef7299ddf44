//! Rebuilds the live session and the overlays owed to the user after the
//! process restarted.
//!
//! [`reconstruct`] is pure: the same stored record, marker and entry mode
//! always produce the same seeded session and directive list, however many
//! times the page is reloaded.

use serde::{Deserialize, Serialize};

use crate::key::SceneKey;
use crate::record::{CompletedRecord, ProgressSnapshot, SceneRecord};
use crate::repository::LoadedRecord;
use crate::scene::SceneDefinition;
use crate::session::{
    Directive, FlagValue, PendingAction, PhaseId, PopupKind, READY_FLAG, SceneSession,
};

/// How the scene was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Navigated in; owed overlays are not replayed.
    Fresh,
    /// The page was reloaded while the scene was open.
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeSource {
    /// No record existed.
    New,
    /// Seeded from a stored record.
    Resumed,
    /// The user asked to replay the scene.
    ResetMarker,
    /// The stored record was unreadable and was ignored.
    Recovered,
}

/// Text shown with a symbol discovery popup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryCopy {
    pub title: String,
    pub meaning: String,
    pub audio_cue: String,
}

impl DiscoveryCopy {
    /// Copy depends on nothing but the word, so a replayed popup matches the
    /// original exactly.
    #[must_use]
    pub fn for_word(word: &str) -> Self {
        let meaning = match word {
            "vakratunda" => "the one with the curved trunk",
            "mahakaya" => "the one with the mighty body",
            "ekadanta" => "the one with a single tusk",
            "gajanana" => "the elephant-faced one",
            _ => "a new sacred name",
        };
        let mut chars = word.chars();
        let title = chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect())
            .unwrap_or_default();
        Self {
            title,
            meaning: meaning.to_string(),
            audio_cue: format!("word:{word}"),
        }
    }
}

/// Instruction to the view produced by reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum UiDirective {
    ShowSymbolDiscovery { word: String, copy: DiscoveryCopy },
    HighlightSidebar { word: String },
    ShowPopup { popup: PopupKind },
    ShowCompletionScreen { stars: u32 },
    ReadyForNextStep { action: PendingAction },
    ResumeAt { phase: PhaseId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconstruction {
    pub seeded: SceneSession,
    pub directives: Vec<UiDirective>,
    /// The reset marker was honored and should be removed.
    pub clear_reset_marker: bool,
    /// Writes should be held back for the reload grace period.
    pub begin_grace: bool,
    pub source: ResumeSource,
}

impl Reconstruction {
    fn fresh(
        definition: &SceneDefinition,
        key: &SceneKey,
        source: ResumeSource,
        now_ms: u64,
    ) -> Self {
        Self {
            seeded: SceneSession::fresh(key.clone(), definition, now_ms),
            directives: Vec::new(),
            clear_reset_marker: source == ResumeSource::ResetMarker,
            begin_grace: false,
            source,
        }
    }
}

/// Seed a session for `key` from what the store held.
#[must_use]
pub fn reconstruct(
    definition: &SceneDefinition,
    key: &SceneKey,
    loaded: &LoadedRecord,
    reset_marker: bool,
    mode: EntryMode,
    now_ms: u64,
) -> Reconstruction {
    if reset_marker {
        log::info!("reset marker present for {key}; starting fresh");
        return Reconstruction::fresh(definition, key, ResumeSource::ResetMarker, now_ms);
    }
    let record = match loaded {
        LoadedRecord::Missing => {
            return Reconstruction::fresh(definition, key, ResumeSource::New, now_ms);
        }
        LoadedRecord::Corrupt(err) => {
            log::warn!("discarding unreadable record for {key}: {err}");
            return Reconstruction::fresh(definition, key, ResumeSource::Recovered, now_ms);
        }
        LoadedRecord::Found(record) => record,
    };

    match record {
        SceneRecord::Completed(completed) => resume_completed(definition, key, completed, mode),
        SceneRecord::InProgress(snapshot) => resume_in_progress(key, snapshot, mode),
    }
}

fn resume_completed(
    definition: &SceneDefinition,
    key: &SceneKey,
    completed: &CompletedRecord,
    mode: EntryMode,
) -> Reconstruction {
    let owed = completed.completion_screen_pending && mode == EntryMode::Reload;
    let seeded = SceneSession {
        key: key.clone(),
        phase: definition.terminal_phase().clone(),
        flags: crate::session::Flags::new(),
        directive: owed.then_some(Directive::CompletionScreen),
        pending_action: None,
        stars: completed.stars,
        completed: true,
        progress_percentage: 100,
        learned_words: completed.learned_words.clone(),
        last_mutated_at_ms: completed.completed_at_ms,
        initialized: true,
    };
    let directive = if owed {
        UiDirective::ShowCompletionScreen {
            stars: completed.stars,
        }
    } else {
        UiDirective::ResumeAt {
            phase: seeded.phase.clone(),
        }
    };
    Reconstruction {
        seeded,
        directives: vec![directive],
        clear_reset_marker: false,
        begin_grace: false,
        source: ResumeSource::Resumed,
    }
}

fn resume_in_progress(
    key: &SceneKey,
    snapshot: &ProgressSnapshot,
    mode: EntryMode,
) -> Reconstruction {
    let mut seeded = SceneSession {
        key: key.clone(),
        phase: snapshot.phase.clone(),
        flags: snapshot.flags.clone(),
        directive: None,
        pending_action: snapshot.pending_action.clone(),
        stars: snapshot.stars,
        completed: false,
        progress_percentage: snapshot.progress_percentage,
        learned_words: snapshot.learned_words.clone(),
        last_mutated_at_ms: snapshot.saved_at_ms,
        initialized: true,
    };
    let resumed = |seeded, directives| Reconstruction {
        seeded,
        directives,
        clear_reset_marker: false,
        begin_grace: false,
        source: ResumeSource::Resumed,
    };

    let replay = match (&snapshot.directive, mode) {
        (_, EntryMode::Fresh) | (None | Some(Directive::GameCoachPending { .. }), _) => None,
        (Some(Directive::SymbolDiscovery { word }), EntryMode::Reload) => {
            Some(UiDirective::ShowSymbolDiscovery {
                word: word.clone(),
                copy: DiscoveryCopy::for_word(word),
            })
        }
        (Some(Directive::SidebarHighlight { word }), EntryMode::Reload) => {
            Some(UiDirective::HighlightSidebar { word: word.clone() })
        }
        (Some(Directive::Popup { popup }), EntryMode::Reload) => Some(UiDirective::ShowPopup {
            popup: popup.clone(),
        }),
        (Some(Directive::CompletionScreen), EntryMode::Reload) => {
            Some(UiDirective::ShowCompletionScreen {
                stars: snapshot.stars,
            })
        }
    };
    if let Some(replay) = replay {
        seeded.directive.clone_from(&snapshot.directive);
        return resumed(seeded, vec![replay]);
    }

    // The overlay that guarded the action is gone; park the action where the
    // view can pick it up.
    let parked = seeded
        .pending_action
        .take()
        .or_else(|| seeded.ready_action());
    if let Some(action) = parked {
        seeded
            .flags
            .insert(READY_FLAG.to_string(), FlagValue::Text(action.ready_token()));
        return resumed(seeded, vec![UiDirective::ReadyForNextStep { action }]);
    }

    let phase = seeded.phase.clone();
    let mut reconstruction = resumed(seeded, vec![UiDirective::ResumeAt { phase }]);
    reconstruction.begin_grace = true;
    reconstruction
}
