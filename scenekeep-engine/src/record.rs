//! Durable scene record and its string codec.
//!
//! Records are stored as a versioned envelope whose payload is checksummed,
//! so a truncated or hand-edited value is detected instead of resumed into.
//! Version 1 records (a flat object written before the envelope existed) are
//! migrated on read.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use thiserror::Error;

use crate::scene::SceneDefinition;
use crate::session::{Directive, FlagValue, Flags, PendingAction, PhaseId, SceneSession};

pub const RECORD_VERSION: u32 = 2;
const LEGACY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record checksum mismatch (stored {stored}, computed {computed})")]
    Checksum { stored: String, computed: String },
    #[error("record version {0} is newer than supported version {max}", max = RECORD_VERSION)]
    UnsupportedVersion(u32),
    #[error("record references phase '{0}' unknown to the scene")]
    UnknownPhase(PhaseId),
}

/// In-progress shape: everything needed to resume mid-scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
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
    pub progress_percentage: u8,
    #[serde(default)]
    pub learned_words: BTreeSet<String>,
    #[serde(default)]
    pub saved_at_ms: u64,
}

/// Terminal shape: small and only ever merged forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedRecord {
    pub stars: u32,
    pub completed_at_ms: u64,
    #[serde(default)]
    pub learned_words: BTreeSet<String>,
    /// The completion screen was owed but not yet acknowledged.
    #[serde(default)]
    pub completion_screen_pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SceneRecord {
    InProgress(ProgressSnapshot),
    Completed(CompletedRecord),
}

/// Result of merging an incoming write with what the store already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    Write(SceneRecord),
    /// A completed record is never replaced by an in-progress one.
    KeepCompleted,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    checksum: String,
    record: Value,
}

fn checksum(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

impl SceneRecord {
    /// Snapshot the whole session, never a diff.
    #[must_use]
    pub fn from_session(session: &SceneSession) -> Self {
        if session.completed {
            return Self::Completed(CompletedRecord {
                stars: session.stars,
                completed_at_ms: session.last_mutated_at_ms,
                learned_words: session.learned_words.clone(),
                completion_screen_pending: session.directive
                    == Some(Directive::CompletionScreen),
            });
        }
        Self::InProgress(ProgressSnapshot {
            phase: session.phase.clone(),
            flags: session.flags.clone(),
            directive: session
                .directive
                .clone()
                .filter(Directive::is_replayable),
            pending_action: session.pending_action.clone(),
            stars: session.stars,
            progress_percentage: session.progress_percentage,
            learned_words: session.learned_words.clone(),
            saved_at_ms: session.last_mutated_at_ms,
        })
    }

    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    #[must_use]
    pub const fn stars(&self) -> u32 {
        match self {
            Self::InProgress(snapshot) => snapshot.stars,
            Self::Completed(record) => record.stars,
        }
    }

    #[must_use]
    pub const fn learned_words(&self) -> &BTreeSet<String> {
        match self {
            Self::InProgress(snapshot) => &snapshot.learned_words,
            Self::Completed(record) => &record.learned_words,
        }
    }

    /// Encode into the current envelope format.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String, CodecError> {
        let record = serde_json::to_value(self)?;
        let canonical = serde_json::to_string(&record)?;
        let envelope = Envelope {
            version: RECORD_VERSION,
            checksum: checksum(&canonical),
            record,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Decode either the current envelope or a legacy flat record.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for malformed JSON, checksum mismatches and
    /// versions newer than this build understands.
    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_str(raw)?;
        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .map_or(LEGACY_VERSION, |v| u32::try_from(v).unwrap_or(u32::MAX));
        if version > RECORD_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        if version < RECORD_VERSION {
            log::info!("migrating scene record from v{version} to v{RECORD_VERSION}");
            return Ok(migrate_legacy(&value));
        }
        let envelope: Envelope = serde_json::from_value(value)?;
        let canonical = serde_json::to_string(&envelope.record)?;
        let computed = checksum(&canonical);
        if computed != envelope.checksum {
            return Err(CodecError::Checksum {
                stored: envelope.checksum,
                computed,
            });
        }
        Ok(serde_json::from_value(envelope.record)?)
    }

    /// Decode and check the record against the scene it is resumed into.
    ///
    /// # Errors
    ///
    /// Everything [`SceneRecord::decode`] reports, plus
    /// [`CodecError::UnknownPhase`] for phases the definition lacks.
    pub fn decode_for(raw: &str, definition: &SceneDefinition) -> Result<Self, CodecError> {
        let record = Self::decode(raw)?;
        if let Self::InProgress(snapshot) = &record {
            if !definition.has_phase(&snapshot.phase) {
                return Err(CodecError::UnknownPhase(snapshot.phase.clone()));
            }
            if let Some(pending) = &snapshot.pending_action
                && !definition.has_phase(&pending.target)
            {
                return Err(CodecError::UnknownPhase(pending.target.clone()));
            }
        }
        Ok(record)
    }

    /// Merge `incoming` over `existing` following the completed-record rules.
    #[must_use]
    pub fn merge(existing: Option<&Self>, incoming: Self) -> Merge {
        match (existing, incoming) {
            (Some(Self::Completed(_)), Self::InProgress(_)) => Merge::KeepCompleted,
            (Some(Self::Completed(old)), Self::Completed(new)) => {
                let mut learned_words = old.learned_words.clone();
                learned_words.extend(new.learned_words);
                Merge::Write(Self::Completed(CompletedRecord {
                    stars: old.stars.max(new.stars),
                    completed_at_ms: old.completed_at_ms.min(new.completed_at_ms),
                    learned_words,
                    completion_screen_pending: new.completion_screen_pending,
                }))
            }
            (_, incoming) => Merge::Write(incoming),
        }
    }
}

fn legacy_flag(value: &Value) -> Option<FlagValue> {
    match value {
        Value::Bool(b) => Some(FlagValue::Bool(*b)),
        Value::Number(n) => n
            .as_u64()
            .map(|n| FlagValue::Count(u32::try_from(n).unwrap_or(u32::MAX))),
        Value::String(s) => Some(FlagValue::Text(s.clone())),
        Value::Array(items) => Some(FlagValue::Items(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        )),
        Value::Null | Value::Object(_) => None,
    }
}

fn legacy_u32(value: &Value, field: &str) -> u32 {
    value
        .get(field)
        .and_then(Value::as_u64)
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

/// v1 stored `learnedWords` either as a list or as `{word: true}`.
fn legacy_words(value: &Value) -> BTreeSet<String> {
    match value.get("learnedWords") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|w| w.as_str().map(str::to_string))
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(_, learned)| learned.as_bool().unwrap_or(false))
            .map(|(word, _)| word.clone())
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn migrate_legacy(value: &Value) -> SceneRecord {
    let stars = legacy_u32(value, "stars");
    let saved_at_ms = value
        .get("timestamp")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    let learned_words = legacy_words(value);
    let completion_screen = value
        .get("completionScreen")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if value.get("completed").and_then(Value::as_bool).unwrap_or(false) {
        return SceneRecord::Completed(CompletedRecord {
            stars,
            completed_at_ms: saved_at_ms,
            learned_words,
            completion_screen_pending: completion_screen,
        });
    }
    let flags = value
        .get("flags")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(name, v)| legacy_flag(v).map(|flag| (name.clone(), flag)))
                .collect()
        })
        .unwrap_or_default();
    let directive = value
        .get("symbolDiscovery")
        .and_then(Value::as_str)
        .map(|word| Directive::SymbolDiscovery {
            word: word.to_string(),
        })
        .or_else(|| {
            value
                .get("sidebarHighlight")
                .and_then(Value::as_str)
                .map(|word| Directive::SidebarHighlight {
                    word: word.to_string(),
                })
        });
    SceneRecord::InProgress(ProgressSnapshot {
        phase: PhaseId::new(
            value
                .get("phase")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        ),
        flags,
        directive,
        pending_action: None,
        stars,
        progress_percentage: u8::try_from(legacy_u32(value, "progressPercentage").min(100))
            .unwrap_or(100),
        learned_words,
        saved_at_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SceneKey;
    use crate::scene::SceneCatalog;
    use crate::session::ActionKind;

    fn session() -> SceneSession {
        let catalog = SceneCatalog::builtin().unwrap();
        let def = catalog.require("vakratunda_gate").unwrap();
        let key = SceneKey::parse_parts("p1", "ganesha_temple", "vakratunda_gate").unwrap();
        let mut session = SceneSession::fresh(key, def, 10);
        session.phase = PhaseId::from("door1_complete");
        session.flags.insert(
            "door1SyllablesPlaced".into(),
            FlagValue::Items(vec!["Va".into(), "kra".into(), "tun".into(), "da".into()]),
        );
        session.directive = Some(Directive::SymbolDiscovery {
            word: "vakratunda".into(),
        });
        session.pending_action = Some(PendingAction::new(
            ActionKind::StartMinigame,
            "minigame1_active",
        ));
        session.learned_words.insert("vakratunda".into());
        session
    }

    #[test]
    fn encoded_record_carries_version_and_checksum() {
        let record = SceneRecord::from_session(&session());
        let raw = record.encode().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 2);
        assert_eq!(value["record"]["state"], "in_progress");
        assert_eq!(value["checksum"].as_str().unwrap().len(), 64);
        assert_eq!(SceneRecord::decode(&raw).unwrap(), record);
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let raw = SceneRecord::from_session(&session()).encode().unwrap();
        let tampered = raw.replace("\"stars\":0", "\"stars\":9");
        assert_ne!(raw, tampered);
        assert!(matches!(
            SceneRecord::decode(&tampered),
            Err(CodecError::Checksum { .. })
        ));
        assert!(matches!(
            SceneRecord::decode("{not json"),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            SceneRecord::decode(r#"{"version":7}"#),
            Err(CodecError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn coach_directive_is_stripped_but_pending_kept() {
        let mut session = session();
        session.directive = Some(Directive::GameCoachPending {
            coach: "trace_praise".into(),
        });
        let SceneRecord::InProgress(snapshot) = SceneRecord::from_session(&session) else {
            panic!("expected in-progress shape");
        };
        assert!(snapshot.directive.is_none());
        assert!(snapshot.pending_action.is_some());
    }

    #[test]
    fn unknown_phase_is_reported_for_definition() {
        let catalog = SceneCatalog::builtin().unwrap();
        let def = catalog.require("vakratunda_gate").unwrap();
        let mut session = session();
        session.phase = PhaseId::from("door9_active");
        let raw = SceneRecord::from_session(&session).encode().unwrap();
        assert!(matches!(
            SceneRecord::decode_for(&raw, def),
            Err(CodecError::UnknownPhase(phase)) if phase.as_str() == "door9_active"
        ));
    }

    #[test]
    fn legacy_flat_records_migrate() {
        let raw = r#"{
            "completed": false,
            "phase": "door1_complete",
            "flags": {"door1SyllablesPlaced": ["Va","kra","tun","da"], "door1Open": true, "nested": {"x": 1}},
            "stars": 1,
            "learnedWords": {"vakratunda": true, "mahakaya": false},
            "symbolDiscovery": "vakratunda",
            "progressPercentage": 130,
            "timestamp": 99
        }"#;
        let SceneRecord::InProgress(snapshot) = SceneRecord::decode(raw).unwrap() else {
            panic!("expected in-progress shape");
        };
        assert_eq!(snapshot.phase.as_str(), "door1_complete");
        assert_eq!(snapshot.flags.len(), 2);
        assert_eq!(snapshot.flags["door1Open"], FlagValue::Bool(true));
        assert_eq!(
            snapshot.directive,
            Some(Directive::SymbolDiscovery {
                word: "vakratunda".into()
            })
        );
        assert_eq!(snapshot.progress_percentage, 100);
        assert_eq!(snapshot.learned_words.len(), 1);
        assert_eq!(snapshot.saved_at_ms, 99);

        let completed = r#"{"completed": true, "stars": 3, "learnedWords": ["vakratunda"], "completionScreen": true}"#;
        let record = SceneRecord::decode(completed).unwrap();
        assert!(record.is_completed());
        assert_eq!(record.stars(), 3);
    }

    #[test]
    fn merge_protects_completed_records() {
        let completed = SceneRecord::Completed(CompletedRecord {
            stars: 3,
            completed_at_ms: 100,
            learned_words: ["vakratunda".to_string()].into_iter().collect(),
            completion_screen_pending: true,
        });
        let progress = SceneRecord::from_session(&session());
        assert_eq!(
            SceneRecord::merge(Some(&completed), progress.clone()),
            Merge::KeepCompleted
        );
        assert_eq!(
            SceneRecord::merge(None, progress.clone()),
            Merge::Write(progress)
        );

        let acknowledged = SceneRecord::Completed(CompletedRecord {
            stars: 2,
            completed_at_ms: 250,
            learned_words: ["mahakaya".to_string()].into_iter().collect(),
            completion_screen_pending: false,
        });
        let Merge::Write(SceneRecord::Completed(merged)) =
            SceneRecord::merge(Some(&completed), acknowledged)
        else {
            panic!("expected completed merge");
        };
        assert_eq!(merged.stars, 3);
        assert_eq!(merged.completed_at_ms, 100);
        assert_eq!(merged.learned_words.len(), 2);
        assert!(!merged.completion_screen_pending);
    }
}
