//! Scene-keyed repository over a [`DurableStore`].
//!
//! All storage access goes through here; nothing else scans keys or builds
//! key strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::key::{KeyKind, ProfileId, SceneKey, ZoneId};
use crate::record::{CodecError, Merge, SceneRecord};
use crate::scene::SceneDefinition;
use crate::store::{DurableStore, StoreError};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("record for {key} is corrupt: {source}")]
    Corrupt {
        key: SceneKey,
        #[source]
        source: CodecError,
    },
    #[error("record for {key} could not be encoded: {source}")]
    Encode {
        key: SceneKey,
        #[source]
        source: CodecError,
    },
}

/// What reading a record produced. Corruption is a value, not an error,
/// because callers always recover from it the same way.
#[derive(Debug)]
pub enum LoadedRecord {
    Missing,
    Found(SceneRecord),
    Corrupt(CodecError),
}

impl LoadedRecord {
    #[must_use]
    pub const fn record(&self) -> Option<&SceneRecord> {
        match self {
            Self::Found(record) => Some(record),
            Self::Missing | Self::Corrupt(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// An in-progress write was refused because the scene is complete.
    KeptCompleted,
}

/// Per-zone roll-up for map screens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneProgress {
    pub scenes_started: usize,
    pub scenes_completed: usize,
    pub stars: u32,
    pub learned_words: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct SceneRepository<S: DurableStore> {
    store: S,
}

impl<S: DurableStore> SceneRepository<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Read and decode the record for `key`, checking it against `definition`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] when the store cannot be read.
    pub fn load(
        &self,
        key: &SceneKey,
        definition: &SceneDefinition,
    ) -> Result<LoadedRecord, RepositoryError> {
        let Some(raw) = self.store.get(&key.record_key())? else {
            return Ok(LoadedRecord::Missing);
        };
        Ok(match SceneRecord::decode_for(&raw, definition) {
            Ok(record) => LoadedRecord::Found(record),
            Err(err) => LoadedRecord::Corrupt(err),
        })
    }

    /// Decode without a definition; used for roll-ups.
    ///
    /// # Errors
    ///
    /// Store failures and corrupt records are both reported.
    pub fn load_raw(&self, key: &SceneKey) -> Result<Option<SceneRecord>, RepositoryError> {
        let Some(raw) = self.store.get(&key.record_key())? else {
            return Ok(None);
        };
        SceneRecord::decode(&raw)
            .map(Some)
            .map_err(|source| RepositoryError::Corrupt {
                key: key.clone(),
                source,
            })
    }

    /// Write `record`, merging with what is stored (last writer wins per key,
    /// except that completed records are never downgraded).
    ///
    /// # Errors
    ///
    /// Returns store or encoding failures; the stored value is unchanged then.
    pub fn save(
        &self,
        key: &SceneKey,
        record: SceneRecord,
    ) -> Result<SaveOutcome, RepositoryError> {
        // A corrupt existing value is simply overwritten; an unreadable one
        // might be a completed record, so nothing is written.
        let existing = match self.load_raw(key) {
            Ok(existing) => existing,
            Err(RepositoryError::Corrupt { .. }) => None,
            Err(err) => return Err(err),
        };
        let merged = match SceneRecord::merge(existing.as_ref(), record) {
            Merge::Write(merged) => merged,
            Merge::KeepCompleted => return Ok(SaveOutcome::KeptCompleted),
        };
        let encoded = merged.encode().map_err(|source| RepositoryError::Encode {
            key: key.clone(),
            source,
        })?;
        self.store.set(&key.record_key(), &encoded)?;
        Ok(SaveOutcome::Written)
    }

    /// # Errors
    ///
    /// Returns store failures.
    pub fn delete(&self, key: &SceneKey) -> Result<(), RepositoryError> {
        self.store.delete(&key.record_key())?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns store failures.
    pub fn mark_reset(&self, key: &SceneKey) -> Result<(), RepositoryError> {
        self.store.set(&key.reset_key(), "1")?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns store failures.
    pub fn has_reset_marker(&self, key: &SceneKey) -> Result<bool, RepositoryError> {
        Ok(self.store.get(&key.reset_key())?.is_some())
    }

    /// # Errors
    ///
    /// Returns store failures.
    pub fn clear_reset(&self, key: &SceneKey) -> Result<(), RepositoryError> {
        self.store.delete(&key.reset_key())?;
        Ok(())
    }

    /// Every scene key of `profile` that has a record or a reset marker.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub fn scene_keys(&self, profile: &ProfileId) -> Result<Vec<(KeyKind, SceneKey)>, RepositoryError> {
        let mut keys: Vec<_> = self
            .store
            .keys()?
            .iter()
            .filter_map(|raw| SceneKey::parse_storage_key(raw))
            .filter(|(_, key)| key.belongs_to(profile))
            .collect();
        keys.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(keys)
    }

    /// Remove every record and reset marker of a deleted profile.
    ///
    /// # Errors
    ///
    /// Returns the first store failure; earlier deletions stay applied.
    pub fn delete_profile(&self, profile: &ProfileId) -> Result<usize, RepositoryError> {
        let keys = self.scene_keys(profile)?;
        for (kind, key) in &keys {
            self.store.delete(&key.storage_key(*kind))?;
        }
        log::info!("deleted {} stored entries for profile {profile}", keys.len());
        Ok(keys.len())
    }

    /// Roll up stars, completions and learned words for one zone.
    /// Corrupt records are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub fn zone_progress(
        &self,
        profile: &ProfileId,
        zone: &ZoneId,
    ) -> Result<ZoneProgress, RepositoryError> {
        let mut progress = ZoneProgress::default();
        for (kind, key) in self.scene_keys(profile)? {
            if kind != KeyKind::Record || &key.zone_id != zone {
                continue;
            }
            let record = match self.load_raw(&key) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(RepositoryError::Corrupt { key, source }) => {
                    log::warn!("skipping corrupt record for {key}: {source}");
                    continue;
                }
                Err(err) => return Err(err),
            };
            progress.scenes_started += 1;
            if record.is_completed() {
                progress.scenes_completed += 1;
            }
            progress.stars += record.stars();
            progress
                .learned_words
                .extend(record.learned_words().iter().cloned());
        }
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CompletedRecord;
    use crate::scene::SceneCatalog;
    use crate::session::SceneSession;
    use crate::store::MemoryStore;

    fn key(profile: &str, zone: &str, scene: &str) -> SceneKey {
        SceneKey::parse_parts(profile, zone, scene).unwrap()
    }

    fn completed(stars: u32) -> SceneRecord {
        SceneRecord::Completed(CompletedRecord {
            stars,
            completed_at_ms: 5,
            learned_words: ["vakratunda".to_string()].into_iter().collect(),
            completion_screen_pending: false,
        })
    }

    #[test]
    fn completed_record_is_not_downgraded() {
        let catalog = SceneCatalog::builtin().unwrap();
        let def = catalog.require("vakratunda_gate").unwrap();
        let repo = SceneRepository::new(MemoryStore::new());
        let k = key("p1", "ganesha_temple", "vakratunda_gate");
        assert_eq!(repo.save(&k, completed(3)).unwrap(), SaveOutcome::Written);

        let stray = SceneRecord::from_session(&SceneSession::fresh(k.clone(), def, 9));
        assert_eq!(repo.save(&k, stray).unwrap(), SaveOutcome::KeptCompleted);
        assert!(matches!(
            repo.load(&k, def).unwrap(),
            LoadedRecord::Found(SceneRecord::Completed(_))
        ));
    }

    #[test]
    fn unreadable_store_refuses_to_overwrite() {
        let catalog = SceneCatalog::builtin().unwrap();
        let def = catalog.require("vakratunda_gate").unwrap();
        let store = MemoryStore::new();
        let repo = SceneRepository::new(store.clone());
        let k = key("p1", "ganesha_temple", "vakratunda_gate");
        repo.save(&k, completed(3)).unwrap();

        store.set_failing_reads(true);
        let stray = SceneRecord::from_session(&SceneSession::fresh(k.clone(), def, 9));
        assert!(matches!(
            repo.save(&k, stray),
            Err(RepositoryError::Store(_))
        ));
        store.set_failing_reads(false);
        assert!(matches!(
            repo.load(&k, def).unwrap(),
            LoadedRecord::Found(SceneRecord::Completed(_))
        ));
    }

    #[test]
    fn corrupt_values_load_as_corrupt_and_can_be_overwritten() {
        let catalog = SceneCatalog::builtin().unwrap();
        let def = catalog.require("vakratunda_gate").unwrap();
        let store = MemoryStore::new();
        let repo = SceneRepository::new(store.clone());
        let k = key("p1", "ganesha_temple", "vakratunda_gate");
        store.set(&k.record_key(), "{\"version\":2,\"checksum\":\"x\"").unwrap();
        assert!(matches!(repo.load(&k, def).unwrap(), LoadedRecord::Corrupt(_)));
        repo.save(&k, completed(1)).unwrap();
        assert!(repo.load(&k, def).unwrap().record().is_some());
    }

    #[test]
    fn reset_marker_lifecycle() {
        let repo = SceneRepository::new(MemoryStore::new());
        let k = key("p1", "z", "s");
        assert!(!repo.has_reset_marker(&k).unwrap());
        repo.mark_reset(&k).unwrap();
        assert!(repo.has_reset_marker(&k).unwrap());
        repo.clear_reset(&k).unwrap();
        assert!(!repo.has_reset_marker(&k).unwrap());
    }

    #[test]
    fn profile_scoped_listing_deletion_and_zone_rollup() {
        let store = MemoryStore::new();
        let repo = SceneRepository::new(store.clone());
        let a = key("p1", "ganesha_temple", "vakratunda_gate");
        let b = key("p1", "ganesha_temple", "modak_garden");
        let other_zone = key("p1", "river", "boat");
        let other_profile = key("p10", "ganesha_temple", "vakratunda_gate");
        repo.save(&a, completed(3)).unwrap();
        repo.save(&b, completed(2)).unwrap();
        repo.save(&other_zone, completed(1)).unwrap();
        repo.save(&other_profile, completed(3)).unwrap();
        repo.mark_reset(&b).unwrap();
        store.set("unrelated", "x").unwrap();
        store.set("scene:p1:ganesha_temple:broken", "garbage").unwrap();

        let zone = repo
            .zone_progress(&a.profile_id, &a.zone_id)
            .unwrap();
        assert_eq!(zone.scenes_completed, 2);
        assert_eq!(zone.scenes_started, 2);
        assert_eq!(zone.stars, 5);
        assert!(zone.learned_words.contains("vakratunda"));

        assert_eq!(repo.scene_keys(&a.profile_id).unwrap().len(), 5);
        assert_eq!(repo.delete_profile(&a.profile_id).unwrap(), 5);
        assert!(repo.scene_keys(&a.profile_id).unwrap().is_empty());
        assert_eq!(repo.scene_keys(&other_profile.profile_id).unwrap().len(), 1);
        assert_eq!(store.raw("unrelated").as_deref(), Some("x"));
    }
}
