//! Identity types and storage-key namespacing.
//!
//! Every persisted value lives under one of two prefixes:
//! `scene:{profile}:{zone}:{scene}` for the scene record and
//! `reset:{profile}:{zone}:{scene}` for the explicit replay marker.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

pub const RECORD_PREFIX: &str = "scene";
pub const RESET_PREFIX: &str = "reset";

const SEPARATOR: char = ':';

fn segment_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").ok())
        .as_ref()
}

fn is_valid_segment(value: &str) -> bool {
    segment_pattern().is_some_and(|re| re.is_match(value))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("{field} segment '{value}' must be non-empty and use only [A-Za-z0-9_-]")]
    InvalidSegment { field: &'static str, value: String },
}

macro_rules! id_newtype {
    ($name:ident, $field:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap an identifier segment.
            ///
            /// # Errors
            ///
            /// Returns [`KeyError::InvalidSegment`] when the value is empty or
            /// contains characters outside `[A-Za-z0-9_-]`.
            pub fn new(value: impl Into<String>) -> Result<Self, KeyError> {
                let value = value.into();
                if is_valid_segment(&value) {
                    Ok(Self(value))
                } else {
                    Err(KeyError::InvalidSegment {
                        field: $field,
                        value,
                    })
                }
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(ProfileId, "profile");
id_newtype!(ZoneId, "zone");
id_newtype!(SceneId, "scene");

/// Identity under which progress accrues. The engine never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub display_name: String,
}

/// Which namespace a storage key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Record,
    ResetMarker,
}

impl KeyKind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Record => RECORD_PREFIX,
            Self::ResetMarker => RESET_PREFIX,
        }
    }
}

/// Composite `(profile, zone, scene)` identifier for one scene session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SceneKey {
    pub profile_id: ProfileId,
    pub zone_id: ZoneId,
    pub scene_id: SceneId,
}

impl SceneKey {
    #[must_use]
    pub const fn new(profile_id: ProfileId, zone_id: ZoneId, scene_id: SceneId) -> Self {
        Self {
            profile_id,
            zone_id,
            scene_id,
        }
    }

    /// Build a key from raw string segments.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if any segment is not a valid identifier.
    pub fn parse_parts(profile: &str, zone: &str, scene: &str) -> Result<Self, KeyError> {
        Ok(Self::new(
            ProfileId::new(profile)?,
            ZoneId::new(zone)?,
            SceneId::new(scene)?,
        ))
    }

    #[must_use]
    pub fn storage_key(&self, kind: KeyKind) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            kind.prefix(),
            self.profile_id,
            self.zone_id,
            self.scene_id
        )
    }

    #[must_use]
    pub fn record_key(&self) -> String {
        self.storage_key(KeyKind::Record)
    }

    #[must_use]
    pub fn reset_key(&self) -> String {
        self.storage_key(KeyKind::ResetMarker)
    }

    /// Parse a raw storage key back into its namespace and scene key.
    ///
    /// Keys that belong to other features of the host page return `None`.
    #[must_use]
    pub fn parse_storage_key(raw: &str) -> Option<(KeyKind, Self)> {
        let mut parts = raw.split(SEPARATOR);
        let kind = match parts.next()? {
            RECORD_PREFIX => KeyKind::Record,
            RESET_PREFIX => KeyKind::ResetMarker,
            _ => return None,
        };
        let profile = parts.next()?;
        let zone = parts.next()?;
        let scene = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Self::parse_parts(profile, zone, scene)
            .ok()
            .map(|key| (kind, key))
    }

    #[must_use]
    pub fn belongs_to(&self, profile: &ProfileId) -> bool {
        &self.profile_id == profile
    }
}

impl fmt::Display for SceneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.profile_id, self.zone_id, self.scene_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SceneKey {
        SceneKey::parse_parts("kid-1", "ganesha_temple", "vakratunda").unwrap()
    }

    #[test]
    fn storage_keys_use_documented_namespaces() {
        let key = key();
        assert_eq!(key.record_key(), "scene:kid-1:ganesha_temple:vakratunda");
        assert_eq!(key.reset_key(), "reset:kid-1:ganesha_temple:vakratunda");
        assert_eq!(key.to_string(), "kid-1/ganesha_temple/vakratunda");
    }

    #[test]
    fn parse_storage_key_recovers_kind_and_key() {
        let key = key();
        assert_eq!(
            SceneKey::parse_storage_key(&key.record_key()),
            Some((KeyKind::Record, key.clone()))
        );
        assert_eq!(
            SceneKey::parse_storage_key(&key.reset_key()),
            Some((KeyKind::ResetMarker, key))
        );
        assert!(SceneKey::parse_storage_key("app.locale").is_none());
        assert!(SceneKey::parse_storage_key("scene:a:b").is_none());
        assert!(SceneKey::parse_storage_key("scene:a:b:c:d").is_none());
        assert!(SceneKey::parse_storage_key("scene:a: :c").is_none());
    }

    #[test]
    fn segments_reject_separator_and_empty_values() {
        assert!(ProfileId::new("").is_err());
        let err = ZoneId::new("zone:1").unwrap_err();
        assert_eq!(
            err,
            KeyError::InvalidSegment {
                field: "zone",
                value: "zone:1".to_string()
            }
        );
        assert!(SceneId::new("Door_2-b").is_ok());
    }
}
