//! Engine timing configuration.
use serde::{Deserialize, Serialize};

const DEFAULT_ENGINE_DATA: &str = include_str!("../assets/engine.json");

/// Timer durations, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Quiet period before a changed session is written.
    #[serde(default = "EngineConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    /// Delay between an overlay closing and its pending action firing.
    #[serde(default = "EngineConfig::default_dismiss_delay_ms")]
    pub dismiss_delay_ms: u64,
    /// Writes are held back this long after a reload resumes a scene.
    #[serde(default = "EngineConfig::default_reload_grace_ms")]
    pub reload_grace_ms: u64,
    #[serde(default = "EngineConfig::default_hint_cadence_ms")]
    pub hint_cadence_ms: u64,
    #[serde(default = "EngineConfig::default_hint_delay_ms")]
    pub hint_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            dismiss_delay_ms: Self::default_dismiss_delay_ms(),
            reload_grace_ms: Self::default_reload_grace_ms(),
            hint_cadence_ms: Self::default_hint_cadence_ms(),
            hint_delay_ms: Self::default_hint_delay_ms(),
        }
    }
}

impl EngineConfig {
    const fn default_debounce_ms() -> u64 {
        1_000
    }

    const fn default_dismiss_delay_ms() -> u64 {
        400
    }

    const fn default_reload_grace_ms() -> u64 {
        1_500
    }

    const fn default_hint_cadence_ms() -> u64 {
        1_000
    }

    const fn default_hint_delay_ms() -> u64 {
        6_000
    }

    #[must_use]
    pub fn load_from_static() -> Self {
        serde_json::from_str(DEFAULT_ENGINE_DATA).unwrap_or_default()
    }

    #[must_use]
    pub fn default_config() -> Self {
        Self::load_from_static()
    }

    /// Parse a config, filling omitted fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
