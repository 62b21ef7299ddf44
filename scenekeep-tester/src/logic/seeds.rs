use anyhow::{Result, bail};
use twox_hash::XxHash64;

/// Seed metadata for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedInfo {
    pub seed: u64,
    /// The word the seed was derived from, if it was not numeric.
    pub label: Option<String>,
}

impl SeedInfo {
    #[must_use]
    pub const fn from_numeric(seed: u64) -> Self {
        Self { seed, label: None }
    }

    /// Derive a stable seed from a word, so `--seeds ganesha` replays exactly.
    #[must_use]
    pub fn from_word(word: &str) -> Self {
        let normalized = word.to_ascii_lowercase();
        Self {
            seed: XxHash64::oneshot(0, normalized.as_bytes()),
            label: Some(normalized),
        }
    }
}

/// Resolve CLI seed arguments: integers are used as-is, words are hashed.
///
/// # Errors
///
/// Tokens containing anything but ASCII letters, digits, `-` or `_` are
/// rejected.
pub fn resolve_seed_inputs(tokens: &[String]) -> Result<Vec<SeedInfo>> {
    let mut seeds: Vec<SeedInfo> = Vec::new();
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        let info = if let Ok(value) = token.parse::<i64>() {
            SeedInfo::from_numeric(value.unsigned_abs())
        } else if let Ok(value) = token.parse::<u64>() {
            SeedInfo::from_numeric(value)
        } else if token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            SeedInfo::from_word(token)
        } else {
            bail!("Unrecognized seed token: {token}");
        };
        if !seeds.iter().any(|s| s.seed == info.seed) {
            seeds.push(info);
        }
    }

    if seeds.is_empty() {
        seeds.push(SeedInfo::from_numeric(1337));
    }
    Ok(seeds)
}
