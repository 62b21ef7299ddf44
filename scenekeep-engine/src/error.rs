//! Top-level error for the engine façade.
use thiserror::Error;

use crate::key::KeyError;
use crate::machine::InvariantViolation;
use crate::record::CodecError;
use crate::repository::RepositoryError;
use crate::scene::DefinitionError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error("no scene is active")]
    NoActiveScene,
}

impl EngineError {
    /// Whether the caller's session survived untouched and play can go on.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Invariant(_) | Self::Store(_) | Self::Repository(_))
    }
}
