//! Scenekeep Engine
//!
//! Platform-agnostic core of the resumable scene session engine: the scene
//! state machine, debounced persistence, and the reconstruction that restores
//! owed overlays after a reload. Browser bindings live in `scenekeep-web`.

pub mod config;
pub mod deferred;
pub mod engine;
pub mod error;
pub mod hints;
pub mod key;
pub mod machine;
pub mod persist;
pub mod reconstruct;
pub mod record;
pub mod repository;
pub mod scene;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::EngineConfig;
pub use deferred::{DeferredActionCoordinator, DeferredFire, DismissTrigger};
pub use engine::{EntryReport, SceneEngine, TickReport};
pub use error::EngineError;
pub use hints::{HintChange, HintCondition, HintDescriptor, HintScheduler};
pub use key::{KeyError, KeyKind, Profile, ProfileId, SceneId, SceneKey, ZoneId};
pub use machine::{
    EffectList, EffectRequest, InvariantViolation, SceneEvent, SceneMachine, Transition,
};
pub use persist::{
    FlushOutcome, FlushReport, PersistStats, PersistenceController, ScheduleDecision, Suppression,
};
pub use reconstruct::{
    DiscoveryCopy, EntryMode, Reconstruction, ResumeSource, UiDirective, reconstruct,
};
pub use record::{CodecError, CompletedRecord, ProgressSnapshot, RECORD_VERSION, SceneRecord};
pub use repository::{LoadedRecord, RepositoryError, SaveOutcome, SceneRepository, ZoneProgress};
pub use scene::{AdvanceRule, Condition, DefinitionError, SceneCatalog, SceneDefinition};
pub use session::{
    ActionKind, Directive, FlagValue, Flags, PendingAction, PhaseId, PopupKind, READY_FLAG,
    SceneSession,
};
pub use store::{DEFAULT_QUOTA_UNITS, DurableStore, MemoryStore, StoreError};
