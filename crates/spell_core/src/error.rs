//! Error types for the spell engine.
//!
//! These are internal failures: bad authoring data, dangling ids, corrupt
//! snapshots. Expected gameplay outcomes (a failed range check, a resisted
//! bolt) are not errors; see [`crate::casting::CastFailure`].

use thiserror::Error;

use crate::components::{CastId, EffectId, EntityId, SpellId};

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error type for engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Spell definition not present in the spell book.
    #[error("Spell not found: {0}")]
    SpellNotFound(SpellId),

    /// Spell line not present in the spell book.
    #[error("Spell line not found: {0}")]
    SpellLineNotFound(String),

    /// Two authored spells share an id.
    #[error("Duplicate spell ID: {0}")]
    DuplicateSpell(SpellId),

    /// Invalid entity reference.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Invalid effect reference.
    #[error("Effect not found: {0}")]
    EffectNotFound(EffectId),

    /// Invalid cast reference.
    #[error("Cast not found: {0}")]
    CastNotFound(CastId),

    /// Data file parsing error.
    #[error("Failed to parse data file '{path}': {message}")]
    DataParseError {
        /// Path to the file that failed to parse.
        path: String,
        /// Error message.
        message: String,
    },

    /// Invalid engine state.
    #[error("Invalid engine state: {0}")]
    InvalidState(String),
}
