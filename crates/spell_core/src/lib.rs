//! # Spell Core
//!
//! Deterministic spell-casting and effect-resolution engine.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! This separation enables:
//! - Authoritative zone servers with reproducible combat
//! - Headless balance tooling
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`data`] - Spell definitions, lines and the spell book
//! - [`zone`] - The zone driver that owns livings and fires timers
//! - [`casting`] - Cast sequence: checks, stages, interrupts, charging
//! - [`lifecycle`] - Resolution and the effect lifecycle
//! - [`targeting`] - Target validation and expansion
//! - [`damage`] - Hit, resist, damage and heal calculation
//! - [`stacking`] - Whether a new effect replaces an existing one
//! - [`persistence`] - Saving and restoring running effects
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod casting;
pub mod components;
pub mod config;
pub mod damage;
pub mod data;
pub mod effects;
pub mod error;
pub mod lifecycle;
pub mod living;
pub mod math;
pub mod messages;
pub mod mutation;
pub mod persistence;
pub mod registry;
pub mod rng;
pub mod ruleset;
pub mod scheduler;
pub mod stacking;
pub mod targeting;
pub mod zone;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::casting::{CastFailure, CastOutcome, CastPhase};
    pub use crate::components::*;
    pub use crate::config::EngineConfig;
    pub use crate::data::{EffectKind, SpellBook, SpellDefinition, SpellLine, TargetMode};
    pub use crate::effects::{ActiveEffect, EffectPhase};
    pub use crate::error::{EngineError, Result};
    pub use crate::living::{Living, LivingSpawnParams};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::messages::{ChatCategory, MessageSink, RecordingSink};
    pub use crate::persistence::SavedEffectRecord;
    pub use crate::rng::{Roller, ScriptedRoller, SpellRng};
    pub use crate::scheduler::{Scheduler, TimerQueue};
    pub use crate::zone::Zone;
}
