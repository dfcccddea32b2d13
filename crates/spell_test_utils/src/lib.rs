//! # Spell Test Utilities
//!
//! Shared testing utilities for all crates:
//! - Determinism test harness
//! - Canned spells and a zone builder with a recording sink
//! - Property-based testing strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;

/// Scripted rolls for exact-number tests.
pub use spell_core::rng::ScriptedRoller;

/// Re-export proptest for convenience.
pub use proptest;
