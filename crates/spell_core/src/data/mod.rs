//! Authoring data for spells.
//!
//! This module contains pure data structures that define spells and the
//! lines they are grouped into. All structs are designed to be deserialized
//! from RON files.
//!
//! **Note:** This module contains no IO - it only defines data types and
//! parses text handed to it. File loading is handled by `spell_tools` and
//! by the embedding server.

mod spell_book;
mod spell_data;
mod spell_line;

pub use spell_book::SpellBook;
pub use spell_data::{EffectKind, EffectMessages, SpellDefinition, StatModifierSpec, TargetMode};
pub use spell_line::{DamageScaling, LineCategory, SpellLine};
