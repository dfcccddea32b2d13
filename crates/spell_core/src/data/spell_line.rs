//! Spell lines: named groups of spells sharing a specialization.

use serde::{Deserialize, Serialize};

use super::spell_data::SpellDefinition;

/// Where a line's spells come from; drives variance rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LineCategory {
    /// Trained class spells.
    #[default]
    Standard,
    /// Procs and charges on items; variance floor is 1.0.
    ItemEffects,
    /// Scripted spells that never vary.
    Reserved,
}

/// Casting-stat scaling applied to base damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DamageScaling {
    /// `(stat + 200) / 275`.
    #[default]
    Caster,
    /// `(stat + 180) / 250`, for hybrid lines.
    Hybrid,
    /// Raw authored damage.
    Unscaled,
}

/// A named line of spells.
///
/// # Example RON
///
/// ```ron
/// (
///     key: "fire_magic",
///     name: "Fire Magic",
///     spec: "fire",
///     baseline: true,
///     spells: [ /* SpellDefinition entries */ ],
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellLine {
    /// Unique key.
    pub key: String,

    /// Display name.
    pub name: String,

    /// Specialization key whose level drives variance and focus.
    pub spec: String,

    /// Baseline lines get a level-dependent variance floor.
    #[serde(default)]
    pub baseline: bool,

    /// Source category.
    #[serde(default)]
    pub category: LineCategory,

    /// Casting-stat scaling for damage.
    #[serde(default)]
    pub scaling: DamageScaling,

    /// Spells in this line.
    #[serde(default)]
    pub spells: Vec<SpellDefinition>,
}

impl SpellLine {
    /// Find a spell of this line by id.
    #[must_use]
    pub fn spell(&self, id: u32) -> Option<&SpellDefinition> {
        self.spells.iter().find(|s| s.id == id)
    }
}
