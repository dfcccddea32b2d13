//! Shared value types for livings, spells and effects.
//!
//! Components are pure data with no behavior beyond simple accessors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for livings (players, NPCs, pets).
pub type EntityId = u64;

/// Authoring identifier of a spell definition.
pub type SpellId = u32;

/// Zone-unique identifier of an active effect or pulsing link.
pub type EffectId = u64;

/// Zone-unique identifier of a cast invocation.
pub type CastId = u64;

/// Group membership key.
pub type GroupId = u32;

// ============================================================================
// Allegiance
// ============================================================================

/// Allegiance of a living.
///
/// Controlled pets carry their owner's realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Realm {
    /// Unaligned creatures; they may fight each other.
    #[default]
    None,
    /// First player realm.
    Albion,
    /// Second player realm.
    Midgard,
    /// Third player realm.
    Hibernia,
}

/// What kind of actor a living is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LivingKind {
    /// Player character.
    Player,
    /// Uncontrolled NPC.
    Npc,
    /// Controlled creature.
    Pet {
        /// Controlling living.
        owner: EntityId,
    },
}

// ============================================================================
// Damage
// ============================================================================

/// Damage type of a spell.
///
/// Each type is resisted separately via [`Property::Resist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum DamageType {
    /// Body damage.
    Body,
    /// Cold damage.
    Cold,
    /// Energy damage.
    #[default]
    Energy,
    /// Heat damage.
    Heat,
    /// Matter damage.
    Matter,
    /// Spirit damage.
    Spirit,
    /// Natural (unresistable by type) damage.
    Natural,
}

// ============================================================================
// Properties
// ============================================================================

/// A modifiable attribute of a living.
///
/// Neutral values are seeded into the [`BonusCategory::Base`] category by
/// [`StatBlock::new`]; percentage properties are neutral at 100 and
/// [`Property::SpellDamage`] at 1000 (per mille).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Property {
    /// Casting stat for wizards.
    Intelligence,
    /// Casting stat for clerics.
    Piety,
    /// Casting stat for druids.
    Empathy,
    /// Casting stat for bards.
    Charisma,
    /// Physical stat.
    Strength,
    /// Physical stat.
    Constitution,
    /// Physical stat.
    Dexterity,
    /// Physical stat.
    Quickness,
    /// Armor factor.
    ArmorFactor,
    /// Flat bonus to the effective level of cast spells.
    SpellLevel,
    /// Flat bonus to spell hit chance.
    ToHitBonus,
    /// Spell damage multiplier in per mille.
    SpellDamage,
    /// Percentage bonus to effect durations.
    SpellDuration,
    /// Spell range in percent.
    SpellRange,
    /// Percentage cast-time reduction.
    CastingSpeed,
    /// Flat damage reduction in percent.
    MagicAbsorption,
    /// Ignores up to this much item resistance.
    ResistPierce,
    /// Chance of a critical spell hit in percent.
    CriticalSpellChance,
    /// Chance of a critical heal in percent.
    CriticalHealChance,
    /// Percentage bonus to healing done.
    HealingEffectiveness,
    /// Overall effectiveness in percent.
    LivingEffectiveness,
    /// Stun duration scale in percent.
    StunDurationReduction,
    /// Mesmerize duration scale in percent.
    MesmerizeDurationReduction,
    /// Focus level reducing power costs.
    Focus,
    /// Extra chance to be missed by spells, in percent.
    ChanceToBeMissed,
    /// Resistance to a damage type, in percent.
    Resist(DamageType),
}

impl Property {
    /// Value the property holds on a freshly spawned living.
    #[must_use]
    pub const fn neutral_value(self) -> i32 {
        match self {
            Self::SpellDamage => 1000,
            Self::SpellRange
            | Self::LivingEffectiveness
            | Self::StunDurationReduction
            | Self::MesmerizeDurationReduction => 100,
            _ => 0,
        }
    }
}

/// Source bucket a property bonus is stored in.
///
/// Buff categories are tracked separately so removing one effect never
/// disturbs another effect's contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum BonusCategory {
    /// Intrinsic value (level, race, class).
    Base,
    /// Equipment.
    Item,
    /// Baseline buffs.
    #[default]
    BaseBuff,
    /// Specialization buffs.
    SpecBuff,
    /// Debuffs.
    Debuff,
    /// Specialization debuffs.
    SpecDebuff,
    /// Abilities and realm abilities; secondary resists live here.
    Ability,
    /// Anything else.
    Other,
}

/// Per-living property table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct StatBlock {
    values: BTreeMap<(Property, BonusCategory), i32>,
}

impl StatBlock {
    /// Create a table holding only neutral values.
    #[must_use]
    pub fn new() -> Self {
        let mut block = Self::default();
        for property in [
            Property::SpellDamage,
            Property::SpellRange,
            Property::LivingEffectiveness,
            Property::StunDurationReduction,
            Property::MesmerizeDurationReduction,
        ] {
            block.set(property, BonusCategory::Base, property.neutral_value());
        }
        block
    }

    /// Overwrite one category of a property.
    pub fn set(&mut self, property: Property, category: BonusCategory, value: i32) {
        if value == 0 {
            self.values.remove(&(property, category));
        } else {
            self.values.insert((property, category), value);
        }
    }

    /// Add a signed delta to one category of a property.
    pub fn add(&mut self, property: Property, category: BonusCategory, delta: i32) {
        let current = self.get(property, category);
        self.set(property, category, current.saturating_add(delta));
    }

    /// Raw value of one category.
    #[must_use]
    pub fn get(&self, property: Property, category: BonusCategory) -> i32 {
        self.values.get(&(property, category)).copied().unwrap_or(0)
    }

    /// Sum over every category.
    #[must_use]
    pub fn modified(&self, property: Property) -> i32 {
        self.values
            .range((property, BonusCategory::Base)..=(property, BonusCategory::Other))
            .map(|(_, v)| *v)
            .sum()
    }

    /// Primary resistance: everything except the ability category.
    #[must_use]
    pub fn primary_resist(&self, damage_type: DamageType) -> i32 {
        let property = Property::Resist(damage_type);
        self.modified(property) - self.get(property, BonusCategory::Ability)
    }

    /// Secondary resistance from abilities.
    #[must_use]
    pub fn secondary_resist(&self, damage_type: DamageType) -> i32 {
        self.get(Property::Resist(damage_type), BonusCategory::Ability)
    }

    /// Item-sourced resistance, the ceiling for resist pierce.
    #[must_use]
    pub fn item_resist(&self, damage_type: DamageType) -> i32 {
        self.get(Property::Resist(damage_type), BonusCategory::Item)
    }
}

// ============================================================================
// Resources
// ============================================================================

/// A bounded resource (health, mana, endurance, concentration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Pool {
    /// Current amount.
    pub current: i32,
    /// Maximum amount.
    pub max: i32,
}

impl Pool {
    /// A full pool.
    #[must_use]
    pub const fn full(max: i32) -> Self {
        Self { current: max, max }
    }

    /// Remove up to `amount`, returning what was actually removed.
    pub fn drain(&mut self, amount: i32) -> i32 {
        let taken = amount.clamp(0, self.current.max(0));
        self.current -= taken;
        taken
    }

    /// Add up to `amount` without exceeding the maximum, returning the gain.
    pub fn restore(&mut self, amount: i32) -> i32 {
        let room = (self.max - self.current).max(0);
        let gained = amount.clamp(0, room);
        self.current += gained;
        gained
    }

    /// Whether the pool is at its maximum.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.current >= self.max
    }
}

/// A held musical instrument, required by songs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Item level.
    pub level: u8,
    /// Current condition.
    pub condition: u32,
    /// Condition when new.
    pub max_condition: u32,
    /// Quality percent.
    pub quality: u8,
}

// ============================================================================
// Static markers
// ============================================================================

/// Non-spell state attached to a living's effect registry.
///
/// Markers come from abilities, items or other subsystems; the engine only
/// reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Marker {
    /// Cannot cast.
    Silenced,
    /// Phase-shifted; only positive songs may be played.
    Phaseshift,
    /// The given living is invisible to this one.
    SelectiveBlindness {
        /// Living that cannot be seen.
        source: EntityId,
    },
    /// Next spell is instant, costs double power and cannot be interrupted.
    QuickCast,
    /// Casts cannot be interrupted by attacks.
    Uninterruptible,
    /// Unaffected by damaging spells of one type.
    DamageImmunity(DamageType),
    /// Cannot be stunned.
    StunImmunity,
    /// Cannot be mesmerized.
    MezImmunity,
    /// Receives half healing.
    Diseased,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_block_neutral_values() {
        let stats = StatBlock::new();
        assert_eq!(stats.modified(Property::SpellDamage), 1000);
        assert_eq!(stats.modified(Property::SpellRange), 100);
        assert_eq!(stats.modified(Property::Intelligence), 0);
    }

    #[test]
    fn test_stat_block_categories_sum() {
        let mut stats = StatBlock::new();
        stats.set(Property::Intelligence, BonusCategory::Base, 60);
        stats.add(Property::Intelligence, BonusCategory::BaseBuff, 25);
        stats.add(Property::Intelligence, BonusCategory::Debuff, -10);
        assert_eq!(stats.modified(Property::Intelligence), 75);

        stats.add(Property::Intelligence, BonusCategory::BaseBuff, -25);
        assert_eq!(stats.get(Property::Intelligence, BonusCategory::BaseBuff), 0);
        assert_eq!(stats.modified(Property::Intelligence), 50);
    }

    #[test]
    fn test_resist_split() {
        let mut stats = StatBlock::new();
        let heat = Property::Resist(DamageType::Heat);
        stats.set(heat, BonusCategory::Item, 20);
        stats.set(heat, BonusCategory::BaseBuff, 6);
        stats.set(heat, BonusCategory::Ability, 10);

        assert_eq!(stats.primary_resist(DamageType::Heat), 26);
        assert_eq!(stats.secondary_resist(DamageType::Heat), 10);
        assert_eq!(stats.item_resist(DamageType::Heat), 20);
        assert_eq!(stats.primary_resist(DamageType::Cold), 0);
    }

    #[test]
    fn test_pool_drain_and_restore() {
        let mut pool = Pool::full(100);
        assert_eq!(pool.drain(30), 30);
        assert_eq!(pool.drain(500), 70);
        assert_eq!(pool.current, 0);
        assert_eq!(pool.restore(40), 40);
        assert_eq!(pool.restore(500), 60);
        assert!(pool.is_full());
    }
}
