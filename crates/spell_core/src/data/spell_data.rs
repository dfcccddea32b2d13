//! Spell definitions for data-driven casting.

use serde::{Deserialize, Serialize};

use crate::components::{BonusCategory, DamageType, Property, SpellId};
use crate::math::{fixed_decimal, Fixed};

/// Behaviour tag deciding what a resolved spell does to each target.
///
/// Every spell maps onto exactly one kind; numeric authoring fields
/// parameterize the behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    /// One-off damage.
    DirectDamage,
    /// Damage applied on start and on every pulse.
    DamageOverTime,
    /// One-off healing.
    Heal,
    /// Positive stat modifiers for the duration.
    StatBuff,
    /// Negative stat modifiers for the duration.
    StatDebuff,
    /// Prevents all actions; grants an immunity window on expiry.
    Stun,
    /// Prevents all actions until broken by damage.
    Mesmerize,
    /// Remaps the caster's next target mode (value 0..=3).
    TargetModifier,
}

impl EffectKind {
    /// Kinds that reduce health.
    #[must_use]
    pub const fn is_damaging(self) -> bool {
        matches!(self, Self::DirectDamage | Self::DamageOverTime)
    }

    /// Crowd-control kinds with an immunity window.
    #[must_use]
    pub const fn is_crowd_control(self) -> bool {
        matches!(self, Self::Stun | Self::Mesmerize)
    }

    /// Kinds that harm their target.
    #[must_use]
    pub const fn is_hostile(self) -> bool {
        matches!(
            self,
            Self::DirectDamage | Self::DamageOverTime | Self::StatDebuff | Self::Stun | Self::Mesmerize
        )
    }

    /// Kinds that modify stats while active.
    #[must_use]
    pub const fn modifies_stats(self) -> bool {
        matches!(self, Self::StatBuff | Self::StatDebuff)
    }
}

/// How the nominal target expands into affected livings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetMode {
    /// The caster, or allies around the caster when the spell has a radius.
    SelfTarget,
    /// An attackable target, or attackables around it.
    Enemy,
    /// A same-realm target, or non-attackables around it.
    Realm,
    /// The caster's group and their pets.
    Group,
    /// The caster's controlled creatures.
    Pet,
    /// Attackables around the ground target.
    Area,
    /// Attackables in an arc in front of the caster.
    Cone,
    /// A dead same-realm living.
    Corpse,
    /// A point on the ground; no living is affected.
    Ground,
}

impl TargetMode {
    /// Modes aimed at hostile livings.
    #[must_use]
    pub const fn is_offensive(self) -> bool {
        matches!(self, Self::Enemy | Self::Area | Self::Cone)
    }
}

/// One property touched by a stat effect.
///
/// The magnitude comes from the spell's `value` scaled by effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatModifierSpec {
    /// Property changed.
    pub property: Property,
    /// Bonus bucket the change is stored in.
    #[serde(default)]
    pub category: BonusCategory,
}

/// Chat lines sent when an effect starts or ends.
///
/// `{0}` in the area variants is replaced with the owner's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EffectMessages {
    /// Sent to the owner on start.
    #[serde(default)]
    pub on_start: String,
    /// Broadcast around the owner on start.
    #[serde(default)]
    pub on_start_area: String,
    /// Sent to the owner on expiry.
    #[serde(default)]
    pub on_expire: String,
    /// Broadcast around the owner on expiry.
    #[serde(default)]
    pub on_expire_area: String,
}

/// Data-driven spell definition.
///
/// Immutable once loaded.
///
/// # Example RON
///
/// ```ron
/// (
///     id: 1201,
///     name: "Lesser Stun",
///     kind: Stun,
///     target: Enemy,
///     level: 20,
///     duration_ms: 9000,
///     cast_time_ms: 2500,
///     range: 1500,
///     power: 12,
///     immunity_multiplier: 5,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellDefinition {
    /// Unique authoring id.
    pub id: SpellId,

    /// Display name.
    pub name: String,

    /// Behaviour tag.
    pub kind: EffectKind,

    /// Target expansion mode.
    pub target: TargetMode,

    /// Base damage (authored as a decimal).
    #[serde(default, with = "fixed_decimal")]
    pub damage: Fixed,

    /// Damage type.
    #[serde(default)]
    pub damage_type: DamageType,

    /// Buff/debuff/heal magnitude. A negative heal is a percent of the
    /// caster's maximum health.
    #[serde(default)]
    pub value: i32,

    /// Nominal spell level.
    #[serde(default = "default_level")]
    pub level: u8,

    /// Effect duration; zero means instant (or unlimited for concentration).
    #[serde(default)]
    pub duration_ms: u32,

    /// Pulse interval for pulsing spells and over-time effects.
    #[serde(default)]
    pub frequency_ms: u32,

    /// Re-executes every `frequency_ms` while sustained.
    #[serde(default)]
    pub pulse: bool,

    /// Focus spell: pulsing, ended by the caster's own actions.
    #[serde(default)]
    pub focus: bool,

    /// Power drained per pulse.
    #[serde(default)]
    pub pulse_power: i32,

    /// Concentration cost.
    #[serde(default)]
    pub concentration: u16,

    /// Power cost; negative values are a percent of maximum mana.
    #[serde(default)]
    pub power: i32,

    /// Cast time; zero is instant.
    #[serde(default)]
    pub cast_time_ms: u32,

    /// Maximum distance to the nominal target.
    #[serde(default)]
    pub range: u32,

    /// Radius of the affected area.
    #[serde(default)]
    pub radius: u32,

    /// Cooldown after a successful cast.
    #[serde(default)]
    pub recast_delay_ms: u32,

    /// Spells sharing a non-zero group share their cooldown.
    #[serde(default)]
    pub shared_timer_group: u32,

    /// Spells sharing a non-zero group never stack on one target.
    #[serde(default)]
    pub effect_group: u32,

    /// Requires a held instrument (songs).
    #[serde(default)]
    pub instrument_required: bool,

    /// May be cast while moving.
    #[serde(default)]
    pub move_cast: bool,

    /// Attacks never interrupt the cast.
    #[serde(default)]
    pub uninterruptible: bool,

    /// Properties changed by stat effects.
    #[serde(default)]
    pub modifiers: Vec<StatModifierSpec>,

    /// Crowd control grants an immunity window on expiry.
    #[serde(default = "default_true")]
    pub grants_immunity: bool,

    /// Immunity lasts `duration × multiplier`; zero uses the configured default.
    #[serde(default)]
    pub immunity_multiplier: u32,

    /// Crowd control that skips the resist roll.
    #[serde(default)]
    pub unresistable: bool,

    /// Spell cast on the same target when this one finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_spell: Option<SpellId>,

    /// Start/expire chat lines.
    #[serde(default)]
    pub messages: EffectMessages,
}

/// Default level for spells without explicit level.
const fn default_level() -> u8 {
    1
}

const fn default_true() -> bool {
    true
}

impl SpellDefinition {
    /// Cast time of zero.
    #[must_use]
    pub const fn is_instant(&self) -> bool {
        self.cast_time_ms == 0
    }

    /// Re-executes on a timer after resolution.
    #[must_use]
    pub const fn is_pulsing(&self) -> bool {
        (self.pulse || self.focus) && self.frequency_ms > 0
    }

    /// Consumes concentration while active.
    #[must_use]
    pub const fn is_concentration(&self) -> bool {
        self.concentration > 0
    }

    /// Creates a persistent effect rather than a one-off result.
    #[must_use]
    pub fn is_durational(&self) -> bool {
        (self.duration_ms > 0 && self.target != TargetMode::Area) || self.is_concentration()
    }

    /// Helps its targets.
    #[must_use]
    pub fn has_positive_effect(&self) -> bool {
        !self.kind.is_hostile() && !self.target.is_offensive()
    }

    /// Whether this spell and `other` compete for the same stacking slot.
    ///
    /// A shared non-zero effect group always competes; otherwise only the
    /// same spell kind with the same modified properties does.
    #[must_use]
    pub fn shares_stacking_slot(&self, other: &Self) -> bool {
        if self.effect_group != 0 || other.effect_group != 0 {
            return self.effect_group == other.effect_group;
        }
        self.kind == other.kind && self.modifiers == other.modifiers
    }
}
