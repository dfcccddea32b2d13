//! Damage, resist and hit-chance pipeline.
//!
//! Everything here is a pure function of the caster, the target, the spell
//! and the rolls drawn from a [`Roller`]. Nothing mutates health; callers
//! hand the resulting [`AttackOutcome`] to a
//! [`crate::mutation::LivingMutator`].
//!
//! The pipeline for one damaging hit:
//!
//! 1. Base damage from the authored value, capped for low-level pets and
//!    NPCs, scaled by the controller's casting stat.
//! 2. Reduced when hit chance is below 55.
//! 3. Rolled inside the variance window.
//! 4. Scaled by spell damage, effectiveness, PvP/PvE rate and magic
//!    absorption, then capped.
//! 5. Primary resists, then secondary resists on what is left.
//! 6. A critical bonus on top, never pushing the total past the cap.

use serde::{Deserialize, Serialize};

use crate::components::{DamageType, EntityId, LivingKind, Marker, Property, Realm, SpellId};
use crate::config::EngineConfig;
use crate::data::{DamageScaling, LineCategory, SpellDefinition, SpellLine};
use crate::living::Living;
use crate::math::{con_level, percent, Fixed};
use crate::rng::Roller;

/// Hit chance below which damage and duration are penalized.
pub const HIT_CHANCE_PENALTY_THRESHOLD: i32 = 55;

/// Everything the calculator reads about one cast.
#[derive(Debug, Clone, Copy)]
pub struct SpellContext<'a> {
    /// Spell being resolved.
    pub spell: &'a SpellDefinition,
    /// Line it was cast from.
    pub line: &'a SpellLine,
    /// Living casting it.
    pub caster: &'a Living,
    /// Living whose level, spec and stats drive the rolls: a pet's owner,
    /// otherwise the caster itself.
    pub controller: &'a Living,
    /// Tuning.
    pub config: &'a EngineConfig,
}

/// Verdict of a resolved hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HitResult {
    /// Landed.
    Hit,
    /// Negated by the resist roll.
    Resisted,
    /// Could not land at all (immune target).
    Missed,
}

/// Result of one damaging spell hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttackOutcome {
    /// Living that cast the spell.
    pub attacker: EntityId,
    /// Living struck.
    pub target: EntityId,
    /// Spell resolved.
    pub spell: SpellId,
    /// Damage after resists.
    pub damage: i32,
    /// Critical bonus on top of `damage`.
    pub critical_damage: i32,
    /// Resolved damage type.
    pub damage_type: DamageType,
    /// Net change applied by resists (negative reduces damage).
    pub resist_modifier: i32,
    /// Hit, resisted or missed.
    pub result: HitResult,
}

impl AttackOutcome {
    /// An outcome that dealt nothing.
    #[must_use]
    pub const fn unlanded(attacker: EntityId, target: EntityId, spell: &SpellDefinition, result: HitResult) -> Self {
        Self {
            attacker,
            target,
            spell: spell.id,
            damage: 0,
            critical_damage: 0,
            damage_type: spell.damage_type,
            resist_modifier: 0,
            result,
        }
    }

    /// Damage plus critical bonus.
    #[must_use]
    pub const fn total(&self) -> i32 {
        self.damage + self.critical_damage
    }

    /// Landed.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        matches!(self.result, HitResult::Hit)
    }
}

/// Result of one heal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HealOutcome {
    /// Amount before the critical bonus.
    pub amount: i32,
    /// Critical bonus.
    pub critical: i32,
    /// Halved because the target is diseased.
    pub diseased: bool,
}

fn trunc(value: Fixed) -> i32 {
    value.round_to_zero().to_num::<i32>()
}

fn per_mille(value: i32) -> Fixed {
    Fixed::from_num(value) / Fixed::from_num(1000)
}

// ============================================================================
// Hit and resist chances
// ============================================================================

/// Chance in percent that the spell lands; may be negative or above 100.
///
/// `85 + (spell level − target level) / 2 + to-hit bonus`, where the spell
/// level includes the controller's spell-level bonus but never exceeds the
/// controller's own level. Against uncontrolled NPCs the con difference
/// (stepped by the target's level) and the attacker count also apply.
#[must_use]
pub fn hit_chance(ctx: &SpellContext<'_>, target: &Living) -> i32 {
    let controller = ctx.controller;
    let spell_level = (i32::from(ctx.spell.level) + controller.modified(Property::SpellLevel))
        .min(i32::from(controller.level));

    let mut hit = ctx.config.base_hit_chance
        + ((spell_level - i32::from(target.level)) >> 1)
        + controller.modified(Property::ToHitBonus);

    if matches!(target.kind, LivingKind::Npc) {
        let con = con_level(target.level, controller.level);
        hit += (con * Fixed::from_num(ctx.config.pve_con_hit_percent)).to_num::<i32>();
        hit += (i32::from(target.attackers) - 1).max(0) * ctx.config.missrate_reduction_per_attacker;
    }
    hit
}

/// Chance in percent, within `[0, 100]`, that the resist roll negates the
/// spell on `target`.
#[must_use]
pub fn resist_chance(ctx: &SpellContext<'_>, target: &Living) -> i32 {
    if ctx.spell.has_positive_effect() || ctx.spell.unresistable {
        return 0;
    }

    let mut chance = 100 - hit_chance(ctx, target) + target.modified(Property::ChanceToBeMissed);
    if chance < 100 {
        let multiplier = if target.is_player() {
            ctx.config.player_resist_multiplier
        } else {
            ctx.config.living_resist_multiplier
        };
        chance = (Fixed::from_num(chance) * multiplier).to_num::<i32>();
    }
    if let Some(cap) = ctx.config.resist_soft_cap {
        if chance > cap && chance < 100 {
            chance = cap;
        }
    }
    chance.clamp(0, 100)
}

// ============================================================================
// Base damage and variance
// ============================================================================

/// Base damage for a pet cast, capped near a player nuke of the owner's level.
#[must_use]
pub fn cap_pet_damage(damage: Fixed, owner_level: u8) -> Fixed {
    let tenths = if owner_level < 13 {
        41
    } else if owner_level < 50 {
        38
    } else {
        return damage;
    };
    damage.min(Fixed::from_num(i32::from(owner_level) * tenths) / Fixed::from_num(10))
}

/// Base damage for an NPC cast, capped to its level below 50.
#[must_use]
pub fn cap_npc_damage(damage: Fixed, level: u8) -> Fixed {
    if level < 50 {
        damage.min(Fixed::from_num(i32::from(level) * 47) / Fixed::from_num(10))
    } else {
        damage
    }
}

/// Damage before hit-chance, variance and resists; at least 1.
#[must_use]
pub fn base_damage(ctx: &SpellContext<'_>) -> Fixed {
    let controller = ctx.controller;
    let mut damage = ctx.spell.damage;

    let stat = if controller.is_player() {
        if ctx.caster.is_pet() {
            damage = cap_pet_damage(damage, controller.level);
        }
        controller.casting_stat.map(|p| controller.modified(p))
    } else {
        damage = cap_npc_damage(damage, controller.level);
        Some(controller.casting_stat.map_or_else(
            || controller.modified(Property::Intelligence),
            |p| controller.modified(p),
        ))
    };

    if ctx.line.category == LineCategory::Standard {
        if let Some(stat) = stat {
            let stat = Fixed::from_num(stat);
            match ctx.line.scaling {
                DamageScaling::Caster => {
                    damage = damage * (stat + Fixed::from_num(200)) / Fixed::from_num(275);
                }
                DamageScaling::Hybrid => {
                    damage = damage * (stat + Fixed::from_num(180)) / Fixed::from_num(250);
                }
                DamageScaling::Unscaled => {}
            }
        }
    }

    damage.max(Fixed::from_num(1))
}

/// Variance window `(min, max)` applied to base damage.
///
/// Item effects never roll below 1.0 and reserved spells never vary. For
/// trained lines, specializing past the spell's level and the controller's
/// level adds a small bonus to both ends. Non-baseline lines roll at the
/// top of the window; baseline lines raise the floor with spec relative to
/// spell level and target level.
#[must_use]
pub fn damage_variance(ctx: &SpellContext<'_>, target: &Living) -> (Fixed, Fixed) {
    let quarter = Fixed::from_num(0.25);
    let mut min = quarter;
    let mut max = Fixed::from_num(1.25);

    match ctx.line.category {
        LineCategory::ItemEffects => return (Fixed::from_num(1), max),
        LineCategory::Reserved => return (max, max),
        LineCategory::Standard => {}
    }

    let controller = ctx.controller;
    let spec = i32::from(controller.spec_level(&ctx.line.spec));
    let level = i32::from(controller.level);
    let spell_level = i32::from(ctx.spell.level);

    let overspec = Fixed::from_num((level.min(spec) - spell_level).max(0)) * per_mille(5)
        + Fixed::from_num((spec - level).max(0)) * per_mille(4);
    min += overspec;
    max += overspec;

    if ctx.line.baseline {
        let trained = Fixed::from_num((spec - 1).max(0));
        let base_variance = (trained / Fixed::from_num(spell_level.max(1)) * Fixed::from_num(0.75))
            .min(Fixed::from_num(0.5));
        let level_variance = (trained / Fixed::from_num(i32::from(target.level).max(1)) * Fixed::from_num(1.25)
            - Fixed::from_num(0.75))
        .max(Fixed::ZERO);
        min = max.min(min.max(min + base_variance + level_variance));
    } else {
        min = max;
    }

    max = max.max(quarter);
    min = min.min(max).max(Fixed::ZERO);
    (min, max)
}

/// Penalize damage when hit chance is below 55; at least 1.
#[must_use]
pub fn adjust_for_hit_chance(damage: i32, hit_chance: i32, config: &EngineConfig) -> i32 {
    let mut adjusted = damage;
    if hit_chance < HIT_CHANCE_PENALTY_THRESHOLD {
        let factor = Fixed::from_num(hit_chance - HIT_CHANCE_PENALTY_THRESHOLD)
            * config.hitchance_damage_reduction_multiplier;
        adjusted += trunc(Fixed::from_num(adjusted) * factor / Fixed::from_num(100));
    } else if hit_chance > 100 {
        let factor = Fixed::from_num((hit_chance - 100).min(100)) * config.hitchance_damage_raise_multiplier;
        adjusted += trunc(Fixed::from_num(adjusted) * factor / Fixed::from_num(100));
    }
    adjusted.max(1)
}

/// Ceiling on final damage (critical bonus included): authored damage ×
/// cap multiplier × effectiveness, never below 1.
#[must_use]
pub fn damage_cap(spell: &SpellDefinition, effectiveness: Fixed, config: &EngineConfig) -> i32 {
    let cap = spell.damage * Fixed::from_num(config.damage_cap_multiplier) * effectiveness;
    trunc(cap).max(1)
}

// ============================================================================
// Resists and criticals
// ============================================================================

fn at_least_one_point(modifier: Fixed) -> Fixed {
    let one = Fixed::from_num(1);
    if modifier > Fixed::ZERO && modifier < one {
        one
    } else if modifier < Fixed::ZERO && modifier > -one {
        -one
    } else {
        modifier
    }
}

/// Net damage change from the target's resists.
///
/// Primary resists apply first, less the caster's resist pierce up to the
/// target's item resistance. Secondary resists (capped) then apply to what
/// primary resists left. Any non-zero contribution is at least one point.
#[must_use]
pub fn resist_modifier(ctx: &SpellContext<'_>, target: &Living, damage: i32) -> i32 {
    let damage_type = ctx.spell.damage_type;
    let pierce = ctx.caster.modified(Property::ResistPierce).max(0);
    let primary = target.stats.primary_resist(damage_type)
        - target.stats.item_resist(damage_type).min(pierce).max(0);
    let secondary = target
        .stats
        .secondary_resist(damage_type)
        .min(ctx.config.secondary_resist_cap);

    let hundred = Fixed::from_num(100);
    let mut modifier = at_least_one_point(Fixed::from_num(damage) * Fixed::from_num(-primary) / hundred);
    let remaining = (damage + trunc(modifier)).max(0);
    modifier += Fixed::from_num(remaining) * Fixed::from_num(-secondary) / hundred;
    trunc(at_least_one_point(modifier))
}

/// Critical bonus on already-resisted damage.
///
/// Rolls against the caster's critical chance (capped); a critical adds
/// 10% to 50% of `damage` against players and up to 100% otherwise.
pub fn critical_damage(ctx: &SpellContext<'_>, target: &Living, damage: i32, roller: &mut dyn Roller) -> i32 {
    let chance = ctx
        .caster
        .modified(Property::CriticalSpellChance)
        .min(ctx.config.max_critical_chance);
    if damage < 1 || chance <= 0 || !roller.chance(chance) {
        return 0;
    }
    let upper = if target.is_player() { damage / 2 } else { damage };
    roller.range(damage / 10, upper)
}

/// Full damage pipeline against one target that passed its resist roll.
pub fn calculate_damage(ctx: &SpellContext<'_>, target: &Living, effectiveness: Fixed, roller: &mut dyn Roller) -> AttackOutcome {
    let cap = damage_cap(ctx.spell, effectiveness, ctx.config);
    let (min_variance, max_variance) = damage_variance(ctx, target);

    let spell_damage = trunc(base_damage(ctx));
    let total = Fixed::from_num(adjust_for_hit_chance(spell_damage, hit_chance(ctx, target), ctx.config));

    let mut damage = if min_variance == max_variance {
        trunc(max_variance * total)
    } else {
        roller.range(trunc(min_variance * total), trunc(max_variance * total))
    };

    damage = trunc(Fixed::from_num(damage) * per_mille(ctx.caster.modified(Property::SpellDamage)) * effectiveness);
    let rate = if ctx.caster.realm != Realm::None && target.realm != Realm::None {
        ctx.config.pvp_damage_multiplier
    } else {
        ctx.config.pve_damage_multiplier
    };
    damage = trunc(Fixed::from_num(damage) * rate);
    let absorption = Fixed::from_num(1) - percent(target.modified(Property::MagicAbsorption));
    damage = trunc(Fixed::from_num(damage) * absorption);
    damage = damage.min(cap).max(1);

    let mut modifier = resist_modifier(ctx, target, damage);
    if damage + modifier > cap {
        modifier -= damage + modifier - cap;
    }
    damage = (damage + modifier).max(1);

    let critical = critical_damage(ctx, target, damage, roller).min((cap - damage).max(0));

    AttackOutcome {
        attacker: ctx.caster.id,
        target: target.id,
        spell: ctx.spell.id,
        damage,
        critical_damage: critical,
        damage_type: ctx.spell.damage_type,
        resist_modifier: modifier,
        result: HitResult::Hit,
    }
}

/// Effectiveness of an area spell at `distance` from its centre: full at
/// the centre, half at the edge.
#[must_use]
pub fn area_effectiveness(effectiveness: Fixed, distance: Fixed, radius: u32) -> Fixed {
    if radius == 0 {
        return effectiveness;
    }
    let falloff = distance / Fixed::from_num(radius) / Fixed::from_num(2);
    (effectiveness - falloff).max(Fixed::ZERO)
}

// ============================================================================
// Healing
// ============================================================================

/// Heal window `(min, max)` for the caster.
///
/// Negative values heal a percent of the caster's maximum health. Players
/// raise the floor with spec relative to the spell's level.
#[must_use]
pub fn heal_variance(ctx: &SpellContext<'_>) -> (i32, i32) {
    let value = Fixed::from_num(ctx.spell.value);
    match ctx.line.category {
        LineCategory::ItemEffects if ctx.spell.value > 0 => {
            return (trunc(value * Fixed::from_num(0.75)), trunc(value * Fixed::from_num(1.25)));
        }
        LineCategory::Reserved => return (ctx.spell.value, ctx.spell.value),
        _ => {}
    }

    if ctx.spell.value < 0 {
        let amount = trunc(-value / Fixed::from_num(100) * Fixed::from_num(ctx.caster.health.max));
        return (amount, amount);
    }

    let upper = trunc(value * Fixed::from_num(1.25)).max(1);
    let mut floor = Fixed::from_num(1.25);
    if ctx.caster.is_player() {
        let spec = i32::from(ctx.caster.spec_level(&ctx.line.spec)).max(1);
        floor = Fixed::from_num(0.25);
        if ctx.spell.level > 0 {
            floor = (floor + Fixed::from_num(spec - 1) / Fixed::from_num(ctx.spell.level)).min(Fixed::from_num(1.25));
        }
    }
    let lower = trunc(value * floor).max(1).min(upper);
    (lower, upper)
}

/// Roll a heal on `target`.
pub fn calculate_heal(ctx: &SpellContext<'_>, target: &Living, roller: &mut dyn Roller) -> HealOutcome {
    let (min, max) = heal_variance(ctx);
    let mut amount = if ctx.line.category == LineCategory::ItemEffects {
        max
    } else {
        roller.range(min, max)
    };

    let diseased = target.has_marker(Marker::Diseased);
    if diseased {
        amount >>= 1;
    }

    if ctx.caster.is_player() {
        let effectiveness = percent(ctx.caster.modified(Property::LivingEffectiveness))
            + percent(ctx.caster.modified(Property::HealingEffectiveness));
        amount = trunc(Fixed::from_num(amount) * effectiveness);
    }

    let chance = ctx.caster.modified(Property::CriticalHealChance);
    let critical = if amount > 0 && chance > 0 && roller.chance(chance) {
        roller.range(amount / 10, amount / 2 + 1)
    } else {
        0
    };

    HealOutcome {
        amount,
        critical,
        diseased,
    }
}
