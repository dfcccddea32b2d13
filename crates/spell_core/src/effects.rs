//! Active effects and the values attached to them.
//!
//! An [`ActiveEffect`] is pure state: which spell made it, when it started,
//! the [`StatModifier`]s it applied and the [`Subscription`]s that end it
//! early. The start/overwrite/expire transitions that act on this state live
//! in [`crate::lifecycle`].
//!
//! # Durations
//!
//! Authored durations are scaled by the caster's `SpellDuration` bonus,
//! by instrument level/condition/quality for songs, and by effectiveness,
//! then clamped to `[1, base × max_effect_duration_factor]`. Crowd control
//! is further scaled by hit chance and the target's duration reduction.

use serde::{Deserialize, Serialize};

use crate::components::{BonusCategory, CastId, EffectId, EntityId, Property, SpellId, StatBlock};
use crate::config::EngineConfig;
use crate::data::{EffectKind, SpellDefinition, StatModifierSpec};
use crate::living::Living;
use crate::math::{percent, Fixed};
use crate::scheduler::TimerHandle;

// ============================================================================
// Stat modifiers
// ============================================================================

/// A signed change to one bonus category of one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatModifier {
    /// Property changed.
    pub property: Property,
    /// Bonus bucket.
    pub category: BonusCategory,
    /// Signed amount.
    pub magnitude: i32,
}

impl StatModifier {
    /// Resolve an authored modifier at a given effectiveness.
    ///
    /// Debuffs store a negative magnitude so apply/revert stay symmetric.
    #[must_use]
    pub fn resolve(spec: &StatModifierSpec, spell: &SpellDefinition, effectiveness: Fixed) -> Self {
        let amount = (Fixed::from_num(spell.value) * effectiveness).to_num::<i32>();
        let magnitude = if spell.kind == EffectKind::StatDebuff { -amount } else { amount };
        Self {
            property: spec.property,
            category: spec.category,
            magnitude,
        }
    }

    /// Add the change to a property table.
    pub fn apply(&self, stats: &mut StatBlock) {
        stats.add(self.property, self.category, self.magnitude);
    }

    /// Remove exactly what [`StatModifier::apply`] added.
    pub fn revert(&self, stats: &mut StatBlock) {
        stats.add(self.property, self.category, -self.magnitude);
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Something that happened in the zone that may end effects early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectTrigger {
    /// A living moved.
    Moved(EntityId),
    /// A living was attacked.
    Attacked {
        /// Living struck.
        target: EntityId,
        /// Living attacking.
        attacker: EntityId,
        /// A weapon hit or an unresisted damaging spell.
        damaging: bool,
        /// Spell the attack came from; `None` for weapon attacks.
        spell: Option<SpellId>,
    },
    /// A living died.
    Died(EntityId),
    /// A living started casting.
    CastStarting {
        /// Caster.
        caster: EntityId,
        /// Spell being started.
        spell: SpellId,
    },
    /// A living was stunned or mesmerized.
    CrowdControlled(EntityId),
}

/// Condition under which an effect or pulsing link ends itself.
///
/// Owned by the effect; dropped with it, so nothing needs unregistering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subscription {
    /// The owner takes a damaging hit.
    OwnerDamaged,
    /// The owner dies.
    OwnerDies,
    /// The caster moves.
    CasterMoves,
    /// The caster is attacked.
    CasterAttacked,
    /// The caster attacks someone.
    CasterAttacks,
    /// The caster starts a different spell.
    CasterCastsOther,
    /// The caster dies or is crowd-controlled.
    CasterIncapacitated,
}

impl Subscription {
    /// Whether `trigger` fires this subscription for an effect on `owner`
    /// created by `caster` with `spell`.
    #[must_use]
    pub fn fires(self, owner: EntityId, caster: EntityId, spell: SpellId, trigger: EffectTrigger) -> bool {
        match (self, trigger) {
            (Self::OwnerDamaged, EffectTrigger::Attacked { target, damaging, .. }) => {
                target == owner && damaging
            }
            (Self::OwnerDies, EffectTrigger::Died(id)) => id == owner,
            (Self::CasterMoves, EffectTrigger::Moved(id)) => id == caster,
            (Self::CasterAttacked, EffectTrigger::Attacked { target, .. }) => target == caster,
            (Self::CasterAttacks, EffectTrigger::Attacked { attacker, spell: by, .. }) => {
                attacker == caster && by != Some(spell)
            }
            (Self::CasterCastsOther, EffectTrigger::CastStarting { caster: c, spell: s }) => {
                c == caster && s != spell
            }
            (Self::CasterIncapacitated, EffectTrigger::Died(id) | EffectTrigger::CrowdControlled(id)) => {
                id == caster
            }
            _ => false,
        }
    }

    /// Chat line sent to the caster when a focus ends this way.
    #[must_use]
    pub fn focus_message(self, spell_name: &str) -> String {
        match self {
            Self::CasterMoves => "You move and interrupt your focus!".to_string(),
            Self::CasterAttacked => "You are being attacked and lose your focus!".to_string(),
            _ => format!("You lose your focus on your {spell_name} spell."),
        }
    }
}

/// Subscriptions a focus link holds.
#[must_use]
pub fn focus_subscriptions(spell: &SpellDefinition) -> Vec<Subscription> {
    let mut subs = vec![
        Subscription::CasterMoves,
        Subscription::CasterAttacks,
        Subscription::CasterCastsOther,
        Subscription::CasterIncapacitated,
        Subscription::OwnerDies,
    ];
    if !spell.uninterruptible {
        subs.push(Subscription::CasterAttacked);
    }
    subs
}

// ============================================================================
// Effects
// ============================================================================

/// Phase of an effect still held in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectPhase {
    /// Running; modifiers applied.
    Active,
    /// Expired; blocks reapplication until `until`.
    Immune {
        /// Zone time the window closes.
        until: u64,
    },
}

/// A durational or concentration effect attached to a living.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveEffect {
    /// Zone-unique id.
    pub id: EffectId,
    /// Living carrying the effect.
    pub owner: EntityId,
    /// Living that cast it.
    pub caster: EntityId,
    /// Originating spell.
    pub spell: SpellId,
    /// Line the spell was cast from.
    pub line: String,
    /// Behaviour tag.
    pub kind: EffectKind,
    /// Total duration; zero is unlimited.
    pub duration_ms: u32,
    /// Pulse interval; zero for no pulses.
    pub frequency_ms: u32,
    /// Strength multiplier.
    pub effectiveness: Fixed,
    /// Zone time of the last start or overwrite.
    pub started_at: u64,
    /// Running or in immunity.
    pub phase: EffectPhase,
    /// Pending tick/expiry or immunity timer.
    pub timer: Option<TimerHandle>,
    /// Pending concentration range check.
    pub range_timer: Option<TimerHandle>,
    /// Modifiers currently applied to the owner.
    pub applied: Vec<StatModifier>,
    /// Early-end conditions.
    pub subscriptions: Vec<Subscription>,
    /// Concentration hold sustaining this effect.
    pub hold: Option<CastId>,
    /// Pulsing link that produced this effect.
    pub link: Option<EffectId>,
    /// Helps its owner.
    pub positive: bool,
}

impl ActiveEffect {
    /// Milliseconds until natural expiry; `u32::MAX` for unlimited effects.
    #[must_use]
    pub fn remaining_ms(&self, now: u64) -> u32 {
        if self.duration_ms == 0 {
            return u32::MAX;
        }
        let elapsed = now.saturating_sub(self.started_at);
        u64::from(self.duration_ms).saturating_sub(elapsed) as u32
    }

    /// In its immunity window.
    #[must_use]
    pub const fn is_immune(&self) -> bool {
        matches!(self.phase, EffectPhase::Immune { .. })
    }

    /// Sustained by caster concentration.
    #[must_use]
    pub const fn is_concentration(&self) -> bool {
        self.hold.is_some()
    }
}

/// Concentration charged by one cast, released when everything it
/// sustains has ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConcentrationHold {
    /// Cast that paid for the hold.
    pub id: CastId,
    /// Spell sustained.
    pub spell: SpellId,
    /// Concentration charged.
    pub cost: u16,
    /// Effects (owner, id) and pulsing links (caster, id) still alive.
    pub members: Vec<(EntityId, EffectId)>,
}

/// A pulsing spell sustained by its caster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PulsingLink {
    /// Zone-unique id (shares the effect id space).
    pub id: EffectId,
    /// Spell re-executed on each pulse.
    pub spell: SpellId,
    /// Line it was cast from.
    pub line: String,
    /// Target at cast time.
    pub target: Option<EntityId>,
    /// Zone time the link started.
    pub started_at: u64,
    /// Pending pulse timer.
    pub timer: Option<TimerHandle>,
    /// Focus spell semantics.
    pub focus: bool,
    /// Early-end conditions.
    pub subscriptions: Vec<Subscription>,
    /// Concentration hold, if the spell costs concentration.
    pub hold: Option<CastId>,
}

// ============================================================================
// Durations
// ============================================================================

/// Duration of an effect before crowd-control adjustments.
#[must_use]
pub fn effect_duration(spell: &SpellDefinition, caster: &Living, effectiveness: Fixed, config: &EngineConfig) -> u32 {
    if spell.duration_ms == 0 {
        return 0;
    }
    let base = Fixed::from_num(spell.duration_ms);
    let mut duration = base * (Fixed::from_num(1) + percent(caster.modified(Property::SpellDuration)));

    if spell.instrument_required {
        if let Some(instrument) = caster.instrument {
            let level_ratio = (Fixed::from_num(instrument.level) / Fixed::from_num(caster.level.max(1)))
                .min(Fixed::from_num(1));
            duration *= Fixed::from_num(1) + level_ratio;
            if instrument.max_condition > 0 {
                duration *= Fixed::from_num(instrument.condition) / Fixed::from_num(instrument.max_condition);
            }
            duration *= percent(i32::from(instrument.quality));
        }
    }

    duration *= effectiveness;
    clamp_duration(duration, spell.duration_ms, config)
}

/// Duration of a stun or mesmerize.
///
/// Hit chance under 55 shortens it, over 100 lengthens it (up to 200), and
/// a hit chance of zero or less removes it entirely before the final clamp.
#[must_use]
pub fn crowd_control_duration(
    spell: &SpellDefinition,
    caster: &Living,
    target: &Living,
    hit_chance: i32,
    effectiveness: Fixed,
    config: &EngineConfig,
) -> u32 {
    let mut duration = Fixed::from_num(effect_duration(spell, caster, effectiveness, config));
    let hit = hit_chance.min(200);

    if hit <= 0 {
        duration = Fixed::ZERO;
    } else if hit < 55 {
        duration -= duration * percent(55 - hit);
    } else if hit > 100 {
        duration += duration * percent(hit - 100);
    }

    let reduction = match spell.kind {
        EffectKind::Stun => target.modified(Property::StunDurationReduction),
        EffectKind::Mesmerize => target.modified(Property::MesmerizeDurationReduction),
        _ => 100,
    };
    duration *= percent(reduction);
    clamp_duration(duration, spell.duration_ms, config)
}

fn clamp_duration(duration: Fixed, base_ms: u32, config: &EngineConfig) -> u32 {
    let max = u64::from(base_ms) * u64::from(config.max_effect_duration_factor.max(1));
    let ms = duration.max(Fixed::ZERO).to_num::<u64>();
    ms.clamp(1, max.max(1)).min(u64::from(u32::MAX)) as u32
}

/// Immunity window granted when an effect of `spell` expires.
#[must_use]
pub fn immunity_window(spell: &SpellDefinition, duration_ms: u32, config: &EngineConfig) -> u32 {
    if !spell.kind.is_crowd_control() || !spell.grants_immunity {
        return 0;
    }
    if spell.immunity_multiplier > 0 {
        duration_ms.saturating_mul(spell.immunity_multiplier)
    } else {
        config.cc_immunity_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Instrument, LivingKind};
    use crate::data::{EffectMessages, TargetMode};
    use crate::living::LivingSpawnParams;

    fn create_test_spell(kind: EffectKind, duration_ms: u32) -> SpellDefinition {
        SpellDefinition {
            id: 7,
            name: "Test Effect".to_string(),
            kind,
            target: TargetMode::Enemy,
            damage: Fixed::ZERO,
            damage_type: Default::default(),
            value: 20,
            level: 40,
            duration_ms,
            frequency_ms: 0,
            pulse: false,
            focus: false,
            pulse_power: 0,
            concentration: 0,
            power: 0,
            cast_time_ms: 0,
            range: 1500,
            radius: 0,
            recast_delay_ms: 0,
            shared_timer_group: 0,
            effect_group: 0,
            instrument_required: false,
            move_cast: false,
            uninterruptible: false,
            modifiers: vec![StatModifierSpec {
                property: Property::Strength,
                category: BonusCategory::BaseBuff,
            }],
            grants_immunity: true,
            immunity_multiplier: 0,
            unresistable: false,
            sub_spell: None,
            messages: EffectMessages::default(),
        }
    }

    fn create_test_caster() -> Living {
        Living::new(
            1,
            LivingSpawnParams {
                kind: LivingKind::Player,
                level: 50,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_modifier_apply_revert_symmetric() {
        let spell = create_test_spell(EffectKind::StatDebuff, 10_000);
        let modifier = StatModifier::resolve(&spell.modifiers[0], &spell, Fixed::from_num(0.75));
        assert_eq!(modifier.magnitude, -15);

        let mut stats = StatBlock::new();
        stats.set(Property::Strength, BonusCategory::Base, 100);
        modifier.apply(&mut stats);
        assert_eq!(stats.modified(Property::Strength), 85);
        modifier.revert(&mut stats);
        assert_eq!(stats.modified(Property::Strength), 100);
        assert_eq!(stats.get(Property::Strength, BonusCategory::BaseBuff), 0);
    }

    #[test]
    fn test_duration_scaling_and_clamp() {
        let config = EngineConfig::default();
        let spell = create_test_spell(EffectKind::StatBuff, 10_000);
        let mut caster = create_test_caster();
        let one = Fixed::from_num(1);

        assert_eq!(effect_duration(&spell, &caster, one, &config), 10_000);
        assert_eq!(effect_duration(&spell, &caster, Fixed::from_num(0.5), &config), 5000);

        caster.stats.set(Property::SpellDuration, BonusCategory::Item, 25);
        assert_eq!(effect_duration(&spell, &caster, one, &config), 12_500);

        caster.stats.set(Property::SpellDuration, BonusCategory::Item, 900);
        assert_eq!(effect_duration(&spell, &caster, one, &config), 40_000, "4x clamp");

        assert_eq!(effect_duration(&spell, &caster, Fixed::ZERO, &config), 1, "floor of 1 ms");
    }

    #[test]
    fn test_instrument_scales_songs() {
        let config = EngineConfig::default();
        let mut spell = create_test_spell(EffectKind::StatBuff, 10_000);
        spell.instrument_required = true;
        let mut caster = create_test_caster();
        caster.instrument = Some(Instrument {
            level: 25,
            condition: 50,
            max_condition: 100,
            quality: 100,
        });
        // ×1.5 for level, ×0.5 for condition
        assert_eq!(effect_duration(&spell, &caster, Fixed::from_num(1), &config), 7500);
    }

    #[test]
    fn test_crowd_control_duration_hit_scaling() {
        let config = EngineConfig::default();
        let spell = create_test_spell(EffectKind::Stun, 10_000);
        let caster = create_test_caster();
        let mut target = create_test_caster();
        let one = Fixed::from_num(1);

        assert_eq!(crowd_control_duration(&spell, &caster, &target, 85, one, &config), 10_000);
        assert_eq!(crowd_control_duration(&spell, &caster, &target, 45, one, &config), 9000);
        assert_eq!(crowd_control_duration(&spell, &caster, &target, 150, one, &config), 15_000);
        assert_eq!(crowd_control_duration(&spell, &caster, &target, 0, one, &config), 1);

        target
            .stats
            .set(Property::StunDurationReduction, BonusCategory::Base, 50);
        assert_eq!(crowd_control_duration(&spell, &caster, &target, 85, one, &config), 5000);
    }

    #[test]
    fn test_immunity_window() {
        let config = EngineConfig::default();
        let mut stun = create_test_spell(EffectKind::Stun, 9000);
        assert_eq!(immunity_window(&stun, 9000, &config), 60_000);
        stun.immunity_multiplier = 5;
        assert_eq!(immunity_window(&stun, 9000, &config), 45_000);
        stun.grants_immunity = false;
        assert_eq!(immunity_window(&stun, 9000, &config), 0);

        let buff = create_test_spell(EffectKind::StatBuff, 9000);
        assert_eq!(immunity_window(&buff, 9000, &config), 0);
    }

    #[test]
    fn test_subscription_matching() {
        let owner = 2;
        let caster = 1;
        let spell = 7;
        let hit = EffectTrigger::Attacked {
            target: owner,
            attacker: 3,
            damaging: true,
            spell: None,
        };
        assert!(Subscription::OwnerDamaged.fires(owner, caster, spell, hit));
        assert!(!Subscription::CasterAttacked.fires(owner, caster, spell, hit));

        let resisted = EffectTrigger::Attacked {
            target: owner,
            attacker: 3,
            damaging: false,
            spell: Some(9),
        };
        assert!(!Subscription::OwnerDamaged.fires(owner, caster, spell, resisted));

        let own_pulse = EffectTrigger::Attacked {
            target: owner,
            attacker: caster,
            damaging: true,
            spell: Some(spell),
        };
        assert!(!Subscription::CasterAttacks.fires(owner, caster, spell, own_pulse));
        let swing = EffectTrigger::Attacked {
            target: owner,
            attacker: caster,
            damaging: true,
            spell: None,
        };
        assert!(Subscription::CasterAttacks.fires(owner, caster, spell, swing));

        let same_spell = EffectTrigger::CastStarting { caster, spell };
        let other_spell = EffectTrigger::CastStarting { caster, spell: 8 };
        assert!(!Subscription::CasterCastsOther.fires(owner, caster, spell, same_spell));
        assert!(Subscription::CasterCastsOther.fires(owner, caster, spell, other_spell));

        assert!(Subscription::CasterIncapacitated.fires(owner, caster, spell, EffectTrigger::CrowdControlled(caster)));
        assert!(Subscription::CasterMoves.fires(owner, caster, spell, EffectTrigger::Moved(caster)));
        assert!(!Subscription::CasterMoves.fires(owner, caster, spell, EffectTrigger::Moved(owner)));
    }

    #[test]
    fn test_remaining_ms() {
        let effect = ActiveEffect {
            id: 1,
            owner: 2,
            caster: 1,
            spell: 7,
            line: "test".to_string(),
            kind: EffectKind::StatBuff,
            duration_ms: 30_000,
            frequency_ms: 0,
            effectiveness: Fixed::from_num(1),
            started_at: 1000,
            phase: EffectPhase::Active,
            timer: None,
            range_timer: None,
            applied: Vec::new(),
            subscriptions: Vec::new(),
            hold: None,
            link: None,
            positive: true,
        };
        assert_eq!(effect.remaining_ms(1000), 30_000);
        assert_eq!(effect.remaining_ms(11_000), 20_000);
        assert_eq!(effect.remaining_ms(99_000), 0);

        let unlimited = ActiveEffect { duration_ms: 0, ..effect };
        assert_eq!(unlimited.remaining_ms(99_000), u32::MAX);
    }
}
