//! Stacking policy: whether an offered effect may replace the incumbent.
//!
//! The checks run in a fixed priority order and the first that decides wins:
//!
//! 1. An incumbent in its immunity window rejects the offer outright when
//!    the owner is gated (players and pets always, NPCs per config).
//! 2. A concentration incumbent is never replaced.
//! 3. Damage and value, each scaled by effectiveness, must not drop.
//! 4. Unless the incumbent is in immunity or the offer is a focus spell,
//!    the offer must last at least as long as the incumbent has left. An
//!    unlimited incumbent never yields; an exact tie is accepted.

use crate::components::EffectId;
use crate::data::{SpellBook, SpellDefinition};
use crate::effects::ActiveEffect;
use crate::math::Fixed;
use crate::registry::EffectRegistry;

/// An effect offered to a target.
#[derive(Debug, Clone, Copy)]
pub struct EffectOffer<'a> {
    /// Spell offering the effect.
    pub spell: &'a SpellDefinition,
    /// Final duration after scaling; zero is unlimited.
    pub duration_ms: u32,
    /// Strength multiplier.
    pub effectiveness: Fixed,
}

/// Outcome of judging an offer against a target's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackingVerdict {
    /// Nothing competes; add a new effect.
    Insert,
    /// Replace the given incumbent in place.
    Overwrite(EffectId),
    /// The incumbent's immunity window blocks the offer.
    RejectImmune(EffectId),
    /// The offer is not better than the incumbent.
    RejectInferior(EffectId),
}

impl StackingVerdict {
    /// The offer will not be applied.
    #[must_use]
    pub const fn is_rejected(self) -> bool {
        matches!(self, Self::RejectImmune(_) | Self::RejectInferior(_))
    }
}

/// Judge `offer` against whatever shares its stacking slot in `registry`.
///
/// `gated` says whether immunity windows apply to this owner.
#[must_use]
pub fn judge(registry: &EffectRegistry, book: &SpellBook, offer: &EffectOffer<'_>, gated: bool, now: u64) -> StackingVerdict {
    let Some(incumbent) = registry
        .find_overwritable(offer.spell, book)
        .and_then(|id| registry.get(id))
    else {
        return StackingVerdict::Insert;
    };
    // find_overwritable only matches effects whose spell is in the book
    let Some(incumbent_spell) = book.get_spell(incumbent.spell) else {
        return StackingVerdict::Insert;
    };
    let id = incumbent.id;

    if incumbent.is_immune() && gated {
        return StackingVerdict::RejectImmune(id);
    }
    if is_better(incumbent, incumbent_spell, offer, now) {
        StackingVerdict::Overwrite(id)
    } else {
        StackingVerdict::RejectInferior(id)
    }
}

/// Checks 2–4 of the policy.
#[must_use]
pub fn is_better(incumbent: &ActiveEffect, incumbent_spell: &SpellDefinition, offer: &EffectOffer<'_>, now: u64) -> bool {
    if incumbent.is_concentration() || incumbent_spell.is_concentration() {
        return false;
    }

    let old_damage = incumbent_spell.damage * incumbent.effectiveness;
    let new_damage = offer.spell.damage * offer.effectiveness;
    if new_damage < old_damage {
        return false;
    }

    let old_value = Fixed::from_num(incumbent_spell.value) * incumbent.effectiveness;
    let new_value = Fixed::from_num(offer.spell.value) * offer.effectiveness;
    if new_value < old_value {
        return false;
    }

    if incumbent.is_immune() || offer.spell.focus {
        return true;
    }
    if incumbent.duration_ms == 0 {
        return false;
    }
    offer.duration_ms == 0 || offer.duration_ms >= incumbent.remaining_ms(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BonusCategory, Property};
    use crate::data::{EffectKind, EffectMessages, SpellLine, StatModifierSpec, TargetMode};
    use crate::effects::EffectPhase;
    use proptest::prelude::*;

    fn create_test_buff(id: u32, value: i32, duration_ms: u32) -> SpellDefinition {
        SpellDefinition {
            id,
            name: format!("Strength {id}"),
            kind: EffectKind::StatBuff,
            target: TargetMode::Realm,
            damage: Fixed::ZERO,
            damage_type: Default::default(),
            value,
            level: 20,
            duration_ms,
            frequency_ms: 0,
            pulse: false,
            focus: false,
            pulse_power: 0,
            concentration: 0,
            power: 5,
            cast_time_ms: 2000,
            range: 1000,
            radius: 0,
            recast_delay_ms: 0,
            shared_timer_group: 0,
            effect_group: 4,
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

    fn create_test_book(spells: Vec<SpellDefinition>) -> SpellBook {
        SpellBook::from_lines([SpellLine {
            key: "enhancements".to_string(),
            name: "Enhancements".to_string(),
            spec: "enhance".to_string(),
            baseline: true,
            category: Default::default(),
            scaling: Default::default(),
            spells,
        }])
        .expect("test book is valid")
    }

    fn create_incumbent(spell: &SpellDefinition, duration_ms: u32, started_at: u64) -> ActiveEffect {
        ActiveEffect {
            id: 100,
            owner: 2,
            caster: 1,
            spell: spell.id,
            line: "enhancements".to_string(),
            kind: spell.kind,
            duration_ms,
            frequency_ms: 0,
            effectiveness: Fixed::from_num(1),
            started_at,
            phase: EffectPhase::Active,
            timer: None,
            range_timer: None,
            applied: Vec::new(),
            subscriptions: Vec::new(),
            hold: None,
            link: None,
            positive: true,
        }
    }

    fn offer(spell: &SpellDefinition, duration_ms: u32) -> EffectOffer<'_> {
        EffectOffer {
            spell,
            duration_ms,
            effectiveness: Fixed::from_num(1),
        }
    }

    #[test]
    fn test_empty_registry_inserts() {
        let spell = create_test_buff(1, 20, 30_000);
        let book = create_test_book(vec![spell.clone()]);
        let registry = EffectRegistry::new();
        assert_eq!(judge(&registry, &book, &offer(&spell, 30_000), true, 0), StackingVerdict::Insert);
    }

    #[test]
    fn test_shorter_offer_rejected() {
        let old = create_test_buff(1, 20, 60_000);
        let new = create_test_buff(2, 20, 20_000);
        let book = create_test_book(vec![old.clone(), new.clone()]);
        let mut registry = EffectRegistry::new();
        // 30 s remaining at t=30s
        registry.insert(create_incumbent(&old, 60_000, 0));

        let verdict = judge(&registry, &book, &offer(&new, 20_000), true, 30_000);
        assert_eq!(verdict, StackingVerdict::RejectInferior(100));
    }

    #[test]
    fn test_equal_remaining_duration_overwrites() {
        let old = create_test_buff(1, 20, 60_000);
        let new = create_test_buff(2, 20, 30_000);
        let book = create_test_book(vec![old.clone(), new.clone()]);
        let mut registry = EffectRegistry::new();
        registry.insert(create_incumbent(&old, 60_000, 0));

        assert_eq!(
            judge(&registry, &book, &offer(&new, 30_000), true, 30_000),
            StackingVerdict::Overwrite(100)
        );
    }

    #[test]
    fn test_weaker_value_rejected_even_if_longer() {
        let old = create_test_buff(1, 20, 10_000);
        let new = create_test_buff(2, 15, 600_000);
        let book = create_test_book(vec![old.clone(), new.clone()]);
        let mut registry = EffectRegistry::new();
        registry.insert(create_incumbent(&old, 10_000, 0));

        assert!(judge(&registry, &book, &offer(&new, 600_000), true, 0).is_rejected());
    }

    #[test]
    fn test_concentration_incumbent_never_replaced() {
        let mut old = create_test_buff(1, 10, 0);
        old.concentration = 10;
        let new = create_test_buff(2, 50, 600_000);
        let book = create_test_book(vec![old.clone(), new.clone()]);
        let mut registry = EffectRegistry::new();
        let mut incumbent = create_incumbent(&old, 0, 0);
        incumbent.hold = Some(9);
        registry.insert(incumbent);

        assert_eq!(
            judge(&registry, &book, &offer(&new, 600_000), true, 0),
            StackingVerdict::RejectInferior(100)
        );
    }

    #[test]
    fn test_unlimited_incumbent_yields_only_to_focus() {
        let old = create_test_buff(1, 20, 0);
        let mut new = create_test_buff(2, 20, 30_000);
        let book = create_test_book(vec![old.clone(), new.clone()]);
        let mut registry = EffectRegistry::new();
        registry.insert(create_incumbent(&old, 0, 0));

        assert!(judge(&registry, &book, &offer(&new, 30_000), true, 0).is_rejected());
        new.focus = true;
        assert_eq!(
            judge(&registry, &book, &offer(&new, 30_000), true, 0),
            StackingVerdict::Overwrite(100)
        );
    }

    #[test]
    fn test_focus_offer_skips_remaining_time_check() {
        let old = create_test_buff(1, 20, 60_000);
        let mut new = create_test_buff(2, 20, 10_000);
        let book = create_test_book(vec![old.clone(), new.clone()]);
        let mut registry = EffectRegistry::new();
        registry.insert(create_incumbent(&old, 60_000, 0));

        assert!(judge(&registry, &book, &offer(&new, 10_000), true, 5_000).is_rejected());
        new.focus = true;
        assert_eq!(
            judge(&registry, &book, &offer(&new, 10_000), true, 5_000),
            StackingVerdict::Overwrite(100)
        );
    }

    #[test]
    fn test_immunity_gates_before_better_check() {
        let mut stun = create_test_buff(1, 0, 9000);
        stun.kind = EffectKind::Stun;
        stun.modifiers.clear();
        let book = create_test_book(vec![stun.clone()]);
        let mut registry = EffectRegistry::new();
        let mut incumbent = create_incumbent(&stun, 9000, 0);
        incumbent.phase = EffectPhase::Immune { until: 69_000 };
        registry.insert(incumbent);

        assert_eq!(
            judge(&registry, &book, &offer(&stun, 9000), true, 20_000),
            StackingVerdict::RejectImmune(100)
        );
        // ungated owners skip the duration check while the incumbent is immune
        assert_eq!(
            judge(&registry, &book, &offer(&stun, 1), false, 20_000),
            StackingVerdict::Overwrite(100)
        );
    }

    proptest! {
        #[test]
        fn prop_equal_magnitude_keeps_longest(
            old_duration in 1u32..600_000,
            elapsed in 0u64..600_000,
            new_duration in 1u32..600_000,
        ) {
            let old = create_test_buff(1, 20, old_duration);
            let new = create_test_buff(2, 20, new_duration);
            let book = create_test_book(vec![old.clone(), new.clone()]);
            let mut registry = EffectRegistry::new();
            registry.insert(create_incumbent(&old, old_duration, 0));

            let remaining = u64::from(old_duration).saturating_sub(elapsed);
            let verdict = judge(&registry, &book, &offer(&new, new_duration), true, elapsed);
            if u64::from(new_duration) >= remaining {
                prop_assert_eq!(verdict, StackingVerdict::Overwrite(100));
            } else {
                prop_assert_eq!(verdict, StackingVerdict::RejectInferior(100));
            }
        }

        #[test]
        fn prop_immune_incumbent_always_blocks_gated_owner(
            value in -50i32..500,
            duration in 0u32..600_000,
            now in 0u64..1_000_000,
        ) {
            let old = create_test_buff(1, 20, 9000);
            let new = create_test_buff(2, value, duration);
            let book = create_test_book(vec![old.clone(), new.clone()]);
            let mut registry = EffectRegistry::new();
            let mut incumbent = create_incumbent(&old, 9000, 0);
            incumbent.phase = EffectPhase::Immune { until: u64::MAX };
            registry.insert(incumbent);

            prop_assert_eq!(
                judge(&registry, &book, &offer(&new, duration), true, now),
                StackingVerdict::RejectImmune(100)
            );
        }
    }
}
