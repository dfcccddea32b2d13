//! Health and stat writes.
//!
//! The calculator and lifecycle only compute values; every write to a
//! target's health or property table goes through a [`LivingMutator`].
//! Embedders that track aggro, damage logs or death rewards wrap or replace
//! [`DirectMutator`].

use crate::damage::AttackOutcome;
use crate::effects::StatModifier;
use crate::living::Living;

/// Applies computed outcomes to livings.
pub trait LivingMutator {
    /// Remove health for a landed hit, returning what was removed. A
    /// target left with no health must be marked dead.
    fn apply_attack(&mut self, target: &mut Living, outcome: &AttackOutcome) -> i32;

    /// Restore health, returning what was gained.
    fn apply_heal(&mut self, target: &mut Living, amount: i32) -> i32;

    /// Add an effect's stat changes.
    fn apply_modifiers(&mut self, target: &mut Living, modifiers: &[StatModifier]);

    /// Remove exactly what [`LivingMutator::apply_modifiers`] added.
    fn revert_modifiers(&mut self, target: &mut Living, modifiers: &[StatModifier]);
}

/// Writes straight to the living's pools and property table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectMutator;

impl LivingMutator for DirectMutator {
    fn apply_attack(&mut self, target: &mut Living, outcome: &AttackOutcome) -> i32 {
        if !outcome.is_hit() || !target.alive {
            return 0;
        }
        let taken = target.health.drain(outcome.total());
        if target.health.current <= 0 {
            target.alive = false;
        }
        taken
    }

    fn apply_heal(&mut self, target: &mut Living, amount: i32) -> i32 {
        if !target.alive {
            return 0;
        }
        target.health.restore(amount)
    }

    fn apply_modifiers(&mut self, target: &mut Living, modifiers: &[StatModifier]) {
        for modifier in modifiers {
            modifier.apply(&mut target.stats);
        }
    }

    fn revert_modifiers(&mut self, target: &mut Living, modifiers: &[StatModifier]) {
        for modifier in modifiers {
            modifier.revert(&mut target.stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BonusCategory, DamageType, Property};
    use crate::damage::HitResult;
    use crate::living::LivingSpawnParams;

    fn create_test_living() -> Living {
        Living::new(
            2,
            LivingSpawnParams {
                max_health: 100,
                ..Default::default()
            },
        )
    }

    fn hit(damage: i32, critical: i32, result: HitResult) -> AttackOutcome {
        AttackOutcome {
            attacker: 1,
            target: 2,
            spell: 9,
            damage,
            critical_damage: critical,
            damage_type: DamageType::Cold,
            resist_modifier: 0,
            result,
        }
    }

    #[test]
    fn test_attack_drains_health_and_kills() {
        let mut target = create_test_living();
        let mut mutator = DirectMutator;
        assert_eq!(mutator.apply_attack(&mut target, &hit(30, 10, HitResult::Hit)), 40);
        assert_eq!(target.health.current, 60);
        assert!(target.alive);

        assert_eq!(mutator.apply_attack(&mut target, &hit(500, 0, HitResult::Hit)), 60);
        assert!(!target.alive);
        assert_eq!(mutator.apply_attack(&mut target, &hit(5, 0, HitResult::Hit)), 0);
    }

    #[test]
    fn test_unlanded_attack_does_nothing() {
        let mut target = create_test_living();
        assert_eq!(DirectMutator.apply_attack(&mut target, &hit(30, 0, HitResult::Resisted)), 0);
        assert_eq!(target.health.current, 100);
    }

    #[test]
    fn test_heal_caps_at_max() {
        let mut target = create_test_living();
        target.health.current = 70;
        assert_eq!(DirectMutator.apply_heal(&mut target, 50), 30);
        assert!(target.health.is_full());
    }

    #[test]
    fn test_modifiers_round_trip() {
        let mut target = create_test_living();
        let modifiers = [
            StatModifier {
                property: Property::Strength,
                category: BonusCategory::BaseBuff,
                magnitude: 25,
            },
            StatModifier {
                property: Property::Dexterity,
                category: BonusCategory::Debuff,
                magnitude: -12,
            },
        ];
        let mut mutator = DirectMutator;
        mutator.apply_modifiers(&mut target, &modifiers);
        assert_eq!(target.modified(Property::Strength), 25);
        assert_eq!(target.modified(Property::Dexterity), -12);
        mutator.revert_modifiers(&mut target, &modifiers);
        assert_eq!(target.modified(Property::Strength), 0);
        assert_eq!(target.modified(Property::Dexterity), 0);
    }
}
