//! Test fixtures and helpers.
//!
//! Canned spells and a small zone builder for consistent testing.

use fixed::types::I32F32;
use spell_core::components::{DamageType, LivingKind, Realm};
use spell_core::config::EngineConfig;
use spell_core::data::{DamageScaling, EffectKind, EffectMessages, LineCategory, SpellBook, SpellDefinition, SpellLine, TargetMode};
use spell_core::living::{Living, LivingSpawnParams};
use spell_core::math::Vec2Fixed;
use spell_core::messages::RecordingSink;
use spell_core::rng::ScriptedRoller;
use spell_core::zone::Zone;

/// Line key every fixture spell is filed under.
pub const TEST_LINE: &str = "test_magic";

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real engine code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// A plain spell: level 50, instant, free, range 1500, no duration.
#[must_use]
pub fn spell(id: u32, kind: EffectKind, target: TargetMode) -> SpellDefinition {
    SpellDefinition {
        id,
        name: format!("Test Spell {id}"),
        kind,
        target,
        damage: I32F32::ZERO,
        damage_type: DamageType::Heat,
        value: 0,
        level: 50,
        duration_ms: 0,
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
        modifiers: Vec::new(),
        grants_immunity: true,
        immunity_multiplier: 0,
        unresistable: false,
        sub_spell: None,
        messages: EffectMessages::default(),
    }
}

/// 100-damage heat bolt with a 3 second cast costing 20 power.
#[must_use]
pub fn bolt(id: u32) -> SpellDefinition {
    SpellDefinition {
        name: "Fire Bolt".to_string(),
        damage: fixed(100),
        cast_time_ms: 3000,
        power: 20,
        ..spell(id, EffectKind::DirectDamage, TargetMode::Enemy)
    }
}

/// 9 second stun with a 5x immunity window.
#[must_use]
pub fn stun(id: u32) -> SpellDefinition {
    SpellDefinition {
        name: "Stun".to_string(),
        duration_ms: 9000,
        immunity_multiplier: 5,
        unresistable: true,
        ..spell(id, EffectKind::Stun, TargetMode::Enemy)
    }
}

/// Strength buff of `value` lasting `duration_ms`, in effect group 1.
#[must_use]
pub fn strength_buff(id: u32, value: i32, duration_ms: u32) -> SpellDefinition {
    use spell_core::components::{BonusCategory, Property};
    use spell_core::data::StatModifierSpec;
    SpellDefinition {
        name: format!("Strength {value}"),
        value,
        duration_ms,
        effect_group: 1,
        modifiers: vec![StatModifierSpec {
            property: Property::Strength,
            category: BonusCategory::BaseBuff,
        }],
        ..spell(id, EffectKind::StatBuff, TargetMode::Realm)
    }
}

/// Put spells into a single baseline line.
#[must_use]
pub fn line(spells: Vec<SpellDefinition>) -> SpellLine {
    SpellLine {
        key: TEST_LINE.to_string(),
        name: "Test Magic".to_string(),
        spec: "test".to_string(),
        baseline: true,
        category: LineCategory::Standard,
        scaling: DamageScaling::Caster,
        spells,
    }
}

/// Build a book from one line of spells.
///
/// # Panics
///
/// Panics if two spells share an id.
#[must_use]
pub fn book(spells: Vec<SpellDefinition>) -> SpellBook {
    SpellBook::from_lines([line(spells)]).expect("fixture spell ids are unique")
}

/// A zone with a recording sink, for scenario tests.
#[derive(Debug)]
pub struct TestWorld {
    /// The zone under test.
    pub zone: Zone,
    /// Shared handle to everything the zone sent.
    pub sink: RecordingSink,
}

impl TestWorld {
    /// Zone over `spells` with a roller that fails every chance and rolls
    /// every range low.
    #[must_use]
    pub fn new(spells: Vec<SpellDefinition>) -> Self {
        Self::with(spells, ScriptedRoller::new(), EngineConfig::default())
    }

    /// Zone over `spells` with a chosen roller and config.
    #[must_use]
    pub fn with(spells: Vec<SpellDefinition>, roller: ScriptedRoller, config: EngineConfig) -> Self {
        let sink = RecordingSink::new();
        let zone = Zone::new(book(spells))
            .with_config(config)
            .with_roller(roller)
            .with_sink(sink.clone());
        Self { zone, sink }
    }

    /// Spawn a player with 1000 health, 500 power and 100 concentration.
    pub fn player(&mut self, name: &str, realm: Realm, level: u8) -> spell_core::components::EntityId {
        self.zone.spawn(LivingSpawnParams {
            name: name.to_string(),
            kind: LivingKind::Player,
            realm,
            level,
            max_health: 1000,
            max_mana: 500,
            max_concentration: 100,
            ..Default::default()
        })
    }

    /// Spawn an unaligned creature with 1000 health.
    pub fn npc(&mut self, name: &str, level: u8) -> spell_core::components::EntityId {
        self.zone.spawn(LivingSpawnParams {
            name: name.to_string(),
            kind: LivingKind::Npc,
            realm: Realm::None,
            level,
            max_health: 1000,
            max_mana: 500,
            ..Default::default()
        })
    }

    /// Move a living without going through the movement path.
    ///
    /// # Panics
    ///
    /// Panics if the living does not exist.
    pub fn place(&mut self, id: spell_core::components::EntityId, x: i32, y: i32) {
        self.zone.living_mut(id).expect("living exists").position = Vec2Fixed::from_ints(x, y);
    }

    /// Look up a living.
    ///
    /// # Panics
    ///
    /// Panics if the living does not exist.
    #[must_use]
    pub fn living(&self, id: spell_core::components::EntityId) -> &Living {
        self.zone.living(id).expect("living exists")
    }

    /// Chat lines sent to a living.
    #[must_use]
    pub fn messages_to(&self, id: spell_core::components::EntityId) -> Vec<String> {
        self.sink.messages_to(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_helpers() {
        assert_eq!(fixed(3) + fixed(4), fixed(7));
        assert_eq!(fixed_f(0.5) * fixed(4), fixed(2));
    }

    #[test]
    fn test_world_spawns_into_zone() {
        let mut world = TestWorld::new(vec![bolt(1), stun(2)]);
        let caster = world.player("Caster", Realm::Albion, 50);
        let target = world.npc("Goblin", 50);
        world.place(target, 500, 0);
        assert_eq!(world.living(caster).mana.current, 500);
        assert_eq!(world.living(target).position, Vec2Fixed::from_ints(500, 0));
        assert_eq!(world.zone.book().len(), 2);
    }
}
