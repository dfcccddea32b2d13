//! The entity facade: everything the engine reads from or writes to an actor.

use std::collections::BTreeMap;

use crate::components::{
    BonusCategory, CastId, EntityId, GroupId, Instrument, LivingKind, Marker, Pool, Property, Realm,
    SpellId, StatBlock,
};
use crate::effects::{ConcentrationHold, PulsingLink};
use crate::math::Vec2Fixed;
use crate::registry::EffectRegistry;

/// A player, NPC or pet taking part in spell combat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Living {
    /// Unique id.
    pub id: EntityId,
    /// Display name used in chat lines.
    pub name: String,
    /// Player, NPC or pet.
    pub kind: LivingKind,
    /// Allegiance.
    pub realm: Realm,
    /// Character level.
    pub level: u8,
    /// World position.
    pub position: Vec2Fixed,
    /// Unit heading vector.
    pub facing: Vec2Fixed,
    /// Not dead.
    pub alive: bool,
    /// Present in the world.
    pub active: bool,
    /// Never attacks or is attacked.
    pub peaceful: bool,
    /// Hit points.
    pub health: Pool,
    /// Power.
    pub mana: Pool,
    /// Endurance.
    pub endurance: Pool,
    /// Concentration budget.
    pub concentration: Pool,
    /// Property table.
    pub stats: StatBlock,
    /// Stat that scales spell damage; `None` for unscaled casters.
    pub casting_stat: Option<Property>,
    /// Specialization levels by key.
    pub specs: BTreeMap<String, u8>,
    /// Group membership.
    pub group: Option<GroupId>,
    /// Controlled creatures, primary first.
    pub pets: Vec<EntityId>,
    /// Currently moving.
    pub moving: bool,
    /// Currently sitting.
    pub sitting: bool,
    /// Held instrument.
    pub instrument: Option<Instrument>,
    /// Ground target point.
    pub ground_target: Option<Vec2Fixed>,
    /// Line of sight to the current target.
    pub target_in_view: bool,
    /// Line of sight to the ground target.
    pub ground_target_in_view: bool,
    /// Active effects and static markers.
    pub effects: EffectRegistry,
    /// Concentration charged for sustained effects.
    pub holds: Vec<ConcentrationHold>,
    /// Pulsing spells this living sustains.
    pub pulsing: Vec<PulsingLink>,
    /// Simultaneous pulsing spells allowed.
    pub max_pulsing: u8,
    /// Casting is blocked until this zone time.
    pub interrupt_until: u64,
    /// Spell cooldowns: spell id to ready time.
    pub disabled_spells: BTreeMap<SpellId, u64>,
    /// Number of livings currently attacking this one.
    pub attackers: u16,
    /// Cast in progress.
    pub current_cast: Option<CastId>,
}

/// Parameters for spawning a living.
#[derive(Debug, Clone)]
pub struct LivingSpawnParams {
    /// Display name.
    pub name: String,
    /// Player, NPC or pet.
    pub kind: LivingKind,
    /// Allegiance; pets inherit their owner's.
    pub realm: Realm,
    /// Character level.
    pub level: u8,
    /// World position.
    pub position: Vec2Fixed,
    /// Unit heading vector.
    pub facing: Vec2Fixed,
    /// Maximum hit points.
    pub max_health: i32,
    /// Maximum power.
    pub max_mana: i32,
    /// Maximum concentration.
    pub max_concentration: i32,
    /// Stat that scales spell damage.
    pub casting_stat: Option<Property>,
    /// Group membership.
    pub group: Option<GroupId>,
}

impl Default for LivingSpawnParams {
    fn default() -> Self {
        Self {
            name: "living".to_string(),
            kind: LivingKind::Npc,
            realm: Realm::None,
            level: 1,
            position: Vec2Fixed::ZERO,
            facing: Vec2Fixed::from_ints(1, 0),
            max_health: 100,
            max_mana: 100,
            max_concentration: 0,
            casting_stat: None,
            group: None,
        }
    }
}

impl Living {
    /// Build a living from spawn parameters.
    #[must_use]
    pub fn new(id: EntityId, params: LivingSpawnParams) -> Self {
        Self {
            id,
            name: params.name,
            kind: params.kind,
            realm: params.realm,
            level: params.level,
            position: params.position,
            facing: params.facing,
            alive: true,
            active: true,
            peaceful: false,
            health: Pool::full(params.max_health),
            mana: Pool::full(params.max_mana),
            endurance: Pool::full(100),
            concentration: Pool::full(params.max_concentration),
            stats: StatBlock::new(),
            casting_stat: params.casting_stat,
            specs: BTreeMap::new(),
            group: params.group,
            pets: Vec::new(),
            moving: false,
            sitting: false,
            instrument: None,
            ground_target: None,
            target_in_view: true,
            ground_target_in_view: true,
            effects: EffectRegistry::new(),
            holds: Vec::new(),
            pulsing: Vec::new(),
            max_pulsing: 1,
            interrupt_until: 0,
            disabled_spells: BTreeMap::new(),
            attackers: 0,
            current_cast: None,
        }
    }

    /// Player character.
    #[must_use]
    pub const fn is_player(&self) -> bool {
        matches!(self.kind, LivingKind::Player)
    }

    /// Controlled creature.
    #[must_use]
    pub const fn is_pet(&self) -> bool {
        matches!(self.kind, LivingKind::Pet { .. })
    }

    /// Player or player-controlled creature; immunity windows always apply.
    #[must_use]
    pub const fn is_player_or_pet(&self) -> bool {
        self.is_player() || self.is_pet()
    }

    /// Controlling living of a pet.
    #[must_use]
    pub const fn owner(&self) -> Option<EntityId> {
        match self.kind {
            LivingKind::Pet { owner } => Some(owner),
            _ => None,
        }
    }

    /// Live stat query across all bonus categories.
    #[must_use]
    pub fn modified(&self, property: Property) -> i32 {
        self.stats.modified(property)
    }

    /// Set an intrinsic property value.
    pub fn set_base(&mut self, property: Property, value: i32) {
        self.stats.set(property, BonusCategory::Base, value);
    }

    /// Specialization level for a line's spec key; NPCs train everything
    /// to two thirds of their level.
    #[must_use]
    pub fn spec_level(&self, spec: &str) -> u8 {
        if self.is_player() {
            self.specs.get(spec).copied().unwrap_or(1)
        } else {
            (u16::from(self.level) * 2 / 3 + 1).min(u16::from(u8::MAX)) as u8
        }
    }

    /// A cast is in progress.
    #[must_use]
    pub const fn is_casting(&self) -> bool {
        self.current_cast.is_some()
    }

    /// Carries the given static marker.
    #[must_use]
    pub fn has_marker(&self, marker: Marker) -> bool {
        self.effects.has_marker(marker)
    }

    /// Whether an attack recently landed, blocking new casts.
    #[must_use]
    pub const fn is_being_interrupted(&self, now: u64) -> bool {
        self.interrupt_until > now
    }

    /// Milliseconds left on a spell's cooldown.
    #[must_use]
    pub fn cooldown_remaining(&self, spell: SpellId, now: u64) -> u64 {
        self.disabled_spells
            .get(&spell)
            .map_or(0, |ready| ready.saturating_sub(now))
    }

    /// Concentration spent on holds.
    #[must_use]
    pub fn used_concentration(&self) -> i32 {
        self.holds.iter().map(|h| i32::from(h.cost)).sum()
    }

    /// Within `radius` of another living.
    #[must_use]
    pub fn is_within_radius(&self, other: &Self, radius: u32) -> bool {
        self.position.within_radius(other.position, radius)
    }
}
