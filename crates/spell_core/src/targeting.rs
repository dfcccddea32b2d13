//! Target validation and selection.
//!
//! A cast names at most one nominal target. Validation checks that target
//! against the spell's [`TargetMode`] before anything is charged; selection
//! expands it into the livings the spell resolves on.
//!
//! Selection is pure: it reads the zone's livings and never mutates them.
//! Consuming a target modifier effect is left to the caller, which learns
//! of it through [`TargetShape::remapped`].

use std::collections::BTreeMap;

use crate::casting::CastFailure;
use crate::components::{EntityId, Marker, Property};
use crate::config::EngineConfig;
use crate::data::{EffectKind, SpellDefinition, TargetMode};
use crate::living::Living;
use crate::math::{is_in_front, Vec2Fixed};
use crate::messages::{ChatCategory, MessageSink, NullSink};
use crate::ruleset::Ruleset;

/// Radius given to a single-target enemy spell by target modifier 2.
pub const MODIFIED_ENEMY_RADIUS: u32 = 450;

/// Extra radius target modifier 2 gives an enemy area spell.
pub const MODIFIED_ENEMY_RADIUS_BONUS: u32 = 300;

/// Arc of a cone spell authored without a radius, in degrees.
pub const DEFAULT_CONE_ANGLE: u32 = 100;

/// Targets closer than this count as in view regardless of facing.
const IN_VIEW_CLOSE_RANGE: u32 = 50;

// ============================================================================
// Shape
// ============================================================================

/// Mode, range and radius a spell resolves with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetShape {
    /// Target mode after any remap.
    pub mode: TargetMode,
    /// Range after the caster's range modifier; zero for self-centred spells.
    pub range: u32,
    /// Radius after any remap.
    pub radius: u32,
    /// A target modifier changed the authored shape.
    pub remapped: bool,
}

impl TargetShape {
    /// Authored shape of `spell` as cast by `caster`.
    #[must_use]
    pub fn of(spell: &SpellDefinition, caster: &Living, config: &EngineConfig) -> Self {
        Self {
            mode: spell.target,
            range: effective_range(spell, caster, config),
            radius: spell.radius,
            remapped: false,
        }
    }

    /// Apply a target modifier of the given value.
    ///
    /// Returns `None` when the modifier does not apply to this spell.
    ///
    /// | Value | Applies to | Becomes |
    /// |---|---|---|
    /// | 0 | realm heals | group heals |
    /// | 1 | group heals | realm heals around the target, radius = range |
    /// | 2 | enemy spells | radius 450, or +300 for area spells |
    /// | 3 | pulsing group spells | realm, radius = range |
    #[must_use]
    pub fn remap(self, spell: &SpellDefinition, modifier: i32) -> Option<Self> {
        let heal = spell.kind == EffectKind::Heal;
        let shape = match (modifier, self.mode) {
            (0, TargetMode::Realm) if heal => Self {
                mode: TargetMode::Group,
                ..self
            },
            (1, TargetMode::Group) if heal => Self {
                mode: TargetMode::Realm,
                radius: self.range,
                ..self
            },
            (2, TargetMode::Enemy) => Self {
                radius: if self.radius == 0 {
                    MODIFIED_ENEMY_RADIUS
                } else {
                    self.radius + MODIFIED_ENEMY_RADIUS_BONUS
                },
                ..self
            },
            (3, TargetMode::Group) if spell.is_pulsing() => Self {
                mode: TargetMode::Realm,
                radius: self.range,
                ..self
            },
            _ => return None,
        };
        Some(Self { remapped: true, ..shape })
    }

    /// Point-blank area: a radius around the caster with no range.
    #[must_use]
    pub const fn is_point_blank(&self) -> bool {
        self.radius > 0 && self.range == 0
    }
}

/// Spell range scaled by the caster's `SpellRange` percent, never below the
/// configured minimum. Zero-range spells stay at zero.
#[must_use]
pub fn effective_range(spell: &SpellDefinition, caster: &Living, config: &EngineConfig) -> u32 {
    if spell.range == 0 {
        return 0;
    }
    let scaled = u64::from(spell.range) * caster.modified(Property::SpellRange).max(0) as u64 / 100;
    (scaled.min(u64::from(u32::MAX)) as u32).max(config.min_spell_range)
}

// ============================================================================
// Validation
// ============================================================================

fn can_attack(ruleset: &dyn Ruleset, caster: &Living, other: &Living) -> bool {
    ruleset.is_allowed_to_attack(caster, other, true, &mut NullSink)
}

fn is_ally(ruleset: &dyn Ruleset, caster: &Living, other: &Living) -> bool {
    ruleset.is_same_realm(caster, other, true, &mut NullSink)
}

/// Whether `target` is visible to `caster` for an offensive spell.
fn in_view(caster: &Living, target: &Living) -> bool {
    caster.target_in_view
        && (is_in_front(caster.position, caster.facing, target.position, 180)
            || caster.is_within_radius(target, IN_VIEW_CLOSE_RANGE))
}

/// Check the nominal target of a cast.
///
/// Returns the target the cast proceeds with: the nominal target, the
/// caster for self-centred spells, the primary pet for pet spells cast
/// without a pet selected, or `None` for ground and cone spells.
pub fn validate_cast_target(
    livings: &BTreeMap<EntityId, Living>,
    caster: &Living,
    spell: &SpellDefinition,
    shape: &TargetShape,
    nominal: Option<EntityId>,
    ruleset: &dyn Ruleset,
) -> Result<Option<EntityId>, CastFailure> {
    match shape.mode {
        TargetMode::SelfTarget | TargetMode::Group => return Ok(Some(caster.id)),
        TargetMode::Cone => return Ok(None),
        TargetMode::Area | TargetMode::Ground => {
            let Some(point) = caster.ground_target else {
                return Err(CastFailure::NoGroundTarget);
            };
            if shape.range > 0 && !caster.position.within_radius(point, shape.range) {
                return Err(CastFailure::GroundTargetTooFar);
            }
            if !caster.ground_target_in_view {
                return Err(CastFailure::GroundTargetNotInView);
            }
            return Ok(None);
        }
        TargetMode::Enemy | TargetMode::Realm | TargetMode::Corpse if shape.is_point_blank() => {
            return Ok(Some(caster.id));
        }
        TargetMode::Pet if shape.is_point_blank() => return Ok(None),
        _ => {}
    }

    let mut target_id = nominal;
    if shape.mode == TargetMode::Pet && !nominal.is_some_and(|id| caster.pets.contains(&id)) {
        target_id = caster.pets.first().copied();
        if target_id.is_none() {
            return Err(CastFailure::NotControlled);
        }
    }

    let Some(target) = target_id.and_then(|id| livings.get(&id)).filter(|t| t.active) else {
        return Err(CastFailure::NoTarget);
    };

    if shape.mode != TargetMode::Corpse && !target.alive {
        return Err(CastFailure::TargetDead {
            name: target.name.clone(),
        });
    }
    if shape.range > 0 && !caster.is_within_radius(target, shape.range) {
        return Err(CastFailure::TooFar);
    }

    match shape.mode {
        TargetMode::Enemy => {
            if target.id == caster.id {
                return Err(CastFailure::AttackSelf);
            }
            if !in_view(caster, target) {
                return Err(CastFailure::NotInView);
            }
            if !can_attack(ruleset, caster, target) {
                return Err(if is_ally(ruleset, caster, target) {
                    CastFailure::SameRealm
                } else {
                    CastFailure::CannotAttack
                });
            }
            if caster.effects.blinded_to().contains(&target.id) {
                return Err(CastFailure::Invisible {
                    name: target.name.clone(),
                });
            }
            if spell.kind == EffectKind::DirectDamage
                && shape.radius == 0
                && target.has_marker(Marker::DamageImmunity(spell.damage_type))
            {
                return Err(CastFailure::ImmuneTarget {
                    name: target.name.clone(),
                });
            }
        }
        TargetMode::Corpse => {
            if target.alive || !is_ally(ruleset, caster, target) {
                return Err(CastFailure::CorpseOnly);
            }
        }
        TargetMode::Realm => {
            if can_attack(ruleset, caster, target) || !is_ally(ruleset, caster, target) {
                return Err(CastFailure::RealmOnly);
            }
            if target.id != caster.id && !caster.target_in_view {
                return Err(CastFailure::NotVisible);
            }
        }
        _ => {}
    }
    Ok(Some(target.id))
}

// ============================================================================
// Selection
// ============================================================================

/// Livings a resolved spell applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    /// Affected livings, in resolution order.
    pub targets: Vec<EntityId>,
    /// Point area effectiveness falls off from; `None` for no falloff.
    pub centre: Option<Vec2Fixed>,
    /// Ground point a ground spell is anchored at.
    pub anchor: Option<Vec2Fixed>,
}

struct Selector<'a> {
    livings: &'a BTreeMap<EntityId, Living>,
    caster: &'a Living,
    spell: &'a SpellDefinition,
    ruleset: &'a dyn Ruleset,
    hidden: Vec<EntityId>,
    targets: Vec<EntityId>,
}

impl<'a> Selector<'a> {
    fn present(&self) -> impl Iterator<Item = &'a Living> + 'a {
        self.livings.values().filter(|l| l.alive && l.active)
    }

    fn push(&mut self, id: EntityId) {
        if !self.targets.contains(&id) {
            self.targets.push(id);
        }
    }

    fn attackable(&self, other: &Living) -> bool {
        can_attack(self.ruleset, self.caster, other)
    }

    fn friendly(&self, other: &Living) -> bool {
        is_ally(self.ruleset, self.caster, other)
    }

    /// Hostile livings within `radius` of `centre`.
    fn enemies_around(&mut self, centre: Vec2Fixed, radius: u32) {
        let found: Vec<EntityId> = self
            .present()
            .filter(|l| l.position.within_radius(centre, radius) && self.attackable(l))
            .map(|l| l.id)
            .collect();
        for id in found {
            self.push(id);
        }
    }

    /// Same-realm livings within `radius` of `centre`.
    fn allies_around(&mut self, centre: Vec2Fixed, radius: u32) {
        let found: Vec<EntityId> = self
            .present()
            .filter(|l| l.position.within_radius(centre, radius) && self.friendly(l))
            .map(|l| l.id)
            .collect();
        for id in found {
            self.push(id);
        }
    }

    /// A living and its primary pet, if that pet is within `range` of it.
    fn with_pets(&mut self, member: &Living, range: u32) {
        self.push(member.id);
        let primary = member.pets.first().and_then(|id| self.livings.get(id));
        if let Some(pet) = primary.filter(|p| p.alive && p.active && member.is_within_radius(p, range)) {
            self.push(pet.id);
        }
    }

    fn centre_of(&self, nominal: Option<&Living>, shape: &TargetShape) -> Vec2Fixed {
        match nominal {
            Some(target) if shape.range > 0 => target.position,
            _ => self.caster.position,
        }
    }

    fn select(&mut self, shape: &TargetShape, nominal: Option<&'a Living>) -> (Option<Vec2Fixed>, Option<Vec2Fixed>) {
        let caster = self.caster;
        match shape.mode {
            TargetMode::SelfTarget | TargetMode::Realm if shape.radius > 0 => {
                let centre = self.centre_of(nominal, shape);
                self.allies_around(centre, shape.radius);
                return (Some(centre), None);
            }
            TargetMode::SelfTarget => self.push(caster.id),
            TargetMode::Realm => {
                if let Some(target) = nominal.filter(|t| t.alive && self.friendly(t)) {
                    self.push(target.id);
                }
            }
            TargetMode::Enemy if shape.radius > 0 => {
                let Some(target) = nominal else {
                    return (None, None);
                };
                let centre = if shape.range == 0 { caster.position } else { target.position };
                self.enemies_around(centre, shape.radius);
                // the nominal target resolves last
                if let Some(index) = self.targets.iter().position(|id| *id == target.id) {
                    let id = self.targets.remove(index);
                    self.targets.push(id);
                }
                return (Some(centre), None);
            }
            TargetMode::Enemy => {
                if let Some(target) = nominal.filter(|t| t.alive && t.active && self.attackable(t)) {
                    self.push(target.id);
                }
            }
            TargetMode::Group => {
                let range = if self.spell.range > 0 { shape.range } else { shape.radius };
                match caster.group {
                    None => self.with_pets(caster, range),
                    Some(group) => {
                        let members: Vec<&Living> = self
                            .present()
                            .filter(|l| l.group == Some(group) && caster.is_within_radius(l, range))
                            .collect();
                        for member in members {
                            self.with_pets(member, range);
                        }
                    }
                }
            }
            TargetMode::Pet => {
                let pets: Vec<&Living> = caster
                    .pets
                    .iter()
                    .filter_map(|id| self.livings.get(id))
                    .filter(|p| p.alive && p.active)
                    .collect();
                if shape.is_point_blank() {
                    for pet in pets.iter().filter(|p| caster.is_within_radius(p, shape.radius)) {
                        self.push(pet.id);
                    }
                    return (Some(caster.position), None);
                }
                let primary = nominal
                    .filter(|n| caster.pets.contains(&n.id))
                    .or_else(|| pets.first().copied())
                    .filter(|p| shape.range == 0 || caster.is_within_radius(p, shape.range));
                if let Some(primary) = primary {
                    self.push(primary.id);
                    if shape.radius > 0 {
                        for pet in pets.iter().filter(|p| primary.is_within_radius(p, shape.radius)) {
                            self.push(pet.id);
                        }
                        return (Some(primary.position), None);
                    }
                }
            }
            TargetMode::Area => {
                let Some(point) = caster.ground_target else {
                    return (None, None);
                };
                self.enemies_around(point, shape.radius);
                return (Some(point), None);
            }
            TargetMode::Cone => {
                let angle = if self.spell.radius == 0 { DEFAULT_CONE_ANGLE } else { self.spell.radius };
                let found: Vec<EntityId> = self
                    .present()
                    .filter(|l| l.id != caster.id && caster.is_within_radius(l, shape.range))
                    .filter(|l| is_in_front(caster.position, caster.facing, l.position, angle))
                    .filter(|l| self.attackable(l))
                    .map(|l| l.id)
                    .collect();
                for id in found {
                    self.push(id);
                }
            }
            TargetMode::Corpse => {
                if let Some(target) = nominal.filter(|t| !t.alive && is_ally(self.ruleset, caster, t)) {
                    self.push(target.id);
                }
            }
            TargetMode::Ground => return (None, caster.ground_target),
        }
        (None, None)
    }
}

/// Expand a cast's target into the livings it applies to.
///
/// Livings hidden from the caster by selective blindness are dropped with
/// an "invisible" notice, and damaging offensive spells skip livings immune
/// to their damage type.
pub fn select_targets(
    livings: &BTreeMap<EntityId, Living>,
    caster: &Living,
    spell: &SpellDefinition,
    shape: &TargetShape,
    nominal: Option<EntityId>,
    ruleset: &dyn Ruleset,
    sink: &mut dyn MessageSink,
) -> Selection {
    let mut selector = Selector {
        livings,
        caster,
        spell,
        ruleset,
        hidden: caster.effects.blinded_to(),
        targets: Vec::new(),
    };
    let nominal = nominal.and_then(|id| livings.get(&id));
    let (centre, anchor) = selector.select(shape, nominal);

    let Selector { hidden, mut targets, .. } = selector;
    targets.retain(|id| {
        if !hidden.contains(id) {
            return true;
        }
        if let Some(living) = livings.get(id) {
            sink.notify_caster(caster.id, &format!("{} is invisible to you!", living.name), ChatCategory::System);
        }
        false
    });

    if spell.kind.is_damaging() && shape.mode.is_offensive() {
        let immunity = Marker::DamageImmunity(spell.damage_type);
        targets.retain(|id| livings.get(id).is_some_and(|l| !l.has_marker(immunity)));
    }

    Selection {
        targets,
        centre: if shape.radius > 0 { centre } else { None },
        anchor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{DamageType, LivingKind, Realm};
    use crate::data::EffectMessages;
    use crate::living::LivingSpawnParams;
    use crate::math::Fixed;
    use crate::messages::RecordingSink;
    use crate::ruleset::RealmRuleset;

    fn create_test_spell(kind: EffectKind, target: TargetMode, range: u32, radius: u32) -> SpellDefinition {
        SpellDefinition {
            id: 1,
            name: "Test Spell".to_string(),
            kind,
            target,
            damage: Fixed::from_num(50),
            damage_type: DamageType::Heat,
            value: 30,
            level: 20,
            duration_ms: 0,
            frequency_ms: 0,
            pulse: false,
            focus: false,
            pulse_power: 0,
            concentration: 0,
            power: 10,
            cast_time_ms: 2000,
            range,
            radius,
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

    fn spawn(livings: &mut BTreeMap<EntityId, Living>, id: EntityId, realm: Realm, x: i32) {
        let living = Living::new(
            id,
            LivingSpawnParams {
                name: format!("Living{id}"),
                kind: LivingKind::Player,
                realm,
                level: 40,
                position: Vec2Fixed::from_ints(x, 0),
                ..Default::default()
            },
        );
        livings.insert(id, living);
    }

    /// Caster 1 (Albion) at the origin facing +x.
    fn create_test_zone() -> BTreeMap<EntityId, Living> {
        let mut livings = BTreeMap::new();
        spawn(&mut livings, 1, Realm::Albion, 0);
        livings
    }

    fn shape(spell: &SpellDefinition, livings: &BTreeMap<EntityId, Living>) -> TargetShape {
        TargetShape::of(spell, &livings[&1], &EngineConfig::default())
    }

    fn select(livings: &BTreeMap<EntityId, Living>, spell: &SpellDefinition, nominal: Option<EntityId>) -> Selection {
        let mut sink = RecordingSink::new();
        select_targets(livings, &livings[&1], spell, &shape(spell, livings), nominal, &RealmRuleset, &mut sink)
    }

    fn validate(
        livings: &BTreeMap<EntityId, Living>,
        spell: &SpellDefinition,
        nominal: Option<EntityId>,
    ) -> Result<Option<EntityId>, CastFailure> {
        validate_cast_target(livings, &livings[&1], spell, &shape(spell, livings), nominal, &RealmRuleset)
    }

    #[test]
    fn test_effective_range_floor_and_modifier() {
        let livings = create_test_zone();
        let config = EngineConfig::default();
        let mut caster = livings[&1].clone();
        let spell = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 1500, 0);
        assert_eq!(effective_range(&spell, &caster, &config), 1500);

        caster.stats.add(Property::SpellRange, crate::components::BonusCategory::Item, 10);
        assert_eq!(effective_range(&spell, &caster, &config), 1650);

        let short = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 10, 0);
        assert_eq!(effective_range(&short, &caster, &config), 32);

        let pbae = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 0, 350);
        assert_eq!(effective_range(&pbae, &caster, &config), 0);
    }

    #[test]
    fn test_area_selects_everything_in_radius() {
        let mut livings = create_test_zone();
        for (id, x) in [(2, 1000), (3, 1250), (4, 1500), (5, 1501)] {
            spawn(&mut livings, id, Realm::Midgard, x);
        }
        spawn(&mut livings, 6, Realm::Albion, 1100);
        if let Some(caster) = livings.get_mut(&1) {
            caster.ground_target = Some(Vec2Fixed::from_ints(1000, 0));
        }

        let spell = create_test_spell(EffectKind::DirectDamage, TargetMode::Area, 1500, 500);
        let selection = select(&livings, &spell, None);
        assert_eq!(selection.targets, vec![2, 3, 4], "allies and out-of-radius livings are skipped");
        assert_eq!(selection.centre, Some(Vec2Fixed::from_ints(1000, 0)));
    }

    #[test]
    fn test_enemy_area_moves_nominal_target_last() {
        let mut livings = create_test_zone();
        for (id, x) in [(2, 600), (3, 700), (4, 800)] {
            spawn(&mut livings, id, Realm::Hibernia, x);
        }
        let spell = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 1500, 300);
        let selection = select(&livings, &spell, Some(3));
        assert_eq!(selection.targets, vec![2, 4, 3]);
        assert_eq!(selection.centre, Some(Vec2Fixed::from_ints(700, 0)));
    }

    #[test]
    fn test_single_enemy_needs_attackable_target() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Midgard, 500);
        spawn(&mut livings, 3, Realm::Albion, 500);
        let spell = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 1500, 0);
        assert_eq!(select(&livings, &spell, Some(2)).targets, vec![2]);
        assert!(select(&livings, &spell, Some(3)).targets.is_empty());
        assert!(select(&livings, &spell, None).targets.is_empty());
    }

    #[test]
    fn test_selective_blindness_hides_source() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Midgard, 100);
        spawn(&mut livings, 3, Realm::Midgard, 200);
        if let Some(caster) = livings.get_mut(&1) {
            caster.effects.add_marker(Marker::SelectiveBlindness { source: 2 });
        }
        let spell = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 1500, 500);
        let mut sink = RecordingSink::new();
        let selection = select_targets(
            &livings,
            &livings[&1],
            &spell,
            &shape(&spell, &livings),
            Some(3),
            &RealmRuleset,
            &mut sink,
        );
        assert_eq!(selection.targets, vec![3]);
        assert!(sink.received(1, "Living2 is invisible to you!"));
    }

    #[test]
    fn test_damage_immunity_excluded_from_offensive_areas() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Midgard, 100);
        spawn(&mut livings, 3, Realm::Midgard, 200);
        if let Some(target) = livings.get_mut(&2) {
            target.effects.add_marker(Marker::DamageImmunity(DamageType::Heat));
        }
        let spell = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 1500, 500);
        assert_eq!(select(&livings, &spell, Some(3)).targets, vec![3]);

        let mut cold = spell.clone();
        cold.damage_type = DamageType::Cold;
        assert_eq!(select(&livings, &cold, Some(3)).targets, vec![2, 3]);
    }

    #[test]
    fn test_cone_uses_arc_and_range() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Midgard, 300);
        spawn(&mut livings, 3, Realm::Midgard, -300);
        spawn(&mut livings, 4, Realm::Midgard, 900);
        let spell = create_test_spell(EffectKind::DirectDamage, TargetMode::Cone, 500, 0);
        let selection = select(&livings, &spell, None);
        assert_eq!(selection.targets, vec![2]);
        assert_eq!(selection.centre, None);
    }

    #[test]
    fn test_group_includes_members_and_pets_in_range() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Albion, 400);
        spawn(&mut livings, 3, Realm::Albion, 5000);
        spawn(&mut livings, 4, Realm::Albion, 450);
        spawn(&mut livings, 5, Realm::Albion, 200);
        for id in [1, 2, 3] {
            if let Some(l) = livings.get_mut(&id) {
                l.group = Some(7);
            }
        }
        if let Some(pet) = livings.get_mut(&4) {
            pet.kind = LivingKind::Pet { owner: 2 };
        }
        if let Some(owner) = livings.get_mut(&2) {
            owner.pets.push(4);
        }

        let spell = create_test_spell(EffectKind::Heal, TargetMode::Group, 0, 1500);
        assert_eq!(select(&livings, &spell, None).targets, vec![1, 2, 4]);

        if let Some(caster) = livings.get_mut(&1) {
            caster.group = None;
        }
        assert_eq!(select(&livings, &spell, None).targets, vec![1], "ungrouped casters affect themselves");
    }

    #[test]
    fn test_group_takes_only_the_primary_pet() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Albion, 100);
        spawn(&mut livings, 3, Realm::Albion, 150);
        for id in [2, 3] {
            if let Some(pet) = livings.get_mut(&id) {
                pet.kind = LivingKind::Pet { owner: 1 };
            }
        }
        if let Some(caster) = livings.get_mut(&1) {
            caster.pets = vec![2, 3];
        }

        let spell = create_test_spell(EffectKind::StatBuff, TargetMode::Group, 0, 1500);
        assert_eq!(select(&livings, &spell, None).targets, vec![1, 2]);

        if let Some(primary) = livings.get_mut(&2) {
            primary.position = Vec2Fixed::from_ints(4000, 0);
        }
        assert_eq!(
            select(&livings, &spell, None).targets,
            vec![1],
            "a distant primary pet is not replaced by the next one"
        );
    }

    #[test]
    fn test_friendly_areas_need_the_same_realm() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Albion, 100);
        spawn(&mut livings, 3, Realm::Midgard, 100);
        spawn(&mut livings, 4, Realm::None, 100);
        if let Some(peaceful) = livings.get_mut(&3) {
            peaceful.peaceful = true;
        }

        let aura = create_test_spell(EffectKind::StatBuff, TargetMode::Realm, 0, 300);
        assert_eq!(
            select(&livings, &aura, None).targets,
            vec![1, 2],
            "peaceful livings of another realm are not allies"
        );

        let single = create_test_spell(EffectKind::StatBuff, TargetMode::Realm, 1000, 0);
        assert!(select(&livings, &single, Some(3)).targets.is_empty());
        assert_eq!(select(&livings, &single, Some(2)).targets, vec![2]);
    }

    #[test]
    fn test_self_radius_selects_allies_around_caster() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Albion, 100);
        spawn(&mut livings, 3, Realm::Midgard, 100);
        let spell = create_test_spell(EffectKind::StatBuff, TargetMode::SelfTarget, 0, 300);
        assert_eq!(select(&livings, &spell, None).targets, vec![1, 2]);

        let single = create_test_spell(EffectKind::StatBuff, TargetMode::SelfTarget, 0, 0);
        assert_eq!(select(&livings, &single, Some(3)).targets, vec![1]);
    }

    #[test]
    fn test_pet_selection() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Albion, 100);
        spawn(&mut livings, 3, Realm::Albion, 250);
        for id in [2, 3] {
            if let Some(pet) = livings.get_mut(&id) {
                pet.kind = LivingKind::Pet { owner: 1 };
            }
        }
        if let Some(caster) = livings.get_mut(&1) {
            caster.pets = vec![2, 3];
        }

        let single = create_test_spell(EffectKind::StatBuff, TargetMode::Pet, 1000, 0);
        assert_eq!(select(&livings, &single, None).targets, vec![2], "primary pet by default");
        assert_eq!(select(&livings, &single, Some(3)).targets, vec![3]);

        let around_caster = create_test_spell(EffectKind::StatBuff, TargetMode::Pet, 0, 200);
        assert_eq!(select(&livings, &around_caster, None).targets, vec![2]);

        let around_pet = create_test_spell(EffectKind::StatBuff, TargetMode::Pet, 1000, 200);
        assert_eq!(select(&livings, &around_pet, Some(2)).targets, vec![2, 3]);
    }

    #[test]
    fn test_corpse_and_ground() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Albion, 100);
        spawn(&mut livings, 3, Realm::Midgard, 100);
        for id in [2, 3] {
            if let Some(l) = livings.get_mut(&id) {
                l.alive = false;
            }
        }
        let rez = create_test_spell(EffectKind::Heal, TargetMode::Corpse, 1000, 0);
        assert_eq!(select(&livings, &rez, Some(2)).targets, vec![2]);
        assert!(select(&livings, &rez, Some(3)).targets.is_empty());

        if let Some(caster) = livings.get_mut(&1) {
            caster.ground_target = Some(Vec2Fixed::from_ints(40, 40));
        }
        let wall = create_test_spell(EffectKind::StatBuff, TargetMode::Ground, 1000, 0);
        let selection = select(&livings, &wall, None);
        assert!(selection.targets.is_empty());
        assert_eq!(selection.anchor, Some(Vec2Fixed::from_ints(40, 40)));
    }

    #[test]
    fn test_target_modifier_remaps() {
        let livings = create_test_zone();
        let heal = create_test_spell(EffectKind::Heal, TargetMode::Realm, 2000, 0);
        let base = shape(&heal, &livings);

        let group = base.remap(&heal, 0).expect("realm heal becomes group");
        assert_eq!(group.mode, TargetMode::Group);
        assert!(group.remapped);
        assert!(base.remap(&heal, 2).is_none(), "enemy modifier ignores heals");

        let group_heal = create_test_spell(EffectKind::Heal, TargetMode::Group, 2000, 0);
        let realm = shape(&group_heal, &livings).remap(&group_heal, 1).expect("group heal becomes realm");
        assert_eq!((realm.mode, realm.radius), (TargetMode::Realm, 2000));

        let bolt = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 1500, 0);
        assert_eq!(shape(&bolt, &livings).remap(&bolt, 2).map(|s| s.radius), Some(450));
        let ball = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 1500, 250);
        assert_eq!(shape(&ball, &livings).remap(&ball, 2).map(|s| s.radius), Some(550));

        let mut chant = create_test_spell(EffectKind::StatBuff, TargetMode::Group, 1000, 0);
        assert!(shape(&chant, &livings).remap(&chant, 3).is_none());
        chant.pulse = true;
        chant.frequency_ms = 5000;
        assert_eq!(shape(&chant, &livings).remap(&chant, 3).map(|s| s.mode), Some(TargetMode::Realm));
    }

    #[test]
    fn test_validate_enemy_target() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Midgard, 1000);
        spawn(&mut livings, 3, Realm::Albion, 1000);
        spawn(&mut livings, 4, Realm::Midgard, 3000);
        spawn(&mut livings, 5, Realm::Midgard, -1000);
        let bolt = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 1500, 0);

        assert_eq!(validate(&livings, &bolt, Some(2)), Ok(Some(2)));
        assert_eq!(validate(&livings, &bolt, None), Err(CastFailure::NoTarget));
        assert_eq!(validate(&livings, &bolt, Some(1)), Err(CastFailure::AttackSelf));
        assert_eq!(validate(&livings, &bolt, Some(3)), Err(CastFailure::SameRealm));
        assert_eq!(validate(&livings, &bolt, Some(4)), Err(CastFailure::TooFar));
        assert_eq!(validate(&livings, &bolt, Some(5)), Err(CastFailure::NotInView));

        if let Some(target) = livings.get_mut(&2) {
            target.alive = false;
        }
        assert_eq!(
            validate(&livings, &bolt, Some(2)),
            Err(CastFailure::TargetDead {
                name: "Living2".to_string()
            })
        );
    }

    #[test]
    fn test_validate_damage_immunity_for_single_target_bolts() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Midgard, 1000);
        if let Some(target) = livings.get_mut(&2) {
            target.effects.add_marker(Marker::DamageImmunity(DamageType::Heat));
        }
        let bolt = create_test_spell(EffectKind::DirectDamage, TargetMode::Enemy, 1500, 0);
        assert_eq!(
            validate(&livings, &bolt, Some(2)),
            Err(CastFailure::ImmuneTarget {
                name: "Living2".to_string()
            })
        );
    }

    #[test]
    fn test_validate_realm_and_ground() {
        let mut livings = create_test_zone();
        spawn(&mut livings, 2, Realm::Midgard, 500);
        spawn(&mut livings, 3, Realm::Albion, 500);
        let heal = create_test_spell(EffectKind::Heal, TargetMode::Realm, 2000, 0);
        assert_eq!(validate(&livings, &heal, Some(3)), Ok(Some(3)));
        assert_eq!(validate(&livings, &heal, Some(2)), Err(CastFailure::RealmOnly));

        let storm = create_test_spell(EffectKind::DirectDamage, TargetMode::Area, 1500, 350);
        assert_eq!(validate(&livings, &storm, None), Err(CastFailure::NoGroundTarget));
        if let Some(caster) = livings.get_mut(&1) {
            caster.ground_target = Some(Vec2Fixed::from_ints(2000, 0));
        }
        assert_eq!(validate(&livings, &storm, None), Err(CastFailure::GroundTargetTooFar));
        if let Some(caster) = livings.get_mut(&1) {
            caster.ground_target = Some(Vec2Fixed::from_ints(1000, 0));
            caster.ground_target_in_view = false;
        }
        assert_eq!(validate(&livings, &storm, None), Err(CastFailure::GroundTargetNotInView));
    }

    #[test]
    fn test_validate_pet_spell_without_pet() {
        let livings = create_test_zone();
        let spell = create_test_spell(EffectKind::StatBuff, TargetMode::Pet, 1000, 0);
        assert_eq!(validate(&livings, &spell, None), Err(CastFailure::NotControlled));
    }
}
