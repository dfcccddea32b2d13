//! Per-living effect registry.
//!
//! Ordered: effects keep the slot they were inserted into, and an overwrite
//! replaces the incumbent in place. Static markers sit alongside in their own
//! list.

use crate::components::{EffectId, EntityId, Marker, SpellId};
use crate::data::{EffectKind, SpellBook, SpellDefinition};
use crate::effects::{ActiveEffect, EffectPhase};

/// Active effects and static markers on one living.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EffectRegistry {
    effects: Vec<ActiveEffect>,
    markers: Vec<Marker>,
}

impl EffectRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of effects (markers excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Whether there are no effects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Effects in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &ActiveEffect> {
        self.effects.iter()
    }

    /// Ids in registry order.
    #[must_use]
    pub fn ids(&self) -> Vec<EffectId> {
        self.effects.iter().map(|e| e.id).collect()
    }

    /// Look up an effect.
    #[must_use]
    pub fn get(&self, id: EffectId) -> Option<&ActiveEffect> {
        self.effects.iter().find(|e| e.id == id)
    }

    /// Look up an effect mutably.
    pub fn get_mut(&mut self, id: EffectId) -> Option<&mut ActiveEffect> {
        self.effects.iter_mut().find(|e| e.id == id)
    }

    /// Slot index of an effect.
    #[must_use]
    pub fn position(&self, id: EffectId) -> Option<usize> {
        self.effects.iter().position(|e| e.id == id)
    }

    /// Append an effect.
    pub fn insert(&mut self, effect: ActiveEffect) {
        self.effects.push(effect);
    }

    /// Put `effect` in the slot held by `id`, returning the incumbent.
    pub fn replace(&mut self, id: EffectId, effect: ActiveEffect) -> Option<ActiveEffect> {
        let index = self.position(id)?;
        Some(std::mem::replace(&mut self.effects[index], effect))
    }

    /// Remove an effect, returning it.
    pub fn remove(&mut self, id: EffectId) -> Option<ActiveEffect> {
        let index = self.position(id)?;
        Some(self.effects.remove(index))
    }

    /// Effects of a given kind.
    pub fn find_by_kind(&self, kind: EffectKind) -> impl Iterator<Item = &ActiveEffect> {
        self.effects.iter().filter(move |e| e.kind == kind)
    }

    /// Effects created by one caster's spell.
    pub fn find_by_source(&self, caster: EntityId, spell: SpellId) -> impl Iterator<Item = &ActiveEffect> {
        self.effects
            .iter()
            .filter(move |e| e.caster == caster && e.spell == spell)
    }

    /// First effect competing for the same stacking slot as `spell`.
    #[must_use]
    pub fn find_overwritable(&self, spell: &SpellDefinition, book: &SpellBook) -> Option<EffectId> {
        self.effects
            .iter()
            .find(|e| {
                book.get_spell(e.spell)
                    .is_some_and(|existing| existing.shares_stacking_slot(spell))
            })
            .map(|e| e.id)
    }

    /// An active (not immunity-only) effect of the given kind exists.
    #[must_use]
    pub fn has_active(&self, kind: EffectKind) -> bool {
        self.find_by_kind(kind).any(|e| e.phase == EffectPhase::Active)
    }

    /// Stunned by an active effect.
    #[must_use]
    pub fn is_stunned(&self) -> bool {
        self.has_active(EffectKind::Stun)
    }

    /// Mesmerized by an active effect.
    #[must_use]
    pub fn is_mezzed(&self) -> bool {
        self.has_active(EffectKind::Mesmerize)
    }

    /// Add a static marker.
    pub fn add_marker(&mut self, marker: Marker) {
        if !self.markers.contains(&marker) {
            self.markers.push(marker);
        }
    }

    /// Remove a static marker. Returns whether it was present.
    pub fn remove_marker(&mut self, marker: Marker) -> bool {
        let before = self.markers.len();
        self.markers.retain(|m| *m != marker);
        before != self.markers.len()
    }

    /// Carries the given marker.
    #[must_use]
    pub fn has_marker(&self, marker: Marker) -> bool {
        self.markers.contains(&marker)
    }

    /// Static markers in insertion order.
    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.iter()
    }

    /// Livings hidden from this one by selective blindness.
    #[must_use]
    pub fn blinded_to(&self) -> Vec<EntityId> {
        self.markers
            .iter()
            .filter_map(|m| match m {
                Marker::SelectiveBlindness { source } => Some(*source),
                _ => None,
            })
            .collect()
    }
}
