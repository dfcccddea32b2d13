//! Spell resolution and effect lifecycle.
//!
//! Resolution expands a spell into its targets and applies it to each:
//! resist roll, then either an immediate result (damage, heal, permanent
//! stat change) or a durational effect judged against the stacking policy.
//!
//! Durational effects move `Active -> (Immune) -> removed`. Expiry and
//! cancellation share [`Zone::cancel_effect`], so a crowd-control effect
//! that is broken early still leaves its immunity window behind.

use std::sync::Arc;

use crate::casting::CastFailure;
use crate::components::{CastId, EffectId, EntityId, Marker, SpellId};
use crate::damage::{area_effectiveness, calculate_damage, calculate_heal, hit_chance, resist_chance, AttackOutcome, SpellContext};
use crate::data::{EffectKind, SpellDefinition, TargetMode};
use crate::effects::{
    crowd_control_duration, effect_duration, immunity_window, ActiveEffect, EffectPhase, EffectTrigger, StatModifier,
    Subscription,
};
use crate::error::{EngineError, Result};
use crate::living::Living;
use crate::math::Fixed;
use crate::messages::{AnimationKind, ChatCategory};
use crate::scheduler::TimerEvent;
use crate::stacking::{self, EffectOffer, StackingVerdict};
use crate::targeting::{select_targets, TargetShape};
use crate::zone::Zone;

const SPELL_CANCELLED: &str = "Your spell was cancelled.";

/// Delay until an effect's next timer: the next damage tick for
/// damage-over-time, otherwise natural expiry. `None` for unlimited
/// effects that never tick.
fn next_timer_delay(kind: EffectKind, duration_ms: u32, frequency_ms: u32, elapsed_ms: u32) -> Option<u32> {
    let remaining = (duration_ms != 0).then(|| duration_ms.saturating_sub(elapsed_ms));
    if kind == EffectKind::DamageOverTime && frequency_ms > 0 {
        return Some(remaining.map_or(frequency_ms, |r| r.min(frequency_ms)));
    }
    remaining
}

fn resolve_modifiers(spell: &SpellDefinition, effectiveness: Fixed) -> Vec<StatModifier> {
    spell
        .modifiers
        .iter()
        .map(|spec| StatModifier::resolve(spec, spell, effectiveness))
        .collect()
}

impl Zone {
    // ========================================================================
    // Resolution
    // ========================================================================

    /// Apply `spell` from `caster` to every living it selects.
    ///
    /// Returns how many livings were selected.
    pub(crate) fn start_spell(
        &mut self,
        caster_id: EntityId,
        spell_id: SpellId,
        nominal: Option<EntityId>,
        hold: Option<CastId>,
        link: Option<EffectId>,
    ) -> Result<usize> {
        let book = Arc::clone(&self.book);
        let spell = book.spell(spell_id)?;
        let line = book
            .line_of(spell_id)
            .ok_or_else(|| EngineError::SpellLineNotFound(format!("line of spell {spell_id}")))?;
        let caster = self.get(caster_id)?.clone();
        let controller = caster
            .owner()
            .and_then(|owner| self.livings.get(&owner))
            .cloned()
            .unwrap_or_else(|| caster.clone());

        let shape = self.consume_target_modifier(&caster, spell);
        let selection = select_targets(&self.livings, &caster, spell, &shape, nominal, &*self.ruleset, &mut *self.sink);
        if let Some(point) = selection.anchor {
            self.sink
                .play_effect_animation(caster_id, AnimationKind::GroundEffect { spell: spell_id, point }, true);
        }

        let config = self.config.clone();
        let ctx = SpellContext {
            spell,
            line,
            caster: &caster,
            controller: &controller,
            config: &config,
        };
        for &target_id in &selection.targets {
            let Some(target) = self.livings.get(&target_id) else {
                continue;
            };
            let effectiveness = selection.centre.map_or(Fixed::from_num(1), |centre| {
                area_effectiveness(Fixed::from_num(1), target.position.distance(centre), shape.radius)
            });
            self.apply_to_target(&ctx, target_id, effectiveness, hold, link)?;
        }

        tracing::debug!(
            caster = caster_id,
            spell = spell_id,
            targets = selection.targets.len(),
            "Spell resolved"
        );
        Ok(selection.targets.len())
    }

    /// Shape the spell resolves with, consuming a target modifier on the
    /// caster if one applies.
    fn consume_target_modifier(&mut self, caster: &Living, spell: &SpellDefinition) -> TargetShape {
        let shape = TargetShape::of(spell, caster, &self.config);
        let modifier = caster
            .effects
            .find_by_kind(EffectKind::TargetModifier)
            .filter(|e| e.phase == EffectPhase::Active)
            .find_map(|e| self.book.get_spell(e.spell).map(|s| (e.id, s.value, e.hold.is_some())));
        let Some((effect, value, sustained)) = modifier else {
            return shape;
        };
        match shape.remap(spell, value) {
            Some(remapped) => {
                if !sustained {
                    self.cancel_effect(caster.id, effect);
                }
                tracing::debug!(caster = caster.id, spell = spell.id, modifier = value, "Target modifier applied");
                remapped
            }
            None => shape,
        }
    }

    fn apply_to_target(
        &mut self,
        ctx: &SpellContext<'_>,
        target_id: EntityId,
        effectiveness: Fixed,
        hold: Option<CastId>,
        link: Option<EffectId>,
    ) -> Result<()> {
        let spell = ctx.spell;
        let target = self.get(target_id)?;
        if !target.alive && spell.target != TargetMode::Corpse {
            return Ok(());
        }

        let marker_immune = match spell.kind {
            EffectKind::Stun => target.has_marker(Marker::StunImmunity),
            EffectKind::Mesmerize => target.has_marker(Marker::MezImmunity),
            _ => false,
        };
        if marker_immune {
            let text = format!("{} is immune to this effect!", target.name);
            self.fail_on(ctx, target_id, &text);
            return Ok(());
        }
        if spell.kind == EffectKind::Mesmerize && target.effects.is_mezzed() {
            self.fail_on(ctx, target_id, "Your target is already mezzed!");
            return Ok(());
        }

        let chance = resist_chance(ctx, target);
        if chance > 0 && self.roller.chance(chance) {
            self.on_spell_resisted(ctx, target_id);
            return Ok(());
        }

        match spell.kind {
            EffectKind::DirectDamage => self.deal_damage(ctx, target_id, effectiveness),
            EffectKind::Heal => self.heal(ctx, target_id),
            _ if spell.is_durational() => self.start_durational(ctx, target_id, effectiveness, hold, link),
            EffectKind::DamageOverTime => self.deal_damage(ctx, target_id, effectiveness),
            EffectKind::StatBuff | EffectKind::StatDebuff => {
                let modifiers = resolve_modifiers(spell, effectiveness);
                let target = self
                    .livings
                    .get_mut(&target_id)
                    .ok_or(EngineError::EntityNotFound(target_id))?;
                self.mutator.apply_modifiers(target, &modifiers);
                self.sink
                    .play_effect_animation(target_id, AnimationKind::Effect { spell: spell.id }, true);
                Ok(())
            }
            EffectKind::Stun | EffectKind::Mesmerize | EffectKind::TargetModifier => {
                tracing::debug!(spell = spell.id, "Spell has no duration; nothing to apply");
                Ok(())
            }
        }
    }

    fn fail_on(&mut self, ctx: &SpellContext<'_>, target: EntityId, text: &str) {
        self.sink.notify_caster(ctx.caster.id, text, ChatCategory::SpellResisted);
        self.sink
            .play_effect_animation(target, AnimationKind::Effect { spell: ctx.spell.id }, false);
    }

    fn on_spell_resisted(&mut self, ctx: &SpellContext<'_>, target_id: EntityId) {
        let name = self.livings.get(&target_id).map(|t| t.name.clone()).unwrap_or_default();
        self.sink
            .notify_caster(ctx.caster.id, &format!("{name} resists the effect!"), ChatCategory::SpellResisted);
        self.sink
            .notify_caster(target_id, "You resist the effect!", ChatCategory::SpellResisted);
        self.sink
            .play_effect_animation(target_id, AnimationKind::Effect { spell: ctx.spell.id }, false);
        tracing::debug!(caster = ctx.caster.id, target = target_id, spell = ctx.spell.id, "Spell resisted");

        let instant_debuff = ctx.spell.duration_ms > 0 && ctx.spell.is_instant();
        if !instant_debuff {
            self.on_attacked(target_id, ctx.caster.id, false, Some(ctx.spell.id));
        }
    }

    fn deal_damage(&mut self, ctx: &SpellContext<'_>, target_id: EntityId, effectiveness: Fixed) -> Result<()> {
        let target = self
            .livings
            .get(&target_id)
            .ok_or(EngineError::EntityNotFound(target_id))?;
        let outcome = calculate_damage(ctx, target, effectiveness, &mut *self.roller);
        self.land_attack(ctx.caster, &outcome);
        Ok(())
    }

    /// Write a computed attack to its target and report it.
    fn land_attack(&mut self, caster: &Living, outcome: &AttackOutcome) {
        let Some(target) = self.livings.get_mut(&outcome.target) else {
            return;
        };
        self.mutator.apply_attack(target, outcome);
        let killed = !target.alive;
        let name = target.name.clone();

        if outcome.is_hit() {
            let modifier = match outcome.resist_modifier {
                0 => String::new(),
                m if m > 0 => format!(" (+{m})"),
                m => format!(" ({m})"),
            };
            self.sink.notify_caster(
                caster.id,
                &format!("You hit {name} for {}{modifier} damage!", outcome.damage),
                ChatCategory::YouHit,
            );
            if outcome.critical_damage > 0 {
                self.sink.notify_caster(
                    caster.id,
                    &format!("You critically hit for an additional {} damage!", outcome.critical_damage),
                    ChatCategory::YouHit,
                );
            }
            if outcome.target != caster.id {
                self.sink.notify_caster(
                    outcome.target,
                    &format!("{} hits you for {} damage!", caster.name, outcome.total()),
                    ChatCategory::YouWereHit,
                );
            }
            self.sink
                .play_effect_animation(outcome.target, AnimationKind::Effect { spell: outcome.spell }, true);
        }

        self.on_attacked(outcome.target, caster.id, outcome.is_hit(), Some(outcome.spell));
        if killed {
            self.handle_death(outcome.target);
        }
    }

    fn heal(&mut self, ctx: &SpellContext<'_>, target_id: EntityId) -> Result<()> {
        let target = self
            .livings
            .get(&target_id)
            .ok_or(EngineError::EntityNotFound(target_id))?;
        let outcome = calculate_heal(ctx, target, &mut *self.roller);
        if outcome.diseased {
            self.sink
                .notify_caster(ctx.caster.id, "Your target is diseased!", ChatCategory::SpellResisted);
        }

        let Some(target) = self.livings.get_mut(&target_id) else {
            return Ok(());
        };
        let gained = self.mutator.apply_heal(target, outcome.amount + outcome.critical);
        let name = target.name.clone();
        let caster = ctx.caster;

        if gained <= 0 {
            self.sink
                .notify_caster(caster.id, &format!("{name} is fully healed."), ChatCategory::Spell);
        } else if target_id == caster.id {
            self.sink.notify_caster(
                caster.id,
                &format!("You heal yourself for {gained} hit points!"),
                ChatCategory::Spell,
            );
        } else {
            self.sink.notify_caster(
                caster.id,
                &format!("You heal {name} for {gained} hit points!"),
                ChatCategory::Spell,
            );
            self.sink.notify_caster(
                target_id,
                &format!("You are healed by {} for {gained} hit points.", caster.name),
                ChatCategory::Spell,
            );
        }
        if gained > 0 && outcome.critical > 0 {
            self.sink.notify_caster(
                caster.id,
                &format!("Your heal criticals for an extra {} amount of hit points!", outcome.critical),
                ChatCategory::Spell,
            );
        }
        self.sink
            .play_effect_animation(target_id, AnimationKind::Effect { spell: ctx.spell.id }, true);
        Ok(())
    }

    // ========================================================================
    // Durational effects
    // ========================================================================

    fn start_durational(
        &mut self,
        ctx: &SpellContext<'_>,
        target_id: EntityId,
        effectiveness: Fixed,
        hold: Option<CastId>,
        link: Option<EffectId>,
    ) -> Result<()> {
        let now = self.now();
        let spell = ctx.spell;
        let target = self.get(target_id)?;

        let duration_ms = if spell.kind.is_crowd_control() {
            let hit = hit_chance(ctx, target);
            crowd_control_duration(spell, ctx.caster, target, hit, effectiveness, ctx.config)
        } else {
            effect_duration(spell, ctx.caster, effectiveness, ctx.config)
        };
        let offer = EffectOffer {
            spell,
            duration_ms,
            effectiveness,
        };
        let gated = target.is_player_or_pet() || ctx.config.npc_immunity;
        let verdict = stacking::judge(&target.effects, &self.book, &offer, gated, now);
        let name = target.name.clone();

        match verdict {
            StackingVerdict::RejectImmune(_) => {
                self.fail_on(ctx, target_id, &format!("{name} can't have that effect again yet!"));
                return Ok(());
            }
            StackingVerdict::RejectInferior(_) => {
                let text = if target_id == ctx.caster.id {
                    "You already have that effect. Wait until it expires. Spell failed.".to_string()
                } else {
                    format!("{name} already has that effect. Wait until it expires. Spell failed.")
                };
                self.fail_on(ctx, target_id, &text);
                return Ok(());
            }
            StackingVerdict::Insert | StackingVerdict::Overwrite(_) => {}
        }

        let applied = if spell.kind.modifies_stats() {
            resolve_modifiers(spell, effectiveness)
        } else {
            Vec::new()
        };
        let subscriptions = if spell.kind == EffectKind::Mesmerize {
            vec![Subscription::OwnerDamaged]
        } else {
            Vec::new()
        };
        let id = self.allocate_effect_id();
        let effect = ActiveEffect {
            id,
            owner: target_id,
            caster: ctx.caster.id,
            spell: spell.id,
            line: ctx.line.key.clone(),
            kind: spell.kind,
            duration_ms,
            frequency_ms: spell.frequency_ms,
            effectiveness,
            started_at: now,
            phase: EffectPhase::Active,
            timer: None,
            range_timer: None,
            applied,
            subscriptions,
            hold,
            link,
            positive: spell.has_positive_effect(),
        };

        if let StackingVerdict::Overwrite(incumbent) = verdict {
            self.overwrite_effect(target_id, incumbent, effect)?;
        } else {
            self.get_mut(target_id)?.effects.insert(effect);
        }
        self.start_effect(target_id, id, true)
    }

    /// Put `effect` into the incumbent's slot and tear the incumbent down
    /// without expiry messages or immunity.
    fn overwrite_effect(&mut self, owner: EntityId, incumbent: EffectId, effect: ActiveEffect) -> Result<()> {
        let living = self
            .livings
            .get_mut(&owner)
            .ok_or(EngineError::EntityNotFound(owner))?;
        let old = living
            .effects
            .replace(incumbent, effect)
            .ok_or(EngineError::EffectNotFound(incumbent))?;
        self.mutator.revert_modifiers(living, &old.applied);
        self.cancel_timer(old.timer);
        self.cancel_timer(old.range_timer);
        if let Some(hold) = old.hold {
            self.leave_hold(old.caster, hold, owner, old.id);
        }
        tracing::debug!(owner, old = old.id, "Effect overwritten");
        Ok(())
    }

    /// Start hook: apply stat changes, arm timers, join the concentration
    /// hold and run kind-specific behaviour. `announce` is off for restored
    /// effects.
    pub(crate) fn start_effect(&mut self, owner: EntityId, id: EffectId, announce: bool) -> Result<()> {
        let book = Arc::clone(&self.book);
        let living = self
            .livings
            .get_mut(&owner)
            .ok_or(EngineError::EntityNotFound(owner))?;
        let effect = living.effects.get(id).ok_or(EngineError::EffectNotFound(id))?;
        let (kind, spell_id, caster, hold, positive) = (effect.kind, effect.spell, effect.caster, effect.hold, effect.positive);
        let applied = effect.applied.clone();
        self.mutator.apply_modifiers(living, &applied);
        let owner_name = living.name.clone();
        let spell = book.spell(spell_id)?;

        self.arm_effect_timer(owner, id, 0);

        if let Some(hold) = hold {
            let joined = self
                .livings
                .get_mut(&caster)
                .and_then(|c| c.holds.iter_mut().find(|h| h.id == hold));
            if let Some(joined) = joined {
                joined.members.push((owner, id));
            }
            let check_ms = self.config.buff_range_check_ms;
            if positive && owner != caster && self.config.buff_range > 0 {
                let timer = self.schedule(check_ms, TimerEvent::BuffRangeCheck { owner, effect: id });
                if let Some(effect) = self.effect_mut(owner, id) {
                    effect.range_timer = Some(timer);
                }
            }
        }

        if announce {
            self.announce(owner, &owner_name, &spell.messages.on_start, &spell.messages.on_start_area, ChatCategory::Spell);
            self.sink
                .play_effect_animation(owner, AnimationKind::Effect { spell: spell_id }, true);
        }
        tracing::debug!(owner, effect = id, spell = spell_id, "Effect started");

        match kind {
            EffectKind::Stun | EffectKind::Mesmerize => {
                self.interrupt_cast(owner, CastFailure::Incapacitated);
                self.fire_trigger(EffectTrigger::CrowdControlled(owner));
            }
            EffectKind::DamageOverTime if announce => self.tick_damage(owner, id)?,
            _ => {}
        }
        Ok(())
    }

    fn effect_mut(&mut self, owner: EntityId, id: EffectId) -> Option<&mut ActiveEffect> {
        self.livings.get_mut(&owner)?.effects.get_mut(id)
    }

    fn arm_effect_timer(&mut self, owner: EntityId, id: EffectId, elapsed_ms: u32) {
        let Some(effect) = self.livings.get(&owner).and_then(|l| l.effects.get(id)) else {
            return;
        };
        let Some(delay) = next_timer_delay(effect.kind, effect.duration_ms, effect.frequency_ms, elapsed_ms) else {
            return;
        };
        let timer = self.schedule(delay, TimerEvent::EffectTick { owner, effect: id });
        if let Some(effect) = self.effect_mut(owner, id) {
            effect.timer = Some(timer);
        }
    }

    fn announce(&mut self, owner: EntityId, owner_name: &str, own: &str, area: &str, category: ChatCategory) {
        if !own.is_empty() {
            self.sink.notify_caster(owner, own, category);
        }
        if !area.is_empty() {
            let text = area.replace("{0}", owner_name);
            self.sink.notify_area(owner, &text, category, &[owner]);
        }
    }

    /// One damage-over-time hit from an effect.
    fn tick_damage(&mut self, owner: EntityId, id: EffectId) -> Result<()> {
        let book = Arc::clone(&self.book);
        let Some(effect) = self.livings.get(&owner).and_then(|l| l.effects.get(id)) else {
            return Ok(());
        };
        let (caster_id, spell_id, effectiveness) = (effect.caster, effect.spell, effect.effectiveness);
        let Some(caster) = self.livings.get(&caster_id).cloned() else {
            tracing::debug!(owner, effect = id, "Damage tick skipped; caster is gone");
            return Ok(());
        };
        let controller = caster
            .owner()
            .and_then(|o| self.livings.get(&o))
            .cloned()
            .unwrap_or_else(|| caster.clone());
        let spell = book.spell(spell_id)?;
        let line = book
            .line_of(spell_id)
            .ok_or_else(|| EngineError::SpellLineNotFound(format!("line of spell {spell_id}")))?;
        let config = self.config.clone();
        let ctx = SpellContext {
            spell,
            line,
            caster: &caster,
            controller: &controller,
            config: &config,
        };
        let target = self.livings.get(&owner).ok_or(EngineError::EntityNotFound(owner))?;
        let outcome = calculate_damage(&ctx, target, effectiveness, &mut *self.roller);
        self.land_attack(&caster, &outcome);
        Ok(())
    }

    pub(crate) fn on_effect_tick(&mut self, owner: EntityId, id: EffectId) -> Result<()> {
        let now = self.now();
        let Some(effect) = self.effect_mut(owner, id) else {
            tracing::warn!(owner, effect = id, "Tick for an effect that no longer exists");
            return Ok(());
        };
        if effect.phase != EffectPhase::Active {
            tracing::warn!(owner, effect = id, "Tick for an effect in its immunity window");
            return Ok(());
        }
        effect.timer = None;
        let elapsed = u32::try_from(now.saturating_sub(effect.started_at)).unwrap_or(u32::MAX);
        let expired = effect.duration_ms != 0 && elapsed >= effect.duration_ms;

        if expired || effect.kind != EffectKind::DamageOverTime || effect.frequency_ms == 0 {
            self.cancel_effect(owner, id);
            return Ok(());
        }
        self.arm_effect_timer(owner, id, elapsed);
        self.tick_damage(owner, id)
    }

    /// End an active effect: revert it, send expiry messages and leave its
    /// immunity window if it has one.
    ///
    /// Natural expiry and early cancellation both come through here.
    /// Returns `false` when the effect is missing or already in immunity,
    /// so cancelling twice is harmless.
    pub fn cancel_effect(&mut self, owner: EntityId, id: EffectId) -> bool {
        let now = self.now();
        let book = Arc::clone(&self.book);
        let Some(living) = self.livings.get_mut(&owner) else {
            return false;
        };
        let alive = living.alive;
        let Some(effect) = living.effects.get_mut(id) else {
            return false;
        };
        if effect.phase != EffectPhase::Active {
            return false;
        }

        let applied = std::mem::take(&mut effect.applied);
        let (timer, range_timer) = (effect.timer.take(), effect.range_timer.take());
        let (hold, caster, spell_id) = (effect.hold, effect.caster, effect.spell);
        let spell = book.get_spell(spell_id);
        let window = spell.map_or(0, |s| immunity_window(s, effect.duration_ms, &self.config));
        if window > 0 && alive {
            effect.phase = EffectPhase::Immune {
                until: now + u64::from(window),
            };
        } else {
            living.effects.remove(id);
        }
        self.mutator.revert_modifiers(living, &applied);
        let owner_name = living.name.clone();

        self.cancel_timer(timer);
        self.cancel_timer(range_timer);
        if window > 0 && alive {
            let timer = self.schedule(window, TimerEvent::ImmunityEnd { owner, effect: id });
            if let Some(effect) = self.effect_mut(owner, id) {
                effect.timer = Some(timer);
            }
        }
        if let Some(spell) = spell {
            self.announce(
                owner,
                &owner_name,
                &spell.messages.on_expire,
                &spell.messages.on_expire_area,
                ChatCategory::SpellExpires,
            );
        }
        if let Some(hold) = hold {
            self.leave_hold(caster, hold, owner, id);
        }
        tracing::debug!(owner, effect = id, spell = spell_id, immunity_ms = window, "Effect ended");
        true
    }

    pub(crate) fn on_immunity_end(&mut self, owner: EntityId, id: EffectId) -> Result<()> {
        let Some(living) = self.livings.get_mut(&owner) else {
            tracing::warn!(owner, effect = id, "Immunity end for a living that no longer exists");
            return Ok(());
        };
        match living.effects.get(id) {
            Some(effect) if effect.is_immune() => {
                living.effects.remove(id);
                tracing::debug!(owner, effect = id, "Immunity ended");
            }
            Some(_) => tracing::warn!(owner, effect = id, "Immunity end for an active effect"),
            None => tracing::warn!(owner, effect = id, "Immunity end for an effect that no longer exists"),
        }
        Ok(())
    }

    pub(crate) fn on_buff_range_check(&mut self, owner: EntityId, id: EffectId) -> Result<()> {
        let range = self.config.buff_range;
        let check_ms = self.config.buff_range_check_ms;
        let living = self.get(owner)?;
        let position = living.position;
        let Some(effect) = living.effects.get(id) else {
            tracing::warn!(owner, effect = id, "Range check for an effect that no longer exists");
            return Ok(());
        };
        if effect.phase != EffectPhase::Active {
            return Ok(());
        }
        let in_range = self
            .livings
            .get(&effect.caster)
            .is_some_and(|c| c.alive && c.position.within_radius(position, range));

        if in_range {
            let timer = self.schedule(check_ms, TimerEvent::BuffRangeCheck { owner, effect: id });
            if let Some(effect) = self.effect_mut(owner, id) {
                effect.range_timer = Some(timer);
            }
        } else {
            if let Some(effect) = self.effect_mut(owner, id) {
                effect.range_timer = None;
            }
            tracing::debug!(owner, effect = id, "Concentration effect out of range");
            self.cancel_effect(owner, id);
        }
        Ok(())
    }

    // ========================================================================
    // Concentration holds
    // ========================================================================

    fn leave_hold(&mut self, caster: EntityId, hold: CastId, owner: EntityId, effect: EffectId) {
        let joined = self
            .livings
            .get_mut(&caster)
            .and_then(|c| c.holds.iter_mut().find(|h| h.id == hold));
        if let Some(joined) = joined {
            joined.members.retain(|member| *member != (owner, effect));
        }
        self.release_hold_if_idle(caster, hold);
    }

    /// Give back a hold's concentration once no effect or pulsing link
    /// depends on it.
    pub(crate) fn release_hold_if_idle(&mut self, caster: EntityId, hold: CastId) {
        let Some(living) = self.livings.get_mut(&caster) else {
            return;
        };
        let Some(index) = living.holds.iter().position(|h| h.id == hold) else {
            return;
        };
        let linked = living.pulsing.iter().any(|l| l.hold == Some(hold));
        if linked || !living.holds[index].members.is_empty() {
            return;
        }
        let released = living.holds.remove(index);
        living.concentration.restore(i32::from(released.cost));
        tracing::debug!(caster, hold, cost = released.cost, "Concentration released");
    }

    // ========================================================================
    // Triggers and death
    // ========================================================================

    /// End every effect and pulsing link subscribed to `trigger`.
    pub(crate) fn fire_trigger(&mut self, trigger: EffectTrigger) {
        let ended: Vec<(EntityId, EffectId)> = self
            .livings
            .values()
            .flat_map(|l| l.effects.iter())
            .filter(|e| e.phase == EffectPhase::Active)
            .filter(|e| e.subscriptions.iter().any(|s| s.fires(e.owner, e.caster, e.spell, trigger)))
            .map(|e| (e.owner, e.id))
            .collect();

        let mut links = Vec::new();
        for living in self.livings.values() {
            for link in &living.pulsing {
                let owner = link.target.unwrap_or(living.id);
                let Some(subscription) = link.subscriptions.iter().find(|s| s.fires(owner, living.id, link.spell, trigger)) else {
                    continue;
                };
                let message = if link.focus {
                    let name = self.book.get_spell(link.spell).map_or("", |s| s.name.as_str());
                    subscription.focus_message(name)
                } else {
                    SPELL_CANCELLED.to_string()
                };
                links.push((living.id, link.id, message));
            }
        }

        for (owner, effect) in ended {
            self.cancel_effect(owner, effect);
        }
        for (caster, link, message) in links {
            self.end_pulsing_link(caster, link, Some(&message));
        }
    }

    /// Kill a living outright, running the same teardown as a lethal hit.
    pub fn kill(&mut self, id: EntityId) -> Result<()> {
        let living = self.get_mut(id)?;
        living.health.current = 0;
        self.handle_death(id);
        Ok(())
    }

    pub(crate) fn handle_death(&mut self, id: EntityId) {
        let Some(living) = self.livings.get_mut(&id) else {
            return;
        };
        living.alive = false;
        living.interrupt_until = 0;
        let links: Vec<EffectId> = living.pulsing.iter().map(|l| l.id).collect();
        let sustained: Vec<(EntityId, EffectId)> = living.holds.iter().flat_map(|h| h.members.iter().copied()).collect();

        self.cancel_cast(id);
        for link in links {
            self.end_pulsing_link(id, link, None);
        }
        self.fire_trigger(EffectTrigger::Died(id));

        let own = self.livings.get(&id).map(|l| l.effects.ids()).unwrap_or_default();
        for effect in own {
            if !self.cancel_effect(id, effect) {
                self.drop_effect(id, effect);
            }
        }
        for (owner, effect) in sustained {
            self.cancel_effect(owner, effect);
        }
        let holds: Vec<CastId> = self
            .livings
            .get(&id)
            .map(|l| l.holds.iter().map(|h| h.id).collect())
            .unwrap_or_default();
        for hold in holds {
            self.release_hold_if_idle(id, hold);
        }
        tracing::debug!(living = id, "Living died");
    }

    /// Remove an effect in any phase without messages.
    pub(crate) fn drop_effect(&mut self, owner: EntityId, id: EffectId) {
        let Some(living) = self.livings.get_mut(&owner) else {
            return;
        };
        let Some(effect) = living.effects.remove(id) else {
            return;
        };
        self.mutator.revert_modifiers(living, &effect.applied);
        self.cancel_timer(effect.timer);
        self.cancel_timer(effect.range_timer);
        if let Some(hold) = effect.hold {
            self.leave_hold(effect.caster, hold, owner, id);
        }
    }

    /// A player asks to remove an effect from themselves. Only helpful
    /// effects can be removed this way.
    pub fn player_cancel_effect(&mut self, owner: EntityId, id: EffectId) -> Result<bool> {
        let living = self.get(owner)?;
        let effect = living.effects.get(id).ok_or(EngineError::EffectNotFound(id))?;
        if !effect.positive || effect.is_immune() {
            self.sink
                .notify_caster(owner, "You can't remove this effect!", ChatCategory::System);
            return Ok(false);
        }
        Ok(self.cancel_effect(owner, id))
    }
}
