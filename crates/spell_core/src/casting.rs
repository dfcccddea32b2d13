//! Cast sequence controller.
//!
//! A cast moves through fixed checkpoints:
//!
//! ```text
//! request ─▶ begin checks ─▶ stage 0 ─▶ stage 1 ─▶ stage 2 ─▶ resolve ─▶ settle ─▶ done
//!                │             │           │
//!                ▼             ▼           ▼
//!             rejected      interrupted / aborted
//! ```
//!
//! The cast time is split into three slices. The checks that ran when the
//! cast began are re-run at the end of the first and second slice; the
//! third slice ends in resolution. Movement and incoming attacks can
//! interrupt a cast only during the first two slices, and nothing can stop
//! the settle step that follows resolution. Instant casts go straight from
//! the begin checks to resolution.
//!
//! Power, concentration and cooldowns are charged in exactly one place,
//! [`Zone::finish_cast`], so a cast that never resolves costs nothing.

use std::sync::Arc;

use thiserror::Error;

use crate::components::{CastId, EffectId, EntityId, Marker, Property, SpellId};
use crate::config::EngineConfig;
use crate::data::{EffectKind, LineCategory, SpellDefinition, SpellLine};
use crate::effects::{focus_subscriptions, ConcentrationHold, EffectTrigger, PulsingLink, Subscription};
use crate::error::{EngineError, Result};
use crate::living::Living;
use crate::math::{con_level, Fixed, Vec2Fixed};
use crate::messages::{AnimationKind, ChatCategory};
use crate::scheduler::{TimerEvent, TimerHandle};
use crate::targeting::{validate_cast_target, TargetShape};
use crate::zone::Zone;

/// Chat line for a pulse that ran out of power.
pub const PULSE_OUT_OF_POWER: &str = "You do not have enough mana and your spell was cancelled.";

// ============================================================================
// Invocation state
// ============================================================================

/// Where a cast is in its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastPhase {
    /// Inside one of the three timed slices (0, 1 or 2).
    Casting {
        /// Current slice.
        stage: u8,
    },
    /// Resolved; waiting out the settle step.
    Settling,
}

/// One attempted cast.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CastInvocation {
    /// Zone-unique id.
    pub id: CastId,
    /// Living casting.
    pub caster: EntityId,
    /// Spell being cast.
    pub spell: SpellId,
    /// Line the spell belongs to.
    pub line: String,
    /// Target fixed when the cast began.
    pub target: Option<EntityId>,
    /// Progress.
    pub phase: CastPhase,
    /// Pending stage or settle timer.
    pub timer: Option<TimerHandle>,
    /// Cast time after modifiers.
    pub cast_time_ms: u32,
    /// Length of each slice.
    pub stages: [u32; 3],
    /// Power charged on resolution.
    pub power_cost: i32,
    /// Cast instantly through the quick-cast marker.
    pub quickcast: bool,
    /// Zone time the cast began.
    pub started_at: u64,
}

impl CastInvocation {
    /// Movement and attacks may still interrupt.
    #[must_use]
    pub const fn is_interruptible(&self) -> bool {
        matches!(self.phase, CastPhase::Casting { stage } if stage < 2)
    }
}

/// Why a cast was refused or stopped.
///
/// `Display` is the exact chat line sent to the caster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CastFailure {
    /// Another cast is in progress.
    #[error("You are already casting a spell!")]
    AlreadyCasting,
    /// Caster is dead.
    #[error("You are dead and can't cast!")]
    Dead,
    /// Caster is stunned.
    #[error("You can't cast while stunned!")]
    Stunned,
    /// Caster is mesmerized.
    #[error("You can't cast while mesmerized!")]
    Mezzed,
    /// Caster carries the silence marker.
    #[error("You are silenced and cannot cast a spell right now!")]
    Silenced,
    /// Caster is phase-shifted.
    #[error("You're phaseshifted and can't cast a spell!")]
    Phaseshifted,
    /// Song without an instrument.
    #[error("You are not wielding an instrument!")]
    NoInstrument,
    /// Caster is sitting.
    #[error("You can't cast while sitting!")]
    Sitting,
    /// Caster is moving and the spell needs stillness.
    #[error("You must be standing still to cast this spell!")]
    Moving,
    /// Recently attacked.
    #[error("You are interrupted and must wait {seconds} seconds to cast a spell!")]
    Interrupted {
        /// Whole seconds left, rounded up.
        seconds: u64,
    },
    /// Spell on cooldown.
    #[error("You must wait {seconds} seconds to use this spell!")]
    Cooldown {
        /// Whole seconds left, rounded up.
        seconds: u64,
    },
    /// No usable target.
    #[error("You must select a target for this spell!")]
    NoTarget,
    /// Ground spell without a ground target.
    #[error("You must select a ground target for this spell!")]
    NoGroundTarget,
    /// Ground target beyond range.
    #[error("Your ground target is out of range. Select a closer target.")]
    GroundTargetTooFar,
    /// Ground target out of sight.
    #[error("Your ground target is not in view!")]
    GroundTargetNotInView,
    /// Target is dead.
    #[error("{name} is dead!")]
    TargetDead {
        /// Target's name.
        name: String,
    },
    /// Target beyond range.
    #[error("That target is too far away!")]
    TooFar,
    /// Offensive spell aimed at the caster.
    #[error("You can't attack yourself!")]
    AttackSelf,
    /// Offensive target behind or out of sight.
    #[error("Your target is not in view!")]
    NotInView,
    /// Offensive spell aimed at an ally.
    #[error("You can't attack a member of your realm!")]
    SameRealm,
    /// Offensive spell aimed at something the ruleset protects.
    #[error("You can't attack this target!")]
    CannotAttack,
    /// Pet spell without a controlled pet.
    #[error("You must cast this spell on a creature you are controlling.")]
    NotControlled,
    /// Corpse spell on a living or enemy.
    #[error("This spell only works on dead members of your realm!")]
    CorpseOnly,
    /// Realm spell on an enemy.
    #[error("You must use this spell on a member of your realm!")]
    RealmOnly,
    /// Realm target out of sight.
    #[error("Your target is not visible!")]
    NotVisible,
    /// Target hidden by selective blindness.
    #[error("{name} is invisible to you!")]
    Invisible {
        /// Target's name.
        name: String,
    },
    /// Target immune to the spell's damage type.
    #[error("{name} is immune to this effect!")]
    ImmuneTarget {
        /// Target's name.
        name: String,
    },
    /// No power at all.
    #[error("You have exhausted all of your power and cannot cast spells!")]
    ExhaustedPower,
    /// Less power than the spell costs.
    #[error("You don't have enough power to cast that!")]
    NotEnoughPower,
    /// Less concentration than the spell costs.
    #[error("This spell requires {required} concentration points to cast!")]
    NotEnoughConcentration {
        /// Concentration the spell costs.
        required: u16,
    },
    /// Too many concentration holds.
    #[error("You can only cast up to {max} simultaneous concentration spells!")]
    TooManyConcentration {
        /// Configured maximum.
        max: usize,
    },
    /// Spell or line missing from the book.
    #[error("Spell data for spell {spell} is missing; the cast was aborted.")]
    MissingData {
        /// Requested spell id.
        spell: SpellId,
    },
    /// Caster moved mid-cast.
    #[error("You move and interrupt your spellcast!")]
    Moved,
    /// Caster was struck mid-cast.
    #[error("{name} attacks you and your spell is interrupted!")]
    AttackedBy {
        /// Attacker's name.
        name: String,
    },
    /// Caster was stunned or mesmerized mid-cast.
    #[error("You are incapacitated and your spell is interrupted!")]
    Incapacitated,
}

impl CastFailure {
    /// Chat channel the failure is reported on.
    #[must_use]
    pub const fn category(&self) -> ChatCategory {
        match self {
            Self::NoTarget
            | Self::TooFar
            | Self::NotInView
            | Self::NotVisible
            | Self::SameRealm
            | Self::CannotAttack
            | Self::CorpseOnly
            | Self::RealmOnly
            | Self::NotControlled
            | Self::TargetDead { .. }
            | Self::GroundTargetTooFar
            | Self::GroundTargetNotInView
            | Self::AttackedBy { .. } => ChatCategory::SpellResisted,
            _ => ChatCategory::System,
        }
    }
}

/// Result of a cast request or of an event that ended a cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastOutcome {
    /// A timed cast is under way.
    Started(CastId),
    /// An instant cast resolved immediately.
    Completed,
    /// The request re-clicked a running pulsing spell, which was cancelled.
    PulseCancelled,
    /// Refused before anything was charged.
    Rejected(CastFailure),
    /// Stopped mid-cast; nothing was charged.
    Interrupted(CastFailure),
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Power charged for a cast.
///
/// The authored cost (or a percentage of maximum power when negative) is
/// raised by a fifth, then players shave off up to 40% of the base through
/// focus relative to the spell level. Quick-cast doubles the result.
#[must_use]
pub fn power_cost(spell: &SpellDefinition, caster: &Living, quickcast: bool) -> i32 {
    if spell.power == 0 {
        return 0;
    }
    let base = if spell.power < 0 {
        Fixed::from_num(caster.mana.max) * Fixed::from_num(-spell.power) / Fixed::from_num(100)
    } else {
        Fixed::from_num(spell.power)
    };
    let mut cost = base * Fixed::from_num(12) / Fixed::from_num(10);

    if caster.is_player() {
        let cap = Fixed::from_num(4) / Fixed::from_num(10);
        let mut bonus = Fixed::from_num(caster.modified(Property::Focus)) * cap;
        if spell.level > 0 {
            bonus /= Fixed::from_num(spell.level);
        }
        cost -= base * bonus.clamp(Fixed::ZERO, cap);
    }

    if quickcast {
        cost *= Fixed::from_num(2);
    }
    cost.round_to_zero().to_num::<i32>()
}

/// Cast time after the caster's casting-speed bonus.
///
/// Songs and item spells are never sped up; nothing is sped up by more
/// than 60%.
#[must_use]
pub fn cast_time(spell: &SpellDefinition, line: &SpellLine, caster: &Living) -> u32 {
    if spell.cast_time_ms == 0 || spell.instrument_required || line.category == LineCategory::ItemEffects {
        return spell.cast_time_ms;
    }
    let factor = (100 - caster.modified(Property::CastingSpeed)).max(40) as u64;
    let scaled = u64::from(spell.cast_time_ms) * factor / 100;
    scaled.clamp(1, u64::from(u32::MAX)) as u32
}

/// Split a cast time into its three slices.
///
/// The first and last slices are a third of the cast, each at most
/// `max_stage_ms`; the middle slice takes the remainder.
#[must_use]
pub fn stage_lengths(cast_time_ms: u32, max_stage_ms: u32) -> [u32; 3] {
    let outer = (cast_time_ms / 3).clamp(1, max_stage_ms.max(1));
    let middle = cast_time_ms.saturating_sub(outer * 2).max(1);
    [outer, middle, outer]
}

/// Chance in percent that an attack interrupts a cast.
///
/// Player attackers almost always interrupt; other attackers interrupt
/// more often the higher they con to the defender.
#[must_use]
pub fn interrupt_chance(defender_level: u8, attacker_level: u8, attacker_is_player: bool, config: &EngineConfig) -> i32 {
    if attacker_is_player {
        return 99;
    }
    let con = con_level(defender_level, attacker_level);
    let chance = Fixed::from_num(config.base_interrupt_chance) + con * Fixed::from_num(config.interrupt_chance_per_con);
    chance.round_to_zero().to_num::<i32>().clamp(1, 99)
}

fn seconds_left(ms: u64) -> u64 {
    ms / 1000 + 1
}

/// Checks on the caster alone, run when a cast is requested.
fn check_caster_state(caster: &Living, spell: &SpellDefinition, now: u64, quickcast: bool) -> std::result::Result<(), CastFailure> {
    if !caster.alive {
        return Err(CastFailure::Dead);
    }
    if caster.effects.is_stunned() {
        return Err(CastFailure::Stunned);
    }
    if caster.effects.is_mezzed() {
        return Err(CastFailure::Mezzed);
    }
    if caster.has_marker(Marker::Silenced) {
        return Err(CastFailure::Silenced);
    }
    if caster.has_marker(Marker::Phaseshift) && !(spell.instrument_required && spell.has_positive_effect()) {
        return Err(CastFailure::Phaseshifted);
    }
    if spell.instrument_required && caster.instrument.is_none() {
        return Err(CastFailure::NoInstrument);
    }
    if caster.sitting {
        return Err(CastFailure::Sitting);
    }

    let timed = !spell.is_instant() && !quickcast;
    if caster.moving && timed && !spell.move_cast && !spell.instrument_required {
        return Err(CastFailure::Moving);
    }
    if caster.is_being_interrupted(now)
        && timed
        && !spell.uninterruptible
        && !caster.has_marker(Marker::Uninterruptible)
    {
        return Err(CastFailure::Interrupted {
            seconds: seconds_left(caster.interrupt_until - now),
        });
    }
    let cooldown = caster.cooldown_remaining(spell.id, now);
    if cooldown > 0 {
        return Err(CastFailure::Cooldown {
            seconds: seconds_left(cooldown),
        });
    }
    Ok(())
}

/// Power and concentration checks.
fn check_resources(caster: &Living, spell: &SpellDefinition, cost: i32, config: &EngineConfig) -> std::result::Result<(), CastFailure> {
    if cost > 0 && caster.mana.current <= 0 {
        return Err(CastFailure::ExhaustedPower);
    }
    if caster.mana.current < cost {
        return Err(CastFailure::NotEnoughPower);
    }
    if spell.is_concentration() {
        if caster.concentration.current < i32::from(spell.concentration) {
            return Err(CastFailure::NotEnoughConcentration {
                required: spell.concentration,
            });
        }
        if caster.holds.len() >= config.max_concentration_effects {
            return Err(CastFailure::TooManyConcentration {
                max: config.max_concentration_effects,
            });
        }
    }
    Ok(())
}

// ============================================================================
// Controller
// ============================================================================

impl Zone {
    /// Ask `caster` to cast `spell` at `target`.
    ///
    /// Gameplay refusals come back as [`CastOutcome::Rejected`] after the
    /// reason has been sent to the caster. `Err` is reserved for unknown
    /// livings and broken engine state.
    pub fn request_cast(&mut self, caster_id: EntityId, spell_id: SpellId, target: Option<EntityId>) -> Result<CastOutcome> {
        let book = Arc::clone(&self.book);
        let now = self.now();
        let caster = self.get(caster_id)?;

        let (Some(spell), Some(line)) = (book.get_spell(spell_id), book.line_of(spell_id)) else {
            tracing::warn!(caster = caster_id, spell = spell_id, "Cast requested for a spell missing from the book");
            return Ok(self.reject(caster_id, CastFailure::MissingData { spell: spell_id }));
        };

        let same_kind = |link: &PulsingLink| book.get_spell(link.spell).is_some_and(|s| s.kind == spell.kind);
        if spell.is_pulsing() && caster.pulsing.iter().any(same_kind) {
            self.cancel_pulsing_spell(caster_id, spell.kind);
            return Ok(CastOutcome::PulseCancelled);
        }
        if caster.is_casting() {
            return Ok(self.reject(caster_id, CastFailure::AlreadyCasting));
        }

        let quickcast = caster.has_marker(Marker::QuickCast) && !spell.is_instant();
        let begin = check_caster_state(caster, spell, now, quickcast).and_then(|()| {
            let shape = TargetShape::of(spell, caster, &self.config);
            let target = validate_cast_target(&self.livings, caster, spell, &shape, target, &*self.ruleset)?;
            let cost = power_cost(spell, caster, quickcast);
            check_resources(caster, spell, cost, &self.config)?;
            Ok((target, cost))
        });
        let (target, cost) = match begin {
            Ok(checked) => checked,
            Err(failure) => return Ok(self.reject(caster_id, failure)),
        };
        let cast_time_ms = if quickcast { 0 } else { cast_time(spell, line, caster) };

        self.fire_trigger(EffectTrigger::CastStarting {
            caster: caster_id,
            spell: spell_id,
        });

        let id = self.allocate_cast_id();
        let stages = stage_lengths(cast_time_ms, self.config.max_stage_length_ms);
        self.casts.insert(
            id,
            CastInvocation {
                id,
                caster: caster_id,
                spell: spell_id,
                line: line.key.clone(),
                target,
                phase: CastPhase::Casting { stage: 0 },
                timer: None,
                cast_time_ms,
                stages,
                power_cost: cost,
                quickcast,
                started_at: now,
            },
        );
        self.get_mut(caster_id)?.current_cast = Some(id);

        if cast_time_ms == 0 {
            tracing::debug!(caster = caster_id, spell = spell_id, cast = id, "Instant cast");
            let resolved = self.finish_cast(id);
            self.release_cast(id);
            resolved?;
            return Ok(CastOutcome::Completed);
        }

        self.sink.notify_caster(caster_id, &format!("You begin casting a {} spell!", spell.name), ChatCategory::Spell);
        self.sink.play_effect_animation(
            caster_id,
            AnimationKind::CastStart {
                spell: spell_id,
                cast_time_ms,
            },
            true,
        );
        let timer = self.schedule(stages[0], TimerEvent::CastStage { cast: id });
        if let Some(invocation) = self.casts.get_mut(&id) {
            invocation.timer = Some(timer);
        }
        tracing::debug!(caster = caster_id, spell = spell_id, cast = id, cast_time_ms, "Cast started");
        Ok(CastOutcome::Started(id))
    }

    fn reject(&mut self, caster: EntityId, failure: CastFailure) -> CastOutcome {
        self.sink.notify_caster(caster, &failure.to_string(), failure.category());
        tracing::debug!(caster, reason = %failure, "Cast rejected");
        CastOutcome::Rejected(failure)
    }

    /// Forget a cast and free its caster.
    fn release_cast(&mut self, cast: CastId) -> Option<CastInvocation> {
        let invocation = self.casts.remove(&cast)?;
        self.cancel_timer(invocation.timer);
        if let Some(caster) = self.livings.get_mut(&invocation.caster) {
            if caster.current_cast == Some(cast) {
                caster.current_cast = None;
            }
        }
        Some(invocation)
    }

    /// Re-run the begin checks that can change mid-cast.
    fn check_progress(&self, invocation: &CastInvocation) -> std::result::Result<(), CastFailure> {
        let missing = CastFailure::MissingData {
            spell: invocation.spell,
        };
        let spell = self.book.get_spell(invocation.spell).ok_or_else(|| missing.clone())?;
        let caster = self.livings.get(&invocation.caster).ok_or(missing)?;
        if !caster.alive {
            return Err(CastFailure::Dead);
        }
        let shape = TargetShape::of(spell, caster, &self.config);
        validate_cast_target(&self.livings, caster, spell, &shape, invocation.target, &*self.ruleset)?;
        check_resources(caster, spell, invocation.power_cost, &self.config)
    }

    pub(crate) fn on_cast_stage(&mut self, cast: CastId) -> Result<()> {
        let Some(invocation) = self.casts.get(&cast) else {
            tracing::warn!(cast, "Stage timer for a cast that no longer exists");
            return Ok(());
        };
        let CastPhase::Casting { stage } = invocation.phase else {
            return Err(EngineError::InvalidState(format!("cast {cast} staged while settling")));
        };
        if let Err(failure) = self.check_progress(invocation) {
            self.stop_cast(cast, failure, false);
            return Ok(());
        }

        if stage < 2 {
            let next = stage + 1;
            let delay = invocation.stages[usize::from(next)];
            let timer = self.schedule(delay, TimerEvent::CastStage { cast });
            if let Some(invocation) = self.casts.get_mut(&cast) {
                invocation.phase = CastPhase::Casting { stage: next };
                invocation.timer = Some(timer);
            }
            tracing::debug!(cast, stage = next, "Cast stage");
            return Ok(());
        }

        if let Some(invocation) = self.casts.get_mut(&cast) {
            invocation.phase = CastPhase::Settling;
            invocation.timer = None;
        }
        self.finish_cast(cast)?;
        let timer = self.schedule(self.config.settle_ms, TimerEvent::CastSettle { cast });
        if let Some(invocation) = self.casts.get_mut(&cast) {
            invocation.timer = Some(timer);
        }
        Ok(())
    }

    pub(crate) fn on_cast_settle(&mut self, cast: CastId) -> Result<()> {
        match self.casts.get(&cast).map(|c| c.phase) {
            Some(CastPhase::Settling) => {
                if let Some(invocation) = self.release_cast(cast) {
                    tracing::debug!(cast, caster = invocation.caster, "Cast finished");
                }
                Ok(())
            }
            Some(CastPhase::Casting { .. }) => Err(EngineError::InvalidState(format!("cast {cast} settled before resolving"))),
            None => {
                tracing::warn!(cast, "Settle timer for a cast that no longer exists");
                Ok(())
            }
        }
    }

    /// The charge point: take power, concentration and cooldown, then
    /// resolve the spell.
    pub(crate) fn finish_cast(&mut self, cast: CastId) -> Result<()> {
        let book = Arc::clone(&self.book);
        let now = self.now();
        let invocation = self.casts.get(&cast).cloned().ok_or(EngineError::CastNotFound(cast))?;
        let spell = book.spell(invocation.spell)?;
        let caster_id = invocation.caster;

        let caster = self.get_mut(caster_id)?;
        caster.mana.drain(invocation.power_cost);
        if invocation.quickcast {
            caster.effects.remove_marker(Marker::QuickCast);
        }
        if spell.recast_delay_ms > 0 {
            let ready = now + u64::from(spell.recast_delay_ms);
            caster.disabled_spells.insert(spell.id, ready);
            for shared in book.spells_in_timer_group(spell.shared_timer_group) {
                caster.disabled_spells.insert(shared.id, ready);
            }
        }
        let hold = spell.is_concentration().then(|| {
            caster.concentration.drain(i32::from(spell.concentration));
            caster.holds.push(ConcentrationHold {
                id: cast,
                spell: spell.id,
                cost: spell.concentration,
                members: Vec::new(),
            });
            cast
        });
        tracing::debug!(
            caster = caster_id,
            spell = spell.id,
            power = invocation.power_cost,
            concentration = spell.concentration,
            "Cast charged"
        );

        if !spell.is_instant() {
            self.sink.notify_caster(caster_id, &format!("You cast a {} spell!", spell.name), ChatCategory::Spell);
        }

        let link = if spell.is_pulsing() {
            Some(self.start_pulsing_link(caster_id, spell, &invocation, hold)?)
        } else {
            None
        };

        self.start_spell(caster_id, spell.id, invocation.target, hold, link)?;

        if let Some(sub_spell) = spell.sub_spell {
            if book.get_spell(sub_spell).is_some() {
                self.start_spell(caster_id, sub_spell, invocation.target, None, None)?;
            } else {
                tracing::warn!(spell = spell.id, sub_spell, "Sub-spell missing from the book");
                let failure = CastFailure::MissingData { spell: sub_spell };
                self.sink.notify_caster(caster_id, &failure.to_string(), ChatCategory::System);
            }
        }

        if let Some(hold) = hold {
            self.release_hold_if_idle(caster_id, hold);
        }
        Ok(())
    }

    /// End a cast before resolution. `lockout` starts the interrupt window.
    fn stop_cast(&mut self, cast: CastId, failure: CastFailure, lockout: bool) -> Option<CastOutcome> {
        let now = self.now();
        let invocation = self.release_cast(cast)?;
        if lockout {
            if let Some(caster) = self.livings.get_mut(&invocation.caster) {
                let until = now + u64::from(self.config.interrupt_recast_ms);
                caster.interrupt_until = caster.interrupt_until.max(until);
            }
        }
        self.sink.notify_caster(invocation.caster, &failure.to_string(), failure.category());
        self.sink.play_effect_animation(invocation.caster, AnimationKind::CastInterrupted, false);
        tracing::debug!(cast, caster = invocation.caster, reason = %failure, "Cast stopped");
        Some(CastOutcome::Interrupted(failure))
    }

    /// Interrupt `caster`'s cast if it has not resolved yet.
    ///
    /// Returns `None` when there was nothing to interrupt.
    pub fn interrupt_cast(&mut self, caster: EntityId, failure: CastFailure) -> Option<CastOutcome> {
        let cast = self.livings.get(&caster)?.current_cast?;
        if !matches!(self.casts.get(&cast)?.phase, CastPhase::Casting { .. }) {
            return None;
        }
        self.stop_cast(cast, failure, true)
    }

    /// Abandon `caster`'s cast without a message or lockout. Cancelling
    /// twice, or after resolution, does nothing and returns `false`.
    pub fn cancel_cast(&mut self, caster: EntityId) -> bool {
        let Some(cast) = self.livings.get(&caster).and_then(|l| l.current_cast) else {
            return false;
        };
        if !matches!(self.casts.get(&cast).map(|c| c.phase), Some(CastPhase::Casting { .. })) {
            return false;
        }
        self.release_cast(cast).is_some()
    }

    /// Relocate a living, interrupting its cast and ending effects that
    /// break on movement.
    pub fn move_living(&mut self, id: EntityId, position: Vec2Fixed) -> Result<Option<CastOutcome>> {
        let living = self.get_mut(id)?;
        living.position = position;
        let cast = living.current_cast;

        let interruptible = cast
            .and_then(|c| self.casts.get(&c))
            .filter(|c| c.is_interruptible())
            .and_then(|c| self.book.get_spell(c.spell))
            .is_some_and(|spell| !spell.move_cast && !spell.instrument_required);
        let outcome = if interruptible {
            self.interrupt_cast(id, CastFailure::Moved)
        } else {
            None
        };
        self.fire_trigger(EffectTrigger::Moved(id));
        Ok(outcome)
    }

    /// Report that `attacker` attacked `target` outside the spell engine,
    /// e.g. with a weapon. `damaging` breaks effects such as mesmerize.
    pub fn notify_attacked(&mut self, target: EntityId, attacker: EntityId, damaging: bool) -> Result<Option<CastOutcome>> {
        self.get(attacker)?;
        self.get(target)?;
        Ok(self.on_attacked(target, attacker, damaging, None))
    }

    /// Interrupt window, cast interrupt roll and attack triggers.
    pub(crate) fn on_attacked(
        &mut self,
        target_id: EntityId,
        attacker_id: EntityId,
        damaging: bool,
        spell: Option<SpellId>,
    ) -> Option<CastOutcome> {
        let now = self.now();
        let (attacker_level, attacker_is_player, attacker_name) = match self.livings.get(&attacker_id) {
            Some(a) => (a.level, a.is_player(), a.name.clone()),
            None => return None,
        };
        let target = self.livings.get_mut(&target_id)?;
        if !target.alive || !target.active {
            target.interrupt_until = 0;
            return None;
        }
        let until = now + u64::from(self.config.interrupt_duration_ms);
        target.interrupt_until = target.interrupt_until.max(until);

        let defender_level = target.level;
        let exempt = target.has_marker(Marker::Uninterruptible);
        let interruptible = target
            .current_cast
            .and_then(|c| self.casts.get(&c))
            .filter(|c| c.is_interruptible())
            .and_then(|c| self.book.get_spell(c.spell))
            .is_some_and(|spell| !spell.uninterruptible && !exempt);

        let mut outcome = None;
        if interruptible {
            let chance = interrupt_chance(defender_level, attacker_level, attacker_is_player, &self.config);
            if self.roller.chance(chance) {
                outcome = self.interrupt_cast(target_id, CastFailure::AttackedBy { name: attacker_name });
            }
        }
        self.fire_trigger(EffectTrigger::Attacked {
            target: target_id,
            attacker: attacker_id,
            damaging,
            spell,
        });
        outcome
    }

    // ========================================================================
    // Pulsing spells
    // ========================================================================

    fn start_pulsing_link(
        &mut self,
        caster_id: EntityId,
        spell: &SpellDefinition,
        invocation: &CastInvocation,
        hold: Option<CastId>,
    ) -> Result<EffectId> {
        let caster = self.get(caster_id)?;
        let cap = usize::from(caster.max_pulsing.max(1));
        let excess = (caster.pulsing.len() + 1).saturating_sub(cap);
        let oldest: Vec<EffectId> = caster.pulsing.iter().take(excess).map(|l| l.id).collect();
        for link in oldest {
            self.end_pulsing_link(caster_id, link, None);
        }

        let id = self.allocate_effect_id();
        let timer = self.schedule(spell.frequency_ms, TimerEvent::SpellPulse { caster: caster_id, link: id });
        let subscriptions = if spell.focus {
            focus_subscriptions(spell)
        } else if spell.instrument_required {
            Vec::new()
        } else {
            vec![Subscription::CasterMoves]
        };
        let started_at = self.now();
        self.get_mut(caster_id)?.pulsing.push(PulsingLink {
            id,
            spell: spell.id,
            line: invocation.line.clone(),
            target: invocation.target,
            started_at,
            timer: Some(timer),
            focus: spell.focus,
            subscriptions,
            hold,
        });
        tracing::debug!(caster = caster_id, spell = spell.id, link = id, "Pulsing spell started");
        Ok(id)
    }

    /// End a pulsing link. Focus links take the effects they produced with
    /// them. Returns `false` if the link was already gone.
    pub(crate) fn end_pulsing_link(&mut self, caster_id: EntityId, link_id: EffectId, message: Option<&str>) -> bool {
        let Some(caster) = self.livings.get_mut(&caster_id) else {
            return false;
        };
        let Some(index) = caster.pulsing.iter().position(|l| l.id == link_id) else {
            return false;
        };
        let link = caster.pulsing.remove(index);
        self.cancel_timer(link.timer);
        if let Some(message) = message {
            self.sink.notify_caster(caster_id, message, ChatCategory::SpellExpires);
        }

        if link.focus {
            let produced: Vec<(EntityId, EffectId)> = self
                .livings
                .values()
                .flat_map(|l| l.effects.iter().filter(|e| e.link == Some(link_id)).map(|e| (e.owner, e.id)))
                .collect();
            for (owner, effect) in produced {
                self.cancel_effect(owner, effect);
            }
        }
        if let Some(hold) = link.hold {
            self.release_hold_if_idle(caster_id, hold);
        }
        tracing::debug!(caster = caster_id, link = link_id, "Pulsing spell ended");
        true
    }

    /// End every pulsing spell of `kind` the caster sustains.
    fn cancel_pulsing_spell(&mut self, caster_id: EntityId, kind: EffectKind) {
        let book = Arc::clone(&self.book);
        let links: Vec<EffectId> = self
            .livings
            .get(&caster_id)
            .map(|c| {
                c.pulsing
                    .iter()
                    .filter(|l| book.get_spell(l.spell).is_some_and(|s| s.kind == kind))
                    .map(|l| l.id)
                    .collect()
            })
            .unwrap_or_default();
        for link in links {
            self.end_pulsing_link(caster_id, link, Some("You cancel your effect."));
        }
    }

    pub(crate) fn on_spell_pulse(&mut self, caster_id: EntityId, link_id: EffectId) -> Result<()> {
        let book = Arc::clone(&self.book);
        let now = self.now();
        let Some(caster) = self.livings.get_mut(&caster_id) else {
            tracing::warn!(caster = caster_id, link = link_id, "Pulse for a living that no longer exists");
            return Ok(());
        };
        let Some(link) = caster.pulsing.iter_mut().find(|l| l.id == link_id) else {
            tracing::warn!(caster = caster_id, link = link_id, "Pulse for a link that no longer exists");
            return Ok(());
        };
        link.timer = None;
        let (spell_id, target, hold, started_at) = (link.spell, link.target, link.hold, link.started_at);
        let spell = book.spell(spell_id)?;

        if !caster.alive {
            self.end_pulsing_link(caster_id, link_id, None);
            return Ok(());
        }
        if caster.effects.is_stunned() || caster.effects.is_mezzed() {
            self.reschedule_pulse(caster_id, link_id, spell.frequency_ms);
            return Ok(());
        }
        if spell.instrument_required && caster.instrument.is_none() {
            self.end_pulsing_link(caster_id, link_id, Some("You stop playing your song."));
            return Ok(());
        }
        if spell.focus && spell.duration_ms > 0 && now.saturating_sub(started_at) >= u64::from(spell.duration_ms) {
            self.end_pulsing_link(caster_id, link_id, None);
            return Ok(());
        }
        if caster.mana.current < spell.pulse_power {
            self.end_pulsing_link(caster_id, link_id, Some(PULSE_OUT_OF_POWER));
            return Ok(());
        }
        caster.mana.drain(spell.pulse_power);

        if spell.instrument_required || !spell.has_positive_effect() {
            self.sink.play_effect_animation(caster_id, AnimationKind::Effect { spell: spell_id }, true);
        }
        self.reschedule_pulse(caster_id, link_id, spell.frequency_ms);
        tracing::debug!(caster = caster_id, link = link_id, spell = spell_id, "Pulse");
        self.start_spell(caster_id, spell_id, target, hold, Some(link_id))?;
        Ok(())
    }

    fn reschedule_pulse(&mut self, caster_id: EntityId, link_id: EffectId, delay_ms: u32) {
        let timer = self.schedule(delay_ms, TimerEvent::SpellPulse { caster: caster_id, link: link_id });
        let link = self
            .livings
            .get_mut(&caster_id)
            .and_then(|c| c.pulsing.iter_mut().find(|l| l.id == link_id));
        match link {
            Some(link) => link.timer = Some(timer),
            None => {
                self.scheduler.cancel(timer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BonusCategory, LivingKind};
    use crate::data::{DamageScaling, EffectKind, EffectMessages, TargetMode};
    use crate::living::LivingSpawnParams;

    fn create_test_spell(power: i32, level: u8) -> SpellDefinition {
        SpellDefinition {
            id: 1,
            name: "Bolt".to_string(),
            kind: EffectKind::DirectDamage,
            target: TargetMode::Enemy,
            damage: Fixed::from_num(100),
            damage_type: Default::default(),
            value: 0,
            level,
            duration_ms: 0,
            frequency_ms: 0,
            pulse: false,
            focus: false,
            pulse_power: 0,
            concentration: 0,
            power,
            cast_time_ms: 3000,
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

    fn create_test_line() -> SpellLine {
        SpellLine {
            key: "bolts".to_string(),
            name: "Bolts".to_string(),
            spec: "bolts".to_string(),
            baseline: true,
            category: LineCategory::Standard,
            scaling: DamageScaling::Caster,
            spells: Vec::new(),
        }
    }

    fn create_test_caster(kind: LivingKind) -> Living {
        Living::new(
            1,
            LivingSpawnParams {
                kind,
                level: 50,
                max_mana: 500,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_power_cost_base_and_focus() {
        let spell = create_test_spell(20, 40);
        let mut player = create_test_caster(LivingKind::Player);
        assert_eq!(power_cost(&spell, &player, false), 24);
        assert_eq!(power_cost(&spell, &player, true), 48);

        // 40 focus at spell level 40 hits the 40% cap
        player.stats.set(Property::Focus, BonusCategory::Item, 40);
        assert_eq!(power_cost(&spell, &player, false), 16);

        let npc = create_test_caster(LivingKind::Npc);
        assert_eq!(power_cost(&spell, &npc, false), 24, "focus only helps players");
    }

    #[test]
    fn test_power_cost_percent_of_max() {
        let spell = create_test_spell(-10, 40);
        let npc = create_test_caster(LivingKind::Npc);
        // 10% of 500 = 50, raised by a fifth
        assert_eq!(power_cost(&spell, &npc, false), 60);
        assert_eq!(power_cost(&create_test_spell(0, 40), &npc, false), 0);
    }

    #[test]
    fn test_cast_time_speedup_is_capped() {
        let spell = create_test_spell(10, 40);
        let line = create_test_line();
        let mut caster = create_test_caster(LivingKind::Player);
        assert_eq!(cast_time(&spell, &line, &caster), 3000);

        caster.stats.set(Property::CastingSpeed, BonusCategory::Item, 10);
        assert_eq!(cast_time(&spell, &line, &caster), 2700);

        caster.stats.set(Property::CastingSpeed, BonusCategory::Item, 90);
        assert_eq!(cast_time(&spell, &line, &caster), 1200);

        let mut song = spell.clone();
        song.instrument_required = true;
        assert_eq!(cast_time(&song, &line, &caster), 3000);
    }

    #[test]
    fn test_stage_lengths() {
        assert_eq!(stage_lengths(3000, 1500), [1000, 1000, 1000]);
        assert_eq!(stage_lengths(6000, 1500), [1500, 3000, 1500]);
        assert_eq!(stage_lengths(2, 1500), [1, 1, 1]);
        let total: u32 = stage_lengths(2500, 1500).iter().sum();
        assert_eq!(total, 2500);
    }

    #[test]
    fn test_interrupt_chance() {
        let config = EngineConfig::default();
        assert_eq!(interrupt_chance(50, 50, false, &config), 65);
        assert_eq!(interrupt_chance(50, 10, true, &config), 99);
        assert_eq!(interrupt_chance(50, 1, false, &config), 1);
        assert_eq!(interrupt_chance(10, 50, false, &config), 99);
        // level 40 defender steps cons by 4 levels: +2 cons
        assert_eq!(interrupt_chance(40, 48, false, &config), 85);
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            CastFailure::Interrupted { seconds: 3 }.to_string(),
            "You are interrupted and must wait 3 seconds to cast a spell!"
        );
        assert_eq!(
            CastFailure::AttackedBy { name: "Orc".to_string() }.to_string(),
            "Orc attacks you and your spell is interrupted!"
        );
        assert_eq!(
            CastFailure::NotEnoughConcentration { required: 12 }.to_string(),
            "This spell requires 12 concentration points to cast!"
        );
        assert_eq!(CastFailure::TooFar.category(), ChatCategory::SpellResisted);
    }

    #[test]
    fn test_caster_state_checks() {
        let spell = create_test_spell(10, 40);
        let mut caster = create_test_caster(LivingKind::Player);
        assert_eq!(check_caster_state(&caster, &spell, 0, false), Ok(()));

        caster.interrupt_until = 2500;
        assert_eq!(
            check_caster_state(&caster, &spell, 0, false),
            Err(CastFailure::Interrupted { seconds: 3 })
        );
        assert_eq!(check_caster_state(&caster, &spell, 0, true), Ok(()), "quick-cast ignores interrupts");
        caster.interrupt_until = 0;

        caster.disabled_spells.insert(1, 10_000);
        assert_eq!(
            check_caster_state(&caster, &spell, 4000, false),
            Err(CastFailure::Cooldown { seconds: 7 })
        );
        caster.disabled_spells.clear();

        caster.effects.add_marker(Marker::Silenced);
        assert_eq!(check_caster_state(&caster, &spell, 0, false), Err(CastFailure::Silenced));
        caster.effects.remove_marker(Marker::Silenced);

        caster.moving = true;
        assert_eq!(check_caster_state(&caster, &spell, 0, false), Err(CastFailure::Moving));
        let mut moving_spell = spell.clone();
        moving_spell.move_cast = true;
        assert_eq!(check_caster_state(&caster, &moving_spell, 0, false), Ok(()));
        caster.moving = false;

        let mut song = spell.clone();
        song.instrument_required = true;
        assert_eq!(check_caster_state(&caster, &song, 0, false), Err(CastFailure::NoInstrument));

        caster.alive = false;
        assert_eq!(check_caster_state(&caster, &spell, 0, false), Err(CastFailure::Dead));
    }

    #[test]
    fn test_resource_checks() {
        let config = EngineConfig::default();
        let mut spell = create_test_spell(10, 40);
        let mut caster = create_test_caster(LivingKind::Player);
        assert_eq!(check_resources(&caster, &spell, 12, &config), Ok(()));
        caster.mana.current = 5;
        assert_eq!(check_resources(&caster, &spell, 12, &config), Err(CastFailure::NotEnoughPower));
        caster.mana.current = 0;
        assert_eq!(check_resources(&caster, &spell, 12, &config), Err(CastFailure::ExhaustedPower));

        caster.mana.current = 500;
        spell.concentration = 15;
        caster.concentration = crate::components::Pool::full(10);
        assert_eq!(
            check_resources(&caster, &spell, 12, &config),
            Err(CastFailure::NotEnoughConcentration { required: 15 })
        );
    }
}
