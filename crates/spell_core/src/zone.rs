//! The zone driver.
//!
//! A [`Zone`] owns every living in one region together with the seams the
//! engine talks through: a [`Scheduler`] for the zone clock, a [`Roller`]
//! for gameplay rolls, a [`MessageSink`] for chat and animations, a
//! [`Ruleset`] for allegiance and a [`LivingMutator`] for health writes.
//!
//! Work happens in two ways. Requests (`request_cast`, `move_living`,
//! `notify_attacked`, `cancel_effect`) run synchronously. Everything timed
//! (cast stages, effect ticks, pulses, immunity windows) runs from
//! [`Zone::advance_to`], which fires due timers one at a time in due order.
//!
//! # Determinism
//!
//! - Livings are stored in a `BTreeMap` and visited in id order
//! - All rolls come from the zone's [`Roller`]
//! - All math is fixed-point
//!
//! Two zones built from the same book, config, seed and request sequence
//! report the same [`Zone::state_hash`] after every advance.
//!
//! # Example
//!
//! ```
//! use spell_core::data::SpellBook;
//! use spell_core::living::LivingSpawnParams;
//! use spell_core::zone::Zone;
//!
//! let book = SpellBook::from_ron_str("[]").unwrap();
//! let mut zone = Zone::new(book);
//! let id = zone.spawn(LivingSpawnParams::default());
//! zone.advance(1000);
//! assert_eq!(zone.now(), 1000);
//! assert!(zone.living(id).is_some());
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::casting::CastInvocation;
use crate::components::{CastId, EffectId, EntityId, LivingKind};
use crate::config::EngineConfig;
use crate::data::SpellBook;
use crate::error::{EngineError, Result};
use crate::living::{Living, LivingSpawnParams};
use crate::messages::{MessageSink, NullSink};
use crate::mutation::{DirectMutator, LivingMutator};
use crate::rng::{Roller, SpellRng};
use crate::ruleset::{RealmRuleset, Ruleset};
use crate::scheduler::{Scheduler, TimerEvent, TimerHandle, TimerQueue};

/// One region's livings, casts and timers.
pub struct Zone {
    pub(crate) livings: BTreeMap<EntityId, Living>,
    pub(crate) book: Arc<SpellBook>,
    pub(crate) config: EngineConfig,
    pub(crate) casts: BTreeMap<CastId, CastInvocation>,
    pub(crate) scheduler: Box<dyn Scheduler + Send>,
    pub(crate) roller: Box<dyn Roller + Send>,
    pub(crate) sink: Box<dyn MessageSink + Send>,
    pub(crate) ruleset: Box<dyn Ruleset + Send>,
    pub(crate) mutator: Box<dyn LivingMutator + Send>,
    next_entity: EntityId,
    next_effect: EffectId,
    next_cast: CastId,
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("now", &self.now())
            .field("livings", &self.livings.len())
            .field("casts", &self.casts.len())
            .field("timers", &self.scheduler.pending_count())
            .finish_non_exhaustive()
    }
}

impl Zone {
    /// Create a zone with default collaborators: a [`TimerQueue`] at time
    /// zero, a [`SpellRng`] seeded with zero, a [`NullSink`], the
    /// [`RealmRuleset`] and the [`DirectMutator`].
    #[must_use]
    pub fn new(book: SpellBook) -> Self {
        Self::with_shared_book(Arc::new(book))
    }

    /// Create a zone over a book shared with other zones.
    #[must_use]
    pub fn with_shared_book(book: Arc<SpellBook>) -> Self {
        Self {
            livings: BTreeMap::new(),
            book,
            config: EngineConfig::default(),
            casts: BTreeMap::new(),
            scheduler: Box::new(TimerQueue::new()),
            roller: Box::new(SpellRng::new(0)),
            sink: Box::new(NullSink),
            ruleset: Box::new(RealmRuleset),
            mutator: Box::new(DirectMutator),
            next_entity: 1,
            next_effect: 1,
            next_cast: 1,
        }
    }

    /// Replace the tuning.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed the default roller.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.roller = Box::new(SpellRng::new(seed));
        self
    }

    /// Replace the roller.
    #[must_use]
    pub fn with_roller(mut self, roller: impl Roller + Send + 'static) -> Self {
        self.roller = Box::new(roller);
        self
    }

    /// Replace the message sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl MessageSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Replace the scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: impl Scheduler + Send + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    /// Replace the ruleset.
    #[must_use]
    pub fn with_ruleset(mut self, ruleset: impl Ruleset + Send + 'static) -> Self {
        self.ruleset = Box::new(ruleset);
        self
    }

    /// Replace the health/stat mutator.
    #[must_use]
    pub fn with_mutator(mut self, mutator: impl LivingMutator + Send + 'static) -> Self {
        self.mutator = Box::new(mutator);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current zone time in milliseconds.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// Spell data.
    #[must_use]
    pub fn book(&self) -> &SpellBook {
        &self.book
    }

    /// Tuning.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Look up a living.
    #[must_use]
    pub fn living(&self, id: EntityId) -> Option<&Living> {
        self.livings.get(&id)
    }

    /// Look up a living for direct edits (stats, markers, flags).
    pub fn living_mut(&mut self, id: EntityId) -> Option<&mut Living> {
        self.livings.get_mut(&id)
    }

    /// Every living in id order.
    pub fn livings(&self) -> impl Iterator<Item = &Living> {
        self.livings.values()
    }

    /// A cast in progress.
    #[must_use]
    pub fn cast(&self, id: CastId) -> Option<&CastInvocation> {
        self.casts.get(&id)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending_count()
    }

    pub(crate) fn get(&self, id: EntityId) -> Result<&Living> {
        self.livings.get(&id).ok_or(EngineError::EntityNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Result<&mut Living> {
        self.livings.get_mut(&id).ok_or(EngineError::EntityNotFound(id))
    }

    pub(crate) fn allocate_effect_id(&mut self) -> EffectId {
        let id = self.next_effect;
        self.next_effect += 1;
        id
    }

    pub(crate) fn allocate_cast_id(&mut self) -> CastId {
        let id = self.next_cast;
        self.next_cast += 1;
        id
    }

    pub(crate) fn schedule(&mut self, delay_ms: u32, event: TimerEvent) -> TimerHandle {
        self.scheduler.schedule_after(delay_ms, event)
    }

    pub(crate) fn cancel_timer(&mut self, handle: Option<TimerHandle>) {
        if let Some(handle) = handle {
            self.scheduler.cancel(handle);
        }
    }

    // ========================================================================
    // Spawning
    // ========================================================================

    /// Add a living and return its id.
    pub fn spawn(&mut self, params: LivingSpawnParams) -> EntityId {
        let id = self.next_entity;
        self.next_entity += 1;
        self.livings.insert(id, Living::new(id, params));
        id
    }

    /// Add a creature controlled by `owner`. The pet takes its owner's realm
    /// and is appended to the owner's pet list.
    pub fn spawn_pet(&mut self, owner: EntityId, params: LivingSpawnParams) -> Result<EntityId> {
        let realm = self.get(owner)?.realm;
        let id = self.spawn(LivingSpawnParams {
            kind: LivingKind::Pet { owner },
            realm,
            ..params
        });
        self.get_mut(owner)?.pets.push(id);
        Ok(id)
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// Fire every timer due up to `until`, then move the clock there.
    ///
    /// Returns the number of timers fired. A timer whose handler fails is
    /// logged and only its own cast or effect is torn down.
    pub fn advance_to(&mut self, until: u64) -> usize {
        let mut fired = 0;
        while let Some((_, event)) = self.scheduler.pop_due(until) {
            fired += 1;
            if let Err(err) = self.dispatch(event) {
                tracing::error!(?event, error = %err, "Timer event failed");
                self.discard(event);
            }
        }
        self.scheduler.advance_to(until);

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(now = until, state_hash = hash, "Zone state hash");
        }

        fired
    }

    /// Advance the clock by `delta_ms`.
    pub fn advance(&mut self, delta_ms: u64) -> usize {
        self.advance_to(self.now().saturating_add(delta_ms))
    }

    fn dispatch(&mut self, event: TimerEvent) -> Result<()> {
        match event {
            TimerEvent::CastStage { cast } => self.on_cast_stage(cast),
            TimerEvent::CastSettle { cast } => self.on_cast_settle(cast),
            TimerEvent::EffectTick { owner, effect } => self.on_effect_tick(owner, effect),
            TimerEvent::ImmunityEnd { owner, effect } => self.on_immunity_end(owner, effect),
            TimerEvent::SpellPulse { caster, link } => self.on_spell_pulse(caster, link),
            TimerEvent::BuffRangeCheck { owner, effect } => self.on_buff_range_check(owner, effect),
        }
    }

    /// Drop whatever a failed timer belonged to without running its hooks.
    fn discard(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::CastStage { cast } | TimerEvent::CastSettle { cast } => {
                if let Some(invocation) = self.casts.remove(&cast) {
                    if let Some(caster) = self.livings.get_mut(&invocation.caster) {
                        caster.current_cast = None;
                    }
                }
            }
            TimerEvent::EffectTick { owner, effect }
            | TimerEvent::ImmunityEnd { owner, effect }
            | TimerEvent::BuffRangeCheck { owner, effect } => self.drop_effect(owner, effect),
            TimerEvent::SpellPulse { caster, link } => {
                if let Some(living) = self.livings.get_mut(&caster) {
                    living.pulsing.retain(|l| l.id != link);
                }
            }
        }
    }

    // ========================================================================
    // Hashing
    // ========================================================================

    /// Hash of every living, cast and the clock.
    ///
    /// Zones that saw the same inputs in the same order hash identically.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.now().hash(&mut hasher);
        self.livings.len().hash(&mut hasher);
        for living in self.livings.values() {
            living.hash(&mut hasher);
        }
        for cast in self.casts.values() {
            cast.hash(&mut hasher);
        }
        self.scheduler.pending_count().hash(&mut hasher);
        hasher.finish()
    }
}
