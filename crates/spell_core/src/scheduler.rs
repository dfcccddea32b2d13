//! Zone-local timers for cast stages, effect ticks and pulses.
//!
//! The cast controller and effect lifecycle never own a clock. They ask a
//! [`Scheduler`] to fire a [`TimerEvent`] after a delay and keep the returned
//! handle so they can disarm it. [`TimerQueue`] is the in-process
//! implementation: a min-heap keyed on `(due, handle)` with a live-set so
//! cancellation is O(log n) and idempotent.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use serde::{Deserialize, Serialize};

use crate::components::{CastId, EffectId, EntityId};

/// Handle returned by [`Scheduler::schedule_after`].
pub type TimerHandle = u64;

/// What a timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerEvent {
    /// Advance a cast to its next checkpoint.
    CastStage {
        /// Cast to advance.
        cast: CastId,
    },
    /// Release the caster after resolution.
    CastSettle {
        /// Cast to finish.
        cast: CastId,
    },
    /// Pulse or expire an active effect.
    EffectTick {
        /// Living carrying the effect.
        owner: EntityId,
        /// Effect to tick.
        effect: EffectId,
    },
    /// End an effect's immunity window.
    ImmunityEnd {
        /// Living carrying the effect.
        owner: EntityId,
        /// Effect in immunity.
        effect: EffectId,
    },
    /// Re-run a pulsing spell.
    SpellPulse {
        /// Caster sustaining the pulse.
        caster: EntityId,
        /// Pulsing link.
        link: EffectId,
    },
    /// Check the caster is still near a concentration buff.
    BuffRangeCheck {
        /// Living carrying the effect.
        owner: EntityId,
        /// Concentration effect.
        effect: EffectId,
    },
}

/// Schedule-after/cancel interface over a zone clock.
pub trait Scheduler {
    /// Current zone time in milliseconds.
    fn now(&self) -> u64;

    /// Fire `event` once `delay_ms` has elapsed.
    fn schedule_after(&mut self, delay_ms: u32, event: TimerEvent) -> TimerHandle;

    /// Disarm a timer. Returns `false` if it already fired or was cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;

    /// Whether a timer is still armed.
    fn is_pending(&self, handle: TimerHandle) -> bool;

    /// Remove the earliest event due at or before `until`, moving the clock
    /// to its due time.
    fn pop_due(&mut self, until: u64) -> Option<(TimerHandle, TimerEvent)>;

    /// Move the clock forward to `time` once nothing earlier is due.
    fn advance_to(&mut self, time: u64);

    /// Number of armed timers.
    fn pending_count(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledTimer {
    due: u64,
    handle: TimerHandle,
}

/// Min-heap timer queue with a manually advanced clock.
#[derive(Debug, Clone, Default)]
pub struct TimerQueue {
    now: u64,
    next_handle: TimerHandle,
    heap: BinaryHeap<Reverse<ScheduledTimer>>,
    live: BTreeMap<TimerHandle, TimerEvent>,
}

impl TimerQueue {
    /// Create a queue whose clock starts at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue whose clock starts at `now`.
    #[must_use]
    pub fn starting_at(now: u64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    /// Live timers in handle order, for hashing.
    pub fn live(&self) -> impl Iterator<Item = (&TimerHandle, &TimerEvent)> {
        self.live.iter()
    }
}

impl Scheduler for TimerQueue {
    fn now(&self) -> u64 {
        self.now
    }

    fn schedule_after(&mut self, delay_ms: u32, event: TimerEvent) -> TimerHandle {
        self.next_handle += 1;
        let handle = self.next_handle;
        let due = self.now.saturating_add(u64::from(delay_ms));
        self.heap.push(Reverse(ScheduledTimer { due, handle }));
        self.live.insert(handle, event);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        // the heap entry is skipped lazily in pop_due
        self.live.remove(&handle).is_some()
    }

    fn is_pending(&self, handle: TimerHandle) -> bool {
        self.live.contains_key(&handle)
    }

    fn pop_due(&mut self, until: u64) -> Option<(TimerHandle, TimerEvent)> {
        while let Some(Reverse(next)) = self.heap.peek().copied() {
            if next.due > until {
                return None;
            }
            self.heap.pop();
            if let Some(event) = self.live.remove(&next.handle) {
                self.now = self.now.max(next.due);
                return Some((next.handle, event));
            }
        }
        None
    }

    fn advance_to(&mut self, time: u64) {
        self.now = self.now.max(time);
    }

    fn pending_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(effect: EffectId) -> TimerEvent {
        TimerEvent::EffectTick { owner: 1, effect }
    }

    #[test]
    fn test_events_fire_in_due_order() {
        let mut queue = TimerQueue::new();
        queue.schedule_after(300, tick(3));
        queue.schedule_after(100, tick(1));
        queue.schedule_after(200, tick(2));

        let mut fired = Vec::new();
        while let Some((_, event)) = queue.pop_due(1000) {
            fired.push((queue.now(), event));
        }
        assert_eq!(fired, vec![(100, tick(1)), (200, tick(2)), (300, tick(3))]);
    }

    #[test]
    fn test_same_due_time_is_fifo() {
        let mut queue = TimerQueue::new();
        queue.schedule_after(50, tick(1));
        queue.schedule_after(50, tick(2));
        assert_eq!(queue.pop_due(50).map(|(_, e)| e), Some(tick(1)));
        assert_eq!(queue.pop_due(50).map(|(_, e)| e), Some(tick(2)));
    }

    #[test]
    fn test_not_due_yet() {
        let mut queue = TimerQueue::new();
        queue.schedule_after(500, tick(1));
        assert!(queue.pop_due(499).is_none());
        queue.advance_to(499);
        assert_eq!(queue.now(), 499);
        assert!(queue.pop_due(500).is_some());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut queue = TimerQueue::new();
        let handle = queue.schedule_after(100, tick(1));
        assert!(queue.is_pending(handle));
        assert!(queue.cancel(handle));
        assert!(!queue.cancel(handle));
        assert!(!queue.is_pending(handle));
        assert!(queue.pop_due(1000).is_none(), "cancelled timer must not fire");
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_clock_never_goes_backwards() {
        let mut queue = TimerQueue::starting_at(1000);
        queue.advance_to(500);
        assert_eq!(queue.now(), 1000);
        queue.schedule_after(0, tick(1));
        assert!(queue.pop_due(1000).is_some());
        assert_eq!(queue.now(), 1000);
    }
}
