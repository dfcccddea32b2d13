//! Seeded randomness for hit, resist, variance and critical rolls.
//!
//! The engine never touches system randomness. Every roll goes through a
//! [`Roller`] owned by the zone, so a zone seeded the same way replays the
//! same fight.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Source of gameplay rolls.
pub trait Roller {
    /// Succeed with `percent` chance. Values at or below 0 never succeed,
    /// values at or above 100 always do.
    fn chance(&mut self, percent: i32) -> bool;

    /// Uniform integer in `[min, max]`. Returns `min` when `max <= min`.
    fn range(&mut self, min: i32, max: i32) -> i32;
}

/// Deterministic linear congruential roller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpellRng {
    state: u64,
}

impl SpellRng {
    /// Seed a new roller.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.wrapping_add(0x9E37_79B9_7F4A_7C15),
        }
    }

    fn next(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(0x5851_F42D_4C95_7F2D)
            .wrapping_add(0x1405_7B7E_F767_814F);
        // low bits of a power-of-two LCG cycle quickly
        self.state >> 33
    }
}

impl Roller for SpellRng {
    fn chance(&mut self, percent: i32) -> bool {
        if percent <= 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.range(0, 99) < percent
    }

    fn range(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        let span = (i64::from(max) - i64::from(min) + 1) as u64;
        (i64::from(min) + (self.next() % span) as i64) as i32
    }
}

/// Roller answering from queued outcomes.
///
/// Used by tests and by replays of recorded fights. When a queue runs dry
/// chances fall back to a fixed answer and ranges to their lower bound.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRoller {
    chances: VecDeque<bool>,
    ranges: VecDeque<i32>,
    default_chance: bool,
    range_to_max: bool,
}

impl ScriptedRoller {
    /// Roller that fails every chance and rolls every range low.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Roller whose unscripted chances all succeed.
    #[must_use]
    pub fn always_succeed() -> Self {
        Self {
            default_chance: true,
            ..Self::default()
        }
    }

    /// Make unscripted ranges roll their upper bound.
    #[must_use]
    pub fn rolling_high(mut self) -> Self {
        self.range_to_max = true;
        self
    }

    /// Queue chance outcomes.
    #[must_use]
    pub fn with_chances(mut self, outcomes: impl IntoIterator<Item = bool>) -> Self {
        self.chances.extend(outcomes);
        self
    }

    /// Queue range outcomes; each is clamped into the requested range.
    #[must_use]
    pub fn with_ranges(mut self, outcomes: impl IntoIterator<Item = i32>) -> Self {
        self.ranges.extend(outcomes);
        self
    }

    /// Outcomes not yet consumed.
    #[must_use]
    pub fn pending(&self) -> (usize, usize) {
        (self.chances.len(), self.ranges.len())
    }
}

impl Roller for ScriptedRoller {
    fn chance(&mut self, percent: i32) -> bool {
        if percent <= 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.chances.pop_front().unwrap_or(self.default_chance)
    }

    fn range(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        match self.ranges.pop_front() {
            Some(v) => v.clamp(min, max),
            None if self.range_to_max => max,
            None => min,
        }
    }
}
