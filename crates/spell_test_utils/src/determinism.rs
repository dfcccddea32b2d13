//! Determinism testing utilities.
//!
//! Provides a harness for verifying that a zone produces identical results
//! given identical inputs.
//!
//! # Testing Strategy
//!
//! Two zone servers replaying the same requests must agree on every hit,
//! resist and expiry. Sources of non-determinism include:
//!
//! - **Floating-point math**: Different CPUs can produce different results.
//!   We use fixed-point arithmetic via [`spell_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Livings and casts live in `BTreeMap`s and are visited in id order.
//!
//! - **System randomness**: Every roll goes through the zone's seeded
//!   [`spell_core::rng::Roller`].
//!
//! - **Timer order**: Timers due at the same instant fire in the order they
//!   were scheduled.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual pipeline steps (damage, stacking, timers)
//! 2. **Property tests**: Random inputs must still produce deterministic outputs
//! 3. **Integration tests**: Full cast scenarios are reproducible
//! 4. **Parallel tests**: Running N zones in parallel all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use spell_core::persistence::{decode_records, encode_records};
use spell_core::zone::Zone;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of steps run.
    pub steps: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for a deterministic zone).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that every run agreed, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Zone is non-deterministic!\n\
                 Runs: {}\n\
                 Steps: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.steps,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Result of parallel zone runs.
#[derive(Debug, Clone)]
pub struct ParallelRunResult {
    /// Final state hash from each zone.
    pub hashes: Vec<u64>,
    /// Number of steps each zone ran.
    pub steps: u64,
    /// Number of zones run.
    pub num_zones: usize,
}

impl ParallelRunResult {
    /// Check if all zones produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert all zones matched.
    ///
    /// # Panics
    ///
    /// Panics if zones produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic() {
            let mut unique: Vec<u64> = self.hashes.clone();
            unique.sort_unstable();
            unique.dedup();
            panic!(
                "Parallel zones diverged!\n\
                 Zones: {}\n\
                 Steps: {}\n\
                 Unique hashes: {}\n\
                 All hashes: {:?}",
                self.num_zones,
                self.steps,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a scenario multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the scenario
/// * `steps` - Number of steps per run
/// * `setup` - Function to create the initial state
/// * `step` - Function to advance the state; receives the step index so a
///   script can issue requests at chosen steps
/// * `hash` - Function to compute the state hash
///
/// # Example
///
/// ```ignore
/// use spell_test_utils::determinism::verify_determinism;
///
/// let result = verify_determinism(
///     5,   // Run 5 times
///     100, // 100 steps each
///     || setup_duel(),
///     |zone, _| { zone.advance(100); },
///     |zone| zone.state_hash(),
/// );
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    steps: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S, u64),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for index in 0..steps {
            step(&mut state, index);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        steps,
    }
}

/// Simplified determinism check for [`Zone`].
///
/// Builds the zone twice, advances each by `step_ms` for `steps` steps and
/// compares the final state hashes.
pub fn verify_zone_determinism<F>(setup_fn: F, steps: u64, step_ms: u64) -> bool
where
    F: Fn() -> Zone,
{
    let result = verify_determinism(
        2,
        steps,
        &setup_fn,
        |zone, _| {
            zone.advance(step_ms);
        },
        Zone::state_hash,
    );
    result.is_deterministic
}

/// Run N zones in parallel using scoped threads and collect final hashes.
///
/// This is useful for catching non-determinism that only manifests
/// under thread scheduling variations, memory layout differences, etc.
///
/// # Panics
///
/// Panics if a worker thread panics.
pub fn run_parallel_zones_scoped<F>(setup_fn: F, num_zones: usize, steps: u64, step_ms: u64) -> ParallelRunResult
where
    F: Fn() -> Zone + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_zones)
            .map(|_| {
                s.spawn(|| {
                    let mut zone = setup_fn();
                    for _ in 0..steps {
                        zone.advance(step_ms);
                    }
                    zone.state_hash()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().expect("zone thread panicked"))
            .collect()
    });

    ParallelRunResult {
        hashes,
        steps,
        num_zones,
    }
}

/// Compare two zone runs step by step, finding the first divergence.
///
/// # Returns
///
/// `None` if the zones agree throughout, `Some(step)` if they diverge at
/// that step (0 means the freshly built zones already differ).
pub fn find_first_divergence<F>(setup_fn: F, steps: u64, step_ms: u64) -> Option<u64>
where
    F: Fn() -> Zone,
{
    let mut zone1 = setup_fn();
    let mut zone2 = setup_fn();

    if zone1.state_hash() != zone2.state_hash() {
        return Some(0);
    }

    for step in 1..=steps {
        zone1.advance(step_ms);
        zone2.advance(step_ms);

        if zone1.state_hash() != zone2.state_hash() {
            tracing::warn!(step, now = zone1.now(), "Zones diverged");
            return Some(step);
        }
    }

    None
}

/// Verify that every living's saved effects survive an encode/decode
/// round trip unchanged.
///
/// This is what a logout/login cycle relies on.
pub fn verify_saved_effects_stable(zone: &Zone) -> bool {
    let ids: Vec<_> = zone.livings().map(|l| l.id).collect();
    ids.into_iter().all(|id| {
        let Ok(records) = zone.save_effects(id) else {
            return false;
        };
        let Ok(bytes) = encode_records(&records) else {
            return false;
        };
        decode_records(&bytes).is_ok_and(|decoded| decoded == records)
    })
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for engine testing.
///
/// These strategies generate random but reproducible inputs for
/// property-based testing of the resolution pipeline.
pub mod strategies {
    use proptest::prelude::*;
    use spell_core::math::{Fixed, Vec2Fixed};

    /// Generate a level a living or spell may have.
    pub fn arb_level() -> impl Strategy<Value = u8> {
        1u8..=50u8
    }

    /// Generate an effectiveness multiplier between 0.5 and 1.5 in
    /// steps of 1/64, which fixed-point represents exactly.
    pub fn arb_effectiveness() -> impl Strategy<Value = Fixed> {
        (32i32..=96i32).prop_map(|n| Fixed::from_num(n) / Fixed::from_num(64))
    }

    /// Generate an authored effect duration, zero meaning unlimited.
    pub fn arb_duration_ms() -> impl Strategy<Value = u32> {
        prop_oneof![Just(0u32), 1000u32..600_000u32]
    }

    /// Generate a position within a zone.
    ///
    /// Range: -10000 to 10000 on each axis
    pub fn arb_position() -> impl Strategy<Value = Vec2Fixed> {
        (-10000i32..10000i32, -10000i32..10000i32).prop_map(|(x, y)| Vec2Fixed::from_ints(x, y))
    }

    /// Generate authored spell damage.
    pub fn arb_damage() -> impl Strategy<Value = Fixed> {
        (1i32..1000i32).prop_map(Fixed::from_num)
    }

    /// Generate a primary or secondary resist percentage.
    pub fn arb_resist() -> impl Strategy<Value = i32> {
        -50i32..=100i32
    }

    /// Generate a sequence of millisecond advances.
    pub fn arb_advance_sequence(max_len: usize) -> impl Strategy<Value = Vec<u64>> {
        prop::collection::vec(1u64..5000u64, 0..max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{bolt, stun, TestWorld};
    use spell_core::components::Realm;
    use spell_core::config::EngineConfig;
    use spell_core::data::SpellBook;
    use spell_core::living::LivingSpawnParams;

    /// Two realm players trading bolts on a seeded roller.
    fn create_duel(seed: u64) -> Zone {
        let book = crate::fixtures::book(vec![bolt(1), stun(2)]);
        let mut zone = Zone::new(book).with_config(EngineConfig::default()).with_seed(seed);
        let a = zone.spawn(LivingSpawnParams {
            name: "Alb".to_string(),
            kind: spell_core::components::LivingKind::Player,
            realm: Realm::Albion,
            level: 50,
            max_health: 2000,
            max_mana: 500,
            ..Default::default()
        });
        let b = zone.spawn(LivingSpawnParams {
            name: "Mid".to_string(),
            kind: spell_core::components::LivingKind::Player,
            realm: Realm::Midgard,
            level: 48,
            position: spell_core::math::Vec2Fixed::from_ints(600, 0),
            facing: spell_core::math::Vec2Fixed::from_ints(-1, 0),
            max_health: 2000,
            max_mana: 500,
            ..Default::default()
        });
        zone.request_cast(a, 1, Some(b)).expect("livings exist");
        zone.request_cast(b, 1, Some(a)).expect("livings exist");
        zone
    }

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 10, || 0u64, |n, i| *n += i, |n| *n);
        result.assert_deterministic();
        assert_eq!(result.hashes, vec![45, 45, 45]);
    }

    #[test]
    fn test_empty_zone_determinism() {
        assert!(verify_zone_determinism(|| Zone::new(SpellBook::new()), 20, 250));
    }

    #[test]
    fn test_duel_determinism() {
        assert!(verify_zone_determinism(|| create_duel(7), 40, 100));
    }

    #[test]
    fn test_scripted_duel_determinism() {
        let result = verify_determinism(
            3,
            60,
            || create_duel(11),
            |zone, step| {
                // recast every 4 seconds once the first bolts have landed
                if step % 40 == 39 {
                    for caster in [1, 2] {
                        let target = 3 - caster;
                        let _ = zone.request_cast(caster, 1, Some(target));
                    }
                }
                zone.advance(100);
            },
            Zone::state_hash,
        );
        result.assert_deterministic();
    }

    #[test]
    fn test_find_divergence_on_deterministic_zone() {
        assert_eq!(find_first_divergence(|| create_duel(3), 50, 100), None);
    }

    #[test]
    fn test_find_divergence_when_damage_differs() {
        use spell_core::math::Fixed;
        use spell_core::rng::ScriptedRoller;
        use std::sync::atomic::{AtomicBool, Ordering};

        let halved = AtomicBool::new(false);
        let setup = || {
            let config = EngineConfig {
                pvp_damage_multiplier: if halved.fetch_xor(true, Ordering::SeqCst) {
                    Fixed::from_num(0.5)
                } else {
                    Fixed::from_num(1)
                },
                ..EngineConfig::default()
            };
            let mut world = TestWorld::with(vec![bolt(1)], ScriptedRoller::new(), config);
            let a = world.player("Alb", Realm::Albion, 50);
            let b = world.player("Mid", Realm::Midgard, 50);
            world.place(b, 600, 0);
            world.zone.request_cast(a, 1, Some(b)).expect("livings exist");
            world.zone
        };
        // the bolt resolves at the end of its 3 second cast
        assert_eq!(find_first_divergence(setup, 50, 100), Some(30));
    }

    #[test]
    fn test_parallel_duels() {
        let result = run_parallel_zones_scoped(|| create_duel(5), 4, 40, 100);
        assert_eq!(result.hashes.len(), 4);
        result.assert_deterministic();
    }

    #[test]
    fn test_saved_effects_stable() {
        let mut world = TestWorld::new(vec![crate::fixtures::strength_buff(1, 20, 30_000)]);
        let caster = world.player("Caster", Realm::Albion, 50);
        let ally = world.player("Ally", Realm::Albion, 50);
        world.place(ally, 100, 0);
        world.zone.request_cast(caster, 1, Some(ally)).expect("livings exist");
        world.zone.advance(5000);
        assert!(verify_saved_effects_stable(&world.zone));
    }

    #[test]
    fn test_compute_hash_stable() {
        assert_eq!(compute_hash(&(1u32, "bolt")), compute_hash(&(1u32, "bolt")));
        assert_ne!(compute_hash(&1u32), compute_hash(&2u32));
    }

    mod props {
        use super::super::strategies::*;
        use super::*;
        use proptest::prelude::*;
        use spell_core::math::Fixed;

        proptest! {
            #[test]
            fn prop_duel_deterministic_for_any_advances(seed in any::<u64>(), advances in arb_advance_sequence(20)) {
                let run = || {
                    let mut zone = create_duel(seed);
                    for delta in &advances {
                        zone.advance(*delta);
                    }
                    zone.state_hash()
                };
                prop_assert_eq!(run(), run());
            }

            #[test]
            fn prop_effectiveness_in_range(eff in arb_effectiveness()) {
                prop_assert!(eff >= Fixed::from_num(0.5));
                prop_assert!(eff <= Fixed::from_num(1.5));
            }
        }
    }
}
