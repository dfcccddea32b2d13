//! Scripted duels.
//!
//! Two players face each other and the attacker casts one spell whenever it
//! is free, until the defender dies, the attacker cannot continue or time
//! runs out. The zone's chat output becomes a readable log.

use serde::Serialize;

use spell_core::casting::{CastFailure, CastOutcome};
use spell_core::components::{EntityId, LivingKind, Realm, SpellId};
use spell_core::config::EngineConfig;
use spell_core::data::SpellBook;
use spell_core::error::EngineError;
use spell_core::living::LivingSpawnParams;
use spell_core::math::Vec2Fixed;
use spell_core::messages::{RecordingSink, SinkEvent};
use spell_core::zone::Zone;

use crate::error::Result;

/// Clock step between attempts.
const STEP_MS: u64 = 100;

/// Duel setup.
#[derive(Debug, Clone)]
pub struct DuelOptions {
    /// Spell the attacker casts.
    pub spell: SpellId,
    /// Roller seed.
    pub seed: u64,
    /// Attacker level.
    pub attacker_level: u8,
    /// Defender level.
    pub defender_level: u8,
    /// Distance between the two.
    pub distance: i32,
    /// Give up after this much zone time.
    pub max_ms: u64,
}

impl Default for DuelOptions {
    fn default() -> Self {
        Self {
            spell: 1,
            seed: 0,
            attacker_level: 50,
            defender_level: 50,
            distance: 500,
            max_ms: 60_000,
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Serialize)]
pub struct DuelReport {
    /// Casts that started or completed.
    pub casts: u32,
    /// Zone time when the duel ended.
    pub elapsed_ms: u64,
    /// Defender health left.
    pub defender_health: i32,
    /// Defender survived.
    pub defender_alive: bool,
    /// Attacker power left.
    pub attacker_mana: i32,
    /// Final zone hash, for comparing runs.
    pub state_hash: u64,
    /// Chat lines in the order they were sent.
    pub log: Vec<String>,
}

fn failure_is_transient(failure: &CastFailure) -> bool {
    matches!(
        failure,
        CastFailure::AlreadyCasting | CastFailure::Cooldown { .. } | CastFailure::Interrupted { .. }
    )
}

fn render_log(sink: &RecordingSink, names: &[(EntityId, &str)]) -> Vec<String> {
    let name_of = |id: EntityId| {
        names
            .iter()
            .find(|(n, _)| *n == id)
            .map_or("?", |(_, name)| *name)
    };
    sink.events()
        .into_iter()
        .filter_map(|event| match event {
            SinkEvent::Message { recipient, text, .. } => Some(format!("[{}] {text}", name_of(recipient))),
            SinkEvent::Area { text, .. } => Some(format!("[area] {text}")),
            SinkEvent::Animation { .. } => None,
        })
        .collect()
}

/// Run a duel with `book` and `config`.
///
/// # Errors
///
/// Returns an error if the spell is not in the book or the engine reports
/// an inconsistency.
pub fn run_duel(book: SpellBook, config: EngineConfig, options: &DuelOptions) -> Result<DuelReport> {
    if book.get_spell(options.spell).is_none() {
        return Err(EngineError::SpellNotFound(options.spell).into());
    }
    let sink = RecordingSink::new();
    let mut zone = Zone::new(book)
        .with_config(config)
        .with_seed(options.seed)
        .with_sink(sink.clone());

    let attacker = zone.spawn(LivingSpawnParams {
        name: "Attacker".to_string(),
        kind: LivingKind::Player,
        realm: Realm::Albion,
        level: options.attacker_level,
        max_health: 1000,
        max_mana: 1000,
        max_concentration: 100,
        ..Default::default()
    });
    let defender = zone.spawn(LivingSpawnParams {
        name: "Defender".to_string(),
        kind: LivingKind::Player,
        realm: Realm::Midgard,
        level: options.defender_level,
        position: Vec2Fixed::from_ints(options.distance, 0),
        facing: Vec2Fixed::from_ints(-1, 0),
        max_health: 1000,
        max_mana: 1000,
        max_concentration: 100,
        ..Default::default()
    });
    tracing::info!(spell = options.spell, seed = options.seed, "Duel started");

    let mut casts = 0;
    while zone.now() < options.max_ms {
        let (attacker_busy, defender_alive) = (
            zone.living(attacker).is_some_and(|l| l.is_casting()),
            zone.living(defender).is_some_and(|l| l.alive),
        );
        if !defender_alive {
            break;
        }
        if !attacker_busy {
            match zone.request_cast(attacker, options.spell, Some(defender))? {
                CastOutcome::Started(_) | CastOutcome::Completed => casts += 1,
                CastOutcome::Rejected(failure) if !failure_is_transient(&failure) => {
                    tracing::info!(reason = %failure, "Attacker cannot continue");
                    break;
                }
                _ => {}
            }
        }
        zone.advance(STEP_MS);
    }

    let defender_state = zone.living(defender).ok_or(EngineError::EntityNotFound(defender))?;
    let (defender_health, defender_alive) = (defender_state.health.current, defender_state.alive);
    let attacker_mana = zone
        .living(attacker)
        .ok_or(EngineError::EntityNotFound(attacker))?
        .mana
        .current;
    let report = DuelReport {
        casts,
        elapsed_ms: zone.now(),
        defender_health,
        defender_alive,
        attacker_mana,
        state_hash: zone.state_hash(),
        log: render_log(&sink, &[(attacker, "Attacker"), (defender, "Defender")]),
    };
    tracing::info!(
        casts = report.casts,
        elapsed_ms = report.elapsed_ms,
        defender_health = report.defender_health,
        "Duel finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spell_core::data::SpellDefinition;
    use spell_test_utils::fixtures::{bolt, book, stun};

    #[test]
    fn test_bolt_duel_runs_to_a_kill() {
        let options = DuelOptions {
            max_ms: 600_000,
            ..DuelOptions::default()
        };
        let report = run_duel(book(vec![bolt(1)]), EngineConfig::default(), &options).unwrap();
        assert!(!report.defender_alive);
        assert!(report.casts > 1);
        assert!(report.attacker_mana < 1000);
        assert!(report.log.iter().any(|l| l.starts_with("[Attacker] You hit Defender for")));
        assert!(report.log.iter().any(|l| l.starts_with("[Defender] Attacker hits you for")));
    }

    #[test]
    fn test_same_seed_same_duel() {
        let options = DuelOptions {
            seed: 7,
            max_ms: 30_000,
            ..DuelOptions::default()
        };
        let a = run_duel(book(vec![bolt(1)]), EngineConfig::default(), &options).unwrap();
        let b = run_duel(book(vec![bolt(1)]), EngineConfig::default(), &options).unwrap();
        assert_eq!(a.state_hash, b.state_hash);
        assert_eq!(a.log, b.log);
    }

    #[test]
    fn test_out_of_range_stops_early() {
        let options = DuelOptions {
            distance: 5000,
            ..DuelOptions::default()
        };
        let report = run_duel(book(vec![bolt(1)]), EngineConfig::default(), &options).unwrap();
        assert_eq!(report.casts, 0);
        assert_eq!(report.elapsed_ms, 0);
        assert_eq!(report.log, vec!["[Attacker] That target is too far away!".to_string()]);
    }

    #[test]
    fn test_stun_duel_hits_immunity() {
        let options = DuelOptions {
            spell: 2,
            max_ms: 20_000,
            ..DuelOptions::default()
        };
        let stun = SpellDefinition {
            recast_delay_ms: 10_000,
            ..stun(2)
        };
        let report = run_duel(book(vec![stun]), EngineConfig::default(), &options).unwrap();
        assert!(report.defender_alive);
        assert!(report
            .log
            .iter()
            .any(|l| l == "[Attacker] Defender can't have that effect again yet!"));
    }

    #[test]
    fn test_unknown_spell() {
        let options = DuelOptions {
            spell: 42,
            ..DuelOptions::default()
        };
        assert!(run_duel(book(vec![bolt(1)]), EngineConfig::default(), &options).is_err());
    }
}
