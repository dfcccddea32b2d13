//! Engine tuning knobs.
//!
//! Every rate the resolution pipeline reads lives here so a server can load
//! one RON document instead of scattering constants.
//!
//! # Example RON
//!
//! ```ron
//! (
//!     interrupt_duration_ms: 4500,
//!     pve_con_hit_percent: 10,
//!     buff_range: 5000,
//! )
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::math::{fixed_decimal, Fixed};

/// Tunable engine parameters. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound for the first and last cast slice.
    pub max_stage_length_ms: u32,
    /// Uninterruptible pause between resolution and the caster being free.
    pub settle_ms: u32,
    /// Interrupt window started on a living that is attacked.
    pub interrupt_duration_ms: u32,
    /// Lockout after a cast is interrupted.
    pub interrupt_recast_ms: u32,
    /// Interrupt chance against an even-level attacker.
    pub base_interrupt_chance: i32,
    /// Interrupt chance added per con level of the attacker.
    pub interrupt_chance_per_con: i32,
    /// Hit chance against an even-level target.
    pub base_hit_chance: i32,
    /// Hit chance lost per con level against uncontrolled NPCs.
    pub pve_con_hit_percent: i32,
    /// Hit chance gained per extra attacker on an NPC.
    pub missrate_reduction_per_attacker: i32,
    /// Damage reduction scale when hit chance is under 55.
    #[serde(with = "fixed_decimal")]
    pub hitchance_damage_reduction_multiplier: Fixed,
    /// Damage bonus scale when hit chance is over 100.
    #[serde(with = "fixed_decimal")]
    pub hitchance_damage_raise_multiplier: Fixed,
    /// Damage multiplier when both sides belong to a realm.
    #[serde(with = "fixed_decimal")]
    pub pvp_damage_multiplier: Fixed,
    /// Damage multiplier otherwise.
    #[serde(with = "fixed_decimal")]
    pub pve_damage_multiplier: Fixed,
    /// Resist chance multiplier against players.
    #[serde(with = "fixed_decimal")]
    pub player_resist_multiplier: Fixed,
    /// Resist chance multiplier against everything else.
    #[serde(with = "fixed_decimal")]
    pub living_resist_multiplier: Fixed,
    /// Resist chances strictly between this and 100 are clamped to it.
    pub resist_soft_cap: Option<i32>,
    /// Final damage never exceeds `damage × this × effectiveness`.
    pub damage_cap_multiplier: i32,
    /// Ceiling on ability-sourced resistance.
    pub secondary_resist_cap: i32,
    /// Ceiling on critical hit chance.
    pub max_critical_chance: i32,
    /// Crowd-control immunity when the spell names no multiplier.
    pub cc_immunity_ms: u32,
    /// Immunity windows also gate NPC owners.
    pub npc_immunity: bool,
    /// Maximum caster distance for concentration buffs; zero disables.
    pub buff_range: u32,
    /// Period of the concentration range check.
    pub buff_range_check_ms: u32,
    /// Simultaneous concentration holds per caster.
    pub max_concentration_effects: usize,
    /// Minimum spell range after modifiers.
    pub min_spell_range: u32,
    /// Duration clamp as a multiple of the authored duration.
    pub max_effect_duration_factor: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stage_length_ms: 1500,
            settle_ms: 100,
            interrupt_duration_ms: 4500,
            interrupt_recast_ms: 2000,
            base_interrupt_chance: 65,
            interrupt_chance_per_con: 10,
            base_hit_chance: 85,
            pve_con_hit_percent: 10,
            missrate_reduction_per_attacker: 0,
            hitchance_damage_reduction_multiplier: Fixed::from_num(4.3),
            hitchance_damage_raise_multiplier: Fixed::ZERO,
            pvp_damage_multiplier: Fixed::from_num(1),
            pve_damage_multiplier: Fixed::from_num(1),
            player_resist_multiplier: Fixed::from_num(1),
            living_resist_multiplier: Fixed::from_num(1),
            resist_soft_cap: None,
            damage_cap_multiplier: 3,
            secondary_resist_cap: 80,
            max_critical_chance: 50,
            cc_immunity_ms: 60_000,
            npc_immunity: true,
            buff_range: 0,
            buff_range_check_ms: 60_000,
            max_concentration_effects: 50,
            min_spell_range: 32,
            max_effect_duration_factor: 4,
        }
    }
}

impl EngineConfig {
    /// Parse a RON document.
    pub fn from_ron_str(source: &str) -> Result<Self> {
        ron::from_str(source).map_err(|e| EngineError::DataParseError {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_ron_str("()").expect("empty config parses");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_ron_str(
            "(buff_range: 5000, pvp_damage_multiplier: 0.75, resist_soft_cap: Some(70))",
        )
        .expect("config parses");
        assert_eq!(config.buff_range, 5000);
        assert_eq!(config.pvp_damage_multiplier, Fixed::from_num(0.75));
        assert_eq!(config.resist_soft_cap, Some(70));
        assert_eq!(config.base_hit_chance, 85);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(EngineConfig::from_ron_str("(buff_rnage: 5)").is_err());
    }
}
