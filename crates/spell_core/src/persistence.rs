//! Saving and restoring running effects.
//!
//! A saved record carries what is needed to resume an effect on the same
//! owner later: the spell, how long it has left, its effectiveness and the
//! exact stat changes it made. Restoring applies those changes verbatim and
//! skips the resist roll, stacking checks and start messages.
//!
//! Records are encoded with bincode behind a format version.

use serde::{Deserialize, Serialize};

use crate::components::{EffectId, EntityId, SpellId};
use crate::data::EffectKind;
use crate::effects::{ActiveEffect, EffectPhase, StatModifier, Subscription};
use crate::error::{EngineError, Result};
use crate::math::{fixed_serde, Fixed};
use crate::zone::Zone;

/// Current encoding version for saved effects.
pub const SAVED_EFFECT_VERSION: u32 = 1;

/// A running effect frozen for storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedEffectRecord {
    /// Spell that created the effect.
    pub spell: SpellId,
    /// Line the spell belongs to.
    pub line: String,
    /// Living that cast it.
    pub caster: EntityId,
    /// Time left; zero for unlimited effects.
    pub remaining_ms: u32,
    /// Strength multiplier.
    #[serde(with = "fixed_serde")]
    pub effectiveness: Fixed,
    /// Stat changes the effect made.
    pub applied: Vec<StatModifier>,
}

#[derive(Serialize, Deserialize)]
struct SavedEffects {
    version: u32,
    records: Vec<SavedEffectRecord>,
}

/// Encode records for storage.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_records(records: &[SavedEffectRecord]) -> Result<Vec<u8>> {
    let saved = SavedEffects {
        version: SAVED_EFFECT_VERSION,
        records: records.to_vec(),
    };
    bincode::serialize(&saved).map_err(|e| EngineError::InvalidState(format!("Failed to serialize effects: {e}")))
}

/// Decode records produced by [`encode_records`].
///
/// # Errors
///
/// Returns an error if the bytes are corrupt or from another format version.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<SavedEffectRecord>> {
    let saved: SavedEffects = bincode::deserialize(bytes)
        .map_err(|e| EngineError::InvalidState(format!("Failed to deserialize effects: {e}")))?;
    if saved.version != SAVED_EFFECT_VERSION {
        return Err(EngineError::InvalidState(format!(
            "Saved effect version mismatch: expected {SAVED_EFFECT_VERSION}, got {}",
            saved.version
        )));
    }
    Ok(saved.records)
}

impl Zone {
    /// Freeze one active effect.
    ///
    /// # Errors
    ///
    /// Fails for unknown livings or effects, and for effects in their
    /// immunity window, which have nothing left to restore.
    pub fn save_effect_state(&self, owner: EntityId, id: EffectId) -> Result<SavedEffectRecord> {
        let effect = self
            .get(owner)?
            .effects
            .get(id)
            .ok_or(EngineError::EffectNotFound(id))?;
        if effect.phase != EffectPhase::Active {
            return Err(EngineError::InvalidState(format!("effect {id} is in its immunity window")));
        }
        let remaining_ms = if effect.duration_ms == 0 {
            0
        } else {
            effect.remaining_ms(self.now())
        };
        Ok(SavedEffectRecord {
            spell: effect.spell,
            line: effect.line.clone(),
            caster: effect.caster,
            remaining_ms,
            effectiveness: effect.effectiveness,
            applied: effect.applied.clone(),
        })
    }

    /// Freeze every active effect on `owner` that outlives a logout:
    /// concentration and pulsing effects end with their caster instead.
    ///
    /// # Errors
    ///
    /// Fails for unknown livings.
    pub fn save_effects(&self, owner: EntityId) -> Result<Vec<SavedEffectRecord>> {
        let ids: Vec<EffectId> = self
            .get(owner)?
            .effects
            .iter()
            .filter(|e| e.phase == EffectPhase::Active && e.hold.is_none() && e.link.is_none())
            .map(|e| e.id)
            .collect();
        ids.into_iter().map(|id| self.save_effect_state(owner, id)).collect()
    }

    /// Resume a saved effect on `owner`.
    ///
    /// # Errors
    ///
    /// Fails for unknown livings and for spells missing from the book.
    pub fn restore_effect(&mut self, owner: EntityId, record: &SavedEffectRecord) -> Result<EffectId> {
        let spell = self.book.spell(record.spell)?;
        let (kind, frequency_ms, positive) = (spell.kind, spell.frequency_ms, spell.has_positive_effect());
        self.get(owner)?;

        let id = self.allocate_effect_id();
        let effect = ActiveEffect {
            id,
            owner,
            caster: record.caster,
            spell: record.spell,
            line: record.line.clone(),
            kind,
            duration_ms: record.remaining_ms,
            frequency_ms,
            effectiveness: record.effectiveness,
            started_at: self.now(),
            phase: EffectPhase::Active,
            timer: None,
            range_timer: None,
            applied: record.applied.clone(),
            subscriptions: if kind == EffectKind::Mesmerize {
                vec![Subscription::OwnerDamaged]
            } else {
                Vec::new()
            },
            hold: None,
            link: None,
            positive,
        };
        self.get_mut(owner)?.effects.insert(effect);
        self.start_effect(owner, id, false)?;
        tracing::debug!(owner, effect = id, spell = record.spell, "Effect restored");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BonusCategory, Property};

    fn create_test_record() -> SavedEffectRecord {
        SavedEffectRecord {
            spell: 7,
            line: "enhancements".to_string(),
            caster: 3,
            remaining_ms: 42_000,
            effectiveness: Fixed::from_num(3) / Fixed::from_num(4),
            applied: vec![StatModifier {
                property: Property::Strength,
                category: BonusCategory::BaseBuff,
                magnitude: 18,
            }],
        }
    }

    #[test]
    fn test_encode_decode_preserves_records() {
        let records = vec![create_test_record()];
        let bytes = encode_records(&records).unwrap();
        let decoded = decode_records(&bytes).unwrap();
        assert_eq!(decoded, records);
        assert_eq!(decoded[0].effectiveness.to_bits(), records[0].effectiveness.to_bits());
    }

    #[test]
    fn test_decode_rejects_other_version() {
        let saved = SavedEffects {
            version: SAVED_EFFECT_VERSION + 1,
            records: Vec::new(),
        };
        let bytes = bincode::serialize(&saved).unwrap();
        assert!(matches!(decode_records(&bytes), Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_records(&[0xFF, 0x01]).is_err());
    }
}
