//! Read-only lookup over every authored spell line.

use std::collections::BTreeMap;

use crate::components::SpellId;
use crate::error::{EngineError, Result};

use super::spell_data::SpellDefinition;
use super::spell_line::SpellLine;

/// All spell lines known to a zone, indexed by spell id and line key.
///
/// Built once at startup and never mutated while casts are running.
#[derive(Debug, Clone, Default)]
pub struct SpellBook {
    lines: Vec<SpellLine>,
    by_spell: BTreeMap<SpellId, (usize, usize)>,
    by_key: BTreeMap<String, usize>,
}

impl SpellBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a book from already-parsed lines.
    pub fn from_lines(lines: impl IntoIterator<Item = SpellLine>) -> Result<Self> {
        let mut book = Self::new();
        for line in lines {
            book.insert_line(line)?;
        }
        Ok(book)
    }

    /// Parse a RON list of spell lines.
    pub fn from_ron_str(source: &str) -> Result<Self> {
        let lines: Vec<SpellLine> = ron::from_str(source).map_err(|e| EngineError::DataParseError {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        Self::from_lines(lines)
    }

    /// Add a line, rejecting duplicate line keys or spell ids.
    pub fn insert_line(&mut self, line: SpellLine) -> Result<()> {
        if self.by_key.contains_key(&line.key) {
            return Err(EngineError::InvalidState(format!(
                "duplicate spell line key '{}'",
                line.key
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for spell in &line.spells {
            if self.by_spell.contains_key(&spell.id) || !seen.insert(spell.id) {
                return Err(EngineError::DuplicateSpell(spell.id));
            }
        }

        let line_index = self.lines.len();
        for (spell_index, spell) in line.spells.iter().enumerate() {
            self.by_spell.insert(spell.id, (line_index, spell_index));
        }
        self.by_key.insert(line.key.clone(), line_index);
        self.lines.push(line);
        Ok(())
    }

    /// Look up a spell by id.
    #[must_use]
    pub fn get_spell(&self, id: SpellId) -> Option<&SpellDefinition> {
        let (line, spell) = *self.by_spell.get(&id)?;
        self.lines.get(line)?.spells.get(spell)
    }

    /// Look up a spell by id, failing with [`EngineError::SpellNotFound`].
    pub fn spell(&self, id: SpellId) -> Result<&SpellDefinition> {
        self.get_spell(id).ok_or(EngineError::SpellNotFound(id))
    }

    /// Look up a line by key.
    #[must_use]
    pub fn get_spell_line(&self, key: &str) -> Option<&SpellLine> {
        self.by_key.get(key).and_then(|&i| self.lines.get(i))
    }

    /// The line a spell belongs to.
    #[must_use]
    pub fn line_of(&self, id: SpellId) -> Option<&SpellLine> {
        let (line, _) = *self.by_spell.get(&id)?;
        self.lines.get(line)
    }

    /// Spells sharing a non-zero recast timer group, in id order.
    pub fn spells_in_timer_group(&self, group: u32) -> impl Iterator<Item = &SpellDefinition> {
        self.by_spell
            .keys()
            .filter_map(move |id| self.get_spell(*id))
            .filter(move |s| group != 0 && s.shared_timer_group == group)
    }

    /// Every line in insertion order.
    pub fn lines(&self) -> impl Iterator<Item = &SpellLine> {
        self.lines.iter()
    }

    /// Number of spells across all lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_spell.len()
    }

    /// Whether the book holds no spells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_spell.is_empty()
    }
}
