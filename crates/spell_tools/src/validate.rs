//! Data validation utilities.
//!
//! Every `*.ron` file in a data directory holds one spell line. Loading
//! builds a [`SpellBook`]; linting flags definitions the engine accepts but
//! that will not behave as authored.

use std::fs;
use std::path::{Path, PathBuf};

use spell_core::components::SpellId;
use spell_core::config::EngineConfig;
use spell_core::data::{EffectKind, SpellBook, SpellDefinition, SpellLine, TargetMode};
use spell_core::error::EngineError;
use spell_core::math::Fixed;

use crate::error::Result;

/// One authoring problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// File the problem was found in.
    pub path: PathBuf,
    /// Offending spell, when the problem is with one spell.
    pub spell: Option<SpellId>,
    /// Description.
    pub message: String,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.spell {
            Some(id) => write!(f, "{}: spell {id}: {}", self.path.display(), self.message),
            None => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

/// Outcome of validating a data directory.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// RON files read.
    pub files: usize,
    /// Spells that made it into the book.
    pub spells: usize,
    /// Problems found.
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    /// No problems found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// `*.ron` files directly inside `dir`, sorted by name.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn ron_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "ron") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read one spell line from a RON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn load_line(path: &Path) -> Result<SpellLine> {
    let source = fs::read_to_string(path)?;
    Ok(ron::from_str(&source)?)
}

/// Build a spell book from every line in `dir`, failing on the first
/// unreadable file or duplicate id.
///
/// # Errors
///
/// Returns an error if a file cannot be read or parsed, or if two spells
/// share an id.
pub fn load_book(dir: &Path) -> Result<SpellBook> {
    let mut book = SpellBook::new();
    for path in ron_files(dir)? {
        book.insert_line(load_line(&path)?)?;
    }
    tracing::debug!(lines = book.lines().count(), spells = book.len(), "Spell book loaded");
    Ok(book)
}

/// Read an engine config, with missing fields at their defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read, does not parse or names an
/// unknown field.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let source = fs::read_to_string(path)?;
    Ok(ron::from_str(&source)?)
}

/// Problems with a single definition.
#[must_use]
pub fn lint_spell(spell: &SpellDefinition) -> Vec<String> {
    let mut problems = Vec::new();
    if (spell.pulse || spell.focus) && spell.frequency_ms == 0 {
        problems.push("pulsing spell has no frequency and will never pulse".to_string());
    }
    if spell.focus && spell.duration_ms == 0 {
        problems.push("focus spell has no duration and only ends when broken".to_string());
    }
    if spell.kind.modifies_stats() && spell.modifiers.is_empty() {
        problems.push("stat effect has no modifiers".to_string());
    }
    if spell.kind == EffectKind::TargetModifier && !(0..=3).contains(&spell.value) {
        problems.push(format!("target modifier value {} is outside 0..=3", spell.value));
    }
    if matches!(spell.target, TargetMode::Area | TargetMode::Ground) && spell.radius == 0 {
        problems.push("ground-targeted spell has no radius".to_string());
    }
    if spell.kind == EffectKind::DamageOverTime && spell.duration_ms == 0 {
        problems.push("damage over time has no duration".to_string());
    }
    if spell.kind.is_damaging() && spell.damage <= Fixed::ZERO {
        problems.push("damaging spell has no damage".to_string());
    }
    if spell.kind.is_crowd_control() && spell.duration_ms == 0 {
        problems.push("crowd control has no duration".to_string());
    }
    problems
}

/// Validate all RON data files in a directory.
///
/// Parse failures, duplicate ids, dangling sub-spells and lint problems are
/// collected into the report rather than stopping at the first one.
///
/// # Errors
///
/// Returns an error only if the directory or one of its files cannot be
/// read.
pub fn validate_data_directory(path: &Path) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let mut book = SpellBook::new();
    let mut origins: Vec<(SpellId, PathBuf)> = Vec::new();

    for file in ron_files(path)? {
        report.files += 1;
        let source = fs::read_to_string(&file)?;
        let line: SpellLine = match ron::from_str(&source) {
            Ok(line) => line,
            Err(e) => {
                report.issues.push(Issue {
                    path: file,
                    spell: None,
                    message: format!("does not parse: {e}"),
                });
                continue;
            }
        };

        for spell in &line.spells {
            for message in lint_spell(spell) {
                report.issues.push(Issue {
                    path: file.clone(),
                    spell: Some(spell.id),
                    message,
                });
            }
        }
        let ids: Vec<SpellId> = line.spells.iter().map(|s| s.id).collect();
        match book.insert_line(line) {
            Ok(()) => origins.extend(ids.into_iter().map(|id| (id, file.clone()))),
            Err(EngineError::DuplicateSpell(id)) => report.issues.push(Issue {
                path: file,
                spell: Some(id),
                message: "duplicate spell id; line skipped".to_string(),
            }),
            Err(e) => report.issues.push(Issue {
                path: file,
                spell: None,
                message: e.to_string(),
            }),
        }
    }

    for (id, file) in &origins {
        let Some(sub_spell) = book.get_spell(*id).and_then(|s| s.sub_spell) else {
            continue;
        };
        if book.get_spell(sub_spell).is_none() {
            report.issues.push(Issue {
                path: file.clone(),
                spell: Some(*id),
                message: format!("sub-spell {sub_spell} is not defined"),
            });
        }
    }

    report.spells = book.len();
    tracing::info!(
        files = report.files,
        spells = report.spells,
        issues = report.issues.len(),
        "Validated spell data"
    );
    Ok(report)
}
