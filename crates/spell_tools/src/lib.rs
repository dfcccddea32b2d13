//! # Spell Development Tools
//!
//! Command-line tools for development:
//! - Spell data validators
//! - Engine config checks
//! - Scripted duels for eyeballing combat logs

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod duel;
pub mod error;
pub mod validate;

pub use error::{Result, ToolError};
