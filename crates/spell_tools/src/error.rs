//! Error types for the development tools.

use thiserror::Error;

use spell_core::error::EngineError;

/// Result type for tool operations.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Tool-side failures: file access, RON syntax and engine rejections.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Reading a file or directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A RON document did not parse.
    #[error("RON parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Writing RON failed.
    #[error("RON write error: {0}")]
    Write(#[from] ron::Error),

    /// Writing JSON failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine refused the data.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A file parsed but is not usable.
    #[error("{path}: {message}")]
    Invalid {
        /// File at fault.
        path: String,
        /// What is wrong with it.
        message: String,
    },
}
