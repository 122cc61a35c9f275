//! Error types for document parsing.

use thiserror::Error;

/// Errors raised while parsing an INI-style document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IniError {
    /// A key/value line appeared before any `[section]` header.
    #[error("line {line}: key/value pair outside of any section")]
    MissingSectionHeader { line: usize },

    /// The line is neither a header, a comment, nor a key/value pair.
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}
