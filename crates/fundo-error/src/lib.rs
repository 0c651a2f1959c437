//! Error types shared across the frankenundo workspace.
//!
//! One enum, structured variants for the cases callers actually match on,
//! convenience constructors for the rest. User-facing operations render the
//! message via `Display`; nothing in the engine panics on user input or on
//! disk contents.

use thiserror::Error;

/// Primary error type for undo-engine operations.
#[derive(Error, Debug)]
pub enum UndoError {
    /// The dispatch form of `execute` did not find the command name in the
    /// registry. The message text is part of the public contract.
    #[error("Unable find the command: {name}")]
    UnknownCommand { name: String },

    /// The command string did not parse against the command's argument
    /// schema. Carries the parser's own message verbatim.
    #[error("{0}")]
    Parse(String),

    /// The command's apply step rejected the parsed arguments or failed to
    /// apply them. Carries the command's own message verbatim.
    #[error("{0}")]
    Command(String),

    /// File I/O error while touching the undo store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An on-disk entry or index file does not decode.
    #[error("undo store is malformed: {detail}")]
    StoreCorrupt { detail: String },

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl UndoError {
    /// Create an unknown-command error.
    pub fn unknown_command(name: impl Into<String>) -> Self {
        Self::UnknownCommand { name: name.into() }
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a command (domain) error.
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a store-corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using [`UndoError`].
pub type Result<T> = std::result::Result<T, UndoError>;
