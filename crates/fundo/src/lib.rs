//! frankenundo: an embeddable undo/redo engine that survives process
//! restarts.
//!
//! The engine records a linear sequence of executed commands, persists each
//! command's pre-state to disk, and lets callers walk backward (undo) and
//! forward (redo) along that sequence. Long histories stay cheap: only a
//! sliding window of entries keeps its binary undo payload in memory, the
//! rest live on disk and are paged in on demand by a small background worker
//! pool.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fundo::{UndoConfig, UndoSystem};
//!
//! # struct MoveCommand;
//! # impl fundo::Command for MoveCommand {
//! #     fn name(&self) -> &str { "Move" }
//! #     fn help(&self) -> &str { "" }
//! #     fn schema(&self) -> fundo::clap::Command { fundo::clap::Command::new("Move") }
//! #     fn redo(&self, _: &fundo::clap::ArgMatches) -> fundo::Result<()> { Ok(()) }
//! #     fn undo(&self, _: &mut fundo::UndoCursor<'_>) {}
//! #     fn backup_state(&self, _: &mut fundo::UndoCursor<'_>) {}
//! # }
//! let mut undo = UndoSystem::open(UndoConfig::persistent("state/undo"))?;
//! undo.register(Arc::new(MoveCommand));
//! undo.execute("Move -T 10 20", -1)?;
//! undo.undo();
//! undo.redo();
//! # Ok::<(), fundo::UndoError>(())
//! ```

pub mod command;
mod config;
mod engine;

pub use command::{command_name, Command};
pub use config::UndoConfig;
pub use engine::UndoSystem;
pub use fundo_error::{Result, UndoError};
pub use fundo_types::{EntryState, HistoryEntry, Timestamp, UndoCursor};

// Re-exported so command implementations build their argument schemas
// against the same parser version the engine parses with.
pub use clap;
