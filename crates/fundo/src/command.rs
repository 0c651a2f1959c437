//! The command dispatch contract.
//!
//! A command plugs into the engine with a stable name, a help string, and a
//! `clap` argument schema. The engine tokenizes the command string, parses
//! it against the schema, and hands the resulting [`ArgMatches`] to
//! [`Command::redo`]. Commands carry no parser state of their own, so a
//! re-parse during redo sees exactly the grammar the first execute saw.
//!
//! The backup/undo pair communicates through an [`UndoCursor`] over the
//! entry's payload: `backup_state` encodes whatever it needs to reverse the
//! upcoming `redo`, and `undo` decodes it again. The engine guarantees a
//! fresh cursor for every operation and holds the entry's lock across
//! `undo`, serializing it with background warm-ups of the same entry.

use clap::ArgMatches;
use fundo_error::{Result, UndoError};
use fundo_types::UndoCursor;

/// A user-defined, undoable command.
///
/// Implementations hold their own shared handle to the application data they
/// manipulate (typically an `Arc<Mutex<T>>`); the engine treats that data as
/// opaque.
pub trait Command: Send + Sync {
    /// Stable command name: an ASCII identifier with no spaces. This is the
    /// registry key and the first token of every recorded command string.
    fn name(&self) -> &str;

    /// One-line human description, surfaced through the schema's help.
    fn help(&self) -> &str;

    /// The argument schema. `clap` supplies `-h`/`--help` natively; the
    /// engine short-circuits help requests without recording anything.
    fn schema(&self) -> clap::Command;

    /// Apply the effect described by the parsed arguments.
    ///
    /// Returning an error during `execute` discards the pending entry and
    /// leaves history unchanged.
    fn redo(&self, args: &ArgMatches) -> Result<()>;

    /// Reverse the effect by consuming the payload previously produced by
    /// [`Command::backup_state`].
    fn undo(&self, cursor: &mut UndoCursor<'_>);

    /// Capture enough state to reverse the upcoming [`Command::redo`].
    fn backup_state(&self, cursor: &mut UndoCursor<'_>);
}

/// Extract the command name from a command string: everything before the
/// first space, or the whole string if there is none.
#[must_use]
pub fn command_name(cmd_str: &str) -> &str {
    cmd_str.split_once(' ').map_or(cmd_str, |(name, _)| name)
}

/// Outcome of parsing a command string against a schema.
pub(crate) enum Parsed {
    /// Arguments parsed; ready to apply.
    Matches(ArgMatches),
    /// The help flag was present; help has been printed and nothing is to be
    /// recorded.
    HelpShown,
}

/// Tokenize `cmd_str` on whitespace and parse it against `cmd`'s schema.
pub(crate) fn parse_command(cmd: &dyn Command, cmd_str: &str) -> Result<Parsed> {
    match cmd.schema().try_get_matches_from(cmd_str.split_whitespace()) {
        Ok(matches) => Ok(Parsed::Matches(matches)),
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            Ok(Parsed::HelpShown)
        }
        Err(err) => Err(UndoError::parse(err.to_string())),
    }
}
