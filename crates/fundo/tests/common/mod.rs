//! Shared fixture: a cursor data model and the `Move` command over it.

use std::sync::Arc;

use fundo::clap::{value_parser, Arg, ArgMatches};
use fundo::{Command, Result, UndoCursor, UndoError};
use parking_lot::Mutex;

/// The application data the `Move` command manipulates. The engine never
/// sees this type; it travels through the command's own shared handle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CursorModel {
    pub x: i64,
    pub y: i64,
}

/// Moves the cursor to an absolute position; undo restores the previous one.
pub struct MoveCommand {
    model: Arc<Mutex<CursorModel>>,
}

impl MoveCommand {
    pub fn new(model: Arc<Mutex<CursorModel>>) -> Arc<Self> {
        Arc::new(Self { model })
    }
}

impl Command for MoveCommand {
    fn name(&self) -> &str {
        "Move"
    }

    fn help(&self) -> &str {
        "Move the cursor to a new position"
    }

    fn schema(&self) -> fundo::clap::Command {
        fundo::clap::Command::new("Move").about(self.help().to_string()).arg(
            Arg::new("translate")
                .short('T')
                .num_args(2)
                .value_names(["X", "Y"])
                .allow_negative_numbers(true)
                .value_parser(value_parser!(i64))
                .help("Translate to X, Y position in abs values"),
        )
    }

    fn redo(&self, args: &ArgMatches) -> Result<()> {
        let Some(values) = args.get_many::<i64>("translate") else {
            return Err(UndoError::command("Expecting -T x y but found nothing"));
        };
        let values: Vec<i64> = values.copied().collect();
        let mut model = self.model.lock();
        model.x = values[0];
        model.y = values[1];
        Ok(())
    }

    fn undo(&self, cursor: &mut UndoCursor<'_>) {
        let mut model = self.model.lock();
        model.x = cursor.read_i64();
        model.y = cursor.read_i64();
    }

    fn backup_state(&self, cursor: &mut UndoCursor<'_>) {
        let model = self.model.lock();
        cursor.write_i64(model.x);
        cursor.write_i64(model.y);
    }
}

/// The command string for an absolute move.
pub fn move_str(x: i64, y: i64) -> String {
    format!("Move -T {x} {y}")
}
