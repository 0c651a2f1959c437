//! The undo engine: timeline, cursor, LRU window, command registry.
//!
//! # Threading
//!
//! A single owner thread drives every public operation (`&mut self` enforces
//! that at compile time); the background workers of [`fundo_io::IoEngine`]
//! only ever touch individual entries through their per-entry locks. The
//! owner never holds the queue lock while locking an entry, or vice versa.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fundo_error::{Result, UndoError};
use fundo_io::{IoEngine, Job};
use fundo_store as store;
use fundo_types::{HistoryEntry, Timestamp, UndoCursor};
use tracing::{debug, error, info};

use crate::command::{command_name, parse_command, Command, Parsed};
use crate::config::UndoConfig;

/// Fallback suggestion for callers with no usable last command.
const SUGGEST_FALLBACK: &str = "-Move 0 0";

/// An embeddable undo/redo engine with an optional on-disk store.
///
/// The engine records executed commands on a linear timeline with a cursor
/// `undo_index`: entries left of the cursor are currently applied, entries
/// at or right of it are redo-available. Executing a new command mid-stack
/// prunes the redo tail from memory and disk before appending.
pub struct UndoSystem {
    config: UndoConfig,
    history: Vec<Arc<HistoryEntry>>,
    undo_index: usize,
    /// Entries whose payload is (or is about to be) resident, oldest first.
    lru: VecDeque<Arc<HistoryEntry>>,
    commands: HashMap<String, Arc<dyn Command>>,
    io: Option<IoEngine>,
    /// Monotonic tiebreaker folded into every timestamp.
    command_counter: u64,
    /// Highest timestamp handed out or loaded so far.
    last_timestamp: u64,
    shut_down: bool,
}

impl UndoSystem {
    // -----------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------

    /// Open an engine with the given configuration.
    ///
    /// In persistent mode this spawns the I/O workers and, when
    /// `auto_load_save` is set and an index file exists, reloads the prior
    /// history. A missing index file is not an error (first-time use).
    pub fn open(config: UndoConfig) -> Result<Self> {
        config.validate();
        let io = config
            .dir
            .clone()
            .map(|dir| IoEngine::start(dir, config.io_workers));
        if let Some(io) = &io {
            info!(dir = %io.dir().display(), workers = config.io_workers, "undo store opened");
        }

        let auto_load = config.auto_load_save;
        let mut system = Self {
            config,
            history: Vec::new(),
            undo_index: 0,
            lru: VecDeque::new(),
            commands: HashMap::new(),
            io,
            command_counter: 0,
            last_timestamp: 0,
            shut_down: false,
        };

        if auto_load {
            let index = system
                .io
                .as_ref()
                .map(|io| store::index_path(io.dir()))
                .expect("validated: auto_load_save requires a store directory");
            if index.exists() {
                system.load_timestamps(None)?;
            }
        }
        Ok(system)
    }

    /// Open a pure in-memory engine. Cannot fail.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::open(UndoConfig::in_memory()).expect("in-memory open is infallible")
    }

    /// Register a command under its [`Command::name`].
    ///
    /// # Panics
    ///
    /// Panics on duplicate names (programmer error).
    pub fn register(&mut self, cmd: Arc<dyn Command>) {
        let name = cmd.name().to_owned();
        debug_assert!(
            !name.is_empty() && name.chars().all(|c| c.is_ascii() && c != ' '),
            "command names are ASCII identifiers without spaces"
        );
        let previous = self.commands.insert(name.clone(), cmd);
        assert!(previous.is_none(), "command {name:?} registered twice");
    }

    // -----------------------------------------------------------------
    // Execute / Undo / Redo
    // -----------------------------------------------------------------

    /// Dispatch form of execute: resolve the command by the first token of
    /// `cmd_str`, then run the typed form. `user_id == -1` substitutes the
    /// configured default user.
    pub fn execute(&mut self, cmd_str: &str, user_id: i32) -> Result<()> {
        let name = command_name(cmd_str);
        let cmd = self
            .commands
            .get(name)
            .cloned()
            .ok_or_else(|| UndoError::unknown_command(name))?;
        self.execute_with(&cmd, cmd_str, user_id)
    }

    /// Typed form of execute: parse `cmd_str` against `cmd`'s schema, snapshot
    /// the pre-state, apply, then record.
    ///
    /// A parse failure, a help request, or a command error leaves history
    /// unchanged; help additionally prints the schema's help text and
    /// succeeds.
    pub fn execute_with(
        &mut self,
        cmd: &Arc<dyn Command>,
        cmd_str: &str,
        user_id: i32,
    ) -> Result<()> {
        assert!(!self.shut_down, "engine used after shutdown");

        let matches = match parse_command(cmd.as_ref(), cmd_str)? {
            Parsed::HelpShown => return Ok(()),
            Parsed::Matches(matches) => matches,
        };

        let user_id = if user_id == -1 {
            self.config.default_user
        } else {
            user_id
        };
        let timestamp = self.next_timestamp();

        // The backup runs over a plain buffer: the entry does not exist yet,
        // so no lock is involved. The buffer becomes the entry's payload.
        let mut payload = Vec::new();
        {
            let mut cursor = UndoCursor::new(&mut payload);
            cmd.backup_state(&mut cursor);
        }

        // On failure the pending entry is never created: history unchanged.
        cmd.redo(&matches)?;

        let entry = Arc::new(HistoryEntry::new(user_id, timestamp, cmd_str, payload));
        self.prune_history();
        self.history.push(Arc::clone(&entry));
        self.undo_index += 1;

        if let Some(io) = &self.io {
            io.push(Job::SaveToDisk(Arc::clone(&entry)));
            self.lru.push_back(entry);
            self.update_lru();
        }
        Ok(())
    }

    /// Step the cursor one entry back and reverse that entry's effect.
    /// No-op when everything is already undone.
    pub fn undo(&mut self) {
        assert!(!self.shut_down, "engine used after shutdown");
        if self.undo_index == 0 {
            return;
        }
        self.undo_index -= 1;

        let entry = Arc::clone(&self.history[self.undo_index]);
        let command = entry.command();
        let cmd = self.resolve(command_name(&command));

        // The payload may have been evicted. Load it on this thread rather
        // than waiting on the worker pool: the undo below must serialize
        // with any eviction or warm-up of the same entry, and the per-entry
        // lock gives us that only if we do the read ourselves.
        if !entry.is_cached() {
            let io = self
                .io
                .as_ref()
                .expect("in-memory entries always keep their payload");
            Job::WarmupCache(Arc::clone(&entry)).run(io.dir());
        }

        {
            let mut state = entry.lock();
            assert!(
                !state.payload.is_empty(),
                "undo payload unavailable for entry {}",
                entry.timestamp()
            );
            let mut cursor = UndoCursor::new(&mut state.payload);
            cmd.undo(&mut cursor);
        }

        if self.io.is_some() {
            self.lru.push_back(entry);
            self.update_lru();
        }
    }

    /// Step the cursor one entry forward and re-apply that entry's effect.
    /// No-op when nothing is undone.
    pub fn redo(&mut self) {
        assert!(!self.shut_down, "engine used after shutdown");
        if self.undo_index == self.history.len() {
            return;
        }

        let entry = Arc::clone(&self.history[self.undo_index]);
        let command = entry.command();
        let cmd = self.resolve(command_name(&command));

        {
            // Hold the entry lock so the re-apply serializes with a
            // background warm-up of the same entry.
            let _state = entry.lock();
            let matches = match cmd.schema().try_get_matches_from(command.split_whitespace()) {
                Ok(matches) => matches,
                Err(err) => {
                    // This command parsed and applied once already; failing
                    // now is an invariant violation, not a user error.
                    error!(timestamp = %entry.timestamp(), error = %err,
                        "redo re-parse failed for a previously executed command");
                    return;
                }
            };
            if let Err(err) = cmd.redo(&matches) {
                error!(timestamp = %entry.timestamp(), error = %err,
                    "redo failed for a previously executed command");
                return;
            }
        }

        if self.io.is_some() {
            self.lru.push_back(entry);
            self.update_lru();
        }
        self.undo_index += 1;
    }

    // -----------------------------------------------------------------
    // Timeline maintenance
    // -----------------------------------------------------------------

    /// Drop the redo tail `[undo_index, len)` before a new command is
    /// recorded. Persistent mode schedules the files for deletion; in-memory
    /// mode touches no paths at all. Entries still referenced by the LRU
    /// window stay alive until the window releases them, but are no longer
    /// reachable from the timeline.
    fn prune_history(&mut self) {
        if self.undo_index >= self.history.len() {
            return;
        }
        let pruned: Vec<Timestamp> = self.history[self.undo_index..]
            .iter()
            .map(|entry| entry.timestamp())
            .collect();
        debug!(count = pruned.len(), "pruning redo tail");
        if let Some(io) = &self.io {
            io.push(Job::DeleteEntries(pruned));
        }
        self.history.truncate(self.undo_index);
    }

    /// Enforce the resident-payload bound, then warm entries around the
    /// cursor.
    ///
    /// Eviction pops the oldest window references down to
    /// `max_cached_steps - 2*look_ahead_steps - 1`, clearing payloads only
    /// for entries that have reached disk; an unsaved payload is the sole
    /// copy and is never dropped. The warm-up pass may grow the window back
    /// toward `max_cached_steps`, scheduling background loads for entries
    /// within `look_ahead_steps` of the cursor on either side.
    fn update_lru(&mut self) {
        if self.io.is_none() || self.history.is_empty() {
            return;
        }

        let target = self.config.lru_target();
        while self.lru.len() > target {
            let oldest = self.lru.pop_front().expect("window is non-empty");
            let mut state = oldest.lock();
            if state.persisted {
                // Replace rather than clear: free the buffer, not just its
                // length.
                state.payload = Vec::new();
            }
        }

        for i in 1..=self.config.look_ahead_steps {
            if self.lru.len() >= self.config.max_cached_steps {
                break;
            }
            if self.undo_index >= i {
                let back = Arc::clone(&self.history[self.undo_index - i]);
                if !back.is_cached() {
                    self.schedule_warmup(&back);
                    self.lru.push_back(back);
                }
            }
            if self.lru.len() >= self.config.max_cached_steps {
                break;
            }
            let ahead = self.undo_index + i - 1;
            if ahead < self.history.len() {
                let forward = Arc::clone(&self.history[ahead]);
                if !forward.is_cached() {
                    self.schedule_warmup(&forward);
                    self.lru.push_back(forward);
                }
            }
        }
        debug_assert!(self.lru.len() <= self.config.max_cached_steps);
    }

    fn schedule_warmup(&self, entry: &Arc<HistoryEntry>) {
        if let Some(io) = &self.io {
            io.push(Job::WarmupCache(Arc::clone(entry)));
        }
    }

    fn resolve(&self, name: &str) -> Arc<dyn Command> {
        self.commands
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("command {name:?} appears in history but is not registered"))
    }

    fn next_timestamp(&mut self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(0));
        let candidate = millis
            .saturating_mul(1000)
            .saturating_add(self.command_counter);
        self.command_counter += 1;
        // The counter keeps rapid same-millisecond commands distinct; the
        // clamp keeps the sequence strictly increasing even across a clock
        // step backwards or a reload of older history.
        let timestamp = candidate.max(self.last_timestamp + 1);
        self.last_timestamp = timestamp;
        Timestamp::new(timestamp)
    }

    // -----------------------------------------------------------------
    // Index save / load
    // -----------------------------------------------------------------

    /// Write the timestamp index: the timestamps of `[0, undo_index)` in
    /// order. The redo tail is intentionally not listed; a history reloaded
    /// from this index starts fully applied.
    ///
    /// `path` defaults to `<dir>/UndoTimestamps.bin`.
    pub fn save_timestamps(&self, path: Option<&Path>) -> Result<()> {
        assert!(!self.shut_down, "engine used after shutdown");
        let io = self
            .io
            .as_ref()
            .expect("save_timestamps requires a persistent engine");
        let path = resolve_index_path(io, path);
        let stamps: Vec<Timestamp> = self.history[..self.undo_index]
            .iter()
            .map(|entry| entry.timestamp())
            .collect();
        store::save_index(&path, &stamps)?;
        debug!(count = stamps.len(), path = %path.display(), "timestamp index saved");
        Ok(())
    }

    /// Replace the in-memory history with the one listed in the index file.
    ///
    /// Key data for every entry is loaded through the worker pool and
    /// awaited. Payload warm-ups for the newest `max_cached_steps` entries
    /// are scheduled but **not** awaited: an entry may sit in the window
    /// with an empty payload until its load lands, and `undo` will fetch it
    /// synchronously if asked before then.
    pub fn load_timestamps(&mut self, path: Option<&Path>) -> Result<()> {
        assert!(!self.shut_down, "engine used after shutdown");
        let io = self
            .io
            .as_ref()
            .expect("load_timestamps requires a persistent engine");
        let path = resolve_index_path(io, path);

        // Fence: no stale load may land in the fresh timeline.
        io.drain();
        self.history.clear();
        self.lru.clear();
        self.undo_index = 0;

        let stamps = store::load_index(&path)?;
        for timestamp in &stamps {
            let entry = Arc::new(HistoryEntry::placeholder(*timestamp));
            io.push(Job::LoadEntries(Arc::clone(&entry)));
            self.history.push(entry);
        }
        self.undo_index = self.history.len();
        if let Some(last) = stamps.last() {
            self.last_timestamp = self.last_timestamp.max(last.get());
        }

        // Await the key-data loads; undo/redo dispatch needs the command
        // strings.
        io.drain();

        let start = self.undo_index.saturating_sub(self.config.max_cached_steps);
        for index in start..self.undo_index {
            let entry = Arc::clone(&self.history[index]);
            self.lru.push_back(Arc::clone(&entry));
            if !entry.is_cached() && entry.is_persisted() {
                io.push(Job::WarmupCache(entry));
            }
        }

        info!(count = self.undo_index, path = %path.display(), "history reloaded");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    /// Number of entries on the timeline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether the timeline is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The cursor separating applied entries (left) from redo-available
    /// entries (right).
    #[must_use]
    pub fn undo_index(&self) -> usize {
        self.undo_index
    }

    /// Number of references currently held by the LRU window.
    #[must_use]
    pub fn lru_len(&self) -> usize {
        self.lru.len()
    }

    /// The timeline entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[Arc<HistoryEntry>] {
        &self.history
    }

    /// The store directory, if the engine is persistent.
    #[must_use]
    pub fn store_dir(&self) -> Option<&Path> {
        self.io.as_ref().map(IoEngine::dir)
    }

    /// Block until every scheduled I/O job has finished. No-op in memory
    /// mode.
    pub fn drain_io(&self) {
        if let Some(io) = &self.io {
            io.drain();
        }
    }

    /// Render the history as text:
    ///
    /// ```text
    /// History:
    ///   [0000]-[U] User:1 Time:1723041600000000 Move -T 0 0 [Cached]
    /// Current Index: 1
    /// ```
    ///
    /// `[U]` marks entries left of the cursor, `[R]` the redo tail;
    /// ` [Cached]` appears while the payload is resident.
    #[must_use]
    pub fn display_history(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::from("History:\n");
        for (index, entry) in self.history.iter().enumerate() {
            let state = entry.lock();
            let region = if index < self.undo_index { 'U' } else { 'R' };
            let cached = if state.payload.is_empty() {
                ""
            } else {
                " [Cached]"
            };
            let _ = writeln!(
                out,
                "  [{index:04}]-[{region}] User:{} Time:{} {}{cached}",
                state.user_id,
                entry.timestamp(),
                state.command,
            );
        }
        let _ = writeln!(out, "Current Index: {}", self.undo_index);
        out
    }

    /// Suggest a plausible next command for `user_id`.
    ///
    /// If the last applied entry belongs to this user and is a `Move`, the
    /// suggestion continues the translation ten units further; in every
    /// other case (empty history, another user's entry, anything that does
    /// not look like a move) the fixed fallback is returned.
    #[must_use]
    pub fn suggest_next(&self, user_id: i32) -> String {
        if self.undo_index == 0 {
            return SUGGEST_FALLBACK.to_owned();
        }
        let state = self.history[self.undo_index - 1].lock();
        if state.user_id != user_id || !state.command.contains("Move") {
            return SUGGEST_FALLBACK.to_owned();
        }
        let Some(pos) = state.command.find("-T ") else {
            return SUGGEST_FALLBACK.to_owned();
        };
        let mut parts = state.command[pos + 3..].split_whitespace();
        let (Some(x), Some(y)) = (parts.next(), parts.next()) else {
            return SUGGEST_FALLBACK.to_owned();
        };
        let (Ok(x), Ok(y)) = (x.parse::<i64>(), y.parse::<i64>()) else {
            return SUGGEST_FALLBACK.to_owned();
        };
        format!("-Move -T {} {}", x + 10, y + 10)
    }

    // -----------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------

    /// Save the index (when auto load/save is on), stop the worker pool,
    /// and join the workers. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if self.io.is_some() && self.config.auto_load_save {
            if let Err(err) = self.save_timestamps(None) {
                error!(error = %err, "failed to save timestamp index at shutdown");
            }
        }
        if let Some(mut io) = self.io.take() {
            io.shutdown();
        }
        self.shut_down = true;
    }
}

impl Drop for UndoSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_index_path(io: &IoEngine, path: Option<&Path>) -> PathBuf {
    path.map_or_else(|| store::index_path(io.dir()), Path::to_path_buf)
}

// ===========================================================================
// Tests
// ===========================================================================
