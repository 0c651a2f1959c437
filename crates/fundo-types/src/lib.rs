//! Core value types for the frankenundo engine.
//!
//! This crate holds the leaf types every other crate agrees on: the
//! [`Timestamp`] identifier, the [`HistoryEntry`] record with its per-entry
//! lock, and the [`UndoCursor`] used by commands to encode and decode their
//! undo payloads. No I/O lives here.

mod cursor;
mod entry;

pub use cursor::UndoCursor;
pub use entry::{EntryState, HistoryEntry};

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Monotonic 64-bit identifier of one history entry.
///
/// Unique within a store; doubles as the entry's on-disk filename suffix.
/// Produced by the engine as `wall_clock_millis * 1000 + command_counter`,
/// which stays strictly increasing even when the clock stands still across
/// rapid commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Wrap a raw timestamp value.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Timestamp {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
