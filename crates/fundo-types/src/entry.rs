//! One recorded command in the history timeline.
//!
//! # Concurrency Model
//!
//! A [`HistoryEntry`] is shared between the owner thread (timeline + LRU
//! window) and background I/O jobs via `Arc`. Everything a background job may
//! read or fill in (user id, command string, payload, persisted flag) sits
//! behind a single [`parking_lot::Mutex`] in [`EntryState`]. The timestamp is
//! assigned at construction and never changes, so it is readable without the
//! lock.
//!
//! Lock ordering: the engine's queue mutex must never be held while acquiring
//! an entry lock, and vice versa. Jobs hold the entry by `Arc` and lock only
//! the entry.

use parking_lot::{Mutex, MutexGuard};

use crate::Timestamp;

/// Mutable interior of a [`HistoryEntry`], guarded by the per-entry mutex.
#[derive(Debug, Default)]
pub struct EntryState {
    /// Small integer identifying the originator of the command.
    pub user_id: i32,
    /// The textual command exactly as parsed (name plus arguments).
    pub command: String,
    /// Opaque pre-execution snapshot produced by the command's backup step.
    /// Empty when the payload has been evicted (or not yet warmed up).
    pub payload: Vec<u8>,
    /// True once the entry has been successfully written to disk at least
    /// once. Unsaved entries never have their payload cleared.
    pub persisted: bool,
}

/// One recorded command: identity plus lock-guarded mutable state.
#[derive(Debug)]
pub struct HistoryEntry {
    timestamp: Timestamp,
    state: Mutex<EntryState>,
}

impl HistoryEntry {
    /// Create a freshly executed entry around the payload the command's
    /// backup step produced (encoded through a [`crate::UndoCursor`] over a
    /// plain buffer, before the entry exists or is shared).
    #[must_use]
    pub fn new(
        user_id: i32,
        timestamp: Timestamp,
        command: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            timestamp,
            state: Mutex::new(EntryState {
                user_id,
                command: command.into(),
                payload,
                persisted: false,
            }),
        }
    }

    /// Create a placeholder for an entry known only by its timestamp, as
    /// listed in the index file. Key data and payload are filled in later by
    /// background load jobs; `persisted` starts true because the entry came
    /// from disk.
    #[must_use]
    pub fn placeholder(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            state: Mutex::new(EntryState {
                persisted: true,
                ..EntryState::default()
            }),
        }
    }

    /// The entry's immutable identity.
    #[inline]
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Acquire the per-entry lock.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock()
    }

    /// Whether the payload is currently resident in memory.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        !self.state.lock().payload.is_empty()
    }

    /// Whether the entry has ever been written to disk.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.state.lock().persisted
    }

    /// The originating user id.
    #[must_use]
    pub fn user_id(&self) -> i32 {
        self.state.lock().user_id
    }

    /// A clone of the command string.
    #[must_use]
    pub fn command(&self) -> String {
        self.state.lock().command.clone()
    }
}
