//! Engine configuration.

use std::path::PathBuf;

use fundo_io::DEFAULT_IO_WORKERS;

/// Default bound on entries whose payload stays resident in memory.
pub const DEFAULT_MAX_CACHED_STEPS: usize = 50;

/// Default warm-up radius around the undo cursor.
pub const DEFAULT_LOOK_AHEAD_STEPS: usize = 5;

/// Configuration for [`crate::UndoSystem`].
///
/// The default is a pure in-memory engine; [`UndoConfig::persistent`] turns
/// on the disk store with auto load/save.
#[derive(Debug, Clone)]
pub struct UndoConfig {
    /// Store directory; `None` means pure in-memory mode. The directory must
    /// already exist; the engine never creates it.
    pub dir: Option<PathBuf>,
    /// Load the timestamp index at open (when present) and save it at
    /// shutdown. Requires `dir`.
    pub auto_load_save: bool,
    /// Upper bound on entries with a resident payload.
    pub max_cached_steps: usize,
    /// Radius around the cursor that is proactively warmed from disk.
    pub look_ahead_steps: usize,
    /// User id substituted when a caller passes `-1`.
    pub default_user: i32,
    /// Number of background I/O worker threads.
    pub io_workers: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            dir: None,
            auto_load_save: false,
            max_cached_steps: DEFAULT_MAX_CACHED_STEPS,
            look_ahead_steps: DEFAULT_LOOK_AHEAD_STEPS,
            default_user: 1,
            io_workers: DEFAULT_IO_WORKERS,
        }
    }
}

impl UndoConfig {
    /// Pure in-memory configuration: nothing ever touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Persistent configuration with auto load/save enabled.
    #[must_use]
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            auto_load_save: true,
            ..Self::default()
        }
    }

    /// Toggle loading the index at open / saving it at shutdown.
    #[must_use]
    pub fn auto_load_save(mut self, enabled: bool) -> Self {
        self.auto_load_save = enabled;
        self
    }

    /// Override the resident-payload bound.
    #[must_use]
    pub fn max_cached_steps(mut self, steps: usize) -> Self {
        self.max_cached_steps = steps;
        self
    }

    /// Override the warm-up radius.
    #[must_use]
    pub fn look_ahead_steps(mut self, steps: usize) -> Self {
        self.look_ahead_steps = steps;
        self
    }

    /// Override the user id substituted for `-1`.
    #[must_use]
    pub fn default_user(mut self, user_id: i32) -> Self {
        self.default_user = user_id;
        self
    }

    /// Override the worker pool size.
    #[must_use]
    pub fn io_workers(mut self, workers: usize) -> Self {
        self.io_workers = workers;
        self
    }

    /// The window length the eviction pass prunes down to. Eviction must
    /// leave room for a full warm-up pass on both sides of the cursor.
    pub(crate) fn lru_target(&self) -> usize {
        self.max_cached_steps - 2 * self.look_ahead_steps - 1
    }

    /// Panic on combinations that cannot work (programmer error).
    pub(crate) fn validate(&self) {
        assert!(
            self.dir.is_some() || !self.auto_load_save,
            "auto_load_save requires a store directory"
        );
        assert!(
            self.max_cached_steps > 2 * self.look_ahead_steps + 1,
            "max_cached_steps must exceed 2 * look_ahead_steps + 1"
        );
        assert!(self.io_workers > 0 || self.dir.is_none());
    }
}
