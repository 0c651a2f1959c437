//! Background I/O engine: a fixed-size worker pool draining a FIFO job queue.
//!
//! # Concurrency Model
//!
//! All workers share one queue behind a [`parking_lot::Mutex`] with a single
//! [`parking_lot::Condvar`] serving producers, workers, and drain waiters.
//! Workers pop one job at a time and execute it *outside* the queue lock;
//! while a job runs it is accounted for in an in-flight counter so that
//! [`IoEngine::drain`] can provide a real quiescence barrier (queue empty
//! **and** nothing mid-execution), not just queue emptiness.
//!
//! Jobs never propagate errors: there is no user-visible place to surface
//! them on a background thread, and undo/redo correctness is preserved by
//! the in-memory payloads plus the engine's synchronous-load fallback. Every
//! failure is logged via [`tracing::error!`] and swallowed.
//!
//! Lock ordering: a job acquires only its entry's lock, never the queue
//! lock; the queue lock is never held across a job execution.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fundo_store::{self as store, LoadFlags};
use fundo_types::{HistoryEntry, Timestamp};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

/// Default number of worker threads.
pub const DEFAULT_IO_WORKERS: usize = 4;

/// Poll interval of the quiescence barrier.
const DRAIN_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// One unit of background work. Entry-targeted jobs hold their entry by
/// `Arc`, so a pruned entry stays alive until the job finishes.
pub enum Job {
    /// Write the entry's file if it has not been persisted yet; mark it
    /// persisted on success.
    SaveToDisk(Arc<HistoryEntry>),
    /// Read the entry's payload from disk if it is not already resident.
    WarmupCache(Arc<HistoryEntry>),
    /// Read the entry's key data (user id, timestamp, command string),
    /// skipping the payload.
    LoadEntries(Arc<HistoryEntry>),
    /// Remove the files of pruned entries. Missing files are tolerated; a
    /// save racing ahead of this delete is idempotent because the delete
    /// enumerates files as it runs, not at schedule time.
    DeleteEntries(Vec<Timestamp>),
}

impl Job {
    /// Execute the job against the store directory `dir`.
    ///
    /// Also callable synchronously on the owner thread: `undo` runs a
    /// [`Job::WarmupCache`] inline when the target payload is absent.
    pub fn run(&self, dir: &Path) {
        match self {
            Self::SaveToDisk(entry) => {
                let mut state = entry.lock();
                if !state.persisted {
                    match store::save_entry(dir, entry.timestamp(), &state) {
                        Ok(()) => state.persisted = true,
                        Err(err) => {
                            error!(timestamp = %entry.timestamp(), error = %err,
                                "failed to save undo entry");
                        }
                    }
                }
            }
            Self::WarmupCache(entry) => {
                let mut state = entry.lock();
                if state.payload.is_empty() {
                    if let Err(err) =
                        store::load_entry(dir, entry.timestamp(), &mut state, LoadFlags::PAYLOAD)
                    {
                        error!(timestamp = %entry.timestamp(), error = %err,
                            "failed to warm up undo payload");
                    }
                }
            }
            Self::LoadEntries(entry) => {
                let mut state = entry.lock();
                if let Err(err) =
                    store::load_entry(dir, entry.timestamp(), &mut state, LoadFlags::KEY_DATA)
                {
                    error!(timestamp = %entry.timestamp(), error = %err,
                        "failed to load undo entry key data");
                }
            }
            Self::DeleteEntries(timestamps) => {
                for timestamp in timestamps {
                    if let Err(err) = store::delete_entry(dir, *timestamp) {
                        error!(%timestamp, error = %err, "failed to delete undo entry");
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// IoEngine
// ---------------------------------------------------------------------------

struct QueueState {
    jobs: VecDeque<Job>,
    /// Jobs popped from the queue but still executing.
    in_flight: usize,
    done: bool,
}

struct Shared {
    dir: PathBuf,
    state: Mutex<QueueState>,
    cv: Condvar,
}

/// Worker pool plus job queue. Dropping the engine performs an idempotent
/// shutdown: pending jobs are completed, then the workers exit and join.
pub struct IoEngine {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl IoEngine {
    /// Spawn `workers` threads servicing the store directory `dir`.
    #[must_use]
    pub fn start(dir: PathBuf, workers: usize) -> Self {
        let shared = Arc::new(Shared {
            dir,
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                in_flight: 0,
                done: false,
            }),
            cv: Condvar::new(),
        });

        let workers = (0..workers)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("fundo-io-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("spawn I/O worker thread")
            })
            .collect();

        debug!(dir = %shared.dir.display(), "I/O engine started");
        Self { shared, workers }
    }

    /// The store directory this engine serves.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Enqueue a job. Blocks only for the push itself.
    pub fn push(&self, job: Job) {
        {
            let mut state = self.shared.state.lock();
            debug_assert!(!state.done, "job pushed after shutdown");
            state.jobs.push_back(job);
        }
        self.shared.cv.notify_all();
    }

    /// Quiescence barrier: block until the queue is empty and no popped job
    /// is still executing. Polls with a 100 ms timeout so a missed wakeup
    /// cannot wedge the caller.
    pub fn drain(&self) {
        let mut state = self.shared.state.lock();
        while !(state.jobs.is_empty() && state.in_flight == 0) {
            let _ = self.shared.cv.wait_for(&mut state, DRAIN_POLL);
        }
    }

    /// Stop the pool: complete all queued jobs, then join every worker.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        {
            let mut state = self.shared.state.lock();
            state.done = true;
        }
        self.shared.cv.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("I/O worker panicked during shutdown");
            }
        }
        debug!("I/O engine stopped");
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    state.in_flight += 1;
                    break job;
                }
                if state.done {
                    return;
                }
                shared.cv.wait(&mut state);
            }
        };

        job.run(&shared.dir);

        {
            let mut state = shared.state.lock();
            state.in_flight -= 1;
        }
        // Wake drain waiters (and idle peers; spurious wakeups are benign).
        shared.cv.notify_all();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp: u64, payload: &[u8]) -> Arc<HistoryEntry> {
        Arc::new(HistoryEntry::new(
            1,
            Timestamp::new(timestamp),
            "Move -T 1 1",
            payload.to_vec(),
        ))
    }

    #[test]
    fn save_job_persists_entry_and_sets_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = IoEngine::start(dir.path().to_path_buf(), DEFAULT_IO_WORKERS);
        let e = entry(100, &[1, 2, 3]);

        engine.push(Job::SaveToDisk(Arc::clone(&e)));
        engine.drain();

        assert!(e.is_persisted());
        assert!(store::entry_path(dir.path(), e.timestamp()).exists());
        engine.shutdown();
    }

    #[test]
    fn warmup_restores_evicted_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = IoEngine::start(dir.path().to_path_buf(), 2);
        let e = entry(200, &[7; 32]);

        engine.push(Job::SaveToDisk(Arc::clone(&e)));
        engine.drain();
        e.lock().payload = Vec::new();
        assert!(!e.is_cached());

        engine.push(Job::WarmupCache(Arc::clone(&e)));
        engine.drain();
        assert_eq!(e.lock().payload, vec![7; 32]);
        engine.shutdown();
    }

    #[test]
    fn warmup_runs_synchronously_on_caller_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let e = entry(201, &[5; 8]);
        Job::SaveToDisk(Arc::clone(&e)).run(dir.path());
        e.lock().payload = Vec::new();

        Job::WarmupCache(Arc::clone(&e)).run(dir.path());
        assert_eq!(e.lock().payload, vec![5; 8]);
    }

    #[test]
    fn load_entries_fills_key_data_of_placeholder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = IoEngine::start(dir.path().to_path_buf(), 2);
        let original = entry(300, &[9; 4]);
        {
            let mut state = original.lock();
            state.user_id = 6;
            state.command = "Move -T 8 8".to_owned();
        }
        engine.push(Job::SaveToDisk(Arc::clone(&original)));
        engine.drain();

        let restored = Arc::new(HistoryEntry::placeholder(Timestamp::new(300)));
        engine.push(Job::LoadEntries(Arc::clone(&restored)));
        engine.drain();

        assert_eq!(restored.user_id(), 6);
        assert_eq!(restored.command(), "Move -T 8 8");
        assert!(!restored.is_cached(), "key-data load must skip the payload");
        engine.shutdown();
    }

    #[test]
    fn delete_after_save_leaves_no_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = IoEngine::start(dir.path().to_path_buf(), DEFAULT_IO_WORKERS);
        let e = entry(400, &[1]);

        engine.push(Job::SaveToDisk(Arc::clone(&e)));
        engine.push(Job::DeleteEntries(vec![e.timestamp()]));
        engine.drain();

        assert!(!store::entry_path(dir.path(), e.timestamp()).exists());
        engine.shutdown();
    }

    #[test]
    fn delete_tolerates_entries_that_never_hit_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = IoEngine::start(dir.path().to_path_buf(), 1);
        engine.push(Job::DeleteEntries(vec![Timestamp::new(1), Timestamp::new(2)]));
        engine.drain();
        engine.shutdown();
    }

    #[test]
    fn shutdown_completes_pending_jobs_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = IoEngine::start(dir.path().to_path_buf(), 2);
        let entries: Vec<_> = (0..16_u64)
            .map(|i| entry(500 + i, &[u8::try_from(i).expect("i < 16"); 8]))
            .collect();
        for e in &entries {
            engine.push(Job::SaveToDisk(Arc::clone(e)));
        }

        engine.shutdown();
        engine.shutdown();

        for e in &entries {
            assert!(
                store::entry_path(dir.path(), e.timestamp()).exists(),
                "queued job must complete before workers exit"
            );
        }
    }

    #[test]
    fn failed_background_load_is_swallowed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut engine = IoEngine::start(dir.path().to_path_buf(), 1);
        // No file on disk for this entry; the job logs and moves on.
        let ghost = Arc::new(HistoryEntry::placeholder(Timestamp::new(999)));
        engine.push(Job::WarmupCache(Arc::clone(&ghost)));
        engine.drain();
        assert!(!ghost.is_cached());
        engine.shutdown();
    }
}
