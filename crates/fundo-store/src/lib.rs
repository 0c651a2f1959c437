//! On-disk formats and load/save/delete primitives for the undo store.
//!
//! All files live directly under the configured store directory; the engine
//! never creates subdirectories and assumes the directory already exists.
//! Everything is little-endian with no padding.
//!
//! **Per-entry file** `UndoStep-<timestamp>`:
//!
//! ```text
//! Offset            Size              Field
//! 0                 4                 payload_len (u32)
//! 4                 payload_len       payload
//! 4+payload_len     4                 user_id (i32)
//! 8+payload_len     8                 timestamp (u64; redundant, matches filename)
//! 16+payload_len    4                 command_len (u32)
//! 20+payload_len    command_len       command (UTF-8)
//! ```
//!
//! Because `payload_len` comes first, a reader that only wants key data can
//! seek past the payload. [`load_entry`] exposes the two halves through
//! [`LoadFlags`]; the I/O job kinds combine them differently.
//!
//! **Index file** `UndoTimestamps.bin`:
//!
//! ```text
//! u32          count
//! u64[count]   timestamps (in history order)
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fundo_error::{Result, UndoError};
use fundo_types::{EntryState, Timestamp};
use tracing::trace;

/// Filename prefix of per-entry files; the timestamp is the suffix.
pub const ENTRY_FILE_PREFIX: &str = "UndoStep-";

/// Filename of the history index.
pub const INDEX_FILE_NAME: &str = "UndoTimestamps.bin";

/// Path of the per-entry file for `timestamp` under `dir`.
#[must_use]
pub fn entry_path(dir: &Path, timestamp: Timestamp) -> PathBuf {
    dir.join(format!("{ENTRY_FILE_PREFIX}{timestamp}"))
}

/// Path of the index file under `dir`.
#[must_use]
pub fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE_NAME)
}

// ---------------------------------------------------------------------------
// Per-entry files
// ---------------------------------------------------------------------------

/// Which halves of a per-entry file [`load_entry`] should read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadFlags {
    /// Read user id, timestamp, and command string.
    pub key_data: bool,
    /// Read the payload bytes.
    pub payload: bool,
}

impl LoadFlags {
    /// Key data only (payload skipped by seeking).
    pub const KEY_DATA: Self = Self {
        key_data: true,
        payload: false,
    };
    /// Payload only (key data left untouched).
    pub const PAYLOAD: Self = Self {
        key_data: false,
        payload: true,
    };
    /// Everything.
    pub const ALL: Self = Self {
        key_data: true,
        payload: true,
    };
}

/// Write one entry's file, replacing any previous contents.
pub fn save_entry(dir: &Path, timestamp: Timestamp, state: &EntryState) -> Result<()> {
    let payload_len = u32::try_from(state.payload.len())
        .map_err(|_| UndoError::internal("undo payload exceeds 4 GiB"))?;
    let command_len = u32::try_from(state.command.len())
        .map_err(|_| UndoError::internal("command string exceeds 4 GiB"))?;

    let path = entry_path(dir, timestamp);
    let mut out = BufWriter::new(File::create(&path)?);
    out.write_all(&payload_len.to_le_bytes())?;
    out.write_all(&state.payload)?;
    out.write_all(&state.user_id.to_le_bytes())?;
    out.write_all(&timestamp.get().to_le_bytes())?;
    out.write_all(&command_len.to_le_bytes())?;
    out.write_all(state.command.as_bytes())?;
    out.flush()?;
    trace!(%timestamp, payload_len, "entry saved");
    Ok(())
}

/// Read the halves of one entry's file selected by `flags` into `state`.
///
/// The payload half is only written into `state` when `flags.payload` is
/// set; likewise for key data. The redundant timestamp stored in the file is
/// checked against the filename-derived `timestamp`.
pub fn load_entry(
    dir: &Path,
    timestamp: Timestamp,
    state: &mut EntryState,
    flags: LoadFlags,
) -> Result<()> {
    let path = entry_path(dir, timestamp);
    let mut input = BufReader::new(File::open(&path)?);

    let payload_len = usize::try_from(read_u32(&mut input)?).expect("u32 fits in usize");
    if flags.payload {
        let mut payload = vec![0_u8; payload_len];
        input.read_exact(&mut payload)?;
        state.payload = payload;
    } else {
        input.seek(SeekFrom::Current(i64::try_from(payload_len).map_err(
            |_| UndoError::corrupt(format!("payload length {payload_len} is not seekable")),
        )?))?;
    }

    if flags.key_data {
        let mut raw_user = [0_u8; 4];
        input.read_exact(&mut raw_user)?;
        let mut raw_ts = [0_u8; 8];
        input.read_exact(&mut raw_ts)?;
        let stored_ts = u64::from_le_bytes(raw_ts);
        if stored_ts != timestamp.get() {
            return Err(UndoError::corrupt(format!(
                "entry file {} stores timestamp {stored_ts}",
                path.display()
            )));
        }
        let command_len = usize::try_from(read_u32(&mut input)?).expect("u32 fits in usize");
        let mut raw_command = vec![0_u8; command_len];
        input.read_exact(&mut raw_command)?;
        state.user_id = i32::from_le_bytes(raw_user);
        state.command = String::from_utf8(raw_command).map_err(|_| {
            UndoError::corrupt(format!(
                "entry file {} holds a non-UTF-8 command string",
                path.display()
            ))
        })?;
    }

    trace!(%timestamp, key_data = flags.key_data, payload = flags.payload, "entry loaded");
    Ok(())
}

/// Remove one entry's file. A missing file is not an error: a delete may run
/// after a prune already raced a pending save, or the entry may never have
/// reached disk.
pub fn delete_entry(dir: &Path, timestamp: Timestamp) -> Result<()> {
    match fs::remove_file(entry_path(dir, timestamp)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// Index file
// ---------------------------------------------------------------------------

/// Write the index file listing `timestamps` in history order.
pub fn save_index(path: &Path, timestamps: &[Timestamp]) -> Result<()> {
    let count = u32::try_from(timestamps.len())
        .map_err(|_| UndoError::internal("history exceeds u32::MAX entries"))?;
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&count.to_le_bytes())?;
    for timestamp in timestamps {
        out.write_all(&timestamp.get().to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Read the index file back into a timestamp list.
pub fn load_index(path: &Path) -> Result<Vec<Timestamp>> {
    let mut input = BufReader::new(File::open(path)?);
    let count = usize::try_from(read_u32(&mut input)?).expect("u32 fits in usize");
    let mut timestamps = Vec::with_capacity(count);
    for _ in 0..count {
        let mut raw = [0_u8; 8];
        input.read_exact(&mut raw)?;
        timestamps.push(Timestamp::new(u64::from_le_bytes(raw)));
    }
    Ok(timestamps)
}

fn read_u32(input: &mut impl Read) -> Result<u32> {
    let mut raw = [0_u8; 4];
    input.read_exact(&mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state(user_id: i32, command: &str, payload: &[u8]) -> EntryState {
        EntryState {
            user_id,
            command: command.to_owned(),
            payload: payload.to_vec(),
            persisted: false,
        }
    }

    #[test]
    fn entry_path_uses_timestamp_suffix() {
        let path = entry_path(Path::new("/store"), Timestamp::new(1234));
        assert_eq!(path, Path::new("/store/UndoStep-1234"));
    }

    #[test]
    fn save_then_load_all_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ts = Timestamp::new(99);
        let original = state(7, "Move -T 3 4", &[1, 2, 3, 4, 5]);
        save_entry(dir.path(), ts, &original).expect("save");

        let mut loaded = EntryState::default();
        load_entry(dir.path(), ts, &mut loaded, LoadFlags::ALL).expect("load");
        assert_eq!(loaded.user_id, 7);
        assert_eq!(loaded.command, "Move -T 3 4");
        assert_eq!(loaded.payload, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn key_data_load_skips_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ts = Timestamp::new(5);
        save_entry(dir.path(), ts, &state(2, "Move -T 0 0", &[9; 64])).expect("save");

        let mut loaded = EntryState::default();
        load_entry(dir.path(), ts, &mut loaded, LoadFlags::KEY_DATA).expect("load");
        assert_eq!(loaded.user_id, 2);
        assert_eq!(loaded.command, "Move -T 0 0");
        assert!(loaded.payload.is_empty(), "payload must stay untouched");
    }

    #[test]
    fn payload_load_skips_key_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ts = Timestamp::new(5);
        save_entry(dir.path(), ts, &state(2, "Move -T 0 0", &[9; 16])).expect("save");

        let mut loaded = EntryState::default();
        load_entry(dir.path(), ts, &mut loaded, LoadFlags::PAYLOAD).expect("load");
        assert_eq!(loaded.payload, vec![9; 16]);
        assert_eq!(loaded.user_id, 0);
        assert!(loaded.command.is_empty());
    }

    #[test]
    fn empty_payload_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ts = Timestamp::new(1);
        save_entry(dir.path(), ts, &state(1, "Noop", &[])).expect("save");

        let mut loaded = EntryState::default();
        load_entry(dir.path(), ts, &mut loaded, LoadFlags::ALL).expect("load");
        assert!(loaded.payload.is_empty());
        assert_eq!(loaded.command, "Noop");
    }

    #[test]
    fn timestamp_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        save_entry(dir.path(), Timestamp::new(10), &state(1, "Move", &[])).expect("save");
        // Present the file under a different timestamp.
        fs::rename(
            entry_path(dir.path(), Timestamp::new(10)),
            entry_path(dir.path(), Timestamp::new(11)),
        )
        .expect("rename");

        let mut loaded = EntryState::default();
        let err = load_entry(dir.path(), Timestamp::new(11), &mut loaded, LoadFlags::ALL)
            .expect_err("mismatch must fail");
        assert!(matches!(err, UndoError::StoreCorrupt { .. }));
    }

    #[test]
    fn truncated_entry_fails_to_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ts = Timestamp::new(3);
        save_entry(dir.path(), ts, &state(1, "Move -T 1 1", &[0; 32])).expect("save");
        let path = entry_path(dir.path(), ts);
        let full = fs::read(&path).expect("read back");
        fs::write(&path, &full[..full.len() / 2]).expect("truncate");

        let mut loaded = EntryState::default();
        assert!(load_entry(dir.path(), ts, &mut loaded, LoadFlags::ALL).is_err());
    }

    #[test]
    fn delete_is_idempotent_and_tolerates_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ts = Timestamp::new(77);
        delete_entry(dir.path(), ts).expect("missing file tolerated");

        save_entry(dir.path(), ts, &state(1, "Move", &[1])).expect("save");
        delete_entry(dir.path(), ts).expect("first delete");
        assert!(!entry_path(dir.path(), ts).exists());
        delete_entry(dir.path(), ts).expect("second delete");
    }

    #[test]
    fn index_roundtrips_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = index_path(dir.path());
        let timestamps: Vec<Timestamp> = [3_u64, 8, 21].map(Timestamp::new).to_vec();
        save_index(&path, &timestamps).expect("save index");
        assert_eq!(load_index(&path).expect("load index"), timestamps);
    }

    #[test]
    fn empty_index_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = index_path(dir.path());
        save_index(&path, &[]).expect("save index");
        assert!(load_index(&path).expect("load index").is_empty());
    }

    #[test]
    fn missing_index_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            load_index(&index_path(dir.path())),
            Err(UndoError::Io(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_entry_roundtrip(
            user_id in any::<i32>(),
            command in "[ -~]{0,64}",
            payload in proptest::collection::vec(any::<u8>(), 0..512),
            raw_ts in 1_u64..u64::from(u32::MAX),
        ) {
            let dir = tempfile::tempdir().expect("tempdir");
            let ts = Timestamp::new(raw_ts);
            let original = EntryState {
                user_id,
                command: command.clone(),
                payload: payload.clone(),
                persisted: false,
            };
            save_entry(dir.path(), ts, &original).expect("save");

            let mut loaded = EntryState::default();
            load_entry(dir.path(), ts, &mut loaded, LoadFlags::ALL).expect("load");
            prop_assert_eq!(loaded.user_id, user_id);
            prop_assert_eq!(loaded.command, command);
            prop_assert_eq!(loaded.payload, payload);
        }
    }
}
