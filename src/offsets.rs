//! # Offset Tracker
//!
//! Per-segment sidecar recording consumer progress so a restart resumes
//! mid-segment instead of redelivering the whole file.
//!
//! ## Sidecar Layout
//!
//! ```text
//! <data_dir>/seg_<nanos>         # segment file
//! <data_dir>/seg_<nanos>.offset  # paired sidecar
//! ```
//!
//! The sidecar is an append-only list of 8-byte big-endian `u64` values;
//! each successful dequeue appends the byte position just past the consumed
//! frame. Only the **last** 8 bytes are authoritative. Appending is
//! crash-safe and allocation-free; the file is deleted together with its
//! segment.
//!
//! The sidecar is advisory: when it is missing, short, or records an
//! implausible position, the segment restarts right after its header and
//! duplicate delivery is accepted.
//!
//! ## Compaction
//!
//! Small payloads make the sidecar outgrow its segment. Once it passes
//! [`OFFSET_COMPACT_THRESHOLD`] it is truncated and the next commit starts
//! the file over; the last-8-bytes rule holds throughout.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use crate::config::{OFFSET_COMMIT_SIZE, OFFSET_COMPACT_THRESHOLD, OFFSET_FILE_SUFFIX};

/// Sidecar path for a segment file: `<segment>.offset`.
pub(crate) fn sidecar_path(segment: &Path) -> PathBuf {
    let mut name = segment.as_os_str().to_os_string();
    name.push(OFFSET_FILE_SUFFIX);
    PathBuf::from(name)
}

pub(crate) struct OffsetTracker {
    file: File,
    len: u64,
    sync_on_commit: bool,
}

impl OffsetTracker {
    /// Opens (or creates) the sidecar paired with `segment` and returns the
    /// tracker plus the last committed offset, if any. The file handle is
    /// left positioned at end-of-file.
    pub(crate) fn open(segment: &Path, sync_on_commit: bool) -> Result<(Self, Option<u64>)> {
        let path = sidecar_path(segment);

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let mut file = options
            .open(&path)
            .wrap_err_with(|| format!("failed to open offset sidecar at {}", path.display()))?;

        let len = file
            .metadata()
            .wrap_err("failed to stat offset sidecar")?
            .len();

        let last = if len >= OFFSET_COMMIT_SIZE as u64 {
            let mut buf = [0u8; OFFSET_COMMIT_SIZE];
            file.seek(SeekFrom::End(-(OFFSET_COMMIT_SIZE as i64)))
                .wrap_err("failed to seek to last committed offset")?;
            file.read_exact(&mut buf)
                .wrap_err("failed to read last committed offset")?;
            Some(u64::from_be_bytes(buf))
        } else {
            None
        };

        file.seek(SeekFrom::End(0))
            .wrap_err("failed to seek offset sidecar to end")?;

        Ok((
            Self {
                file,
                len,
                sync_on_commit,
            },
            last,
        ))
    }

    /// Appends `offset` as the new committed position.
    pub(crate) fn commit(&mut self, offset: u64) -> Result<()> {
        if self.len >= OFFSET_COMPACT_THRESHOLD {
            self.compact()?;
        }

        self.file
            .write_all(&offset.to_be_bytes())
            .wrap_err("failed to append committed offset")?;
        self.len += OFFSET_COMMIT_SIZE as u64;

        if self.sync_on_commit {
            self.file
                .sync_data()
                .wrap_err("failed to sync offset sidecar")?;
        }
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        self.file
            .set_len(0)
            .wrap_err("failed to truncate offset sidecar")?;
        self.file
            .seek(SeekFrom::Start(0))
            .wrap_err("failed to rewind offset sidecar")?;
        self.len = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_sidecar_records_nothing() {
        let dir = tempdir().unwrap();
        let segment = dir.path().join("seg_1");

        let (_, last) = OffsetTracker::open(&segment, false).unwrap();

        assert_eq!(last, None);
        assert!(sidecar_path(&segment).exists());
    }

    #[test]
    fn reopen_returns_last_committed_offset() {
        let dir = tempdir().unwrap();
        let segment = dir.path().join("seg_1");

        let (mut tracker, _) = OffsetTracker::open(&segment, false).unwrap();
        tracker.commit(8).unwrap();
        tracker.commit(27).unwrap();
        tracker.commit(115).unwrap();
        drop(tracker);

        let (_, last) = OffsetTracker::open(&segment, false).unwrap();
        assert_eq!(last, Some(115));
    }

    #[test]
    fn commits_append_eight_bytes_each() {
        let dir = tempdir().unwrap();
        let segment = dir.path().join("seg_1");

        let (mut tracker, _) = OffsetTracker::open(&segment, false).unwrap();
        for i in 0..5u64 {
            tracker.commit(8 + i).unwrap();
        }
        drop(tracker);

        let len = std::fs::metadata(sidecar_path(&segment)).unwrap().len();
        assert_eq!(len, 5 * OFFSET_COMMIT_SIZE as u64);
    }

    #[test]
    fn short_sidecar_is_ignored() {
        let dir = tempdir().unwrap();
        let segment = dir.path().join("seg_1");
        std::fs::write(sidecar_path(&segment), [1, 2, 3]).unwrap();

        let (_, last) = OffsetTracker::open(&segment, false).unwrap();
        assert_eq!(last, None);
    }

    #[test]
    fn oversized_sidecar_is_compacted_on_next_commit() {
        let dir = tempdir().unwrap();
        let segment = dir.path().join("seg_1");

        let (mut tracker, _) = OffsetTracker::open(&segment, false).unwrap();
        let commits = OFFSET_COMPACT_THRESHOLD / OFFSET_COMMIT_SIZE as u64;
        for i in 0..commits {
            tracker.commit(8 + i).unwrap();
        }
        tracker.commit(9999).unwrap();
        drop(tracker);

        let len = std::fs::metadata(sidecar_path(&segment)).unwrap().len();
        assert_eq!(len, OFFSET_COMMIT_SIZE as u64);

        let (_, last) = OffsetTracker::open(&segment, false).unwrap();
        assert_eq!(last, Some(9999));
    }
}
