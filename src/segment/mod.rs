//! # Segment State Machine
//!
//! A segment is one append-only file holding a bounded run of frames. This
//! module owns its lifecycle and the visibility handshake between one
//! writer and one reader operating on the same file through independent
//! handles.
//!
//! ## Segment File Layout (SegmentV1)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------------
//! 0       4     segment_format   (u32 BE, currently 0)
//! 4       4     entry_format     (u32 BE, currently 0)
//! 8       *     frames
//! end     8     terminator on clean seal (8 zero bytes)
//! ```
//!
//! ## States
//!
//! An appendable segment (created by the queue for its tail) moves through:
//!
//! ```text
//!            append() x max_entries          reader drains
//!   Open ────────────────────────> Sealed ────────────────> (removable)
//!     │
//!     │ write error
//!     v
//!   Corrupted (writer dropped, no terminator; queue rotates away)
//! ```
//!
//! A read-only segment (scanned from disk on open) has no writer; it is
//! drained until its terminator or EOF, either of which is final.
//!
//! ## Reader/Writer Visibility
//!
//! The writer publishes `num_entries` with Release ordering only after the
//! frame is flushed to the file; the read cursor loads it with Acquire and
//! never advances past it. A reader that catches up with the writer reports
//! a weak end-of-segment and the caller retries later. Sealing is published
//! the same way through the `sealed` flag, so a drained cursor can tell
//! "wait" from "done" without touching the file.
//!
//! ## Concurrency
//!
//! Writer-side state and reader-side state live behind separate mutexes, so
//! appends and reads on the same segment proceed without blocking each
//! other; `num_entries` is the only cross-side communication.

mod reader;
mod writer;

pub(crate) use reader::{FrameRead, SegmentReader};
pub(crate) use writer::SegmentWriter;

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::SystemTime;

use eyre::{bail, Report, Result, WrapErr};
use parking_lot::Mutex;
use tracing::{debug, warn};
use zerocopy::big_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{
    ENTRY_FORMAT_V1, MAX_ENTRY_SIZE, SEGMENT_CREATE_ATTEMPTS, SEGMENT_FILE_PREFIX,
    SEGMENT_FORMAT_V1, SEGMENT_HEADER_SIZE,
};
use crate::entry::Batch;
use crate::error::QueueError;
use crate::offsets::{self, OffsetTracker};
use crate::queue::QueueSettings;

/// On-disk segment file header.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub(crate) struct SegmentHeader {
    segment_format: U32,
    entry_format: U32,
}

const _: () = assert!(std::mem::size_of::<SegmentHeader>() == SEGMENT_HEADER_SIZE);

impl SegmentHeader {
    pub(crate) fn new(segment_format: u32, entry_format: u32) -> Self {
        Self {
            segment_format: U32::new(segment_format),
            entry_format: U32::new(entry_format),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let segment_format = self.segment_format.get();
        if segment_format != SEGMENT_FORMAT_V1 {
            return Err(Report::new(QueueError::UnsupportedSegmentFormat(
                segment_format,
            )));
        }
        let entry_format = self.entry_format.get();
        if entry_format != ENTRY_FORMAT_V1 {
            return Err(Report::new(QueueError::UnsupportedEntryFormat(entry_format)));
        }
        Ok(())
    }
}

/// Outcome of appending to a segment.
pub(crate) enum Append {
    Written,
    /// Payload (or one batch member) exceeds [`MAX_ENTRY_SIZE`].
    TooBig,
    /// Sealed, read-only, or out of capacity for this batch.
    Full,
    /// The writer failed; the segment accepts no more appends.
    Corrupted,
}

/// Outcome of reading from a segment.
pub(crate) enum Read {
    /// The destination buffer holds the next payload.
    Entry,
    /// Caught up with the writer; retry later.
    NoMoreWeak,
    /// Sealed end reached; this segment is exhausted.
    NoMoreStrong,
    /// The file cannot be read (or opened) any further.
    Corrupted,
}

enum WriterSlot {
    Open(SegmentWriter),
    Sealed,
    Corrupted,
    ReadOnly,
}

/// Moves the writer out of an `Open` slot, leaving `next` behind.
fn take_open(slot: &mut WriterSlot, next: WriterSlot) -> Option<SegmentWriter> {
    if matches!(slot, WriterSlot::Open(_)) {
        if let WriterSlot::Open(writer) = std::mem::replace(slot, next) {
            return Some(writer);
        }
    }
    None
}

#[derive(Default)]
struct ReadState {
    reader: Option<SegmentReader>,
    tracker: Option<OffsetTracker>,
    /// Entries consumed (appendable segments only).
    read_offset: u32,
    /// File position just past the last consumed frame.
    byte_offset: u64,
}

pub(crate) struct Segment {
    path: PathBuf,
    read_only: bool,
    max_entries: u32,
    num_entries: AtomicU32,
    sealed: AtomicBool,
    writer: Mutex<WriterSlot>,
    read: Mutex<ReadState>,
    sync_on_commit_offset: bool,
}

impl Segment {
    /// Creates a fresh appendable segment file inside the data directory and
    /// writes its header.
    pub(crate) fn create(settings: &QueueSettings) -> Result<Self> {
        if settings.segment_format != SEGMENT_FORMAT_V1 {
            return Err(Report::new(QueueError::UnsupportedSegmentFormat(
                settings.segment_format,
            )));
        }
        if settings.entry_format != ENTRY_FORMAT_V1 {
            return Err(Report::new(QueueError::UnsupportedEntryFormat(
                settings.entry_format,
            )));
        }

        let (mut file, path) = create_segment_file(&settings.data_dir)?;
        let header = SegmentHeader::new(settings.segment_format, settings.entry_format);
        if let Err(err) = file.write_all(header.as_bytes()) {
            let _ = std::fs::remove_file(&path);
            return Err(Report::new(err))
                .wrap_err_with(|| format!("failed to write segment header at {}", path.display()));
        }
        debug!(path = %path.display(), "created segment");

        Ok(Self {
            path,
            read_only: false,
            max_entries: settings.max_entries_per_segment,
            num_entries: AtomicU32::new(0),
            sealed: AtomicBool::new(false),
            writer: Mutex::new(WriterSlot::Open(SegmentWriter::new(
                file,
                settings.sync_on_write,
            ))),
            read: Mutex::new(ReadState::default()),
            sync_on_commit_offset: settings.sync_on_commit_offset,
        })
    }

    /// Wraps a pre-existing segment file found by the directory scan. The
    /// file is opened lazily on the first read.
    pub(crate) fn from_existing(path: PathBuf, settings: &QueueSettings) -> Self {
        Self {
            path,
            read_only: true,
            max_entries: 0,
            num_entries: AtomicU32::new(0),
            sealed: AtomicBool::new(false),
            writer: Mutex::new(WriterSlot::ReadOnly),
            read: Mutex::new(ReadState::default()),
            sync_on_commit_offset: settings.sync_on_commit_offset,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one payload. Empty payloads are accepted and produce no frame.
    pub(crate) fn append(&self, payload: &[u8]) -> Append {
        if payload.is_empty() {
            return Append::Written;
        }
        if payload.len() > MAX_ENTRY_SIZE {
            return Append::TooBig;
        }

        let mut slot = self.writer.lock();
        let writer = match &mut *slot {
            WriterSlot::Open(writer) => writer,
            WriterSlot::Corrupted => return Append::Corrupted,
            WriterSlot::Sealed | WriterSlot::ReadOnly => return Append::Full,
        };

        match writer.write_entry(payload) {
            Ok(()) => {
                let total = self.num_entries.fetch_add(1, Ordering::Release) + 1;
                if total >= self.max_entries {
                    self.seal(&mut slot);
                }
                Append::Written
            }
            Err(report) => {
                warn!(
                    path = %self.path.display(),
                    error = %report,
                    "append failed, marking segment corrupted"
                );
                *slot = WriterSlot::Corrupted;
                Append::Corrupted
            }
        }
    }

    /// Appends a whole batch or nothing.
    ///
    /// A non-empty segment without room for every frame reports `Full` so
    /// the queue rotates; a fresh segment accepts any batch whole and seals
    /// immediately when it lands past the cap.
    pub(crate) fn append_batch(&self, batch: &Batch) -> Append {
        if batch.is_empty() {
            return Append::Written;
        }
        if !batch.validate_size(MAX_ENTRY_SIZE) {
            return Append::TooBig;
        }

        let mut slot = self.writer.lock();
        let writer = match &mut *slot {
            WriterSlot::Open(writer) => writer,
            WriterSlot::Corrupted => return Append::Corrupted,
            WriterSlot::Sealed | WriterSlot::ReadOnly => return Append::Full,
        };

        let committed = self.num_entries.load(Ordering::Relaxed);
        let count = batch.len() as u32;
        if committed > 0 && committed.saturating_add(count) > self.max_entries {
            return Append::Full;
        }

        match writer.write_batch(batch) {
            Ok(()) => {
                let total = self.num_entries.fetch_add(count, Ordering::Release) + count;
                if total >= self.max_entries {
                    self.seal(&mut slot);
                }
                Append::Written
            }
            Err(report) => {
                warn!(
                    path = %self.path.display(),
                    error = %report,
                    "batch append failed, marking segment corrupted"
                );
                *slot = WriterSlot::Corrupted;
                Append::Corrupted
            }
        }
    }

    fn seal(&self, slot: &mut WriterSlot) {
        if let Some(writer) = take_open(slot, WriterSlot::Sealed) {
            match writer.close() {
                Ok(()) => self.sealed.store(true, Ordering::Release),
                Err(report) => {
                    warn!(
                        path = %self.path.display(),
                        error = %report,
                        "failed to seal segment"
                    );
                    *slot = WriterSlot::Corrupted;
                }
            }
        }
    }

    /// Reads the next payload into `dst`.
    pub(crate) fn read_entry(&self, dst: &mut Vec<u8>) -> Read {
        let mut state = self.read.lock();

        if state.reader.is_none() {
            if let Err(report) = self.open_reader(&mut state) {
                warn!(
                    path = %self.path.display(),
                    error = %report,
                    "failed to open segment for read"
                );
                return Read::Corrupted;
            }
        }

        let mut advanced = false;
        if !self.read_only {
            let committed = self.num_entries.load(Ordering::Acquire);
            if state.read_offset >= committed {
                return if self.sealed.load(Ordering::Acquire) {
                    Read::NoMoreStrong
                } else {
                    Read::NoMoreWeak
                };
            }
            state.read_offset += 1;
            advanced = true;
        }

        let ReadState {
            reader,
            read_offset,
            byte_offset,
            ..
        } = &mut *state;
        let Some(reader) = reader.as_mut() else {
            return Read::Corrupted;
        };

        match reader.read_frame(dst) {
            FrameRead::Entry { frame_len } => {
                *byte_offset += frame_len;
                Read::Entry
            }
            FrameRead::NoMoreWeak => {
                if self.read_only {
                    Read::NoMoreStrong
                } else {
                    // The frame was published but is not in the file yet;
                    // give the cursor back so nothing is skipped.
                    if advanced {
                        *read_offset -= 1;
                    }
                    Read::NoMoreWeak
                }
            }
            FrameRead::NoMoreStrong => Read::NoMoreStrong,
            FrameRead::Corrupted(report) => {
                warn!(
                    path = %self.path.display(),
                    error = %report,
                    "frame read failed, segment corrupted"
                );
                Read::Corrupted
            }
        }
    }

    fn open_reader(&self, state: &mut ReadState) -> Result<()> {
        let (mut reader, file_len) = SegmentReader::open(&self.path)?;
        let mut byte_offset = SEGMENT_HEADER_SIZE as u64;

        let (tracker, resume) = OffsetTracker::open(&self.path, self.sync_on_commit_offset)?;
        if let Some(offset) = resume {
            // Advisory: only honor positions that can fall on a frame.
            if offset > SEGMENT_HEADER_SIZE as u64 && offset <= file_len {
                reader.seek_to(offset)?;
                byte_offset = offset;
                debug!(
                    path = %self.path.display(),
                    offset,
                    "resuming segment from committed offset"
                );
            }
        }

        state.reader = Some(reader);
        state.tracker = Some(tracker);
        state.byte_offset = byte_offset;
        Ok(())
    }

    /// Records the current read position in the offset sidecar.
    pub(crate) fn commit_read_position(&self) {
        let mut state = self.read.lock();
        let offset = state.byte_offset;
        if let Some(tracker) = state.tracker.as_mut() {
            if let Err(report) = tracker.commit(offset) {
                warn!(
                    path = %self.path.display(),
                    error = %report,
                    "failed to commit read offset"
                );
            }
        }
    }

    /// Closes both sides. An open writer is sealed (terminator written).
    pub(crate) fn close(&self) -> Result<()> {
        let result = {
            let mut slot = self.writer.lock();
            match take_open(&mut slot, WriterSlot::Sealed) {
                Some(writer) => match writer.close() {
                    Ok(()) => {
                        self.sealed.store(true, Ordering::Release);
                        Ok(())
                    }
                    Err(report) => {
                        *slot = WriterSlot::Corrupted;
                        Err(report.wrap_err(format!(
                            "failed to close segment at {}",
                            self.path.display()
                        )))
                    }
                },
                None => Ok(()),
            }
        };

        let mut state = self.read.lock();
        state.reader = None;
        state.tracker = None;
        result
    }

    /// Drops all handles and unlinks the segment file and its sidecar.
    pub(crate) fn discard(&self) {
        {
            let mut slot = self.writer.lock();
            // No terminator: a discarded segment is never read again.
            let _ = take_open(&mut slot, WriterSlot::Corrupted);
        }
        {
            let mut state = self.read.lock();
            state.reader = None;
            state.tracker = None;
        }

        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!(
                path = %self.path.display(),
                error = %err,
                "failed to remove segment file"
            );
        }
        let sidecar = offsets::sidecar_path(&self.path);
        if let Err(err) = std::fs::remove_file(&sidecar) {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(
                    path = %sidecar.display(),
                    error = %err,
                    "failed to remove offset sidecar"
                );
            }
        }
    }
}

/// Creates a uniquely named segment file with `O_CREAT|O_EXCL` semantics.
fn create_segment_file(dir: &Path) -> Result<(File, PathBuf)> {
    for _ in 0..SEGMENT_CREATE_ATTEMPTS {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = dir.join(format!("{SEGMENT_FILE_PREFIX}{nanos}"));

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(Report::new(err)).wrap_err_with(|| {
                    format!("failed to create segment file at {}", path.display())
                })
            }
        }
    }

    bail!(
        "no unused segment file name after {SEGMENT_CREATE_ATTEMPTS} attempts in {}",
        dir.display()
    )
}
