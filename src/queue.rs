//! # Queue Manifold
//!
//! Composes an ordered sequence of segments into one logical FIFO queue.
//! Reads come from the head segment, writes go to the tail, and the two
//! ends move independently:
//!
//! ```text
//! <data_dir>/
//! ├── seg_1712000000000001          # head: being drained
//! ├── seg_1712000000000001.offset   # consumer progress for the head
//! ├── seg_1712000000000002          # sealed, waiting
//! └── seg_1712000000000003          # tail: being appended
//! ```
//!
//! ## Opening
//!
//! Opening scans the data directory for files with the segment prefix
//! (offset sidecars excluded), orders them by modification time, and
//! appends one freshly created segment as the tail for upcoming writes.
//! Pre-existing segments are read-only; the tail is the only writable one.
//!
//! ## Rotation and Removal
//!
//! A full or write-corrupted tail is replaced by a new one (a single retry,
//! two attempts total, then the enqueue reports the queue corrupted). A
//! drained or unreadable head is unlinked together with its sidecar and the
//! next segment takes over. The tail itself is never removed; an exhausted
//! tail simply reports nothing available.
//!
//! ## Locking
//!
//! - the segment list (`RwLock`): exclusive for enqueue and topology
//!   changes, shared for the brief head/tail snapshots readers take
//! - the reader state (`Mutex`): serializes dequeue/peek so the offset
//!   commits and the single-slot peek cache stay consistent
//!
//! Readers and writers only contend on list topology, never on file I/O.
//!
//! ## Error Surfacing
//!
//! `enqueue`/`enqueue_batch` return errors (`QueueError` kinds downcastable
//! from the report). `dequeue`/`peek` return `bool`; read-side failures are
//! contained by dropping the affected segment and logged via `tracing`.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{Report, Result, WrapErr};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::{
    DEFAULT_MAX_ENTRIES_PER_SEGMENT, ENTRY_FORMAT_V1, OFFSET_FILE_SUFFIX, SEGMENT_FILE_PREFIX,
    SEGMENT_FORMAT_V1,
};
use crate::entry::Batch;
use crate::error::QueueError;
use crate::segment::{Append, Read, Segment};

/// Open-time configuration for a [`Queue`].
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Directory owning the segment files. Created if missing.
    pub data_dir: PathBuf,
    /// Seal threshold per segment; 0 falls back to
    /// [`DEFAULT_MAX_ENTRIES_PER_SEGMENT`].
    pub max_entries_per_segment: u32,
    /// Segment file format tag written to new segments.
    pub segment_format: u32,
    /// Entry frame format tag written to new segments.
    pub entry_format: u32,
    /// Sync segment data to disk after every append. Off by default: the
    /// queue targets process-crash safety, not OS-crash durability.
    pub sync_on_write: bool,
    /// Sync the offset sidecar after every commit. Off by default.
    pub sync_on_commit_offset: bool,
}

impl QueueSettings {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            max_entries_per_segment: DEFAULT_MAX_ENTRIES_PER_SEGMENT,
            segment_format: SEGMENT_FORMAT_V1,
            entry_format: ENTRY_FORMAT_V1,
            sync_on_write: false,
            sync_on_commit_offset: false,
        }
    }

    /// Opens the queue described by these settings.
    pub fn open(self) -> Result<Queue> {
        Queue::open_with(self)
    }

    fn normalized(mut self) -> Self {
        if self.max_entries_per_segment == 0 {
            self.max_entries_per_segment = DEFAULT_MAX_ENTRIES_PER_SEGMENT;
        }
        self
    }
}

struct PeekedEntry {
    segment: Arc<Segment>,
    data: Vec<u8>,
}

#[derive(Default)]
struct ReaderState {
    peek: Option<PeekedEntry>,
}

/// A persistent FIFO queue over a directory of segment files.
///
/// One `Queue` instance owns its data directory. All operations take
/// `&self`; producers and consumers may share the queue across threads.
pub struct Queue {
    segments: RwLock<VecDeque<Arc<Segment>>>,
    reader: Mutex<ReaderState>,
    settings: QueueSettings,
    closed: AtomicBool,
}

impl Queue {
    /// Opens (or creates) a queue in `data_dir`.
    ///
    /// `max_entries_per_segment` of 0 selects the default of
    /// [`DEFAULT_MAX_ENTRIES_PER_SEGMENT`].
    pub fn open(data_dir: impl AsRef<Path>, max_entries_per_segment: u32) -> Result<Self> {
        let mut settings = QueueSettings::new(data_dir);
        settings.max_entries_per_segment = max_entries_per_segment;
        settings.open()
    }

    fn open_with(settings: QueueSettings) -> Result<Self> {
        let settings = settings.normalized();

        fs::create_dir_all(&settings.data_dir).wrap_err_with(|| {
            format!(
                "failed to create data directory at {}",
                settings.data_dir.display()
            )
        })?;

        let mut segments: VecDeque<Arc<Segment>> = scan_segment_files(&settings.data_dir)?
            .into_iter()
            .map(|path| Arc::new(Segment::from_existing(path, &settings)))
            .collect();

        // Fresh tail for upcoming writes; everything scanned is read-only.
        let tail = Segment::create(&settings)?;
        segments.push_back(Arc::new(tail));

        Ok(Self {
            segments: RwLock::new(segments),
            reader: Mutex::new(ReaderState::default()),
            settings,
            closed: AtomicBool::new(false),
        })
    }

    /// Appends one entry to the tail segment.
    ///
    /// Zero-length payloads are accepted and ignored. Oversized payloads
    /// fail with [`QueueError::EntryTooBig`] and leave the queue unchanged.
    pub fn enqueue(&self, payload: &[u8]) -> Result<()> {
        self.write_with(|tail| tail.append(payload))
    }

    /// Appends a batch to the tail segment as a unit.
    ///
    /// The batch is never split: it lands entirely in the current tail or,
    /// after rotation, entirely in a fresh one.
    pub fn enqueue_batch(&self, batch: &Batch) -> Result<()> {
        self.write_with(|tail| tail.append_batch(batch))
    }

    fn write_with(&self, mut write: impl FnMut(&Segment) -> Append) -> Result<()> {
        let mut segments = self.segments.write();

        for _ in 0..2 {
            let Some(tail) = segments.back() else {
                return Err(Report::new(QueueError::QueueCorrupted));
            };

            match write(tail) {
                Append::Written => return Ok(()),
                Append::TooBig => return Err(Report::new(QueueError::EntryTooBig)),
                Append::Full | Append::Corrupted => {
                    let segment = Segment::create(&self.settings)?;
                    debug!(path = %segment.path().display(), "rotated to a new tail segment");
                    segments.push_back(Arc::new(segment));
                }
            }
        }

        Err(Report::new(QueueError::QueueCorrupted))
    }

    /// Moves the next entry into `dst`. Returns false when nothing is
    /// available; the caller polls.
    pub fn dequeue(&self, dst: &mut Vec<u8>) -> bool {
        let mut reader = self.reader.lock();

        if let Some(peeked) = reader.peek.take() {
            *dst = peeked.data;
            peeked.segment.commit_read_position();
            return true;
        }

        loop {
            let Some(head) = self.head() else {
                return false;
            };

            match head.read_entry(dst) {
                Read::Entry => {
                    head.commit_read_position();
                    return true;
                }
                Read::NoMoreWeak => return false,
                Read::NoMoreStrong | Read::Corrupted => {
                    if !self.remove_head(&head) {
                        return false;
                    }
                }
            }
        }
    }

    /// Copies the next entry into `dst` without consuming it.
    ///
    /// Repeated peeks return the same entry; the following dequeue consumes
    /// it and advances exactly once. No offset is committed until then.
    pub fn peek(&self, dst: &mut Vec<u8>) -> bool {
        let mut reader = self.reader.lock();

        if let Some(peeked) = reader.peek.as_ref() {
            dst.clear();
            dst.extend_from_slice(&peeked.data);
            return true;
        }

        loop {
            let Some(head) = self.head() else {
                return false;
            };

            match head.read_entry(dst) {
                Read::Entry => {
                    reader.peek = Some(PeekedEntry {
                        segment: head,
                        data: dst.clone(),
                    });
                    return true;
                }
                Read::NoMoreWeak => return false,
                Read::NoMoreStrong | Read::Corrupted => {
                    if !self.remove_head(&head) {
                        return false;
                    }
                }
            }
        }
    }

    /// Closes every segment, sealing the tail. Errors from individual
    /// segments are aggregated; the first failure leads the report chain.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.reader.lock().peek = None;

        let mut segments = self.segments.write();
        let mut errors = Vec::new();
        while let Some(segment) = segments.pop_front() {
            if let Err(report) = segment.close() {
                errors.push(report);
            }
        }

        aggregate(errors)
    }

    fn head(&self) -> Option<Arc<Segment>> {
        self.segments.read().front().cloned()
    }

    /// Removes the head segment and deletes its files. Returns false when
    /// the head is the tail, which is never removed.
    fn remove_head(&self, head: &Arc<Segment>) -> bool {
        let removed = {
            let mut segments = self.segments.write();

            let is_head = segments
                .front()
                .map_or(false, |front| Arc::ptr_eq(front, head));
            if !is_head {
                return true;
            }
            let is_tail = segments.back().map_or(false, |back| Arc::ptr_eq(back, head));
            if is_tail {
                return false;
            }

            segments.pop_front()
        };

        if let Some(segment) = removed {
            debug!(path = %segment.path().display(), "removing drained head segment");
            segment.discard();
        }
        true
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Err(report) = self.close() {
            warn!(error = %report, "failed to close queue cleanly");
        }
    }
}

/// Segment files in the data directory, ordered by modification time.
fn scan_segment_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .wrap_err_with(|| format!("failed to read data directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.wrap_err("failed to read directory entry")?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(SEGMENT_FILE_PREFIX) || name.ends_with(OFFSET_FILE_SUFFIX) {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .wrap_err_with(|| format!("failed to stat segment file {name}"))?;
        files.push((modified, entry.path()));
    }

    // Names embed creation nanos, breaking modification-time ties.
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn aggregate(errors: Vec<Report>) -> Result<()> {
    let mut errors = errors.into_iter();
    let Some(first) = errors.next() else {
        return Ok(());
    };

    let mut report = first;
    for next in errors {
        report = report.wrap_err(next.to_string());
    }
    Err(report)
}
