//! # Queue Configuration Constants
//!
//! This module centralizes the constants that define the on-disk format and
//! the runtime defaults of the queue. Values that depend on each other are
//! documented together and enforced with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! FRAME_HEADER_SIZE (8 bytes)
//!       │
//!       ├─> SEGMENT_TERMINATOR (must be exactly one frame header of zeros;
//!       │     a zero length field is the end-of-segment sentinel, so the
//!       │     terminator length always equals the frame header length)
//!       │
//!       └─> byte offsets committed to the offset sidecar are computed as
//!           FRAME_HEADER_SIZE + payload length per consumed frame
//!
//! MAX_ENTRY_SIZE (5 MiB)
//!       │
//!       └─> must fit in the u32 length field of a frame header
//!
//! SEGMENT_HEADER_SIZE (8 bytes)
//!       │
//!       └─> initial read position of every segment; the smallest valid
//!           committed byte offset
//!
//! OFFSET_COMMIT_SIZE (8 bytes)
//!       │
//!       └─> OFFSET_COMPACT_THRESHOLD is a whole multiple, so compaction
//!           never truncates mid-record
//! ```
//!
//! ## Modifying Constants
//!
//! `SEGMENT_FORMAT_V1` and `ENTRY_FORMAT_V1` are wire-format version tags;
//! bumping either requires a new segment/entry implementation, not a change
//! here. The remaining values are tunables.

/// Maximum payload size accepted by the queue, in bytes.
///
/// A frame length above this value on disk marks the segment corrupted.
pub const MAX_ENTRY_SIZE: usize = 5 * 1024 * 1024;

/// Default seal threshold when settings specify zero.
pub const DEFAULT_MAX_ENTRIES_PER_SEGMENT: u32 = 1000;

/// Size of a frame header: `[length u32 BE][crc32 u32 BE]`.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Size of a segment file header: `[segment_format u32 BE][entry_format u32 BE]`.
pub const SEGMENT_HEADER_SIZE: usize = 8;

/// Written after the last frame when a segment is sealed cleanly.
pub const SEGMENT_TERMINATOR: [u8; FRAME_HEADER_SIZE] = [0u8; FRAME_HEADER_SIZE];

/// Buffering size for segment readers and writers.
pub const IO_BUFFER_SIZE: usize = 16 << 10;

/// Prefix of segment file names inside the data directory.
pub const SEGMENT_FILE_PREFIX: &str = "seg_";

/// Suffix of the per-segment offset sidecar file.
pub const OFFSET_FILE_SUFFIX: &str = ".offset";

/// Size of one committed offset record in the sidecar (u64 BE).
pub const OFFSET_COMMIT_SIZE: usize = 8;

/// Sidecar size at which it is truncated and rewritten before the next commit.
pub const OFFSET_COMPACT_THRESHOLD: u64 = 64 * 1024;

/// Attempts to find an unused segment file name before giving up.
pub const SEGMENT_CREATE_ATTEMPTS: u32 = 10_000;

/// Segment format tag for the V1 layout.
pub const SEGMENT_FORMAT_V1: u32 = 0;

/// Entry format tag for the V1 frame layout.
pub const ENTRY_FORMAT_V1: u32 = 0;

const _: () = assert!(SEGMENT_TERMINATOR.len() == FRAME_HEADER_SIZE);
const _: () = assert!(MAX_ENTRY_SIZE <= u32::MAX as usize);
const _: () = assert!(OFFSET_COMPACT_THRESHOLD % OFFSET_COMMIT_SIZE as u64 == 0);
