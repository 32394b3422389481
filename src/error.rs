//! # Error Kinds
//!
//! Typed error values callers can match on. Fallible operations across the
//! crate return `eyre::Result`; the variants below are embedded in the
//! report chain and recoverable with `Report::downcast_ref::<QueueError>()`.
//!
//! Corruption detected on the read side is never surfaced through
//! `dequeue`/`peek` (they return `bool`); it is contained by dropping the
//! affected segment and reported through the `tracing` hook instead.

use thiserror::Error;

use crate::config::MAX_ENTRY_SIZE;

/// Error kinds surfaced by queue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Payload exceeds [`MAX_ENTRY_SIZE`]; the segment is unaffected.
    #[error("entry size is bigger than the {MAX_ENTRY_SIZE} byte limit")]
    EntryTooBig,

    /// A frame's CRC-32 did not match its payload.
    #[error("invalid checksum")]
    InvalidChecksum,

    /// Segment header carries a format tag this build does not understand.
    #[error("unsupported segment format {0}")]
    UnsupportedSegmentFormat(u32),

    /// Segment header carries an entry format tag this build does not understand.
    #[error("unsupported entry format {0}")]
    UnsupportedEntryFormat(u32),

    /// No writable tail segment could be produced after rotation attempts.
    #[error("queue corrupted")]
    QueueCorrupted,
}
