//! # duraq - Embedded Persistent FIFO Queue
//!
//! duraq is a persistent FIFO queue embedded in a host process, backed by a
//! directory of append-only segment files. Entries are opaque byte payloads
//! persisted in insertion order; reads survive process restarts and resume
//! where dequeue left off.
//!
//! ## Quick Start
//!
//! ```no_run
//! use duraq::Queue;
//!
//! # fn main() -> eyre::Result<()> {
//! let queue = Queue::open("./myqueue", 0)?;
//!
//! queue.enqueue(b"hello")?;
//! queue.enqueue(b"world")?;
//!
//! let mut entry = Vec::new();
//! while queue.dequeue(&mut entry) {
//!     println!("{:?}", entry);
//! }
//!
//! queue.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │       Public API (Queue, Batch)      │
//! ├─────────────────────────────────────┤
//! │  Queue manifold (head/tail, peek,    │
//! │  rotation, corruption isolation)     │
//! ├──────────────────┬──────────────────┤
//! │ Segment state    │  Offset tracker  │
//! │ machine          │  (.offset files) │
//! ├──────────────────┴──────────────────┤
//! │   Segment writer/reader (buffered)   │
//! ├─────────────────────────────────────┤
//! │     Entry codec (length + CRC32)     │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! data_dir/
//! ├── seg_<nanos>           # segment: 8-byte header, frames, terminator
//! └── seg_<nanos>.offset    # sidecar: committed consumer byte offsets
//! ```
//!
//! Each segment holds at most `max_entries_per_segment` frames; a full tail
//! is sealed with an 8-zero-byte terminator and a fresh tail is created.
//! Drained segments are unlinked together with their sidecars.
//!
//! ## Concurrency
//!
//! Any number of threads may enqueue and dequeue on one `Queue`. Writers
//! serialize on the tail; readers serialize on the head. `dequeue` never
//! blocks waiting for data: it returns `false` on an empty queue and the
//! caller polls with its own back-off.
//!
//! ## Durability
//!
//! The queue targets process-crash safety. Frames are flushed to the OS
//! before becoming visible to readers, but `fsync` is not issued between
//! entries unless `sync_on_write`/`sync_on_commit_offset` are enabled in
//! [`QueueSettings`]. Consumer progress is committed per dequeue; after a
//! crash the last committed entry may be delivered again.
//!
//! ## Module Overview
//!
//! - [`queue`]: queue manifold, settings, directory scan
//! - [`entry`]: frame codec and [`Batch`]
//! - [`config`]: on-disk format constants and tunables
//! - [`error`]: typed error kinds
//! - `segment`: per-segment state machine and buffered file I/O
//! - `offsets`: consumer progress sidecars

pub mod config;
pub mod entry;
pub mod error;
mod offsets;
pub mod queue;
mod segment;

pub use entry::Batch;
pub use error::QueueError;
pub use queue::{Queue, QueueSettings};
