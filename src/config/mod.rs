//! # Configuration Module
//!
//! This module centralizes all configuration constants for the queue.
//! Constants whose values depend on each other are co-located and tied
//! together with compile-time assertions so the on-disk format cannot
//! drift apart silently.
//!
//! ## Module Organization
//!
//! - [`constants`]: All numeric configuration values with dependency
//!   documentation

mod constants;

pub use constants::{
    DEFAULT_MAX_ENTRIES_PER_SEGMENT, ENTRY_FORMAT_V1, FRAME_HEADER_SIZE, IO_BUFFER_SIZE,
    MAX_ENTRY_SIZE, OFFSET_COMMIT_SIZE, OFFSET_COMPACT_THRESHOLD, OFFSET_FILE_SUFFIX,
    SEGMENT_CREATE_ATTEMPTS, SEGMENT_FILE_PREFIX, SEGMENT_FORMAT_V1, SEGMENT_HEADER_SIZE,
    SEGMENT_TERMINATOR,
};
