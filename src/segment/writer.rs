//! # Segment Writer
//!
//! Buffered append half of a segment file. Frames pass through a 16 KiB
//! buffer and are flushed to the file before the caller publishes them to
//! readers, so a reader holding its own handle on the same path never sees
//! a committed frame torn. Closing writes the terminator and flushes, which
//! seals the segment for good.

use std::fs::File;
use std::io::{BufWriter, Write};

use eyre::{Result, WrapErr};

use crate::config::{IO_BUFFER_SIZE, SEGMENT_TERMINATOR};
use crate::entry::{self, Batch};

pub(crate) struct SegmentWriter {
    w: BufWriter<File>,
    sync_on_write: bool,
}

impl SegmentWriter {
    pub(crate) fn new(file: File, sync_on_write: bool) -> Self {
        Self {
            w: BufWriter::with_capacity(IO_BUFFER_SIZE, file),
            sync_on_write,
        }
    }

    /// Appends one frame and flushes it to the file.
    pub(crate) fn write_entry(&mut self, payload: &[u8]) -> Result<()> {
        entry::encode(payload, &mut self.w).wrap_err("failed to append frame")?;
        self.flush()
    }

    /// Appends every frame of `batch`, flushing once at the end.
    pub(crate) fn write_batch(&mut self, batch: &Batch) -> Result<()> {
        entry::encode_batch(batch, &mut self.w).wrap_err("failed to append batch frames")?;
        self.flush()
    }

    /// Writes the terminator, flushes, and closes the underlying file.
    pub(crate) fn close(mut self) -> Result<()> {
        self.w
            .write_all(&SEGMENT_TERMINATOR)
            .wrap_err("failed to write segment terminator")?;
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.w.flush().wrap_err("failed to flush segment buffer")?;
        if self.sync_on_write {
            self.w
                .get_ref()
                .sync_data()
                .wrap_err("failed to sync segment file")?;
        }
        Ok(())
    }
}
