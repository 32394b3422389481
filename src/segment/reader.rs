//! # Segment Reader
//!
//! Buffered sequential scan of a segment file. Opening consumes and
//! validates the 8-byte segment header, leaving the reader positioned at
//! the first frame. Seeking goes through the buffer, which is invalidated
//! and refilled from the new position.
//!
//! ## Outcome Mapping
//!
//! Codec outcomes translate into segment-level read signals:
//!
//! ```text
//! Codec            Reader
//! ---------------  --------------------------------------------
//! Ok               Entry (frame consumed, span reported)
//! Eof              NoMoreWeak   (writer may still append)
//! Terminator       NoMoreStrong (sealed, nothing will follow)
//! TooBig           Corrupted    (oversize length field)
//! Corrupted        Corrupted
//! ```

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use eyre::{eyre, Report, Result, WrapErr};
use zerocopy::FromBytes;

use crate::config::{FRAME_HEADER_SIZE, IO_BUFFER_SIZE, SEGMENT_HEADER_SIZE};
use crate::entry::{self, Decode};
use crate::error::QueueError;

use super::SegmentHeader;

/// Outcome of reading one frame from a segment file.
pub(crate) enum FrameRead {
    /// `dst` holds the payload; the frame spanned `frame_len` bytes.
    Entry { frame_len: u64 },
    /// Current end of an appendable segment; more data may arrive.
    NoMoreWeak,
    /// Sealed end; this file will never produce more frames.
    NoMoreStrong,
    Corrupted(Report),
}

pub(crate) struct SegmentReader {
    r: BufReader<File>,
}

impl SegmentReader {
    /// Opens `path`, consumes its segment header, and returns the reader
    /// together with the file length at open time.
    pub(crate) fn open(path: &Path) -> Result<(Self, u64)> {
        let file = File::open(path)
            .wrap_err_with(|| format!("failed to open segment for read at {}", path.display()))?;
        let len = file
            .metadata()
            .wrap_err("failed to stat segment file")?
            .len();

        let mut r = BufReader::with_capacity(IO_BUFFER_SIZE, file);
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        r.read_exact(&mut buf)
            .wrap_err_with(|| format!("failed to read segment header of {}", path.display()))?;

        let header = SegmentHeader::read_from_bytes(&buf[..])
            .map_err(|e| eyre!("invalid segment header in {}: {e:?}", path.display()))?;
        header.validate()?;

        Ok((Self { r }, len))
    }

    /// Repositions the reader; the buffer is reset.
    pub(crate) fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.r
            .seek(SeekFrom::Start(offset))
            .wrap_err_with(|| format!("failed to seek segment reader to {offset}"))?;
        Ok(())
    }

    pub(crate) fn read_frame(&mut self, dst: &mut Vec<u8>) -> FrameRead {
        match entry::decode(&mut self.r, dst) {
            Decode::Ok => FrameRead::Entry {
                frame_len: (FRAME_HEADER_SIZE + dst.len()) as u64,
            },
            Decode::Eof => FrameRead::NoMoreWeak,
            Decode::Terminator => FrameRead::NoMoreStrong,
            Decode::TooBig => FrameRead::Corrupted(Report::new(QueueError::EntryTooBig)),
            Decode::Corrupted(report) => FrameRead::Corrupted(report),
        }
    }
}
