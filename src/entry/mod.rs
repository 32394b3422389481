//! # Entry Codec
//!
//! This module frames opaque byte payloads for storage inside segment files
//! and validates them on the way back out. Every entry becomes one frame:
//!
//! ## Frame Layout (EntryV1)
//!
//! ```text
//! Offset  Size  Field     Description
//! ------  ----  --------  ----------------------------------------
//! 0       4     length    Payload length (u32 BE, non-zero)
//! 4       4     crc32     CRC-32/IEEE over the payload only (u32 BE)
//! 8       N     payload   Opaque bytes
//! ```
//!
//! A frame whose `length` field is zero is the segment terminator; no CRC or
//! payload follows it. Valid payload lengths are `1..=MAX_ENTRY_SIZE`.
//!
//! ## Decoding Outcomes
//!
//! Decoding distinguishes four non-success conditions because the segment
//! layer reacts differently to each:
//!
//! - clean EOF before the first header byte: the writer may still be
//!   appending, nothing is wrong yet
//! - a zero length field: sealed end of segment
//! - a length above [`MAX_ENTRY_SIZE`]: the file cannot be trusted
//! - anything else short or mismatched: corruption
//!
//! ## Allocation Behavior
//!
//! Encoding stages the 8-byte header on the stack and streams the payload
//! straight into the (buffered) writer. Decoding reuses the destination
//! buffer's capacity, growing it only when a frame is larger than anything
//! seen before.

use std::io::{self, Read, Write};

use crc::{Crc, CRC_32_ISO_HDLC};
use eyre::Report;

use crate::config::{FRAME_HEADER_SIZE, MAX_ENTRY_SIZE};
use crate::error::QueueError;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32/IEEE over a payload.
pub(crate) fn checksum(payload: &[u8]) -> u32 {
    CRC32.checksum(payload)
}

/// Outcome of decoding one frame.
pub(crate) enum Decode {
    /// A payload was read into the destination buffer.
    Ok,
    /// Clean end of stream before the first header byte.
    Eof,
    /// Zero-length frame: the segment terminator.
    Terminator,
    /// Length field exceeds [`MAX_ENTRY_SIZE`]; nothing further was read.
    TooBig,
    /// Truncated header/payload or checksum mismatch.
    Corrupted(Report),
}

/// Writes one frame for `payload`.
///
/// Durability is the caller's concern; this only hands bytes to `w`.
pub(crate) fn encode(payload: &[u8], w: &mut impl Write) -> io::Result<()> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    header[..4].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    header[4..].copy_from_slice(&checksum(payload).to_be_bytes());
    w.write_all(&header)?;
    w.write_all(payload)
}

/// Reads one frame into `dst`.
///
/// On [`Decode::Ok`] the frame occupied `FRAME_HEADER_SIZE + dst.len()`
/// bytes of the stream. On any other outcome `dst` contents are unspecified.
pub(crate) fn decode(r: &mut impl Read, dst: &mut Vec<u8>) -> Decode {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match read_header(r, &mut header) {
        HeaderRead::Eof => return Decode::Eof,
        HeaderRead::Failed(err) => return Decode::Corrupted(err.into()),
        HeaderRead::Full => {}
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if length == 0 {
        return Decode::Terminator;
    }
    if length as usize > MAX_ENTRY_SIZE {
        return Decode::TooBig;
    }

    dst.clear();
    dst.resize(length as usize, 0);
    if let Err(err) = r.read_exact(dst) {
        return Decode::Corrupted(err.into());
    }

    if checksum(dst) != crc {
        return Decode::Corrupted(Report::new(QueueError::InvalidChecksum));
    }

    Decode::Ok
}

enum HeaderRead {
    /// Zero bytes were available.
    Eof,
    Full,
    /// Header was cut short or the read itself failed.
    Failed(io::Error),
}

fn read_header(r: &mut impl Read, buf: &mut [u8; FRAME_HEADER_SIZE]) -> HeaderRead {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return HeaderRead::Eof,
            Ok(0) => {
                return HeaderRead::Failed(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("frame header truncated after {filled} bytes"),
                ))
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return HeaderRead::Failed(err),
        }
    }
    HeaderRead::Full
}

/// Writes every frame of `batch` in order, stopping at the first error.
pub(crate) fn encode_batch(batch: &Batch, w: &mut impl Write) -> io::Result<()> {
    for payload in batch.entries() {
        encode(payload, w)?;
    }
    Ok(())
}

/// An ordered collection of entries written to one segment as a unit.
///
/// Empty payloads are dropped on append, matching the queue's treatment of
/// zero-length enqueues. A batch is never split across segments.
#[derive(Debug, Default)]
pub struct Batch {
    entries: Vec<Vec<u8>>,
}

impl Batch {
    /// Creates a batch with room for `cap` entries.
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::with_capacity(cap),
        }
    }

    /// Appends an entry. Zero-length entries are silently ignored.
    pub fn append(&mut self, entry: impl Into<Vec<u8>>) {
        let entry = entry.into();
        if !entry.is_empty() {
            self.entries.push(entry);
        }
    }

    /// Number of entries in the batch.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clears the batch for reuse.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Returns true iff every entry is at most `limit` bytes.
    pub fn validate_size(&self, limit: usize) -> bool {
        self.entries.iter().all(|e| e.len() <= limit)
    }

    pub(crate) fn entries(&self) -> &[Vec<u8>] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn decode_all(bytes: &[u8]) -> (Decode, Vec<u8>) {
        let mut dst = Vec::new();
        let outcome = decode(&mut Cursor::new(bytes), &mut dst);
        (outcome, dst)
    }

    #[test]
    fn round_trips_a_small_payload() {
        let payload = vec![0x01, 0x02, 0x03];
        let mut buf = Vec::new();
        encode(&payload, &mut buf).unwrap();

        assert_eq!(buf.len(), FRAME_HEADER_SIZE + payload.len());
        let (outcome, dst) = decode_all(&buf);
        assert!(matches!(outcome, Decode::Ok));
        assert_eq!(dst, payload);
    }

    #[test]
    fn round_trips_a_max_size_payload() {
        let payload = vec![0xAB; MAX_ENTRY_SIZE];
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        encode(&payload, &mut buf).unwrap();

        let (outcome, dst) = decode_all(&buf);
        assert!(matches!(outcome, Decode::Ok));
        assert_eq!(dst.len(), MAX_ENTRY_SIZE);
    }

    #[test]
    fn clean_eof_before_header() {
        let (outcome, _) = decode_all(&[]);
        assert!(matches!(outcome, Decode::Eof));
    }

    #[test]
    fn partial_header_is_corruption() {
        let (outcome, _) = decode_all(&[0, 0, 0]);
        assert!(matches!(outcome, Decode::Corrupted(_)));
    }

    #[test]
    fn zero_length_is_the_terminator() {
        let (outcome, _) = decode_all(&[0u8; FRAME_HEADER_SIZE]);
        assert!(matches!(outcome, Decode::Terminator));
    }

    #[test]
    fn oversized_length_field() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_ENTRY_SIZE as u32) + 1).to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());

        let (outcome, _) = decode_all(&buf);
        assert!(matches!(outcome, Decode::TooBig));
    }

    #[test]
    fn truncated_payload_is_corruption() {
        let payload = vec![7u8; 64];
        let mut buf = Vec::new();
        encode(&payload, &mut buf).unwrap();
        buf.truncate(buf.len() - 10);

        let (outcome, _) = decode_all(&buf);
        assert!(matches!(outcome, Decode::Corrupted(_)));
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let payload = vec![7u8; 64];
        let mut buf = Vec::new();
        encode(&payload, &mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let (outcome, _) = decode_all(&buf);
        match outcome {
            Decode::Corrupted(report) => {
                assert_eq!(
                    report.downcast_ref::<QueueError>(),
                    Some(&QueueError::InvalidChecksum)
                );
            }
            _ => panic!("flipping a payload byte SHOULD fail the checksum"),
        }
    }

    #[test]
    fn decode_reuses_destination_capacity() {
        let payload = vec![1u8; 128];
        let mut buf = Vec::new();
        encode(&payload, &mut buf).unwrap();

        let mut dst = Vec::with_capacity(4096);
        let ptr = dst.as_ptr();
        let outcome = decode(&mut Cursor::new(&buf), &mut dst);
        assert!(matches!(outcome, Decode::Ok));
        assert_eq!(dst.as_ptr(), ptr);
    }

    #[test]
    fn batch_drops_empty_entries() {
        let mut batch = Batch::new(4);
        batch.append(vec![1u8, 2]);
        batch.append(Vec::<u8>::new());
        batch.append(vec![3u8]);

        assert_eq!(batch.len(), 2);
        batch.reset();
        assert!(batch.is_empty());
    }

    #[test]
    fn batch_validate_size() {
        let mut batch = Batch::new(2);
        batch.append(vec![0u8; 10]);
        batch.append(vec![0u8; 20]);

        assert!(batch.validate_size(20));
        assert!(!batch.validate_size(19));
    }

    #[test]
    fn batch_frames_are_written_in_order() {
        let mut batch = Batch::new(2);
        batch.append(vec![1u8]);
        batch.append(vec![2u8, 3]);

        let mut buf = Vec::new();
        encode_batch(&batch, &mut buf).unwrap();

        let mut cursor = Cursor::new(&buf);
        let mut dst = Vec::new();
        assert!(matches!(decode(&mut cursor, &mut dst), Decode::Ok));
        assert_eq!(dst, vec![1]);
        assert!(matches!(decode(&mut cursor, &mut dst), Decode::Ok));
        assert_eq!(dst, vec![2, 3]);
        assert!(matches!(decode(&mut cursor, &mut dst), Decode::Eof));
    }

    proptest! {
        #[test]
        fn round_trips_arbitrary_payloads(payload in proptest::collection::vec(any::<u8>(), 1..2048)) {
            let mut buf = Vec::new();
            encode(&payload, &mut buf).unwrap();

            let mut dst = Vec::new();
            let outcome = decode(&mut Cursor::new(&buf), &mut dst);
            prop_assert!(matches!(outcome, Decode::Ok));
            prop_assert_eq!(dst, payload);
        }
    }
}
