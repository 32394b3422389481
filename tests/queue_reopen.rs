//! # Restart and Recovery Tests
//!
//! Covers behavior across close/reopen cycles:
//! 1. A cleanly closed queue reopens with every entry intact, in order
//! 2. A partially consumed queue resumes exactly where dequeue left off,
//!    including mid-segment via the offset sidecar
//! 3. A CRC-corrupted segment is contained: it is dropped and later
//!    segments stay readable

use duraq::config::{OFFSET_FILE_SUFFIX, SEGMENT_FILE_PREFIX, SEGMENT_HEADER_SIZE};
use duraq::Queue;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn segment_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(SEGMENT_FILE_PREFIX) && !name.ends_with(OFFSET_FILE_SUFFIX)
        })
        .map(|entry| entry.path())
        .collect();
    files.sort();
    files
}

/// Payload carrying its index in the first four bytes.
fn payload(index: u32, size: usize) -> Vec<u8> {
    let mut data = vec![(index % 251) as u8; size.max(4)];
    data[..4].copy_from_slice(&index.to_be_bytes());
    data
}

fn payload_index(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

mod durability {
    use super::*;

    #[test]
    fn entries_survive_close_and_reopen_in_order() {
        let dir = tempdir().unwrap();

        let queue = Queue::open(dir.path(), 10).unwrap();
        for i in 0..50 {
            queue.enqueue(&payload(i, 64)).unwrap();
        }
        queue.close().unwrap();

        let queue = Queue::open(dir.path(), 10).unwrap();
        let mut dst = Vec::new();
        for i in 0..50 {
            assert!(queue.dequeue(&mut dst), "entry {i} SHOULD survive reopen");
            assert_eq!(payload_index(&dst), i);
        }
        assert!(!queue.dequeue(&mut dst));
    }

    #[test]
    fn an_unsealed_tail_is_still_readable_after_a_crash() {
        let dir = tempdir().unwrap();

        // Dropping without close() leaks the terminator, like a crash
        // between flush and seal would.
        {
            let queue = Queue::open(dir.path(), 100).unwrap();
            queue.enqueue(b"persisted").unwrap();
            std::mem::forget(queue);
        }

        let queue = Queue::open(dir.path(), 100).unwrap();
        let mut dst = Vec::new();
        assert!(queue.dequeue(&mut dst));
        assert_eq!(dst, *b"persisted");
        assert!(!queue.dequeue(&mut dst));
    }
}

mod resume {
    use super::*;

    const TOTAL: u32 = 2500;
    const CONSUMED: u32 = 2400;

    #[test]
    fn a_partially_consumed_queue_resumes_mid_segment() {
        let dir = tempdir().unwrap();

        let queue = Queue::open(dir.path(), 0).unwrap();
        for i in 0..TOTAL {
            queue.enqueue(&payload(i, 256)).unwrap();
        }
        queue.close().unwrap();

        let queue = Queue::open(dir.path(), 0).unwrap();
        let mut dst = Vec::new();
        for i in 0..CONSUMED {
            assert!(queue.dequeue(&mut dst));
            assert_eq!(payload_index(&dst), i);
        }
        queue.close().unwrap();

        // 2400 consumed lands mid-way through the third 1000-entry segment.
        let queue = Queue::open(dir.path(), 0).unwrap();
        for i in CONSUMED..TOTAL {
            assert!(queue.dequeue(&mut dst), "entry {i} SHOULD remain");
            assert_eq!(payload_index(&dst), i);
        }
        assert!(!queue.dequeue(&mut dst));
    }

    #[test]
    fn a_fully_consumed_queue_reopens_empty() {
        let dir = tempdir().unwrap();

        let queue = Queue::open(dir.path(), 4).unwrap();
        for i in 0..10 {
            queue.enqueue(&payload(i, 32)).unwrap();
        }
        let mut dst = Vec::new();
        for _ in 0..10 {
            assert!(queue.dequeue(&mut dst));
        }
        queue.close().unwrap();

        let queue = Queue::open(dir.path(), 4).unwrap();
        assert!(!queue.dequeue(&mut dst));
    }
}

mod corruption {
    use super::*;

    fn flip_first_payload_byte(segment: &Path) {
        let mut bytes = std::fs::read(segment).unwrap();
        // Past the segment header and the first frame header.
        let index = SEGMENT_HEADER_SIZE + 8;
        bytes[index] ^= 0xFF;
        std::fs::write(segment, bytes).unwrap();
    }

    #[test]
    fn a_corrupt_sole_segment_yields_nothing_and_the_queue_recovers() {
        let dir = tempdir().unwrap();

        let queue = Queue::open(dir.path(), 0).unwrap();
        queue.enqueue(&[1, 2, 3]).unwrap();
        queue.close().unwrap();

        let files = segment_files(dir.path());
        assert_eq!(files.len(), 1);
        flip_first_payload_byte(&files[0]);

        let queue = Queue::open(dir.path(), 0).unwrap();
        let mut dst = Vec::new();
        assert!(!queue.dequeue(&mut dst));

        // The queue stays usable afterwards.
        queue.enqueue(b"fresh").unwrap();
        assert!(queue.dequeue(&mut dst));
        assert_eq!(dst, *b"fresh");
    }

    #[test]
    fn corruption_is_contained_to_one_segment() {
        let dir = tempdir().unwrap();

        let queue = Queue::open(dir.path(), 2).unwrap();
        for i in 0..4 {
            queue.enqueue(&payload(i, 32)).unwrap();
        }
        queue.close().unwrap();

        let files = segment_files(dir.path());
        assert!(files.len() >= 2);
        flip_first_payload_byte(&files[0]);

        let queue = Queue::open(dir.path(), 2).unwrap();
        let mut dst = Vec::new();

        // Entries 0 and 1 are lost with their segment; 2 and 3 survive.
        assert!(queue.dequeue(&mut dst));
        assert_eq!(payload_index(&dst), 2);
        assert!(queue.dequeue(&mut dst));
        assert_eq!(payload_index(&dst), 3);
        assert!(!queue.dequeue(&mut dst));

        assert!(!files[0].exists(), "the corrupt segment SHOULD be dropped");
    }
}
