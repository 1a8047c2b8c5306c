#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `store` is component D: a random-access target file paired with a
//! per-block "present" bitmap, the sole authority for which blocks of the
//! file already hold correct target bytes (`spec` §3/§4.D).
//!
//! # Design
//!
//! Presence is tracked as a packed `Vec<u64>` bitmap rather than one bit
//! per `bool`, following the density/cost tradeoff the same pack takes for
//! sparse-write state tracking. Writes are randomly ordered (seed scanner
//! and range downloader both write out of sequence) so the store always
//! seeks explicitly rather than assuming a forward-only cursor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

/// Failure performing a target-store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying file could not be opened, sized, or accessed.
    #[error("target file I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// `writeBlock`/`readBlock` was called with a block number at or past
    /// `blockCount`.
    #[error("block number {block} is out of range (blockCount = {block_count})")]
    BlockOutOfRange {
        /// The offending block number.
        block: u64,
        /// The total number of blocks in the target.
        block_count: u64,
    },
    /// `readBlock` was called for a block whose presence bit is unset.
    #[error("block {0} has not been written yet")]
    BlockNotPresent(u64),
    /// `writeBlock` was called with bytes not matching the block's expected
    /// in-file length (full `blockSize`, or the tail length for the final
    /// block).
    #[error("block {block} expects {expected} bytes, got {actual}")]
    WrongBlockLength {
        /// The offending block number.
        block: u64,
        /// The length `writeBlock` expected for this block.
        expected: usize,
        /// The length actually supplied.
        actual: usize,
    },
}

/// A random-access target file with a per-block presence bitmap, per
/// `spec` §3/§4.D.
pub struct TargetStore {
    file: File,
    block_size: u64,
    target_length: u64,
    block_count: u64,
    presence: Vec<u64>,
}

impl TargetStore {
    /// Creates (or truncates) the file at `path` to `target_length` bytes
    /// and initializes the presence bitmap to all-absent, per `spec`
    /// §4.D's `size(length, blockCount)` operation.
    pub fn create(path: &Path, block_size: u64, target_length: u64) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(target_length)?;

        let block_count = if target_length == 0 {
            0
        } else {
            target_length.div_ceil(block_size)
        };
        let presence_words = block_count.div_ceil(64) as usize;

        Ok(Self {
            file,
            block_size,
            target_length,
            block_count,
            presence: vec![0u64; presence_words],
        })
    }

    /// The total number of blocks in the target.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// The configured block size (the last block may be shorter).
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// The target file's total length in bytes.
    #[must_use]
    pub fn target_length(&self) -> u64 {
        self.target_length
    }

    /// The in-file length expected for block `n`: `block_size` for every
    /// block except a possibly-shorter final block.
    #[must_use]
    pub fn expected_block_len(&self, n: u64) -> u64 {
        let start = n * self.block_size;
        let remaining = self.target_length.saturating_sub(start);
        remaining.min(self.block_size)
    }

    /// Whether block `n`'s presence bit is set.
    #[must_use]
    pub fn is_present(&self, n: u64) -> bool {
        let word = (n / 64) as usize;
        let bit = n % 64;
        self.presence.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    fn set_present(&mut self, n: u64) {
        let word = (n / 64) as usize;
        let bit = n % 64;
        self.presence[word] |= 1 << bit;
    }

    fn check_block_range(&self, n: u64) -> Result<(), StoreError> {
        if n >= self.block_count {
            return Err(StoreError::BlockOutOfRange {
                block: n,
                block_count: self.block_count,
            });
        }
        Ok(())
    }

    /// Writes `bytes` as block `n` and sets its presence bit. Idempotent:
    /// calling this again with byte-identical content for an
    /// already-present block is a no-op write of the same bytes, per
    /// `spec` §4.D.
    pub fn write_block(&mut self, n: u64, bytes: &[u8]) -> Result<(), StoreError> {
        self.check_block_range(n)?;
        let expected = self.expected_block_len(n) as usize;
        if bytes.len() != expected {
            return Err(StoreError::WrongBlockLength {
                block: n,
                expected,
                actual: bytes.len(),
            });
        }

        let offset = n * self.block_size;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.set_present(n);
        Ok(())
    }

    /// Reads block `n`. Only defined when its presence bit is set.
    pub fn read_block(&mut self, n: u64) -> Result<Vec<u8>, StoreError> {
        self.check_block_range(n)?;
        if !self.is_present(n) {
            return Err(StoreError::BlockNotPresent(n));
        }

        let expected = self.expected_block_len(n) as usize;
        let offset = n * self.block_size;
        let mut buf = vec![0u8; expected];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Whether every block's presence bit is set.
    #[must_use]
    pub fn all_present(&self) -> bool {
        (0..self.block_count).all(|n| self.is_present(n))
    }

    /// Writes raw bytes at an arbitrary byte offset and marks every block
    /// fully covered by `[offset, offset + data.len())` as present. Used
    /// by the range downloader, whose fetched ranges are block-aligned but
    /// span many blocks per request (`spec` §4.F).
    pub fn write_range(&mut self, offset: u64, data: &[u8]) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;

        let first_block = offset / self.block_size;
        let end = offset + data.len() as u64;
        let last_block = if end == 0 { 0 } else { (end - 1) / self.block_size };
        for n in first_block..=last_block.min(self.block_count.saturating_sub(1)) {
            let block_start = n * self.block_size;
            let block_end = block_start + self.expected_block_len(n);
            if block_start >= offset && block_end <= end {
                self.set_present(n);
            }
        }
        Ok(())
    }

    /// Computes [`PendingRanges`] by coalescing runs of absent blocks into
    /// maximal byte ranges, per `spec` §3.
    #[must_use]
    pub fn missing_ranges(&self) -> PendingRanges {
        let mut ranges = Vec::new();
        let mut run_start: Option<u64> = None;

        for n in 0..self.block_count {
            if self.is_present(n) {
                if let Some(start) = run_start.take() {
                    ranges.push(self.range_for_blocks(start, n - 1));
                }
            } else if run_start.is_none() {
                run_start = Some(n);
            }
        }
        if let Some(start) = run_start {
            ranges.push(self.range_for_blocks(start, self.block_count - 1));
        }

        PendingRanges { ranges }
    }

    fn range_for_blocks(&self, first_block: u64, last_block: u64) -> ByteRange {
        let lo = first_block * self.block_size;
        let hi = (last_block * self.block_size + self.expected_block_len(last_block)).saturating_sub(1);
        ByteRange { lo, hi }
    }
}

/// An inclusive byte range, HTTP `Range:` semantics (`spec` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset included in the range.
    pub lo: u64,
    /// Last byte offset included in the range.
    pub hi: u64,
}

impl ByteRange {
    /// The number of bytes spanned by this range.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.hi - self.lo + 1
    }

    /// Whether the range spans zero bytes. Always false for a well-formed
    /// [`ByteRange`]; present for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hi < self.lo
    }
}

/// A derived, recomputable sequence of byte ranges covering exactly the
/// absent regions of a [`TargetStore`] (`spec` §3).
#[derive(Debug, Clone, Default)]
pub struct PendingRanges {
    /// The coalesced ranges, in ascending offset order.
    pub ranges: Vec<ByteRange>,
}

impl PendingRanges {
    /// Whether there is nothing left to fetch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total bytes still missing across all ranges.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(ByteRange::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn store(block_size: u64, target_length: u64) -> TargetStore {
        let file = NamedTempFile::new().unwrap();
        TargetStore::create(file.path(), block_size, target_length).unwrap()
    }

    #[test]
    fn write_and_read_round_trips() {
        let mut store = store(4, 10);
        store.write_block(0, b"aaaa").unwrap();
        store.write_block(1, b"bbbb").unwrap();
        store.write_block(2, b"cc").unwrap();

        assert_eq!(store.read_block(0).unwrap(), b"aaaa");
        assert_eq!(store.read_block(2).unwrap(), b"cc");
        assert!(store.all_present());
    }

    #[test]
    fn wrong_length_write_is_rejected() {
        let mut store = store(4, 10);
        let err = store.write_block(0, b"aa").unwrap_err();
        assert!(matches!(err, StoreError::WrongBlockLength { .. }));
    }

    #[test]
    fn reading_absent_block_errors() {
        let mut store = store(4, 10);
        let err = store.read_block(0).unwrap_err();
        assert!(matches!(err, StoreError::BlockNotPresent(0)));
    }

    #[test]
    fn out_of_range_block_errors() {
        let mut store = store(4, 10);
        let err = store.write_block(99, b"aaaa").unwrap_err();
        assert!(matches!(err, StoreError::BlockOutOfRange { .. }));
    }

    #[test]
    fn missing_ranges_coalesces_gaps() {
        let mut store = store(4, 20);
        store.write_block(0, b"aaaa").unwrap();
        store.write_block(2, b"cccc").unwrap();

        let pending = store.missing_ranges();
        assert_eq!(pending.ranges.len(), 2);
        assert_eq!(pending.ranges[0], ByteRange { lo: 4, hi: 7 });
        assert_eq!(pending.ranges[1], ByteRange { lo: 12, hi: 19 });
    }

    #[test]
    fn missing_ranges_empty_when_all_present() {
        let mut store = store(4, 8);
        store.write_block(0, b"aaaa").unwrap();
        store.write_block(1, b"bbbb").unwrap();
        assert!(store.missing_ranges().is_empty());
    }

    #[test]
    fn write_range_marks_only_fully_covered_blocks_present() {
        let mut store = store(4, 16);
        store.write_range(4, b"bbbbcccc").unwrap();
        assert!(!store.is_present(0));
        assert!(store.is_present(1));
        assert!(store.is_present(2));
        assert!(!store.is_present(3));
    }

    #[test]
    fn idempotent_write_of_identical_bytes() {
        let mut store = store(4, 8);
        store.write_block(0, b"aaaa").unwrap();
        store.write_block(0, b"aaaa").unwrap();
        assert_eq!(store.read_block(0).unwrap(), b"aaaa");
    }
}
