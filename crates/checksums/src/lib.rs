#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `checksums` provides the three digests the delta-reconstruction engine is
//! built on (`spec` §4.A):
//!
//! - [`RollingChecksum`], an Adler-32-style weak checksum over a sliding
//!   window of `blockSize` bytes, used as a cheap first-stage filter during
//!   the seed scan.
//! - [`strong::StrongDigest`], a truncatable MD4 digest over a whole block,
//!   used to confirm a weak-checksum hit.
//! - [`whole_file::Sha1Digest`], a streaming SHA-1 digest over the entire
//!   assembled target, used for final verification.
//!
//! # Design
//!
//! Only the algorithms the control-file format actually names are
//! implemented: MD4 (zsync's strong checksum) and SHA-1 (zsync's whole-file
//! hash). There is no SIMD dispatch and no parallel batch hashing — the
//! seed scan is a single sequential pass per `spec` §4.E/§5, so the
//! vectorized batch hashing a multi-file rsync transfer benefits from has no
//! counterpart here.
//!
//! # Invariants
//!
//! - [`RollingChecksum`] truncates both accumulators to 16 bits after every
//!   update, matching zsync's (and upstream rsync's) `rsum` behaviour.
//! - [`RollingChecksum::roll`] rejects an empty window so callers never
//!   observe silent state corruption.
//!
//! # Examples
//!
//! ```
//! use checksums::RollingChecksum;
//!
//! let mut rolling = RollingChecksum::new();
//! rolling.update(b"abcd");
//! assert_eq!(rolling.len(), 4);
//!
//! // Slide the window forward by one byte: "abcd" -> "bcde"
//! rolling.roll(b'a', b'e').unwrap();
//!
//! let mut fresh = RollingChecksum::new();
//! fresh.update(b"bcde");
//! assert_eq!(rolling.value(), fresh.value());
//! ```

pub mod strong;
pub mod whole_file;

use thiserror::Error;

/// Errors produced by [`RollingChecksum`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RollingError {
    /// [`RollingChecksum::roll`] was called on a checksum with no bytes in
    /// its window yet.
    #[error("cannot roll a checksum with an empty window")]
    EmptyWindow,
}

/// A snapshot of a [`RollingChecksum`]'s internal state, suitable for
/// saving and restoring (e.g. when re-seeding the window after a jump).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RollingDigest {
    sum1: u16,
    sum2: u16,
    len: usize,
}

impl RollingDigest {
    /// The low-order accumulator (`a` / `s1`).
    #[must_use]
    pub const fn sum1(&self) -> u16 {
        self.sum1
    }

    /// The high-order accumulator (`b` / `s2`).
    #[must_use]
    pub const fn sum2(&self) -> u16 {
        self.sum2
    }

    /// The number of bytes the digest was computed over.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the digest covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The rolling (weak) checksum used for first-stage block matching.
///
/// Maintains a pair of 16-bit accumulators `(a, b)` over a sliding window of
/// bytes `B[0..L)`:
///
/// - `a = (sum of B[i]) mod 2^16`
/// - `b = (sum of (L - i) * B[i]) mod 2^16`
///
/// exposed as the packed 32-bit value `(b << 16) | a` via [`Self::value`].
/// This is the classic Adler-32-derived "rsum" shared by rsync and zsync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    len: usize,
}

impl RollingChecksum {
    /// Creates a new rolling checksum with an empty window.
    #[must_use]
    pub const fn new() -> Self {
        Self { a: 0, b: 0, len: 0 }
    }

    /// Rebuilds a rolling checksum from a previously captured [`RollingDigest`].
    #[must_use]
    pub const fn from_digest(digest: RollingDigest) -> Self {
        Self {
            a: digest.sum1 as u32,
            b: digest.sum2 as u32,
            len: digest.len,
        }
    }

    /// Resets the checksum to an empty window.
    pub const fn reset(&mut self) {
        self.a = 0;
        self.b = 0;
        self.len = 0;
    }

    /// The number of bytes currently contributing to the checksum.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the window is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Extends the window by appending `chunk`, correctly re-weighting the
    /// bytes already accumulated. Because `b`'s weight `(L - i)` depends on
    /// the *final* window length `L`, appending more bytes shifts every
    /// earlier byte's weight by the amount the window grew; that correction
    /// is `growth * (sum of the bytes already in the window)`, which lets
    /// this run in O(chunk.len()) regardless of how many calls built up the
    /// window.
    pub fn update(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let growth = chunk.len() as u32;
        self.b = self.b.wrapping_add(growth.wrapping_mul(self.a)) & 0xffff;

        let mut s1_add: u32 = 0;
        let mut s2_add: u32 = 0;
        for (i, &byte) in chunk.iter().enumerate() {
            let weight = growth - i as u32;
            s1_add = s1_add.wrapping_add(u32::from(byte));
            s2_add = s2_add.wrapping_add(u32::from(byte).wrapping_mul(weight));
        }

        self.a = self.a.wrapping_add(s1_add) & 0xffff;
        self.b = self.b.wrapping_add(s2_add) & 0xffff;
        self.len += chunk.len();
    }

    /// Slides the window forward by one byte, removing `outgoing` (the
    /// window's current first byte) and appending `incoming`.
    ///
    /// # Errors
    ///
    /// Returns [`RollingError::EmptyWindow`] if no bytes have been
    /// processed yet.
    #[inline]
    pub fn roll(&mut self, outgoing: u8, incoming: u8) -> Result<(), RollingError> {
        if self.len == 0 {
            return Err(RollingError::EmptyWindow);
        }
        let window_len = self.len as u32;
        let out = u32::from(outgoing);
        let inn = u32::from(incoming);

        let new_a = self.a.wrapping_sub(out).wrapping_add(inn) & 0xffff;
        let new_b = self
            .b
            .wrapping_sub(window_len.wrapping_mul(out))
            .wrapping_add(new_a)
            & 0xffff;

        self.a = new_a;
        self.b = new_b;
        Ok(())
    }

    /// The packed 32-bit checksum value `(b << 16) | a`.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }

    /// Masks [`Self::value`] down to the given number of *significant*
    /// bytes, zeroing the low-order bytes, per `spec` §4.A /
    /// `ControlHeader.weakChecksumBytes`.
    ///
    /// `weak_checksum_bytes` is clamped to `1..=4`.
    #[inline]
    #[must_use]
    pub fn masked_value(&self, weak_checksum_bytes: u8) -> u32 {
        mask_weak(self.value(), weak_checksum_bytes)
    }

    /// Captures the current state as a [`RollingDigest`].
    #[must_use]
    pub const fn digest(&self) -> RollingDigest {
        RollingDigest {
            sum1: self.a as u16,
            sum2: self.b as u16,
            len: self.len,
        }
    }
}

/// Masks a packed rolling-checksum value down to `weak_checksum_bytes`
/// significant high-order bytes, zeroing the rest. Mirrors zsync's storage
/// of a truncated `rsum_t`: with fewer significant bytes, the checksum is
/// a coarser (more collision-prone, cheaper) filter.
#[must_use]
pub fn mask_weak(value: u32, weak_checksum_bytes: u8) -> u32 {
    let bytes = weak_checksum_bytes.clamp(1, 4);
    if bytes >= 4 {
        return value;
    }
    let shift = 8 * (4 - u32::from(bytes));
    (value >> shift) << shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roll_matches_fresh_computation() {
        let data = b"ABCDEFGH";
        let block_size = 4;

        let mut rolling = RollingChecksum::new();
        rolling.update(&data[0..block_size]);

        for start in 1..=(data.len() - block_size) {
            rolling.roll(data[start - 1], data[start + block_size - 1]).unwrap();
            let mut fresh = RollingChecksum::new();
            fresh.update(&data[start..start + block_size]);
            assert_eq!(rolling.value(), fresh.value(), "mismatch at start={start}");
        }
    }

    #[test]
    fn incremental_update_matches_single_call() {
        let data = b"the quick brown fox jumps";

        let mut incremental = RollingChecksum::new();
        for chunk in data.chunks(3) {
            incremental.update(chunk);
        }

        let mut single = RollingChecksum::new();
        single.update(data);

        assert_eq!(incremental.value(), single.value());
        assert_eq!(incremental.len(), single.len());
    }

    #[test]
    fn empty_window_roll_errors() {
        let mut checksum = RollingChecksum::new();
        assert_eq!(checksum.roll(b'a', b'b'), Err(RollingError::EmptyWindow));
    }

    #[test]
    fn mask_weak_zeroes_low_bytes() {
        let value = 0xAABB_CCDDu32;
        assert_eq!(mask_weak(value, 4), 0xAABB_CCDD);
        assert_eq!(mask_weak(value, 3), 0xAABB_CC00);
        assert_eq!(mask_weak(value, 2), 0xAABB_0000);
        assert_eq!(mask_weak(value, 1), 0xAA00_0000);
    }

    #[test]
    fn digest_round_trips() {
        let mut checksum = RollingChecksum::new();
        checksum.update(b"some data");
        let digest = checksum.digest();
        let restored = RollingChecksum::from_digest(digest);
        assert_eq!(checksum.value(), restored.value());
        assert_eq!(checksum.len(), restored.len());
    }
}
