//! Strong (block-confirmation) checksums.
//!
//! zsync's control file stores an MD4 digest per block, truncated to
//! `strongChecksumBytes` (1..16) bytes. The truncated digest is only used to
//! *confirm* a weak-checksum hit (`spec` §4.C), never as a standalone
//! integrity check, so truncation to as few as a handful of bytes is an
//! accepted trade-off between index size and false-positive rate.

use digest::Digest;

/// A trait for strong block-confirmation digests, so [`crate::RollingChecksum`]
/// hits can be confirmed uniformly regardless of algorithm.
pub trait StrongDigest {
    /// Resets the digest to its initial state.
    fn reset(&mut self);
    /// Feeds more bytes into the digest.
    fn update(&mut self, data: &[u8]);
    /// Finalizes the digest, truncated to `len` bytes (clamped to the
    /// algorithm's native output size).
    fn finalize_truncated(&mut self, len: u8) -> Vec<u8>;
}

/// MD4 strong digest, truncatable to `strongChecksumBytes` per `spec` §3.
#[derive(Default)]
pub struct Md4 {
    hasher: md4::Md4,
}

impl Md4 {
    /// Creates a fresh MD4 hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: md4::Md4::new(),
        }
    }

    /// Hashes `block`, padded with zero bytes to `block_size` if shorter
    /// (the final target block, per `spec` §3), and returns the digest
    /// truncated to `strong_checksum_bytes`.
    #[must_use]
    pub fn digest_block(block: &[u8], block_size: u32, strong_checksum_bytes: u8) -> Vec<u8> {
        let mut hasher = Self::new();
        hasher.update(block);
        let padding = block_size as usize - block.len();
        if padding > 0 {
            let zeros = vec![0u8; padding];
            hasher.update(&zeros);
        }
        hasher.finalize_truncated(strong_checksum_bytes)
    }
}

impl StrongDigest for Md4 {
    fn reset(&mut self) {
        self.hasher = md4::Md4::new();
    }

    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    fn finalize_truncated(&mut self, len: u8) -> Vec<u8> {
        let full = self.hasher.clone().finalize();
        let len = (len as usize).min(full.len());
        full[..len].to_vec()
    }
}
