#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `blockindex` is component C: a two-level index from weak checksums to
//! candidate target block numbers, plus the confirmation protocol the seed
//! scanner and range-assembled data are checked against (`spec` §4.C).
//!
//! # Design
//!
//! The primary index is a `weak -> Vec<block number>` map in ascending
//! block-number order, mirroring the layout of rsync-family signature
//! indexes (grouping by hash bucket, keeping per-bucket candidates in file
//! order so "first equal wins" ties break deterministically). A secondary
//! pair index keyed by `(weak_n, weak_n+1)` is only populated when
//! `seqMatches == 2`, and is used to reject a huge class of single-block
//! coincidental weak-checksum collisions before ever touching the strong
//! digest.
//!
//! Both the primary and pair indexes are multi-valued (`Vec<u64>` per key):
//! duplicate or zero-padded block content can give two distinct blocks the
//! same weak checksum, or the same consecutive-pair of weak checksums, and
//! every such candidate must survive to the strong-digest check rather than
//! being silently replaced by whichever one was inserted last.
//!
//! [`rustc_hash::FxHashMap`] is used in place of the standard hasher: the
//! index is rebuilt per update session and keyed entirely by integers, so
//! the DoS-resistance of the default SipHash is not worth its throughput
//! cost here.

use control::{BlockEntry, ControlHeader};
use rustc_hash::FxHashMap;

/// A two-level index over a control file's block table, per `spec` §4.C.
pub struct BlockIndex<'a> {
    blocks: &'a [BlockEntry],
    seq_matches: u8,
    primary: FxHashMap<u32, Vec<u64>>,
    pairs: FxHashMap<(u32, u32), Vec<u64>>,
}

impl<'a> BlockIndex<'a> {
    /// Builds the index from a control header and its block table. Runs in
    /// `O(blockCount)` time; memory is bounded by `blockCount * (<= 32
    /// bytes)` per `spec` §4.C.
    #[must_use]
    pub fn build(header: &ControlHeader, blocks: &'a [BlockEntry]) -> Self {
        let mut primary: FxHashMap<u32, Vec<u64>> = FxHashMap::default();
        let mut pairs: FxHashMap<(u32, u32), Vec<u64>> = FxHashMap::default();

        for (n, entry) in blocks.iter().enumerate() {
            primary.entry(entry.weak).or_default().push(n as u64);
        }

        if header.seq_matches == 2 {
            for pair in blocks.windows(2).enumerate() {
                let (n, window) = pair;
                pairs.entry((window[0].weak, window[1].weak)).or_default().push(n as u64);
            }
        }

        Self {
            blocks,
            seq_matches: header.seq_matches,
            primary,
            pairs,
        }
    }

    /// Whether this index requires pair confirmation before a strong-digest
    /// check (`header.seqMatches == 2`).
    #[must_use]
    pub fn requires_pair_confirmation(&self) -> bool {
        self.seq_matches == 2
    }

    /// Candidate block numbers whose weak checksum equals `weak`, in
    /// ascending order, or an empty slice if `weak` is not present.
    #[must_use]
    pub fn candidates(&self, weak: u32) -> &[u64] {
        self.primary.get(&weak).map_or(&[], Vec::as_slice)
    }

    /// Block numbers whose `(weak, next_weak)` pair matches a pair of
    /// consecutive blocks in the table, in ascending order, or an empty
    /// slice if no such pair exists. Only meaningful when
    /// [`requires_pair_confirmation`] is true; the pair index is empty
    /// otherwise.
    ///
    /// More than one block number can share a `(weak, next_weak)` pair when
    /// the target has duplicate or zero-padded content, so every candidate
    /// here must still be strong-checked rather than trusting the first one.
    ///
    /// [`requires_pair_confirmation`]: Self::requires_pair_confirmation
    #[must_use]
    pub fn pair_candidates(&self, weak: u32, next_weak: u32) -> &[u64] {
        self.pairs.get(&(weak, next_weak)).map_or(&[], Vec::as_slice)
    }

    /// Runs the full confirmation protocol from `spec` §4.C for a candidate
    /// window: looks up `weak`, applies pair confirmation if required, then
    /// strong-checksums `window` against each first-stage candidate and
    /// accepts the first equal match.
    ///
    /// `next_weak` is the weak checksum of the block immediately following
    /// `window` in the source being scanned; it is only consulted when
    /// [`requires_pair_confirmation`] is true, and may be `None` when no
    /// such block exists (end of source).
    ///
    /// [`requires_pair_confirmation`]: Self::requires_pair_confirmation
    pub fn confirm(&self, weak: u32, next_weak: Option<u32>, window: &[u8]) -> Option<ConfirmedMatch> {
        let candidates = self.candidates(weak);
        if candidates.is_empty() {
            return None;
        }

        if self.seq_matches == 2 {
            let next_weak = next_weak?;
            let pair_candidates = self.pair_candidates(weak, next_weak);
            if pair_candidates.is_empty() {
                return None;
            }
            return self
                .strong_confirm(pair_candidates, window)
                .map(|n| ConfirmedMatch {
                    block: n,
                    pair_confirmed: true,
                });
        }

        self.strong_confirm(candidates, window)
            .map(|block| ConfirmedMatch {
                block,
                pair_confirmed: false,
            })
    }

    fn strong_confirm(&self, candidates: &[u64], window: &[u8]) -> Option<u64> {
        for &n in candidates {
            let entry = &self.blocks[n as usize];
            let strong_bytes = entry.strong.len() as u8;
            let digest = checksums::strong::Md4::digest_block(window, window.len() as u32, strong_bytes);
            if digest == entry.strong {
                return Some(n);
            }
        }
        None
    }
}

/// The result of a successful confirmation: which target block the window
/// matches, and whether the match came via pair confirmation (meaning block
/// `n + 1` is also confirmed per `spec` §4.E's fast-forward rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedMatch {
    /// The confirmed target block number.
    pub block: u64,
    /// True if acceptance required `seqMatches == 2` pair confirmation,
    /// meaning the scanner may fast-forward by `blockSize` bytes per
    /// `spec` §4.E.
    pub pair_confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use control::compute_block_entry;
    use std::num::NonZeroU32;

    fn header(seq_matches: u8) -> ControlHeader {
        ControlHeader {
            zsync_version: "0.6.2".to_string(),
            target_filename: "App.AppImage".to_string(),
            target_file_mtime: String::new(),
            block_size: NonZeroU32::new(8).unwrap(),
            target_length: 24,
            weak_checksum_bytes: 4,
            strong_checksum_bytes: 16,
            target_sha1: [0u8; 20],
            seq_matches,
            url_base: url::Url::parse("https://example.com/a.zsync").unwrap(),
            target_url: url::Url::parse("https://example.com/a").unwrap(),
        }
    }

    fn blocks_for(data: &[u8], block_size: u32) -> Vec<BlockEntry> {
        data.chunks(block_size as usize)
            .map(|chunk| compute_block_entry(chunk, block_size, 4, 16))
            .collect()
    }

    #[test]
    fn single_stage_confirms_exact_block() {
        let data = b"aaaaaaaabbbbbbbbcccccccc".to_vec();
        let blocks = blocks_for(&data, 8);
        let header = header(1);
        let index = BlockIndex::build(&header, &blocks);

        let window = &data[8..16];
        let mut rolling = checksums::RollingChecksum::new();
        rolling.update(window);
        let weak = rolling.masked_value(4);

        let confirmed = index.confirm(weak, None, window).expect("should confirm");
        assert_eq!(confirmed.block, 1);
        assert!(!confirmed.pair_confirmed);
    }

    #[test]
    fn pair_confirmation_required_when_seq_matches_two() {
        let data = b"aaaaaaaabbbbbbbbcccccccc".to_vec();
        let blocks = blocks_for(&data, 8);
        let header = header(2);
        let index = BlockIndex::build(&header, &blocks);
        assert!(index.requires_pair_confirmation());

        let window = &data[0..8];
        let next_window = &data[8..16];
        let mut rolling = checksums::RollingChecksum::new();
        rolling.update(window);
        let weak = rolling.masked_value(4);
        let mut next_rolling = checksums::RollingChecksum::new();
        next_rolling.update(next_window);
        let next_weak = next_rolling.masked_value(4);

        let confirmed = index.confirm(weak, Some(next_weak), window).expect("should confirm");
        assert_eq!(confirmed.block, 0);
        assert!(confirmed.pair_confirmed);

        assert!(index.confirm(weak, None, window).is_none());
    }

    #[test]
    fn unknown_weak_checksum_yields_no_candidates() {
        let data = b"aaaaaaaabbbbbbbb".to_vec();
        let blocks = blocks_for(&data, 8);
        let header = header(1);
        let index = BlockIndex::build(&header, &blocks);
        assert!(index.candidates(0xdead_beef).is_empty());
    }

    #[test]
    fn duplicate_pair_keys_do_not_shadow_each_other() {
        // Four blocks, A B C D, where C and D are forced to carry the same
        // weak checksums as A and B respectively (as happens with duplicate
        // or zero-padded content) but have different real content. The pair
        // (weakA, weakB) then collides between block 0 (A,B) and block 2
        // (C,D); both must remain reachable via the pair index, and
        // `confirm` must strong-check both rather than only the
        // last-inserted one.
        let block_a = b"AAAAAAAA";
        let block_b = b"BBBBBBBB";
        let block_c = b"CCCCCCCC";
        let block_d = b"DDDDDDDD";
        let entry_a = compute_block_entry(block_a, 8, 4, 16);
        let entry_b = compute_block_entry(block_b, 8, 4, 16);
        let mut entry_c = compute_block_entry(block_c, 8, 4, 16);
        let mut entry_d = compute_block_entry(block_d, 8, 4, 16);
        entry_c.weak = entry_a.weak;
        entry_d.weak = entry_b.weak;
        let blocks = vec![entry_a, entry_b, entry_c, entry_d];

        let header = header(2);
        let index = BlockIndex::build(&header, &blocks);

        let mut rolling = checksums::RollingChecksum::new();
        rolling.update(block_a);
        let weak = rolling.masked_value(4);
        let mut next_rolling = checksums::RollingChecksum::new();
        next_rolling.update(block_b);
        let next_weak = next_rolling.masked_value(4);

        assert_eq!(index.pair_candidates(weak, next_weak).len(), 2);

        let confirmed_a = index.confirm(weak, Some(next_weak), block_a).expect("block 0 should confirm");
        assert_eq!(confirmed_a.block, 0);

        let confirmed_c = index.confirm(weak, Some(next_weak), block_c).expect("block 2 should still confirm");
        assert_eq!(confirmed_c.block, 2);
    }
}
