#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `seedscan` is component E: it streams the locally-held bundle through
//! the rolling checksum, consults the [`blockindex::BlockIndex`], and
//! writes every target block it can reconstruct locally into the
//! [`store::TargetStore`] (`spec` §4.E).
//!
//! # Design
//!
//! The local file is read once, in full, into memory: an AppImage is a
//! single regular file, not a multi-gigabyte disk image, and holding it in
//! memory lets the sliding window be a plain subslice instead of a second
//! ring buffer shadowing the rolling checksum's own state. The scan yields
//! to the scheduler every 64 KiB of window advancement, per `spec` §5's
//! cooperative suspension points.

use blockindex::BlockIndex;
use checksums::RollingChecksum;
use control::ControlHeader;
use std::io::{Read, Seek, SeekFrom};
use store::{StoreError, TargetStore};
use thiserror::Error;

const YIELD_GRANULARITY: u64 = 64 * 1024;

/// Failure running the seed scan. Per `spec` §4.E, an I/O error here is
/// fatal to the scan but not to the overall update: the coordinator may
/// still proceed to download every block.
#[derive(Debug, Error)]
pub enum SeedScanError {
    /// Reading the local file failed.
    #[error("I/O error reading local file: {0}")]
    Io(#[from] std::io::Error),
    /// A rolling-checksum roll was attempted on an empty window (should be
    /// unreachable given the scan's own bookkeeping; surfaced rather than
    /// panicking).
    #[error("rolling checksum error: {0}")]
    Rolling(#[from] checksums::RollingError),
    /// Writing a recovered block into the target store failed.
    #[error("target store error: {0}")]
    Store(#[from] StoreError),
    /// The scan was canceled.
    #[error("seed scan canceled")]
    Canceled,
}

/// Summary of what a completed seed scan recovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedScanReport {
    /// Number of target blocks written from local data.
    pub blocks_recovered: u64,
    /// Number of local-file bytes the rolling window advanced across.
    pub bytes_scanned: u64,
}

/// Scans `local` against `header`/`index`, writing every locally-derivable
/// block into `store`. `is_canceled` is polled at every yield point; when
/// it returns true the scan stops and returns [`SeedScanError::Canceled`].
pub async fn scan<R, F>(
    local: &mut R,
    header: &ControlHeader,
    index: &BlockIndex<'_>,
    target_store: &mut TargetStore,
    is_canceled: F,
) -> Result<SeedScanReport, SeedScanError>
where
    R: Read + Seek,
    F: Fn() -> bool,
{
    let block_size = u64::from(header.block_size.get());

    local.seek(SeekFrom::Start(0))?;
    let mut data = Vec::new();
    local.read_to_end(&mut data)?;
    let local_len = data.len() as u64;

    let mut report = SeedScanReport::default();

    try_common_prefix(&data, block_size, header, index, target_store, &mut report)?;
    try_common_suffix(&data, block_size, header, index, target_store, &mut report)?;

    if local_len < block_size {
        // The whole file is shorter than one block: no window can slide,
        // and the common-prefix probe above already covered the only
        // possible position.
        return Ok(report);
    }

    let mut p: u64 = 0;
    let mut rolling = RollingChecksum::new();
    rolling.update(window_at(&data, p, block_size));
    let mut since_yield: u64 = 0;

    loop {
        if is_canceled() {
            return Err(SeedScanError::Canceled);
        }

        let weak = rolling.masked_value(header.weak_checksum_bytes);
        let next_weak = next_window_weak(&data, p, block_size, header.weak_checksum_bytes);
        let window = window_at(&data, p, block_size);

        if let Some(confirmed) = index.confirm(weak, next_weak, window) {
            write_if_absent(target_store, confirmed.block, window, &mut report)?;

            if confirmed.pair_confirmed && p + 2 * block_size <= local_len {
                let next_window = window_at(&data, p + block_size, block_size);
                write_if_absent(target_store, confirmed.block + 1, next_window, &mut report)?;

                p += block_size;
                rolling = RollingChecksum::new();
                rolling.update(window_at(&data, p, block_size));
                since_yield += block_size;
                if since_yield >= YIELD_GRANULARITY {
                    tokio::task::yield_now().await;
                    since_yield = 0;
                }
                continue;
            }
        }

        if p + block_size < local_len {
            let outgoing = data[p as usize];
            let incoming = data[(p + block_size) as usize];
            rolling.roll(outgoing, incoming)?;
            p += 1;
            report.bytes_scanned += 1;
            since_yield += 1;
            if since_yield >= YIELD_GRANULARITY {
                tokio::task::yield_now().await;
                since_yield = 0;
            }
        } else {
            break;
        }
    }

    Ok(report)
}

fn window_at(data: &[u8], p: u64, block_size: u64) -> &[u8] {
    let start = p as usize;
    let end = (start + block_size as usize).min(data.len());
    &data[start..end]
}

fn next_window_weak(data: &[u8], p: u64, block_size: u64, weak_checksum_bytes: u8) -> Option<u32> {
    let next_start = p + block_size;
    if next_start + block_size > data.len() as u64 {
        return None;
    }
    let window = window_at(data, next_start, block_size);
    let mut rolling = RollingChecksum::new();
    rolling.update(window);
    Some(rolling.masked_value(weak_checksum_bytes))
}

fn write_if_absent(
    target_store: &mut TargetStore,
    block: u64,
    window: &[u8],
    report: &mut SeedScanReport,
) -> Result<(), SeedScanError> {
    if target_store.is_present(block) {
        return Ok(());
    }
    let expected_len = target_store.expected_block_len(block) as usize;
    target_store.write_block(block, &window[..expected_len])?;
    report.blocks_recovered += 1;
    Ok(())
}

fn try_common_prefix(
    data: &[u8],
    block_size: u64,
    header: &ControlHeader,
    index: &BlockIndex<'_>,
    target_store: &mut TargetStore,
    report: &mut SeedScanReport,
) -> Result<(), SeedScanError> {
    if header.block_count() == 0 || target_store.is_present(0) {
        return Ok(());
    }
    let mut padded = window_at(data, 0, block_size).to_vec();
    padded.resize(block_size as usize, 0);

    let mut rolling = RollingChecksum::new();
    rolling.update(&padded);
    let weak = rolling.masked_value(header.weak_checksum_bytes);
    let next_weak = next_window_weak(data, 0, block_size, header.weak_checksum_bytes);

    if let Some(confirmed) = index.confirm(weak, next_weak, &padded) {
        if confirmed.block == 0 {
            write_if_absent(target_store, 0, &padded, report)?;
        }
    }
    Ok(())
}

fn try_common_suffix(
    data: &[u8],
    block_size: u64,
    header: &ControlHeader,
    index: &BlockIndex<'_>,
    target_store: &mut TargetStore,
    report: &mut SeedScanReport,
) -> Result<(), SeedScanError> {
    let block_count = header.block_count();
    if block_count == 0 {
        return Ok(());
    }
    let last_block = block_count - 1;
    if target_store.is_present(last_block) {
        return Ok(());
    }
    let tail_len = header.block_len(last_block) as usize;
    if tail_len == 0 || data.len() < tail_len {
        return Ok(());
    }

    let start = data.len() - tail_len;
    let mut padded = data[start..].to_vec();
    padded.resize(block_size as usize, 0);

    let mut rolling = RollingChecksum::new();
    rolling.update(&padded);
    let weak = rolling.masked_value(header.weak_checksum_bytes);

    if let Some(confirmed) = index.confirm(weak, None, &padded) {
        if confirmed.block == last_block {
            write_if_absent(target_store, last_block, &padded[..tail_len], report)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use control::compute_block_entry;
    use std::io::Cursor;
    use std::num::NonZeroU32;
    use tempfile::NamedTempFile;

    fn make_header(target: &[u8], block_size: u32, seq_matches: u8) -> (ControlHeader, Vec<control::BlockEntry>) {
        let blocks: Vec<_> = target
            .chunks(block_size as usize)
            .map(|chunk| compute_block_entry(chunk, block_size, 4, 16))
            .collect();
        let header = ControlHeader {
            zsync_version: "0.6.2".to_string(),
            target_filename: "App.AppImage".to_string(),
            target_file_mtime: String::new(),
            block_size: NonZeroU32::new(block_size).unwrap(),
            target_length: target.len() as u64,
            weak_checksum_bytes: 4,
            strong_checksum_bytes: 16,
            target_sha1: [0u8; 20],
            seq_matches,
            url_base: url::Url::parse("https://example.com/a.zsync").unwrap(),
            target_url: url::Url::parse("https://example.com/a").unwrap(),
        };
        (header, blocks)
    }

    #[tokio::test]
    async fn identical_file_recovers_every_block() {
        let target: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let (header, blocks) = make_header(&target, 512, 1);
        let index = BlockIndex::build(&header, &blocks);

        let tmp = NamedTempFile::new().unwrap();
        let mut target_store = TargetStore::create(tmp.path(), 512, target.len() as u64).unwrap();

        let mut local = Cursor::new(target.clone());
        let report = scan(&mut local, &header, &index, &mut target_store, || false)
            .await
            .unwrap();

        assert_eq!(report.blocks_recovered as usize, blocks.len());
        assert!(target_store.all_present());
    }

    #[tokio::test]
    async fn shifted_local_file_still_recovers_interior_blocks() {
        let target: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let (header, blocks) = make_header(&target, 512, 1);
        let index = BlockIndex::build(&header, &blocks);

        let mut local = vec![0xffu8; 37];
        local.extend_from_slice(&target);

        let tmp = NamedTempFile::new().unwrap();
        let mut target_store = TargetStore::create(tmp.path(), 512, target.len() as u64).unwrap();

        let mut reader = Cursor::new(local);
        let report = scan(&mut reader, &header, &index, &mut target_store, || false)
            .await
            .unwrap();

        assert!(report.blocks_recovered > 0);
    }

    #[tokio::test]
    async fn pair_confirmation_fast_forwards_by_block_size() {
        let target: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let (header, blocks) = make_header(&target, 512, 2);
        let index = BlockIndex::build(&header, &blocks);

        let tmp = NamedTempFile::new().unwrap();
        let mut target_store = TargetStore::create(tmp.path(), 512, target.len() as u64).unwrap();

        let mut local = Cursor::new(target.clone());
        let report = scan(&mut local, &header, &index, &mut target_store, || false)
            .await
            .unwrap();

        assert_eq!(report.blocks_recovered as usize, blocks.len());
        assert!(target_store.all_present());
    }

    #[tokio::test]
    async fn empty_local_file_recovers_nothing_but_does_not_error() {
        let target: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let (header, blocks) = make_header(&target, 512, 1);
        let index = BlockIndex::build(&header, &blocks);

        let tmp = NamedTempFile::new().unwrap();
        let mut target_store = TargetStore::create(tmp.path(), 512, target.len() as u64).unwrap();

        let mut local = Cursor::new(Vec::<u8>::new());
        let report = scan(&mut local, &header, &index, &mut target_store, || false)
            .await
            .unwrap();

        assert_eq!(report.blocks_recovered, 0);
        let _ = blocks;
    }

    #[tokio::test]
    async fn cancellation_is_observed() {
        let target: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let (header, blocks) = make_header(&target, 512, 1);
        let index = BlockIndex::build(&header, &blocks);
        let _ = blocks;

        let tmp = NamedTempFile::new().unwrap();
        let mut target_store = TargetStore::create(tmp.path(), 512, target.len() as u64).unwrap();

        let mut local = Cursor::new(target);
        let err = scan(&mut local, &header, &index, &mut target_store, || true)
            .await
            .unwrap_err();
        assert!(matches!(err, SeedScanError::Canceled));
    }
}
