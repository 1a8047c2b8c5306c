#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `control` parses the zsync-style control file described in `spec` §3/§4.B:
//! a textual header of `Key: value` lines, a blank line, then a binary table
//! of one `(weak, strong)` checksum pair per target block.
//!
//! # Design
//!
//! The parser is a single forward pass with no backtracking: header lines are
//! consumed until a blank line is seen, then the remaining bytes are sliced
//! into fixed-width block records. Unknown keys are ignored, matching
//! zsync's own forward-compatibility stance. All numeric and URL fields are
//! validated eagerly so a [`ControlHeader`] can never describe an
//! unrepresentable table (e.g. `seqMatches` outside `{1, 2}`).
//!
//! # Errors
//!
//! Every failure mode is a [`ControlFileError`] variant; the coordinator
//! maps all of them to `ErrorKind::MalformedControlFile` per `spec` §4.B.

use checksums::RollingChecksum;
use std::num::{NonZeroU32, NonZeroU64};
use thiserror::Error;
use url::Url;

/// The parsed textual header of a control file, per `spec` §3.
#[derive(Debug, Clone)]
pub struct ControlHeader {
    /// The `zsync` format-version string (e.g. `"0.6.2"`).
    pub zsync_version: String,
    /// The `Filename` the target should be saved as.
    pub target_filename: String,
    /// The `MTime` the target was last modified, as the raw header string
    /// (not parsed into a timestamp type; consumers that need a structured
    /// time can parse it with their own RFC 2822 parser).
    pub target_file_mtime: String,
    /// Size in bytes of every block except possibly the last.
    pub block_size: NonZeroU32,
    /// Total length of the target file in bytes.
    pub target_length: u64,
    /// Number of significant high-order bytes retained in each block's weak
    /// checksum (1..=4).
    pub weak_checksum_bytes: u8,
    /// Number of bytes each block's strong checksum is truncated to
    /// (1..=16).
    pub strong_checksum_bytes: u8,
    /// SHA-1 of the fully assembled target file.
    pub target_sha1: [u8; 20],
    /// `1` or `2`: how many consecutive blocks must weak-match before a
    /// strong-checksum confirmation is attempted (`spec` §4.C).
    pub seq_matches: u8,
    /// The absolute URL the control file itself was fetched from, used to
    /// resolve a relative `URL:` header.
    pub url_base: Url,
    /// The absolute URL of the target file.
    pub target_url: Url,
}

impl ControlHeader {
    /// The number of blocks implied by `target_length` and `block_size`,
    /// satisfying `spec` §3's invariant
    /// `targetLength / blockSize <= blockCount <= targetLength / blockSize + 1`.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        if self.target_length == 0 {
            return 0;
        }
        self.target_length.div_ceil(u64::from(self.block_size.get()))
    }

    /// The in-file length of block `n`: `block_size` for every block except
    /// a possibly-shorter final block.
    #[must_use]
    pub fn block_len(&self, n: u64) -> u32 {
        let block_size = u64::from(self.block_size.get());
        let start = n * block_size;
        let remaining = self.target_length.saturating_sub(start);
        remaining.min(block_size) as u32
    }
}

/// One block's checksum pair, in target order (`spec` §3).
#[derive(Debug, Clone)]
pub struct BlockEntry {
    /// Weak (rolling) checksum, masked to the header's
    /// `weak_checksum_bytes`.
    pub weak: u32,
    /// Strong checksum, truncated to the header's `strong_checksum_bytes`.
    pub strong: Vec<u8>,
}

/// A fully parsed control file: header plus the dense block table.
#[derive(Debug, Clone)]
pub struct ControlFile {
    /// The parsed header.
    pub header: ControlHeader,
    /// One entry per target block, in target order.
    pub blocks: Vec<BlockEntry>,
}

/// Failure parsing a control file. All variants map to
/// `ErrorKind::MalformedControlFile` at the coordinator boundary.
#[derive(Debug, Error)]
pub enum ControlFileError {
    /// A required header key was not present.
    #[error("missing required header key: {0}")]
    MissingKey(&'static str),
    /// A header value could not be parsed as the type it names.
    #[error("invalid value for header key {key}: {value:?}")]
    InvalidValue {
        /// The offending header key.
        key: &'static str,
        /// The raw value string that failed to parse.
        value: String,
    },
    /// `Hash-Lengths` did not parse as `seqMatches:weakBytes:strongBytes`
    /// with `seqMatches` in `{1, 2}`, `weakBytes` in `1..=4`, and
    /// `strongBytes` in `1..=16`.
    #[error(
        "Hash-Lengths out of range: seqMatches={seq_matches} weakBytes={weak_bytes} strongBytes={strong_bytes}"
    )]
    HashLengthsOutOfRange {
        /// The parsed `seqMatches` value.
        seq_matches: i64,
        /// The parsed `weakBytes` value.
        weak_bytes: i64,
        /// The parsed `strongBytes` value.
        strong_bytes: i64,
    },
    /// No blank line separating the header from the binary block table was
    /// found before the control file ended.
    #[error("no blank line terminating the header was found")]
    MissingHeaderTerminator,
    /// The binary block table was shorter than `blockCount` records.
    #[error("block table truncated: expected {expected} records, found {actual}")]
    TruncatedBlockTable {
        /// Number of block records implied by `Length`/`Blocksize`.
        expected: u64,
        /// Number of complete block records actually present.
        actual: u64,
    },
    /// A URL header value (or `url_base`) did not parse as an absolute URL,
    /// or the target `URL` could not be resolved against `url_base`.
    #[error("invalid URL in control file: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Parses `bytes` as a control file, resolving any relative `URL:` header
/// against `control_file_url` (the URL the control file itself was fetched
/// from), per `spec` §3's `urlBase` field.
pub fn parse(bytes: &[u8], control_file_url: &Url) -> Result<ControlFile, ControlFileError> {
    let header_end = find_header_terminator(bytes).ok_or(ControlFileError::MissingHeaderTerminator)?;
    let header_text = std::str::from_utf8(&bytes[..header_end]).map_err(|_| {
        ControlFileError::InvalidValue {
            key: "<header>",
            value: "non-UTF-8 header bytes".to_string(),
        }
    })?;

    let mut fields = HeaderFields::default();
    for line in header_text.lines() {
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        fields.set(key.trim(), value.trim());
    }

    let header = fields.into_header(control_file_url)?;
    let table_start = header_end + 1;
    let record_len = usize::from(header.weak_checksum_bytes) + usize::from(header.strong_checksum_bytes);
    let block_count = header.block_count();
    let available_bytes = bytes.len().saturating_sub(table_start);
    let actual_records = if record_len == 0 {
        0
    } else {
        (available_bytes / record_len) as u64
    };
    if actual_records < block_count {
        return Err(ControlFileError::TruncatedBlockTable {
            expected: block_count,
            actual: actual_records,
        });
    }

    let mut blocks = Vec::with_capacity(block_count as usize);
    let mut offset = table_start;
    for _ in 0..block_count {
        let weak_bytes = &bytes[offset..offset + usize::from(header.weak_checksum_bytes)];
        offset += usize::from(header.weak_checksum_bytes);
        let strong = bytes[offset..offset + usize::from(header.strong_checksum_bytes)].to_vec();
        offset += usize::from(header.strong_checksum_bytes);

        let mut padded = [0u8; 4];
        padded[4 - weak_bytes.len()..].copy_from_slice(weak_bytes);
        let weak = u32::from_be_bytes(padded);

        blocks.push(BlockEntry { weak, strong });
    }

    Ok(ControlFile { header, blocks })
}

/// Finds the index of the `\n` that terminates the blank line separating
/// the header from the binary block table. Returns the offset of that
/// newline (the table starts at `offset + 1`).
fn find_header_terminator(bytes: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

#[derive(Default)]
struct HeaderFields {
    zsync: Option<String>,
    filename: Option<String>,
    mtime: Option<String>,
    blocksize: Option<String>,
    length: Option<String>,
    hash_lengths: Option<String>,
    url: Option<String>,
    sha1: Option<String>,
}

impl HeaderFields {
    fn set(&mut self, key: &str, value: &str) {
        match key {
            "zsync" => self.zsync = Some(value.to_string()),
            "Filename" => self.filename = Some(value.to_string()),
            "MTime" => self.mtime = Some(value.to_string()),
            "Blocksize" => self.blocksize = Some(value.to_string()),
            "Length" => self.length = Some(value.to_string()),
            "Hash-Lengths" => self.hash_lengths = Some(value.to_string()),
            "URL" => self.url = Some(value.to_string()),
            "SHA-1" => self.sha1 = Some(value.to_string()),
            _ => {
                tracing::trace!(key, "ignoring unrecognized control file header key");
            }
        }
    }

    fn into_header(self, control_file_url: &Url) -> Result<ControlHeader, ControlFileError> {
        let zsync_version = self.zsync.ok_or(ControlFileError::MissingKey("zsync"))?;
        let target_filename = self.filename.ok_or(ControlFileError::MissingKey("Filename"))?;
        let target_file_mtime = self.mtime.ok_or(ControlFileError::MissingKey("MTime"))?;

        let blocksize_raw = self.blocksize.ok_or(ControlFileError::MissingKey("Blocksize"))?;
        let block_size = blocksize_raw
            .parse::<u32>()
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| ControlFileError::InvalidValue {
                key: "Blocksize",
                value: blocksize_raw.clone(),
            })?;

        let length_raw = self.length.ok_or(ControlFileError::MissingKey("Length"))?;
        let target_length = length_raw.parse::<u64>().map_err(|_| ControlFileError::InvalidValue {
            key: "Length",
            value: length_raw.clone(),
        })?;

        let hash_lengths_raw = self
            .hash_lengths
            .ok_or(ControlFileError::MissingKey("Hash-Lengths"))?;
        let (seq_matches, weak_checksum_bytes, strong_checksum_bytes) =
            parse_hash_lengths(&hash_lengths_raw)?;

        let url_raw = self.url.ok_or(ControlFileError::MissingKey("URL"))?;
        let target_url = control_file_url.join(&url_raw)?;

        let sha1_raw = self.sha1.ok_or(ControlFileError::MissingKey("SHA-1"))?;
        let target_sha1 =
            checksums::whole_file::parse_hex_sha1(sha1_raw.trim()).ok_or_else(|| {
                ControlFileError::InvalidValue {
                    key: "SHA-1",
                    value: sha1_raw.clone(),
                }
            })?;

        // Guard against a `Length` of zero paired with a nonsensical block
        // table: not an error by itself (an empty target is valid), just
        // documented so `block_count()` returning 0 is read as intentional.
        let _ = NonZeroU64::new(target_length);

        Ok(ControlHeader {
            zsync_version,
            target_filename,
            target_file_mtime,
            block_size,
            target_length,
            weak_checksum_bytes,
            strong_checksum_bytes,
            target_sha1,
            seq_matches,
            url_base: control_file_url.clone(),
            target_url,
        })
    }
}

fn parse_hash_lengths(raw: &str) -> Result<(u8, u8, u8), ControlFileError> {
    let parts: Vec<&str> = raw.split(':').collect();
    let [seq_matches_raw, weak_raw, strong_raw] = parts.as_slice() else {
        return Err(ControlFileError::InvalidValue {
            key: "Hash-Lengths",
            value: raw.to_string(),
        });
    };
    let parse_i64 = |s: &str| {
        s.trim().parse::<i64>().map_err(|_| ControlFileError::InvalidValue {
            key: "Hash-Lengths",
            value: raw.to_string(),
        })
    };
    let seq_matches = parse_i64(seq_matches_raw)?;
    let weak_bytes = parse_i64(weak_raw)?;
    let strong_bytes = parse_i64(strong_raw)?;

    if !(1..=2).contains(&seq_matches) || !(1..=4).contains(&weak_bytes) || !(1..=16).contains(&strong_bytes) {
        return Err(ControlFileError::HashLengthsOutOfRange {
            seq_matches,
            weak_bytes,
            strong_bytes,
        });
    }

    Ok((seq_matches as u8, weak_bytes as u8, strong_bytes as u8))
}

/// Computes the masked weak checksum and truncated strong checksum for a
/// block, as they would appear in the control file's binary table. Exposed
/// so callers building a control file for testing don't have to duplicate
/// the masking/truncation rules.
#[must_use]
pub fn compute_block_entry(
    block: &[u8],
    block_size: u32,
    weak_checksum_bytes: u8,
    strong_checksum_bytes: u8,
) -> BlockEntry {
    let mut rolling = RollingChecksum::new();
    rolling.update(block);
    if block.len() < block_size as usize {
        let padding = vec![0u8; block_size as usize - block.len()];
        rolling.update(&padding);
    }
    let weak = rolling.masked_value(weak_checksum_bytes);
    let strong = checksums::strong::Md4::digest_block(block, block_size, strong_checksum_bytes);
    BlockEntry { weak, strong }
}
