//! Whole-file verification digest.
//!
//! The coordinator's `Verifying` phase (`spec` §4.G) hashes the fully
//! assembled target and compares it against `ControlHeader.targetSHA1`.
//! Streaming so the 64 KiB cooperative-yield granularity from `spec` §5 can
//! be observed without holding the whole file in memory.

use digest::Digest;

/// A streaming SHA-1 digest over an assembled target file.
#[derive(Default)]
pub struct Sha1Digest {
    hasher: sha1::Sha1,
}

impl Sha1Digest {
    /// Creates a fresh SHA-1 hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: sha1::Sha1::new(),
        }
    }

    /// Feeds more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.hasher, data);
    }

    /// Finalizes the digest into the raw 20-byte SHA-1 value.
    #[must_use]
    pub fn finalize(self) -> [u8; 20] {
        self.hasher.finalize().into()
    }
}

/// Parses a 40-character lowercase hex SHA-1 string into its raw bytes, the
/// wire representation of `ControlHeader.targetSHA1` (`spec` §3).
pub fn parse_hex_sha1(hex: &str) -> Option<[u8; 20]> {
    if hex.len() != 40 {
        return None;
    }
    let mut out = [0u8; 20];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// Formats raw SHA-1 bytes as a lowercase hex string.
#[must_use]
pub fn format_hex_sha1(bytes: &[u8; 20]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_known_sha1() {
        let digest = Sha1Digest::new().finalize();
        assert_eq!(
            format_hex_sha1(&digest),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn hex_round_trips() {
        let mut hasher = Sha1Digest::new();
        hasher.update(b"hello, appimage");
        let digest = hasher.finalize();
        let hex = format_hex_sha1(&digest);
        assert_eq!(parse_hex_sha1(&hex), Some(digest));
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(parse_hex_sha1("abcd"), None);
    }
}
