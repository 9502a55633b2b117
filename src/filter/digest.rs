//! Transfer-integrity digest.
//!
//! A rolling hash over the line-ending-normalized, charset-converted byte
//! stream. Client and server must digest exactly the same bytes (the
//! server's canonical form), so this filter sits after normalization in the
//! pipeline. A mismatch is a verification failure, not a transport or
//! protocol error.

use bytes::BytesMut;

use crate::error::{Result, WireError};
use crate::filter::ByteFilter;

/// Hex length of a finalized digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Rolling content digest. Also usable as a pass-through pipeline filter.
#[derive(Debug)]
pub struct ContentDigest {
    hasher: blake3::Hasher,
    bytes: u64,
}

impl Default for ContentDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentDigest {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.bytes += bytes.len() as u64;
    }

    /// Total bytes digested so far.
    pub fn bytes_digested(&self) -> u64 {
        self.bytes
    }

    /// Finalize as a fixed-length lowercase hex string.
    pub fn finalize_hex(&self) -> String {
        hex::encode(self.hasher.finalize().as_bytes())
    }

    /// Compare against the digest the server reported.
    pub fn verify(&self, expected: &str) -> Result<()> {
        let actual = self.finalize_hex();
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(WireError::DigestMismatch {
                expected: expected.to_ascii_lowercase(),
                actual,
            });
        }
        Ok(())
    }

    /// One-shot digest of a complete buffer.
    pub fn of(bytes: &[u8]) -> String {
        let mut d = Self::new();
        d.update(bytes);
        d.finalize_hex()
    }
}

impl ByteFilter for ContentDigest {
    fn push(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()> {
        self.update(input);
        out.extend_from_slice(input);
        Ok(())
    }

    fn finish(&mut self, _out: &mut BytesMut) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_equals_one_shot() {
        let mut rolling = ContentDigest::new();
        rolling.update(b"one\n");
        rolling.update(b"two\n");
        assert_eq!(rolling.finalize_hex(), ContentDigest::of(b"one\ntwo\n"));
        assert_eq!(rolling.bytes_digested(), 8);
    }

    #[test]
    fn test_hex_is_fixed_length_lowercase() {
        let hex = ContentDigest::of(b"anything");
        assert_eq!(hex.len(), DIGEST_HEX_LEN);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_verify_mismatch_is_distinct_failure() {
        let mut d = ContentDigest::new();
        d.update(b"content");
        assert!(d.verify(&d.finalize_hex()).is_ok());
        // Case-insensitive match against server-reported hex.
        assert!(d.verify(&d.finalize_hex().to_ascii_uppercase()).is_ok());

        let err = d.verify(&"0".repeat(DIGEST_HEX_LEN)).unwrap_err();
        assert!(matches!(err, WireError::DigestMismatch { .. }));
        assert!(!err.is_fatal());
    }
}
