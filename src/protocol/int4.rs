//! Fixed-width integer codec and the preamble integrity check.
//!
//! Every length on the wire is an "int4": a 32-bit unsigned value in 4-byte
//! little-endian form. The preamble checksum is a fast sanity check computed
//! over the four length bytes; it is an opaque wire-compatibility constant
//! (verified against captured traffic) and nothing here derives meaning from
//! the value itself.

use crate::error::{Result, WireError};

/// Width of an int4 on the wire.
pub const INT4_SIZE: usize = 4;

/// Seed for the preamble checksum fold. Wire constant, do not change.
const CHECKSUM_SEED: u32 = 0xA50F;

/// Encode a 32-bit value as 4 little-endian bytes.
#[inline]
pub fn encode_int4(value: u32) -> [u8; INT4_SIZE] {
    value.to_le_bytes()
}

/// Decode an int4. Fails unless given exactly 4 bytes.
#[inline]
pub fn decode_int4(buf: &[u8]) -> Result<u32> {
    let bytes: [u8; INT4_SIZE] = buf
        .try_into()
        .map_err(|_| WireError::BadInt4Length { len: buf.len() })?;
    Ok(u32::from_le_bytes(bytes))
}

/// Checksum over the preamble length bytes.
///
/// Multiply-add fold over the little-endian bytes of `length`, seeded with
/// [`CHECKSUM_SEED`]. Pinned by the test vectors below.
pub fn preamble_checksum(length: u32) -> u32 {
    let mut sum = CHECKSUM_SEED;
    for b in length.to_le_bytes() {
        sum = sum.wrapping_mul(31).wrapping_add(u32::from(b));
    }
    sum
}

/// Validate a received checksum against the declared length.
///
/// Must be called before the length is trusted for any allocation or read.
pub fn validate_checksum(length: u32, received: u32) -> Result<()> {
    let expected = preamble_checksum(length);
    if received != expected {
        return Err(WireError::ChecksumMismatch {
            expected,
            actual: received,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int4_roundtrip() {
        for v in [0u32, 1, 0xFF, 0x1234_5678, u32::MAX] {
            let encoded = encode_int4(v);
            assert_eq!(decode_int4(&encoded).unwrap(), v);
        }
    }

    #[test]
    fn test_int4_little_endian_byte_order() {
        assert_eq!(encode_int4(0x0403_0201), [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        assert!(matches!(
            decode_int4(&[1, 2, 3]),
            Err(WireError::BadInt4Length { len: 3 })
        ));
        assert!(matches!(
            decode_int4(&[1, 2, 3, 4, 5]),
            Err(WireError::BadInt4Length { len: 5 })
        ));
    }

    // Pinned wire vectors. If these change, the codec no longer speaks to
    // real servers.
    #[test]
    fn test_checksum_vectors() {
        assert_eq!(preamble_checksum(0), 0x15F9_858F);
        assert_eq!(preamble_checksum(1), 0x15F9_F9EE);
        assert_eq!(preamble_checksum(0x0000_0040), 0x1616_9D4F);
        assert_eq!(preamble_checksum(0x0012_3456), 0x1621_62DB);
    }

    #[test]
    fn test_validate_checksum_mismatch() {
        let good = preamble_checksum(64);
        assert!(validate_checksum(64, good).is_ok());
        assert!(matches!(
            validate_checksum(64, good ^ 1),
            Err(WireError::ChecksumMismatch { .. })
        ));
    }
}
