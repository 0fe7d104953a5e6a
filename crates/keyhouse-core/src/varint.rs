//! QUIC Variable-length Integer Encoding
//!
//! Binary HTTP (RFC 9292) frames all lengths as QUIC varints (RFC 9000
//! §16): the two high bits of the first byte select a 1, 2, 4, or 8 byte
//! encoding carrying 6, 14, 30, or 62 usable bits.
//!
//! Encoding always picks the shortest form. Decoding returns how many bytes
//! were consumed so callers can slice through a message body without an
//! intermediate cursor.

use bytes::{Buf, BufMut};

use crate::{KvError, Result};

/// Largest value representable as a QUIC varint (2^62 - 1).
pub const VARINT_MAX: u64 = (1 << 62) - 1;

/// Encode `value` in the shortest varint form.
pub fn encode_varint(buf: &mut impl BufMut, value: u64) {
    debug_assert!(value <= VARINT_MAX, "varint out of range");
    if value < 1 << 6 {
        buf.put_u8(value as u8);
    } else if value < 1 << 14 {
        buf.put_u16((value as u16) | 0x4000);
    } else if value < 1 << 30 {
        buf.put_u32((value as u32) | 0x8000_0000);
    } else {
        buf.put_u64(value | 0xC000_0000_0000_0000);
    }
}

/// Decode one varint from the front of `buf`.
pub fn decode_varint(buf: &mut impl Buf) -> Result<u64> {
    if buf.remaining() < 1 {
        return Err(KvError::invalid_argument("Truncated varint"));
    }
    let first = buf.chunk()[0];
    let len = 1usize << (first >> 6);
    if buf.remaining() < len {
        return Err(KvError::invalid_argument("Truncated varint"));
    }
    let value = match len {
        1 => u64::from(buf.get_u8()),
        2 => u64::from(buf.get_u16() & 0x3FFF),
        4 => u64::from(buf.get_u32() & 0x3FFF_FFFF),
        _ => buf.get_u64() & 0x3FFF_FFFF_FFFF_FFFF,
    };
    Ok(value)
}

/// Number of bytes `value` occupies when varint-encoded.
pub fn varint_len(value: u64) -> usize {
    if value < 1 << 6 {
        1
    } else if value < 1 << 14 {
        2
    } else if value < 1 << 30 {
        4
    } else {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn roundtrip(value: u64) -> (u64, usize) {
        let mut buf = BytesMut::new();
        encode_varint(&mut buf, value);
        let encoded_len = buf.len();
        let mut slice = &buf[..];
        let decoded = decode_varint(&mut slice).unwrap();
        assert!(slice.is_empty());
        (decoded, encoded_len)
    }

    #[test]
    fn test_one_byte_range() {
        for value in [0u64, 1, 63] {
            let (decoded, len) = roundtrip(value);
            assert_eq!(decoded, value);
            assert_eq!(len, 1);
        }
    }

    #[test]
    fn test_two_byte_range() {
        for value in [64u64, 16383] {
            let (decoded, len) = roundtrip(value);
            assert_eq!(decoded, value);
            assert_eq!(len, 2);
        }
    }

    #[test]
    fn test_four_byte_range() {
        for value in [16384u64, (1 << 30) - 1] {
            let (decoded, len) = roundtrip(value);
            assert_eq!(decoded, value);
            assert_eq!(len, 4);
        }
    }

    #[test]
    fn test_eight_byte_range() {
        for value in [1u64 << 30, VARINT_MAX] {
            let (decoded, len) = roundtrip(value);
            assert_eq!(decoded, value);
            assert_eq!(len, 8);
        }
    }

    // RFC 9000 appendix A.1 example: 0x25 decodes to 37.
    #[test]
    fn test_rfc_example_single_byte() {
        let mut slice: &[u8] = &[0x25];
        assert_eq!(decode_varint(&mut slice).unwrap(), 37);
    }

    // RFC 9000 appendix A.1 example: 0x9d7f3e7d decodes to 494878333.
    #[test]
    fn test_rfc_example_four_bytes() {
        let mut slice: &[u8] = &[0x9d, 0x7f, 0x3e, 0x7d];
        assert_eq!(decode_varint(&mut slice).unwrap(), 494_878_333);
    }

    #[test]
    fn test_truncated_input() {
        let mut slice: &[u8] = &[0x40];
        assert!(decode_varint(&mut slice).is_err());
        let mut empty: &[u8] = &[];
        assert!(decode_varint(&mut empty).is_err());
    }

    #[test]
    fn test_varint_len_matches_encoding() {
        for value in [0u64, 63, 64, 16383, 16384, (1 << 30) - 1, 1 << 30] {
            let mut buf = BytesMut::new();
            encode_varint(&mut buf, value);
            assert_eq!(buf.len(), varint_len(value));
        }
    }
}
