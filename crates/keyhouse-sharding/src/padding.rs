//! Peer Request Padding
//!
//! Shard fan-out would otherwise leak how many keys route to each peer
//! through ciphertext length. Before encryption, a serialized request is
//! length-prefixed and zero-padded up to the next power-of-two bucket (and
//! optionally further, so every request in one fan-out has equal size).

use keyhouse_core::{KvError, Result};

/// Smallest padded size.
const MIN_BUCKET: usize = 64;

/// Pad `payload`, adding at least `extra` bytes of padding before
/// bucketing.
pub fn pad(payload: &[u8], extra: usize) -> Vec<u8> {
    let unpadded = 4 + payload.len() + extra;
    let bucket = unpadded.next_power_of_two().max(MIN_BUCKET);
    let mut out = Vec::with_capacity(bucket);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.resize(bucket, 0);
    out
}

/// Strip padding, returning the original payload.
pub fn unpad(padded: &[u8]) -> Result<&[u8]> {
    if padded.len() < 4 {
        return Err(KvError::invalid_argument("Padded payload is too short"));
    }
    let len = u32::from_be_bytes(padded[..4].try_into().unwrap()) as usize;
    if padded.len() < 4 + len {
        return Err(KvError::invalid_argument(
            "Padded payload length prefix exceeds payload",
        ));
    }
    Ok(&padded[4..4 + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for payload in [&b""[..], b"x", b"a longer payload with some bytes in it"] {
            assert_eq!(unpad(&pad(payload, 0)).unwrap(), payload);
        }
    }

    #[test]
    fn test_power_of_two_buckets() {
        assert_eq!(pad(b"tiny", 0).len(), MIN_BUCKET);
        let payload = vec![7u8; 200];
        assert_eq!(pad(&payload, 0).len(), 256);
        let payload = vec![7u8; 300];
        assert_eq!(pad(&payload, 0).len(), 512);
    }

    #[test]
    fn test_extra_padding_moves_bucket() {
        let payload = vec![1u8; 100];
        assert_eq!(pad(&payload, 0).len(), 128);
        assert_eq!(pad(&payload, 200).len(), 512);
        // Equal-sized requests regardless of payload split.
        assert_eq!(pad(&vec![1u8; 300], 0).len(), pad(&payload, 200).len());
    }

    #[test]
    fn test_unpad_rejects_garbage() {
        assert!(unpad(&[0xFF]).is_err());
        // Prefix claims more bytes than exist.
        let bogus = [0x00, 0x00, 0x01, 0x00, 0xAA];
        assert!(unpad(&bogus).is_err());
    }
}
