//! Delta File Frame Format
//!
//! This module defines how records are laid out on disk and how a reader
//! finds them again, including from the middle of the file.
//!
//! ## Layout
//!
//! A delta file is a flat sequence of frames:
//!
//! ```text
//! | marker (8) | len: u32 LE | crc32(payload): u32 LE | payload (len) |
//! ```
//!
//! The first frame carries file metadata under a dedicated marker; every
//! following frame is a record frame.
//!
//! ## Why Sync Markers?
//!
//! The concurrent reader drops a stream at an arbitrary byte offset and
//! must find the next record boundary on its own. The marker gives it a
//! pattern to scan for, and the length bound plus CRC behind it reject
//! look-alike bytes inside payloads: a marker hit only counts once the
//! whole frame behind it validates.
//!
//! ## Corruption Recovery
//!
//! ```text
//! read frame at pos ──valid──→ deliver payload
//!         │
//!      invalid
//!         ↓
//! scan forward for next valid frame
//!         ↓
//! recover(SkippedRegion { begin, end })? ──false──→ abort read
//!         ↓ true
//! continue at the next valid frame
//! ```
//!
//! The caller decides what a skipped region means: the default logs and
//! keeps going, a strict loader can refuse.
//!
//! ## Usage
//!
//! ```ignore
//! let mut reader = FrameReader::new(stream)?;
//! reader.resync(0)?;
//! while let Some(frame) = reader.read_frame(&log_and_continue)? {
//!     handle(frame.payload)?;
//! }
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use keyhouse_core::{KvError, Result};
use tracing::warn;

/// Marker opening every record frame.
pub const RECORD_MARKER: [u8; 8] = *b"\xD3KHRECRD";

/// Marker opening the single metadata frame at offset zero.
pub const METADATA_MARKER: [u8; 8] = *b"\xD3KHMETAD";

/// Frame header length: marker + payload length + CRC.
pub const FRAME_HEADER_LEN: u64 = 16;

/// Upper bound on a single frame payload. Anything larger is treated as
/// corruption during resync.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// A byte range that failed frame validation and was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedRegion {
    /// First corrupted byte.
    pub begin: u64,
    /// First byte past the corrupted region (start of the next valid frame,
    /// or the stream size).
    pub end: u64,
}

impl std::fmt::Display for SkippedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Decides whether a read continues past a skipped region.
pub type RecoveryFn = dyn Fn(SkippedRegion) -> bool + Send + Sync;

/// Default recovery: log and continue.
pub fn log_and_continue(region: SkippedRegion) -> bool {
    warn!(%region, "Skipping over corrupted region");
    true
}

/// Append one frame to `out`.
pub fn write_frame(out: &mut impl Write, marker: &[u8; 8], payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(KvError::invalid_argument(format!(
            "Frame payload of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let crc = crc32fast::hash(payload);
    let io = |e: std::io::Error| KvError::internal(format!("Frame write failed: {e}"));
    out.write_all(marker).map_err(io)?;
    out.write_all(&len.to_le_bytes()).map_err(io)?;
    out.write_all(&crc.to_le_bytes()).map_err(io)?;
    out.write_all(payload).map_err(io)?;
    Ok(())
}

/// One successfully decoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Byte offset of the frame's marker.
    pub start_pos: u64,
    pub payload: Bytes,
}

/// Reads record frames from a seekable stream, resynchronizing on demand.
pub struct FrameReader<S> {
    stream: S,
    /// Offset of the next unconsumed byte (always a presumed frame start).
    pos: u64,
    stream_size: u64,
}

impl<S: Read + Seek> FrameReader<S> {
    /// Wrap `stream`. The reader starts unpositioned; call [`Self::resync`]
    /// before reading.
    pub fn new(mut stream: S) -> Result<Self> {
        let stream_size = stream
            .seek(SeekFrom::End(0))
            .map_err(|_| KvError::invalid_argument("Input streams do not support seeking."))?;
        Ok(Self {
            stream,
            pos: stream_size,
            stream_size,
        })
    }

    pub fn stream_size(&self) -> u64 {
        self.stream_size
    }

    /// Offset of the next frame to be read.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Position at the first valid record frame whose marker begins at or
    /// after `from`. Returns the frame's offset, or `None` past the last
    /// frame.
    pub fn resync(&mut self, from: u64) -> Result<Option<u64>> {
        let mut candidate = from;
        loop {
            match self.find_marker(candidate)? {
                None => {
                    self.pos = self.stream_size;
                    return Ok(None);
                }
                Some(marker_pos) => {
                    if self.validate_frame_at(marker_pos)? {
                        self.pos = marker_pos;
                        return Ok(Some(marker_pos));
                    }
                    candidate = marker_pos + 1;
                }
            }
        }
    }

    /// Read the frame at the current position. `recover` is consulted when
    /// the bytes at the position do not form a valid frame; returning
    /// `false` aborts. `Ok(None)` signals the end of the stream.
    pub fn read_frame(&mut self, recover: &RecoveryFn) -> Result<Option<Frame>> {
        loop {
            if self.pos >= self.stream_size {
                return Ok(None);
            }
            let start_pos = self.pos;
            match self.try_read_frame_at(start_pos)? {
                Some(payload) => {
                    self.pos = start_pos + FRAME_HEADER_LEN + payload.len() as u64;
                    return Ok(Some(Frame { start_pos, payload }));
                }
                None => {
                    // Corrupted bytes at start_pos: find the next valid
                    // frame and let the caller decide.
                    let next = self.resync(start_pos + 1)?;
                    let end = next.unwrap_or(self.stream_size);
                    if !recover(SkippedRegion {
                        begin: start_pos,
                        end,
                    }) {
                        return Err(KvError::internal(format!(
                            "Corrupted region between byte={start_pos} and byte={end}."
                        )));
                    }
                    if next.is_none() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Scan for the next record marker at or after `from`.
    fn find_marker(&mut self, from: u64) -> Result<Option<u64>> {
        // The marker may start up to 8 bytes before the end of file minus
        // the header, but scanning to size-8 keeps the logic simple.
        if from + 8 > self.stream_size {
            return Ok(None);
        }
        self.seek_to(from)?;
        let mut window = [0u8; 8];
        self.read_exact(&mut window)?;
        let mut next_byte_pos = from + 8;
        loop {
            if window == RECORD_MARKER {
                return Ok(Some(next_byte_pos - 8));
            }
            if next_byte_pos >= self.stream_size {
                return Ok(None);
            }
            let mut byte = [0u8; 1];
            self.read_exact(&mut byte)?;
            window.rotate_left(1);
            window[7] = byte[0];
            next_byte_pos += 1;
        }
    }

    /// Check that a full, CRC-clean frame sits at `marker_pos`.
    fn validate_frame_at(&mut self, marker_pos: u64) -> Result<bool> {
        Ok(self.try_read_frame_at(marker_pos)?.is_some())
    }

    /// Attempt a strict frame read at `pos`; `None` on any mismatch.
    fn try_read_frame_at(&mut self, pos: u64) -> Result<Option<Bytes>> {
        if pos + FRAME_HEADER_LEN > self.stream_size {
            return Ok(None);
        }
        self.seek_to(pos)?;
        let mut header = [0u8; 16];
        self.read_exact(&mut header)?;
        if header[..8] != RECORD_MARKER {
            return Ok(None);
        }
        let len = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let crc = u32::from_le_bytes(header[12..16].try_into().unwrap());
        if len > MAX_FRAME_LEN || pos + FRAME_HEADER_LEN + len as u64 > self.stream_size {
            return Ok(None);
        }
        let mut payload = vec![0u8; len as usize];
        self.read_exact(&mut payload)?;
        if crc32fast::hash(&payload) != crc {
            return Ok(None);
        }
        Ok(Some(Bytes::from(payload)))
    }

    fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.stream
            .seek(SeekFrom::Start(pos))
            .map(|_| ())
            .map_err(|e| KvError::internal(format!("Stream seek failed: {e}")))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stream
            .read_exact(buf)
            .map_err(|e| KvError::internal(format!("Stream read failed: {e}")))
    }
}

/// Read the metadata frame at offset zero.
pub fn read_metadata_frame(stream: &mut (impl Read + Seek)) -> Result<Bytes> {
    let io = |e: std::io::Error| KvError::internal(format!("Stream read failed: {e}"));
    stream.seek(SeekFrom::Start(0)).map_err(io)?;
    let mut header = [0u8; 16];
    stream.read_exact(&mut header).map_err(io)?;
    if header[..8] != METADATA_MARKER {
        return Err(KvError::unavailable("Metadata not found"));
    }
    let len = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let crc = u32::from_le_bytes(header[12..16].try_into().unwrap());
    if len > MAX_FRAME_LEN {
        return Err(KvError::internal("Metadata frame too large"));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).map_err(io)?;
    if crc32fast::hash(&payload) != crc {
        return Err(KvError::internal("Metadata frame failed CRC check"));
    }
    Ok(Bytes::from(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn file_with_records(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        write_frame(&mut out, &METADATA_MARKER, b"meta").unwrap();
        for payload in payloads {
            write_frame(&mut out, &RECORD_MARKER, payload).unwrap();
        }
        out
    }

    fn read_all(data: Vec<u8>) -> Vec<Frame> {
        let mut reader = FrameReader::new(Cursor::new(data)).unwrap();
        reader.resync(0).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = reader.read_frame(&log_and_continue).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_sequential_read() {
        let data = file_with_records(&[b"one", b"two", b"three"]);
        let frames = read_all(data);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload.as_ref(), b"one");
        assert_eq!(frames[2].payload.as_ref(), b"three");
    }

    #[test]
    fn test_resync_skips_metadata_frame() {
        let data = file_with_records(&[b"first"]);
        let mut reader = FrameReader::new(Cursor::new(data)).unwrap();
        let first = reader.resync(0).unwrap().unwrap();
        // 16-byte metadata header + 4-byte payload.
        assert_eq!(first, 20);
    }

    #[test]
    fn test_resync_from_mid_payload() {
        let data = file_with_records(&[b"abcdefgh", b"second"]);
        let mut reader = FrameReader::new(Cursor::new(data.clone())).unwrap();
        let first = reader.resync(0).unwrap().unwrap();
        // Start the scan inside the first record's payload.
        let second = reader.resync(first + 1).unwrap().unwrap();
        assert_eq!(second, first + FRAME_HEADER_LEN + 8);
        let frame = reader.read_frame(&log_and_continue).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), b"second");
    }

    #[test]
    fn test_marker_bytes_inside_payload_are_not_a_frame() {
        // Payload containing the record marker must not produce a phantom
        // frame: CRC validation rejects the fake header.
        let mut tricky = Vec::new();
        tricky.extend_from_slice(&RECORD_MARKER);
        tricky.extend_from_slice(&[0xAA; 16]);
        let data = file_with_records(&[&tricky, b"real"]);
        let frames = read_all(data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].payload.as_ref(), b"real");
    }

    #[test]
    fn test_corrupted_frame_recovered() {
        let mut data = file_with_records(&[b"good-one", b"damaged!", b"good-two"]);
        // Flip a payload byte of the middle record.
        let middle_payload_pos = data.len() - (16 + 8) - (16 + 8) + 16;
        data[middle_payload_pos] ^= 0xFF;
        let frames = read_all(data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload.as_ref(), b"good-one");
        assert_eq!(frames[1].payload.as_ref(), b"good-two");
    }

    #[test]
    fn test_recovery_false_aborts() {
        let mut data = file_with_records(&[b"good-one", b"damaged!"]);
        let last_byte = data.len() - 1;
        data[last_byte] ^= 0xFF;
        let mut reader = FrameReader::new(Cursor::new(data)).unwrap();
        reader.resync(0).unwrap();
        let abort = |_region: SkippedRegion| false;
        assert!(reader.read_frame(&abort).unwrap().is_some());
        let err = reader.read_frame(&abort).unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::Internal);
    }

    #[test]
    fn test_truncated_tail_treated_as_corruption() {
        let mut data = file_with_records(&[b"good-one", b"cut-off-record"]);
        data.truncate(data.len() - 5);
        let frames = read_all(data);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_metadata_frame_roundtrip() {
        let data = file_with_records(&[b"rec"]);
        let mut cursor = Cursor::new(data);
        let metadata = read_metadata_frame(&mut cursor).unwrap();
        assert_eq!(metadata.as_ref(), b"meta");
    }

    #[test]
    fn test_metadata_frame_missing() {
        let mut out = Vec::new();
        write_frame(&mut out, &RECORD_MARKER, b"rec").unwrap();
        let err = read_metadata_frame(&mut Cursor::new(out)).unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::Unavailable);
    }
}
