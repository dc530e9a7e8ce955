//! Record framing
//!
//! A record is written contiguously into one reserved range. The header, if
//! any, precedes the payload and uses little-endian integers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the length-only header
pub const LENGTH_HEADER_LEN: usize = 4;

/// Size of the full header (length, writer id, sequence)
pub const FULL_HEADER_LEN: usize = 16;

/// Header layout written in front of each payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFraming {
    /// Payload bytes only
    None,
    /// `u32` payload length
    Length,
    /// `u32` payload length, `u32` writer id, `u64` sequence
    #[default]
    Full,
}

impl RecordFraming {
    /// Header size in bytes
    pub const fn header_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Length => LENGTH_HEADER_LEN,
            Self::Full => FULL_HEADER_LEN,
        }
    }

    /// Total bytes a payload of `payload_len` occupies once framed
    pub fn frame_len(self, payload_len: usize) -> usize {
        self.header_len().saturating_add(payload_len)
    }

    /// Encode the header and payload into `dst`, which must be exactly
    /// `frame_len(payload.len())` bytes long.
    pub(crate) fn encode(self, dst: &mut [u8], writer_id: u32, sequence: u64, payload: &[u8]) {
        let header = self.header_len();
        debug_assert_eq!(dst.len(), header + payload.len());

        match self {
            Self::None => {}
            Self::Length => {
                dst[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            }
            Self::Full => {
                dst[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
                dst[4..8].copy_from_slice(&writer_id.to_le_bytes());
                dst[8..16].copy_from_slice(&sequence.to_le_bytes());
            }
        }
        dst[header..].copy_from_slice(payload);
    }
}

/// Framing decode errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes remain than a header needs
    #[error("Truncated header at offset {offset}: {remaining} bytes remain")]
    TruncatedHeader {
        /// Offset of the frame
        offset: usize,
        /// Bytes left in the input
        remaining: usize,
    },

    /// Header announces more payload than remains
    #[error("Truncated payload at offset {offset}: need {needed} bytes, {remaining} remain")]
    TruncatedPayload {
        /// Offset of the frame
        offset: usize,
        /// Announced payload length
        needed: usize,
        /// Bytes left after the header
        remaining: usize,
    },

    /// Unframed data cannot be split into records
    #[error("Records without framing cannot be decoded")]
    Unframed,
}

/// A decoded record borrowing from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordView<'a> {
    /// Byte offset of the frame in the input
    pub offset: usize,
    /// Writer id (0 when the framing does not carry one)
    pub writer_id: u32,
    /// Per-writer sequence number (0 when the framing does not carry one)
    pub sequence: u64,
    /// Payload bytes
    pub payload: &'a [u8],
}

/// Iterator over framed records in a byte buffer
///
/// Stops after the first error.
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    offset: usize,
    framing: RecordFraming,
    failed: bool,
}

impl<'a> RecordReader<'a> {
    /// Create a reader over `data`
    pub fn new(data: &'a [u8], framing: RecordFraming) -> Self {
        Self {
            data,
            offset: 0,
            framing,
            failed: false,
        }
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_u32(&self, at: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[at..at + 4]);
        u32::from_le_bytes(buf)
    }

    fn read_u64(&self, at: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[at..at + 8]);
        u64::from_le_bytes(buf)
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<RecordView<'a>, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }

        if self.framing == RecordFraming::None {
            self.failed = true;
            return Some(Err(FrameError::Unframed));
        }

        let start = self.offset;
        let remaining = self.data.len() - start;
        let header = self.framing.header_len();
        if remaining < header {
            self.failed = true;
            return Some(Err(FrameError::TruncatedHeader {
                offset: start,
                remaining,
            }));
        }

        let payload_len = self.read_u32(start) as usize;
        let (writer_id, sequence) = if self.framing == RecordFraming::Full {
            (self.read_u32(start + 4), self.read_u64(start + 8))
        } else {
            (0, 0)
        };

        let body = start + header;
        if payload_len > self.data.len() - body {
            self.failed = true;
            return Some(Err(FrameError::TruncatedPayload {
                offset: start,
                needed: payload_len,
                remaining: self.data.len() - body,
            }));
        }

        self.offset = body + payload_len;
        Some(Ok(RecordView {
            offset: start,
            writer_id,
            sequence,
            payload: &self.data[body..body + payload_len],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(framing: RecordFraming, writer: u32, seq: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; framing.frame_len(payload.len())];
        framing.encode(&mut buf, writer, seq, payload);
        buf
    }

    #[test]
    fn test_header_lengths() {
        assert_eq!(RecordFraming::None.header_len(), 0);
        assert_eq!(RecordFraming::Length.header_len(), 4);
        assert_eq!(RecordFraming::Full.header_len(), 16);
        assert_eq!(RecordFraming::Full.frame_len(100), 116);
    }

    #[test]
    fn test_full_header_layout() {
        let buf = frame(RecordFraming::Full, 7, 0x0102, b"abc");
        assert_eq!(&buf[..4], &3u32.to_le_bytes());
        assert_eq!(&buf[4..8], &7u32.to_le_bytes());
        assert_eq!(&buf[8..16], &0x0102u64.to_le_bytes());
        assert_eq!(&buf[16..], b"abc");
    }

    #[test]
    fn test_reader_walks_consecutive_frames() {
        let mut data = frame(RecordFraming::Full, 1, 0, b"first");
        data.extend(frame(RecordFraming::Full, 2, 0, b""));
        data.extend(frame(RecordFraming::Full, 1, 1, b"third!"));

        let records: Vec<_> = RecordReader::new(&data, RecordFraming::Full)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload, b"first");
        assert_eq!(records[1].writer_id, 2);
        assert!(records[1].payload.is_empty());
        assert_eq!(records[2].sequence, 1);
        assert_eq!(records[2].offset, 16 + 5 + 16);
    }

    #[test]
    fn test_length_framing() {
        let mut data = frame(RecordFraming::Length, 9, 9, b"xy");
        data.extend(frame(RecordFraming::Length, 9, 9, b"z"));
        let payloads: Vec<_> = RecordReader::new(&data, RecordFraming::Length)
            .map(|r| r.unwrap().payload.to_vec())
            .collect();
        assert_eq!(payloads, vec![b"xy".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn test_truncated_payload_reported_once() {
        let mut data = frame(RecordFraming::Full, 1, 0, b"complete");
        data.truncate(data.len() - 2);
        let mut reader = RecordReader::new(&data, RecordFraming::Full);
        assert!(matches!(
            reader.next(),
            Some(Err(FrameError::TruncatedPayload { needed: 8, .. }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_header() {
        let data = [1u8, 0, 0];
        let mut reader = RecordReader::new(&data, RecordFraming::Length);
        assert!(matches!(
            reader.next(),
            Some(Err(FrameError::TruncatedHeader { remaining: 3, .. }))
        ));
    }

    #[test]
    fn test_unframed_cannot_decode() {
        let mut reader = RecordReader::new(b"raw", RecordFraming::None);
        assert_eq!(reader.next(), Some(Err(FrameError::Unframed)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any sequence of framed payloads decodes back to the same payloads
            #[test]
            fn framed_sequence_decodes(
                payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..32)
            ) {
                let mut data = Vec::new();
                for (i, p) in payloads.iter().enumerate() {
                    data.extend(frame(RecordFraming::Full, 3, i as u64, p));
                }
                let decoded: Vec<_> = RecordReader::new(&data, RecordFraming::Full)
                    .collect::<Result<_, _>>()
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(decoded.len(), payloads.len());
                for (i, (view, p)) in decoded.iter().zip(&payloads).enumerate() {
                    prop_assert_eq!(view.payload, p.as_slice());
                    prop_assert_eq!(view.sequence, i as u64);
                }
            }
        }
    }
}
