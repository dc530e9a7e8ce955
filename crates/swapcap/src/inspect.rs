//! Capture file inspection.
//!
//! Walks a framed capture, counts records per writer and checks that every
//! writer's sequence numbers strictly increase. A trailing truncated frame is
//! reported, not treated as fatal.

use crate::error::InspectError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use swapcap_core::{FrameError, RecordFraming, RecordReader, RecordView};

/// Bytes of payload shown per record in a dump
pub const PREVIEW_LEN: usize = 16;

/// Per-writer totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriterSummary {
    /// Records seen
    pub records: u64,
    /// Payload bytes
    pub payload_bytes: u64,
    /// First sequence number seen
    pub first_sequence: u64,
    /// Last sequence number seen
    pub last_sequence: u64,
    /// Whether every sequence number exceeded the previous one
    pub monotonic: bool,
    /// Sequence numbers skipped between consecutive records
    pub gaps: u64,
}

/// Result of inspecting a capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectReport {
    /// Header layout used for decoding
    pub framing: RecordFraming,
    /// Records decoded
    pub records: u64,
    /// Payload bytes across all records
    pub payload_bytes: u64,
    /// Bytes in the input
    pub total_bytes: u64,
    /// Totals keyed by writer id
    pub writers: BTreeMap<u32, WriterSummary>,
    /// Decode error that stopped the walk, if any
    pub error: Option<String>,
}

impl InspectReport {
    /// Whether the input decoded cleanly and every writer is in order
    pub fn is_consistent(&self) -> bool {
        self.error.is_none() && self.writers.values().all(|w| w.monotonic)
    }
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} records, {} payload bytes, {} bytes total",
            self.records, self.payload_bytes, self.total_bytes
        )?;
        for (id, writer) in &self.writers {
            writeln!(
                f,
                "  writer {id}: {} records, {} bytes, seq {}..={}, {}{}",
                writer.records,
                writer.payload_bytes,
                writer.first_sequence,
                writer.last_sequence,
                if writer.monotonic { "ordered" } else { "OUT OF ORDER" },
                if writer.gaps > 0 {
                    format!(", {} gaps", writer.gaps)
                } else {
                    String::new()
                },
            )?;
        }
        if let Some(err) = &self.error {
            writeln!(f, "  decode stopped: {err}")?;
        }
        Ok(())
    }
}

/// Inspect an in-memory capture.
///
/// # Errors
///
/// Returns `InspectError::Frame` if `framing` carries no headers.
pub fn inspect_bytes(data: &[u8], framing: RecordFraming) -> Result<InspectReport, InspectError> {
    inspect_with(data, framing, |_| {})
}

/// Inspect an in-memory capture, calling `visit` for every decoded record.
///
/// # Errors
///
/// Returns `InspectError::Frame` if `framing` carries no headers.
pub fn inspect_with<F>(
    data: &[u8],
    framing: RecordFraming,
    mut visit: F,
) -> Result<InspectReport, InspectError>
where
    F: FnMut(&RecordView<'_>),
{
    if framing == RecordFraming::None {
        return Err(FrameError::Unframed.into());
    }

    let mut report = InspectReport {
        framing,
        records: 0,
        payload_bytes: 0,
        total_bytes: data.len() as u64,
        writers: BTreeMap::new(),
        error: None,
    };

    for record in RecordReader::new(data, framing) {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                report.error = Some(err.to_string());
                break;
            }
        };
        visit(&record);

        let payload = record.payload.len() as u64;
        report.records += 1;
        report.payload_bytes += payload;

        report
            .writers
            .entry(record.writer_id)
            .and_modify(|w| {
                if record.sequence <= w.last_sequence {
                    w.monotonic = false;
                } else {
                    w.gaps += record.sequence - w.last_sequence - 1;
                }
                w.records += 1;
                w.payload_bytes += payload;
                w.last_sequence = record.sequence;
            })
            .or_insert(WriterSummary {
                records: 1,
                payload_bytes: payload,
                first_sequence: record.sequence,
                last_sequence: record.sequence,
                monotonic: true,
                gaps: 0,
            });
    }

    Ok(report)
}

/// Inspect a capture file.
///
/// # Errors
///
/// Returns `InspectError` if the file cannot be read or `framing` carries no
/// headers.
pub fn inspect_file(path: &Path, framing: RecordFraming) -> Result<InspectReport, InspectError> {
    let data = read(path)?;
    inspect_bytes(&data, framing)
}

/// Read a capture file
///
/// # Errors
///
/// Returns `InspectError::Read` if the file cannot be read.
pub fn read(path: &Path) -> Result<Vec<u8>, InspectError> {
    std::fs::read(path).map_err(|source| InspectError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// One-line description of a record with a hex payload preview
pub fn describe(record: &RecordView<'_>) -> String {
    let preview = &record.payload[..record.payload.len().min(PREVIEW_LEN)];
    let ellipsis = if record.payload.len() > PREVIEW_LEN { "..." } else { "" };
    format!(
        "{:>10}  writer {:>3}  seq {:>8}  len {:>6}  {}{}",
        record.offset,
        record.writer_id,
        record.sequence,
        record.payload.len(),
        hex::encode(preview),
        ellipsis
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(writer: u32, seq: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&writer.to_le_bytes());
        buf.extend_from_slice(&seq.to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_ordered_capture_is_consistent() {
        let mut data = frame(0, 0, b"a");
        data.extend(frame(1, 0, b"bb"));
        data.extend(frame(0, 1, b"ccc"));
        data.extend(frame(1, 3, b""));

        let report = inspect_bytes(&data, RecordFraming::Full).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.records, 4);
        assert_eq!(report.payload_bytes, 6);
        assert_eq!(report.writers[&0].records, 2);
        assert_eq!(report.writers[&1].gaps, 2);
        assert_eq!(report.writers[&1].last_sequence, 3);
    }

    #[test]
    fn test_out_of_order_detected() {
        let mut data = frame(4, 5, b"x");
        data.extend(frame(4, 5, b"y"));
        let report = inspect_bytes(&data, RecordFraming::Full).unwrap();
        assert!(!report.writers[&4].monotonic);
        assert!(!report.is_consistent());
    }

    #[test]
    fn test_truncated_tail_reported() {
        let mut data = frame(0, 0, b"whole");
        data.extend(&frame(0, 1, b"partial")[..10]);
        let report = inspect_bytes(&data, RecordFraming::Full).unwrap();
        assert_eq!(report.records, 1);
        assert!(report.error.is_some());
        assert!(report.to_string().contains("decode stopped"));
    }

    #[test]
    fn test_unframed_rejected() {
        assert!(matches!(
            inspect_bytes(b"raw", RecordFraming::None),
            Err(InspectError::Frame(FrameError::Unframed))
        ));
    }

    #[test]
    fn test_describe_previews_payload() {
        let data = frame(2, 7, &[0xAB; 20]);
        let mut lines = Vec::new();
        inspect_with(&data, RecordFraming::Full, |r| lines.push(describe(r))).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(&"ab".repeat(PREVIEW_LEN)));
        assert!(lines[0].ends_with("..."));
    }

    #[test]
    fn test_report_serializes() {
        let report = inspect_bytes(&frame(1, 0, b"z"), RecordFraming::Full).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["records"], 1);
        assert_eq!(json["framing"], "full");
        assert_eq!(json["writers"]["1"]["monotonic"], true);
    }
}
