//! End-to-end capture tests.
//!
//! These tests run real captures into files on disk and decode them back
//! with the inspector.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use pretty_assertions::assert_eq;
use std::io::Cursor;
use std::time::Duration;
use swapcap::{
    Capture, RecordSource, RunOptions, StdinSource, SyntheticSource, inspect_file,
    run_until_signal,
};
use swapcap_core::{BackpressurePolicy, CaptureConfig, FileSink, RecordFraming, SwapPolicy};
use tempfile::TempDir;

fn config(dir: &TempDir, writers: usize) -> CaptureConfig {
    CaptureConfig::new()
        .with_slot_capacity(4096)
        .with_writer_count(writers)
        .with_output(dir.path().join("capture.cap"))
        .with_framing(RecordFraming::Full)
        .with_backpressure(BackpressurePolicy::Block)
        .with_flush_interval(Some(Duration::from_millis(10)))
        .with_poll_interval(Duration::from_millis(2))
}

#[test]
fn capture_to_file_decodes_in_order() {
    let dir = TempDir::new().expect("Failed to create temporary directory");
    let config = config(&dir, 4);
    let output = config.output.clone();
    let sink = FileSink::create(&output).unwrap();

    let capture = Capture::new(config).unwrap();
    let report = capture
        .run(sink, |id| SyntheticSource::new(id, 1, 300).with_limit(1000))
        .unwrap();

    assert_eq!(report.committed(), 4000);
    assert!(report.stats.is_balanced());
    assert!(report.generation > 0);

    let inspected = inspect_file(&output, RecordFraming::Full).unwrap();
    assert!(inspected.is_consistent(), "{inspected}");
    assert_eq!(inspected.records, 4000);
    assert_eq!(inspected.total_bytes, report.stats.bytes_read);
    assert_eq!(
        std::fs::metadata(&output).unwrap().len(),
        report.stats.bytes_written
    );

    for id in 0..4 {
        let writer = inspected.writers[&id];
        assert_eq!(writer.records, 1000);
        assert_eq!(writer.first_sequence, 0);
        assert_eq!(writer.last_sequence, 999);
        assert_eq!(writer.gaps, 0);
    }
}

#[test]
fn synthetic_payloads_survive_capture() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 2).with_slot_capacity(512);
    let output = config.output.clone();

    let capture = Capture::new(config).unwrap();
    capture
        .run(FileSink::create(&output).unwrap(), |id| {
            SyntheticSource::new(id, 8, 64).with_limit(250)
        })
        .unwrap();

    let data = std::fs::read(&output).unwrap();
    let mut expected = [
        SyntheticSource::new(0, 8, 64).with_limit(250),
        SyntheticSource::new(1, 8, 64).with_limit(250),
    ];
    for record in swapcap_core::RecordReader::new(&data, RecordFraming::Full) {
        let record = record.unwrap();
        let want = expected[record.writer_id as usize].next_record().unwrap();
        assert_eq!(record.payload, want.as_slice());
    }
    assert!(expected.iter_mut().all(|s| s.next_record().is_none()));
}

#[test]
fn line_input_is_captured_once() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 3);
    let output = config.output.clone();

    let input: String = (0..500).map(|i| format!("line {i}\n")).collect();
    let lines = StdinSource::from_reader(Cursor::new(input.into_bytes()));

    let capture = Capture::new(config).unwrap();
    let report = capture
        .run(FileSink::create(&output).unwrap(), move |_| lines.clone())
        .unwrap();
    assert_eq!(report.committed(), 500);

    let data = std::fs::read(&output).unwrap();
    let mut seen: Vec<usize> = swapcap_core::RecordReader::new(&data, RecordFraming::Full)
        .map(|r| {
            let text = std::str::from_utf8(r.unwrap().payload).unwrap().to_owned();
            text.trim_start_matches("line ").parse().unwrap()
        })
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..500).collect::<Vec<_>>());
}

#[test]
fn manual_swap_relies_on_timer_flush() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 1)
        .with_slot_capacity(1 << 16)
        .with_swap_policy(SwapPolicy::Manual);
    let output = config.output.clone();

    let capture = Capture::new(config).unwrap();
    let report = capture
        .run(FileSink::create(&output).unwrap(), |id| {
            SyntheticSource::new(id, 16, 16).with_limit(100)
        })
        .unwrap();

    assert_eq!(report.committed(), 100);
    let inspected = inspect_file(&output, RecordFraming::Full).unwrap();
    assert_eq!(inspected.records, 100);
    assert_eq!(inspected.payload_bytes, 1600);
}

#[tokio::test]
async fn duration_bounded_capture_is_consistent() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 3);
    let output = config.output.clone();
    let sink = FileSink::create(&output).unwrap();

    let capture = Capture::new(config).unwrap();
    let options = RunOptions {
        duration: Some(Duration::from_millis(100)),
        stats_interval: Some(Duration::from_millis(20)),
    };
    let report = run_until_signal(
        capture,
        sink,
        |id| SyntheticSource::new(id, 32, 128),
        options,
    )
    .await
    .unwrap();

    assert!(report.committed() > 0);
    let inspected = inspect_file(&output, RecordFraming::Full).unwrap();
    assert!(inspected.is_consistent(), "{inspected}");
    assert_eq!(inspected.records, report.committed());
}
