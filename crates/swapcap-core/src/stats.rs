//! Capture statistics
//!
//! Writers bump the write-side counters at commit, the drain bumps the
//! read-side counters once a slot has been persisted. Counters live on
//! separate cache lines so writer threads do not contend with the drain.
//! Snapshots are eventually consistent.

#![allow(clippy::cast_precision_loss)] // Rates accept precision loss

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{Duration, Instant},
};

#[repr(align(64))]
#[derive(Debug)]
struct CacheAlignedAtomicU64(AtomicU64);

impl CacheAlignedAtomicU64 {
    const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    #[inline]
    fn load(&self, ordering: Ordering) -> u64 {
        self.0.load(ordering)
    }

    #[inline]
    fn fetch_add(&self, value: u64, ordering: Ordering) -> u64 {
        self.0.fetch_add(value, ordering)
    }

    #[inline]
    fn fetch_max(&self, value: u64, ordering: Ordering) -> u64 {
        self.0.fetch_max(value, ordering)
    }
}

/// Point-in-time capture statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Records committed by writers
    pub blocks_written: u64,
    /// Bytes committed by writers, headers included
    pub bytes_written: u64,
    /// Records persisted by the drain
    pub blocks_read: u64,
    /// Bytes persisted by the drain
    pub bytes_read: u64,
    /// Slot swaps observed
    pub swaps: u64,
    /// Reservations refused for lack of space
    pub backpressure_events: u64,
    /// Records discarded under the drop policy
    pub records_dropped: u64,
    /// Sink persist attempts that were retried
    pub persist_retries: u64,
    /// Slots persisted and recycled
    pub slots_drained: u64,
    /// Time since the collector was created
    #[serde(with = "duration_millis")]
    pub uptime: Duration,
}

impl StatsSnapshot {
    /// Bytes committed but not yet persisted
    pub fn backlog_bytes(&self) -> u64 {
        self.bytes_written.saturating_sub(self.bytes_read)
    }

    /// Whether every committed byte and record has been persisted
    pub fn is_balanced(&self) -> bool {
        self.bytes_written == self.bytes_read && self.blocks_written == self.blocks_read
    }

    /// Average write throughput in bytes per second
    pub fn write_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.bytes_written as f64 / secs
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "written {} blocks / {} bytes, read {} blocks / {} bytes, {} swaps, {} backpressure, {} dropped",
            self.blocks_written,
            self.bytes_written,
            self.blocks_read,
            self.bytes_read,
            self.swaps,
            self.backpressure_events,
            self.records_dropped,
        )
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Atomic counters shared by every writer and the drain
#[derive(Debug)]
pub struct StatsCollector {
    enabled: AtomicBool,

    // Writer side
    blocks_written: CacheAlignedAtomicU64,
    bytes_written: CacheAlignedAtomicU64,
    backpressure_events: CacheAlignedAtomicU64,
    records_dropped: CacheAlignedAtomicU64,

    // Drain side
    blocks_read: CacheAlignedAtomicU64,
    bytes_read: CacheAlignedAtomicU64,
    persist_retries: CacheAlignedAtomicU64,
    slots_drained: CacheAlignedAtomicU64,
    swaps: CacheAlignedAtomicU64,

    created_at: Instant,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StatsCollector {
    /// Create a collector; a disabled collector ignores every increment
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            blocks_written: CacheAlignedAtomicU64::new(0),
            bytes_written: CacheAlignedAtomicU64::new(0),
            backpressure_events: CacheAlignedAtomicU64::new(0),
            records_dropped: CacheAlignedAtomicU64::new(0),
            blocks_read: CacheAlignedAtomicU64::new(0),
            bytes_read: CacheAlignedAtomicU64::new(0),
            persist_retries: CacheAlignedAtomicU64::new(0),
            slots_drained: CacheAlignedAtomicU64::new(0),
            swaps: CacheAlignedAtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    /// Whether increments are recorded
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record a committed record of `bytes` bytes
    #[inline]
    pub fn record_write(&self, bytes: usize) {
        if self.is_enabled() {
            self.blocks_written.fetch_add(1, Ordering::Relaxed);
            self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    /// Record a reservation refused with backpressure
    #[inline]
    pub fn record_backpressure(&self) {
        if self.is_enabled() {
            self.backpressure_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a record discarded under the drop policy
    #[inline]
    pub fn record_dropped(&self) {
        if self.is_enabled() {
            self.records_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a persisted slot holding `records` records and `bytes` bytes
    pub fn record_drain(&self, records: usize, bytes: usize) {
        if self.is_enabled() {
            self.blocks_read.fetch_add(records as u64, Ordering::Relaxed);
            self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
            self.slots_drained.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a retried persist attempt
    pub fn record_persist_retry(&self) {
        if self.is_enabled() {
            self.persist_retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Track the buffer generation; swaps are counted by the buffer itself
    pub fn observe_generation(&self, generation: u64) {
        if self.is_enabled() {
            self.swaps.fetch_max(generation, Ordering::Relaxed);
        }
    }

    /// Current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_written: self.blocks_written.load(Ordering::Acquire),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            swaps: self.swaps.load(Ordering::Relaxed),
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            persist_retries: self.persist_retries.load(Ordering::Relaxed),
            slots_drained: self.slots_drained.load(Ordering::Relaxed),
            uptime: self.created_at.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_write_and_drain_balance() {
        let stats = StatsCollector::new(true);
        stats.record_write(100);
        stats.record_write(50);
        assert!(!stats.snapshot().is_balanced());
        assert_eq!(stats.snapshot().backlog_bytes(), 150);

        stats.record_drain(2, 150);
        let snapshot = stats.snapshot();
        assert!(snapshot.is_balanced());
        assert_eq!(snapshot.slots_drained, 1);
    }

    #[test]
    fn test_disabled_collector_ignores_increments() {
        let stats = StatsCollector::new(false);
        stats.record_write(10);
        stats.record_backpressure();
        stats.record_drain(1, 10);
        stats.observe_generation(3);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.blocks_written, 0);
        assert_eq!(snapshot.backpressure_events, 0);
        assert_eq!(snapshot.swaps, 0);
    }

    #[test]
    fn test_generation_is_monotonic() {
        let stats = StatsCollector::default();
        stats.observe_generation(5);
        stats.observe_generation(2);
        assert_eq!(stats.snapshot().swaps, 5);
    }

    #[test]
    fn test_concurrent_writes_are_counted() {
        let stats = Arc::new(StatsCollector::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_write(3);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.blocks_written, 4000);
        assert_eq!(snapshot.bytes_written, 12000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = StatsCollector::default();
        stats.record_write(7);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["blocks_written"], 1);
        assert_eq!(json["bytes_written"], 7);
        assert!(json["uptime"].is_u64());
    }
}
