//! State shared by every capture thread

use crate::stats::{StatsCollector, StatsSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Shutdown flag and statistics, created once and shared through `Arc`
#[derive(Debug, Default)]
pub struct CaptureContext {
    shutdown: AtomicBool,
    stats: StatsCollector,
}

impl CaptureContext {
    /// Create a context; `stats_enabled = false` disables every counter
    pub fn new(stats_enabled: bool) -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            stats: StatsCollector::new(stats_enabled),
        }
    }

    /// Ask every loop to stop at its next iteration
    pub fn request_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            info!("shutdown requested");
        }
    }

    /// Whether shutdown has been requested
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shared counters
    #[inline]
    pub fn stats(&self) -> &StatsCollector {
        &self.stats
    }

    /// Current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
