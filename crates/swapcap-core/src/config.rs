//! Capture configuration
//!
//! Configuration is consumed once at startup and is immutable afterwards.
//! Every value has a default taken from the reference deployment: 100 MiB
//! slots, four writers, output under `/tmp`, statistics on, debug off.

use crate::error::ConfigError;
use crate::record::RecordFraming;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Default slot capacity (100 MiB)
pub const DEFAULT_SLOT_CAPACITY: usize = 100 * 1024 * 1024;

/// Default number of writer threads
pub const DEFAULT_WRITER_COUNT: usize = 4;

/// Default output destination; `{timestamp}` expands at startup
pub const DEFAULT_OUTPUT: &str = "/tmp/{timestamp}.cap";

/// What a reservation does when the active slot has no room left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPolicy {
    /// Seal the full slot and retry against the standby slot
    #[default]
    OnFill,
    /// Report backpressure; only explicit or timer flushes swap
    Manual,
}

/// How a writer reacts to backpressure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Return the error to the caller
    Fail,
    /// Discard the record and count it
    Drop,
    /// Yield and retry
    Spin,
    /// Park until the drain frees a slot
    #[default]
    Block,
}

/// Bounded exponential backoff for sink retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before a persist failure becomes fatal
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on the delay between retries
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` failed attempts (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Retry policy with no delay, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }
}

/// Full capture configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capacity of each of the two slots, in bytes
    pub slot_capacity: usize,
    /// Number of writer threads
    pub writer_count: usize,
    /// Output destination identifier
    pub output: PathBuf,
    /// Maintain statistics counters
    pub stats_enabled: bool,
    /// Verbose diagnostics
    pub debug: bool,
    /// Swap trigger for reservations that do not fit
    pub swap_policy: SwapPolicy,
    /// Writer reaction to backpressure
    pub backpressure: BackpressurePolicy,
    /// Retries a writer makes before surfacing backpressure
    pub max_append_retries: u32,
    /// How long a blocked writer waits per retry
    pub block_timeout: Duration,
    /// Record header layout
    pub framing: RecordFraming,
    /// Sink retry policy
    pub retry: RetryPolicy,
    /// Force a swap when unflushed bytes are older than this
    pub flush_interval: Option<Duration>,
    /// Reader wake-up interval when no slot is sealed
    pub poll_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            writer_count: DEFAULT_WRITER_COUNT,
            output: PathBuf::from(DEFAULT_OUTPUT),
            stats_enabled: true,
            debug: false,
            swap_policy: SwapPolicy::OnFill,
            backpressure: BackpressurePolicy::Block,
            max_append_retries: 1000,
            block_timeout: Duration::from_millis(10),
            framing: RecordFraming::Full,
            retry: RetryPolicy::default(),
            flush_interval: Some(Duration::from_secs(1)),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl CaptureConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set slot capacity
    pub fn with_slot_capacity(mut self, bytes: usize) -> Self {
        self.slot_capacity = bytes;
        self
    }

    /// Set writer thread count
    pub fn with_writer_count(mut self, count: usize) -> Self {
        self.writer_count = count;
        self
    }

    /// Set output destination
    pub fn with_output<P: Into<PathBuf>>(mut self, output: P) -> Self {
        self.output = output.into();
        self
    }

    /// Enable or disable statistics
    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.stats_enabled = enabled;
        self
    }

    /// Enable or disable debug diagnostics
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set swap policy
    pub fn with_swap_policy(mut self, policy: SwapPolicy) -> Self {
        self.swap_policy = policy;
        self
    }

    /// Set backpressure policy
    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    /// Set writer retry bound
    pub fn with_max_append_retries(mut self, retries: u32) -> Self {
        self.max_append_retries = retries;
        self
    }

    /// Set record framing
    pub fn with_framing(mut self, framing: RecordFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Set sink retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set or clear the timer flush interval
    pub fn with_flush_interval(mut self, interval: Option<Duration>) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set reader poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_capacity == 0 {
            return Err(ConfigError::invalid(
                "slot_capacity",
                "must be greater than 0",
            ));
        }

        if self.slot_capacity <= self.framing.header_len() {
            return Err(ConfigError::invalid(
                "slot_capacity",
                format!(
                    "must exceed the {}-byte record header",
                    self.framing.header_len()
                ),
            ));
        }

        let max_capacity = (u32::MAX as usize).saturating_add(self.framing.header_len());
        if self.framing != RecordFraming::None && self.slot_capacity > max_capacity {
            return Err(ConfigError::invalid(
                "slot_capacity",
                format!("must not exceed {max_capacity} bytes with {:?} framing", self.framing),
            ));
        }

        if self.writer_count == 0 {
            return Err(ConfigError::invalid(
                "writer_count",
                "must be greater than 0",
            ));
        }

        if self.writer_count > u32::MAX as usize {
            return Err(ConfigError::invalid("writer_count", "exceeds u32 range"));
        }

        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::invalid("output", "must not be empty"));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                "must be greater than 0",
            ));
        }

        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(ConfigError::invalid(
                "retry.initial_backoff",
                "must not exceed retry.max_backoff",
            ));
        }

        if let Some(interval) = self.flush_interval
            && interval.is_zero()
        {
            return Err(ConfigError::invalid(
                "flush_interval",
                "must be greater than 0",
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "poll_interval",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}
