//! Command-line configuration.
//!
//! Arguments come from the command line, fall back to `SWAPCAP_*`
//! environment variables, then to defaults, and are converted once into an
//! immutable [`CaptureConfig`].
//!
//! # Example
//!
//! ```no_run
//! use swapcap::{CliArgs, Command};
//!
//! let args = CliArgs::from_args();
//! if let Command::Run(run) = &args.command {
//!     let config = run.to_capture_config(args.debug).expect("invalid configuration");
//!     println!("capturing into {}", config.output.display());
//! }
//! ```

use crate::source::SourceKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use swapcap_core::{
    BackpressurePolicy, CaptureConfig, ConfigError, DEFAULT_OUTPUT, RecordFraming, RetryPolicy,
    SwapPolicy,
};

/// Placeholder in the output path replaced by the start time
pub const TIMESTAMP_PLACEHOLDER: &str = "{timestamp}";

/// Top-level arguments
#[derive(Debug, Clone, Parser)]
#[command(
    name = "swapcap",
    about = "Capture concurrent record streams to disk through a lock-free double buffer",
    version
)]
pub struct CliArgs {
    /// Verbose diagnostics (debug log level)
    #[arg(long, global = true, env = "SWAPCAP_DEBUG")]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SWAPCAP_LOG_JSON")]
    pub log_json: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

impl CliArgs {
    /// Parse arguments from the process command line
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Default log filter when `RUST_LOG` is unset
    #[must_use]
    pub const fn default_log_level(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

/// Subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Capture records until the sources run dry, Ctrl-C, or the duration ends
    Run(RunArgs),
    /// Decode a capture file and check per-writer ordering
    Inspect(InspectArgs),
}

/// Swap trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SwapMode {
    /// Swap as soon as a reservation does not fit
    OnFill,
    /// Only the timer flush swaps
    Manual,
}

impl From<SwapMode> for SwapPolicy {
    fn from(mode: SwapMode) -> Self {
        match mode {
            SwapMode::OnFill => Self::OnFill,
            SwapMode::Manual => Self::Manual,
        }
    }
}

/// Writer reaction to a full buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackpressureMode {
    /// Report the failure and move on to the next record
    Fail,
    /// Discard the record
    Drop,
    /// Busy-retry
    Spin,
    /// Wait for the drain to free a slot
    Block,
}

impl From<BackpressureMode> for BackpressurePolicy {
    fn from(mode: BackpressureMode) -> Self {
        match mode {
            BackpressureMode::Fail => Self::Fail,
            BackpressureMode::Drop => Self::Drop,
            BackpressureMode::Spin => Self::Spin,
            BackpressureMode::Block => Self::Block,
        }
    }
}

/// Record header layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FramingMode {
    /// Raw payloads
    None,
    /// Length prefix
    Length,
    /// Length, writer id and sequence number
    Full,
}

impl From<FramingMode> for RecordFraming {
    fn from(mode: FramingMode) -> Self {
        match mode {
            FramingMode::None => Self::None,
            FramingMode::Length => Self::Length,
            FramingMode::Full => Self::Full,
        }
    }
}

/// Arguments of `swapcap run`
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Capacity of each of the two slots in bytes
    #[arg(long, env = "SWAPCAP_SLOT_CAPACITY", default_value_t = swapcap_core::DEFAULT_SLOT_CAPACITY)]
    pub slot_capacity: usize,

    /// Number of writer threads
    #[arg(long, env = "SWAPCAP_WRITERS", default_value_t = swapcap_core::DEFAULT_WRITER_COUNT)]
    pub writers: usize,

    /// Output file; `{timestamp}` expands to seconds since the Unix epoch
    #[arg(short, long, env = "SWAPCAP_OUTPUT", default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Disable statistics counters
    #[arg(long, env = "SWAPCAP_NO_STATS")]
    pub no_stats: bool,

    /// Swap trigger
    #[arg(long, env = "SWAPCAP_SWAP", value_enum, default_value_t = SwapMode::OnFill)]
    pub swap: SwapMode,

    /// Writer reaction to a full buffer
    #[arg(long, env = "SWAPCAP_BACKPRESSURE", value_enum, default_value_t = BackpressureMode::Block)]
    pub backpressure: BackpressureMode,

    /// Record header layout
    #[arg(long, env = "SWAPCAP_FRAMING", value_enum, default_value_t = FramingMode::Full)]
    pub framing: FramingMode,

    /// Flush the active slot when its data is older than this (ms, 0 disables)
    #[arg(long, env = "SWAPCAP_FLUSH_INTERVAL_MS", default_value_t = 1000)]
    pub flush_interval_ms: u64,

    /// Drain wake-up interval when nothing is sealed (ms)
    #[arg(long, env = "SWAPCAP_POLL_INTERVAL_MS", default_value_t = 50)]
    pub poll_interval_ms: u64,

    /// Sink attempts before a persist failure is fatal
    #[arg(long, env = "SWAPCAP_RETRY_ATTEMPTS", default_value_t = 5)]
    pub retry_attempts: u32,

    /// Initial sink retry backoff (ms)
    #[arg(long, env = "SWAPCAP_RETRY_BACKOFF_MS", default_value_t = 10)]
    pub retry_backoff_ms: u64,

    /// Record source
    #[arg(long, env = "SWAPCAP_SOURCE", value_enum, default_value_t = SourceKind::Synthetic)]
    pub source: SourceKind,

    /// Smallest synthetic payload in bytes
    #[arg(long, env = "SWAPCAP_MIN_SIZE", default_value_t = 64)]
    pub min_size: usize,

    /// Largest synthetic payload in bytes
    #[arg(long, env = "SWAPCAP_MAX_SIZE", default_value_t = 512)]
    pub max_size: usize,

    /// Synthetic records per writer (unbounded when unset)
    #[arg(long, env = "SWAPCAP_RECORDS")]
    pub records: Option<u64>,

    /// Stop after this many seconds
    #[arg(long, env = "SWAPCAP_DURATION")]
    pub duration: Option<u64>,

    /// Log statistics every N seconds while capturing
    #[arg(long, env = "SWAPCAP_STATS_INTERVAL")]
    pub stats_interval: Option<u64>,

    /// Print final statistics as JSON on stdout
    #[arg(long, env = "SWAPCAP_STATS_JSON")]
    pub stats_json: bool,
}

impl RunArgs {
    /// Build the capture configuration; `{timestamp}` is expanded here.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the resulting configuration is invalid or
    /// the synthetic size range is empty.
    pub fn to_capture_config(&self, debug: bool) -> Result<CaptureConfig, ConfigError> {
        if self.min_size > self.max_size {
            return Err(ConfigError::InvalidValue {
                field: "min_size",
                reason: format!("{} exceeds max_size {}", self.min_size, self.max_size),
            });
        }

        let flush_interval =
            (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms));
        let retry = RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: RetryPolicy::default()
                .max_backoff
                .max(Duration::from_millis(self.retry_backoff_ms)),
        };

        let config = CaptureConfig::new()
            .with_slot_capacity(self.slot_capacity)
            .with_writer_count(self.writers)
            .with_output(expand_output(&self.output, unix_now()))
            .with_stats(!self.no_stats)
            .with_debug(debug)
            .with_swap_policy(self.swap.into())
            .with_backpressure(self.backpressure.into())
            .with_framing(self.framing.into())
            .with_retry(retry)
            .with_flush_interval(flush_interval)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms));

        config.validate()?;
        Ok(config)
    }

    /// Capture duration, if bounded
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration.map(Duration::from_secs)
    }

    /// Statistics log interval, if enabled
    #[must_use]
    pub fn stats_interval(&self) -> Option<Duration> {
        self.stats_interval
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}

/// Arguments of `swapcap inspect`
#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// Capture file to decode
    pub file: PathBuf,

    /// Header layout the file was written with
    #[arg(long, value_enum, default_value_t = FramingMode::Full)]
    pub framing: FramingMode,

    /// Print one line per record with a hex payload preview
    #[arg(long)]
    pub dump: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Seconds since the Unix epoch
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Replace `{timestamp}` in `template` with `timestamp`
#[must_use]
pub fn expand_output(template: &Path, timestamp: u64) -> PathBuf {
    let text = template.to_string_lossy();
    if text.contains(TIMESTAMP_PLACEHOLDER) {
        PathBuf::from(text.replace(TIMESTAMP_PLACEHOLDER, &timestamp.to_string()))
    } else {
        template.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("swapcap").chain(args.iter().copied())).unwrap()
    }

    fn run_args(args: &[&str]) -> RunArgs {
        let mut all = vec!["run"];
        all.extend_from_slice(args);
        match parse(&all).command {
            Command::Run(run) => run,
            Command::Inspect(_) => unreachable!("parsed run"),
        }
    }

    #[test]
    fn test_defaults_match_core_defaults() {
        let run = run_args(&[]);
        let config = run.to_capture_config(false).unwrap();
        assert_eq!(config.slot_capacity, swapcap_core::DEFAULT_SLOT_CAPACITY);
        assert_eq!(config.writer_count, 4);
        assert!(config.stats_enabled);
        assert!(!config.debug);
        assert_eq!(config.framing, RecordFraming::Full);
        assert_eq!(config.flush_interval, Some(Duration::from_secs(1)));
        assert!(config.output.starts_with("/tmp"));
        assert!(!config.output.to_string_lossy().contains(TIMESTAMP_PLACEHOLDER));
    }

    #[test]
    fn test_flags_override_defaults() {
        let run = run_args(&[
            "--slot-capacity",
            "4096",
            "--writers",
            "2",
            "--no-stats",
            "--swap",
            "manual",
            "--backpressure",
            "drop",
            "--framing",
            "length",
            "--flush-interval-ms",
            "0",
            "-o",
            "out.cap",
        ]);
        let config = run.to_capture_config(true).unwrap();
        assert_eq!(config.slot_capacity, 4096);
        assert_eq!(config.writer_count, 2);
        assert!(!config.stats_enabled);
        assert!(config.debug);
        assert_eq!(config.swap_policy, SwapPolicy::Manual);
        assert_eq!(config.backpressure, BackpressurePolicy::Drop);
        assert_eq!(config.framing, RecordFraming::Length);
        assert_eq!(config.flush_interval, None);
        assert_eq!(config.output, PathBuf::from("out.cap"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let run = run_args(&["--writers", "0"]);
        assert!(run.to_capture_config(false).is_err());

        let run = run_args(&["--min-size", "10", "--max-size", "5"]);
        assert!(matches!(
            run.to_capture_config(false),
            Err(ConfigError::InvalidValue {
                field: "min_size",
                ..
            })
        ));
    }

    #[test]
    fn test_expand_output() {
        assert_eq!(
            expand_output(Path::new("/tmp/{timestamp}.cap"), 1700000000),
            PathBuf::from("/tmp/1700000000.cap")
        );
        assert_eq!(
            expand_output(Path::new("fixed.cap"), 1),
            PathBuf::from("fixed.cap")
        );
    }

    #[test]
    fn test_global_flags_and_inspect() {
        let args = parse(&["--debug", "inspect", "capture.cap", "--framing", "none", "--dump"]);
        assert!(args.debug);
        assert_eq!(args.default_log_level(), "debug");
        match args.command {
            Command::Inspect(inspect) => {
                assert_eq!(inspect.file, PathBuf::from("capture.cap"));
                assert_eq!(inspect.framing, FramingMode::None);
                assert!(inspect.dump);
            }
            Command::Run(_) => panic!("expected inspect"),
        }
    }

    #[test]
    fn test_durations() {
        let run = run_args(&["--duration", "3", "--stats-interval", "0"]);
        assert_eq!(run.duration(), Some(Duration::from_secs(3)));
        assert_eq!(run.stats_interval(), None);
    }
}
