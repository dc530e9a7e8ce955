//! Multi-writer record capture.
//!
//! Wraps the `swapcap-core` double buffer in a runnable capture: one thread
//! per writer pulling from a [`RecordSource`], a drain thread persisting
//! sealed slots to a file, and a final forced drain on shutdown.
//!
//! # Architecture
//!
//! - `capture`: thread orchestration and shutdown ordering
//! - `config`: command-line arguments and environment variables
//! - `source`: synthetic and standard-input record sources
//! - `inspect`: capture file decoding and ordering checks
//! - `error`: capture and inspection errors
//!
//! # Example
//!
//! ```no_run
//! use swapcap::{Capture, RunOptions, SyntheticSource, run_until_signal};
//! use swapcap_core::{CaptureConfig, FileSink};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = CaptureConfig::new().with_output("/tmp/demo.cap");
//!     let sink = FileSink::create(&config.output)?;
//!     let capture = Capture::new(config)?;
//!
//!     let report = run_until_signal(
//!         capture,
//!         sink,
//!         |id| SyntheticSource::new(id, 64, 256).with_limit(10_000),
//!         RunOptions::default(),
//!     )
//!     .await?;
//!     println!("{}", report.stats);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod capture;
pub mod config;
pub mod error;
pub mod inspect;
pub mod source;

pub use capture::{Capture, CaptureReport, RunOptions, WriterReport, run_until_signal};
pub use config::{
    BackpressureMode, CliArgs, Command, FramingMode, InspectArgs, RunArgs, SwapMode,
    expand_output,
};
pub use error::{CaptureError, CaptureResult, InspectError};
pub use inspect::{InspectReport, WriterSummary, inspect_bytes, inspect_file};
pub use source::{RecordSource, SourceKind, StdinSource, SyntheticSource};
