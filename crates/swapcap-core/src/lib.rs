//! Lock-free double buffer for multi-writer record capture.
//!
//! Many writer threads append variable-length records into a shared memory
//! region while a single drain thread persists it, without a lock on the
//! append path and without stalling writers on sink I/O.
//!
//! # Architecture
//!
//! ```text
//!  writer 0 ─┐                        ┌──────────────┐
//!  writer 1 ─┼─ reserve/commit ──▶    │ slot 0 Active│
//!  writer N ─┘                        ├──────────────┤     persist
//!                                     │ slot 1 Sealed│ ──▶ ReaderDrain ──▶ Sink
//!                                     └──────────────┘
//! ```
//!
//! - `slot`: fixed-capacity arena with an atomic cursor, in-flight count and
//!   lifecycle state
//! - `buffer`: the two slots plus reserve, commit and the swap protocol
//! - `writer`: framing, sequencing and backpressure policies per thread
//! - `reader`: the drain loop with retries, partial acknowledgements and
//!   timer flushes
//! - `sink`: the persistence trait and built-in sinks
//! - `stats`: cache-aligned counters and serializable snapshots
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use swapcap_core::{
//!     CaptureConfig, CaptureContext, DoubleBuffer, MemorySink, ReaderDrain, RecordFraming,
//!     WriterHandle,
//! };
//!
//! let config = CaptureConfig::new()
//!     .with_slot_capacity(1024)
//!     .with_framing(RecordFraming::None);
//! let buffer = Arc::new(DoubleBuffer::new(config.slot_capacity, config.swap_policy));
//! let ctx = Arc::new(CaptureContext::new(true));
//!
//! let mut writer = WriterHandle::new(0, Arc::clone(&buffer), Arc::clone(&ctx), &config);
//! writer.append(b"hello").unwrap();
//!
//! let sink = MemorySink::new();
//! let mut reader = ReaderDrain::new(buffer, Arc::clone(&ctx), sink.clone(), &config);
//! reader.shutdown_drain().unwrap();
//!
//! assert_eq!(sink.contents(), b"hello");
//! assert!(ctx.snapshot().is_balanced());
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::return_self_not_must_use)] // Builder patterns

pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod reader;
pub mod record;
pub mod signal;
pub mod sink;
pub mod slot;
pub mod stats;
pub mod writer;

// Re-exports for public API
pub use buffer::{DoubleBuffer, SlotDrain, SwapOutcome, WriteTicket};
pub use config::{
    BackpressurePolicy, CaptureConfig, DEFAULT_OUTPUT, DEFAULT_SLOT_CAPACITY,
    DEFAULT_WRITER_COUNT, RetryPolicy, SwapPolicy,
};
pub use context::CaptureContext;
pub use error::{
    AppendError, ConfigError, DrainError, DrainResult, ReserveError, SinkError, SinkResult,
    SwapError,
};
pub use reader::ReaderDrain;
pub use record::{FrameError, RecordFraming, RecordReader, RecordView};
pub use sink::{Ack, FaultySink, FileSink, MemorySink, NullSink, Sink};
pub use slot::{BufferSlot, SlotState};
pub use stats::{StatsCollector, StatsSnapshot};
pub use writer::{AppendOutcome, WriterHandle};
