//! Persistence sinks
//!
//! The drain hands each sealed slot's committed bytes to a [`Sink`]. A sink
//! may accept only a prefix of what it is offered; the drain resumes from the
//! acknowledged offset and never re-delivers acknowledged bytes.

use crate::error::{SinkError, SinkResult};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Acknowledgement of a persist call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Length of the accepted prefix
    pub bytes: usize,
}

impl Ack {
    /// Acknowledge `bytes` bytes
    pub const fn new(bytes: usize) -> Self {
        Self { bytes }
    }
}

/// Destination for drained slot contents
pub trait Sink: Send {
    /// Persist a prefix of `bytes` and report how much was accepted
    fn persist(&mut self, bytes: &[u8]) -> SinkResult<Ack>;

    /// Make every accepted byte durable
    fn sync(&mut self) -> SinkResult<()> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn persist(&mut self, bytes: &[u8]) -> SinkResult<Ack> {
        (**self).persist(bytes)
    }

    fn sync(&mut self) -> SinkResult<()> {
        (**self).sync()
    }
}

/// Buffered append-only file
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl FileSink {
    /// Create or truncate the file at `path`
    pub fn create<P: AsRef<Path>>(path: P) -> SinkResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        debug!(path = %path.display(), "opened capture file");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes accepted so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Sink for FileSink {
    fn persist(&mut self, bytes: &[u8]) -> SinkResult<Ack> {
        let ack = write_prefix(&mut self.writer, bytes)?;
        self.written += ack.bytes as u64;
        Ok(ack)
    }

    fn sync(&mut self) -> SinkResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Single write acknowledging exactly what `writer` accepted.
///
/// A failed call has written nothing, so the drain can resume from the last
/// acknowledged offset without duplicating bytes.
fn write_prefix<W: Write>(writer: &mut W, bytes: &[u8]) -> SinkResult<Ack> {
    loop {
        match writer.write(bytes) {
            Ok(n) => return Ok(Ack::new(n)),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
}

/// Keeps every delivery in memory
///
/// Clones share the same storage, so a test can keep one handle while the
/// drain owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    deliveries: Arc<Mutex<Vec<Bytes>>>,
    syncs: Arc<Mutex<usize>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Each accepted delivery, in order
    pub fn deliveries(&self) -> Vec<Bytes> {
        self.deliveries.lock().clone()
    }

    /// All accepted bytes concatenated
    pub fn contents(&self) -> Vec<u8> {
        self.deliveries
            .lock()
            .iter()
            .flat_map(|chunk| chunk.iter().copied())
            .collect()
    }

    /// Total bytes accepted
    pub fn len(&self) -> usize {
        self.deliveries.lock().iter().map(Bytes::len).sum()
    }

    /// Whether nothing has been accepted
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `sync` calls
    pub fn sync_count(&self) -> usize {
        *self.syncs.lock()
    }
}

impl Sink for MemorySink {
    fn persist(&mut self, bytes: &[u8]) -> SinkResult<Ack> {
        self.deliveries.lock().push(Bytes::copy_from_slice(bytes));
        Ok(Ack::new(bytes.len()))
    }

    fn sync(&mut self) -> SinkResult<()> {
        *self.syncs.lock() += 1;
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn persist(&mut self, bytes: &[u8]) -> SinkResult<Ack> {
        Ok(Ack::new(bytes.len()))
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    fail_next: u32,
    stalled: bool,
    max_chunk: Option<usize>,
    attempts: u64,
}

/// Memory sink that fails or short-acknowledges on demand
///
/// Clones share the fault plan, so a test can inject faults while the drain
/// owns the sink.
#[derive(Debug, Clone, Default)]
pub struct FaultySink {
    inner: MemorySink,
    plan: Arc<Mutex<FaultPlan>>,
}

impl FaultySink {
    /// Create a sink that behaves like [`MemorySink`] until told otherwise
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` persist calls with an I/O error
    pub fn fail_next(&self, count: u32) {
        self.plan.lock().fail_next = count;
    }

    /// Fail every persist call until [`resume`](Self::resume)
    pub fn stall(&self) {
        self.plan.lock().stalled = true;
    }

    /// Stop failing
    pub fn resume(&self) {
        let mut plan = self.plan.lock();
        plan.stalled = false;
        plan.fail_next = 0;
    }

    /// Accept at most `bytes` per persist call
    pub fn limit_chunk(&self, bytes: usize) {
        self.plan.lock().max_chunk = Some(bytes);
    }

    /// Persist calls made, failed ones included
    pub fn attempts(&self) -> u64 {
        self.plan.lock().attempts
    }

    /// The underlying memory sink
    pub fn delivered(&self) -> &MemorySink {
        &self.inner
    }
}

impl Sink for FaultySink {
    fn persist(&mut self, bytes: &[u8]) -> SinkResult<Ack> {
        let limit = {
            let mut plan = self.plan.lock();
            plan.attempts += 1;
            if plan.stalled {
                return Err(SinkError::Io(std::io::Error::other("sink stalled")));
            }
            if plan.fail_next > 0 {
                plan.fail_next -= 1;
                return Err(SinkError::Io(std::io::Error::other("injected failure")));
            }
            plan.max_chunk
        };
        let accepted = limit.map_or(bytes.len(), |max| max.min(bytes.len()));
        self.inner.persist(&bytes[..accepted])
    }

    fn sync(&mut self) -> SinkResult<()> {
        self.inner.sync()
    }
}
