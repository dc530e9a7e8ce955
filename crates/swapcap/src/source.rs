//! Record sources feeding the writer threads.

use clap::ValueEnum;
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use tracing::warn;

/// Producer of record payloads for one writer
pub trait RecordSource: Send {
    /// Next payload, or `None` once the source is exhausted
    fn next_record(&mut self) -> Option<Vec<u8>>;
}

impl<T: RecordSource + ?Sized> RecordSource for Box<T> {
    fn next_record(&mut self) -> Option<Vec<u8>> {
        (**self).next_record()
    }
}

/// Built-in source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Deterministic generated payloads
    Synthetic,
    /// Newline-delimited records read from standard input
    Stdin,
}

/// Deterministic payload generator
///
/// Payload sizes cycle through `[min_size, max_size]` driven by a small
/// xorshift state seeded from the writer id, so a run is reproducible.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    state: u64,
    writer_id: u32,
    min_size: usize,
    max_size: usize,
    limit: Option<u64>,
    produced: u64,
}

impl SyntheticSource {
    /// Create a generator for `writer_id` with payloads of `min_size..=max_size`
    pub fn new(writer_id: u32, min_size: usize, max_size: usize) -> Self {
        let seed = (u64::from(writer_id) + 1).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        Self {
            state: 0x9E37_79B9_7F4A_7C15 ^ seed,
            writer_id,
            min_size: min_size.min(max_size),
            max_size,
            limit: None,
            produced: 0,
        }
    }

    /// Stop after `records` payloads
    #[must_use]
    pub fn with_limit(mut self, records: u64) -> Self {
        self.limit = Some(records);
        self
    }

    /// Payloads produced so far
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }
}

impl RecordSource for SyntheticSource {
    fn next_record(&mut self) -> Option<Vec<u8>> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return None;
        }

        let span = (self.max_size - self.min_size) as u64 + 1;
        let len = self.min_size + (self.next_u64() % span) as usize;
        let fill = (self.writer_id as u8).wrapping_add(self.produced as u8);
        self.produced += 1;
        Some(vec![fill; len])
    }
}

/// Newline-delimited records from a shared reader (standard input by default)
///
/// Clones share the reader, so every writer thread can hold one and each
/// line goes to exactly one writer. Line terminators are stripped.
#[derive(Clone)]
pub struct StdinSource {
    reader: Arc<Mutex<Box<dyn BufRead + Send>>>,
}

impl std::fmt::Debug for StdinSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdinSource").finish_non_exhaustive()
    }
}

impl StdinSource {
    /// Read from the process's standard input
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(io::stdin()))
    }

    /// Read from any buffered reader
    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Box::new(reader))),
        }
    }
}

impl RecordSource for StdinSource {
    fn next_record(&mut self) -> Option<Vec<u8>> {
        let mut line = Vec::new();
        let read = self.reader.lock().read_until(b'\n', &mut line);
        match read {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                Some(line)
            }
            Err(err) => {
                warn!(%err, "stopping stdin source");
                None
            }
        }
    }
}
