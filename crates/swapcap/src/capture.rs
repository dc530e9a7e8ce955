//! Capture orchestration.
//!
//! Spawns one thread per writer and a drain thread, stops them in order on
//! shutdown, and performs the final forced drain:
//!
//! 1. writers stop at their next record once the shutdown flag is set, or
//!    when their source runs dry
//! 2. the drain loop stops once every writer has been joined
//! 3. the remaining buffered bytes are sealed and persisted
//!
//! [`run_until_signal`] wraps this in a Tokio task that also reacts to
//! Ctrl-C, an optional capture duration, and a periodic statistics log.

use crate::error::{CaptureError, CaptureResult};
use crate::source::RecordSource;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use swapcap_core::{
    AppendError, AppendOutcome, CaptureConfig, CaptureContext, DoubleBuffer, ReaderDrain, Sink,
    StatsSnapshot, WriterHandle,
};
use tracing::{debug, error, info, warn};

/// Per-writer outcome counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WriterReport {
    /// Writer id
    pub id: u32,
    /// Records committed to the buffer
    pub committed: u64,
    /// Records discarded under the drop policy
    pub dropped: u64,
    /// Records refused after sustained backpressure
    pub refused: u64,
    /// Records larger than a slot
    pub too_large: u64,
}

impl WriterReport {
    fn new(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// Summary of a finished capture
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureReport {
    /// Output destination
    pub output: PathBuf,
    /// Final statistics
    pub stats: StatsSnapshot,
    /// Swaps performed
    pub generation: u64,
    /// Per-writer outcomes, ordered by id
    pub writers: Vec<WriterReport>,
    /// Wall-clock capture time in seconds
    pub elapsed_secs: f64,
}

impl CaptureReport {
    /// Records committed by every writer
    pub fn committed(&self) -> u64 {
        self.writers.iter().map(|w| w.committed).sum()
    }
}

/// A configured capture, ready to run
#[derive(Debug)]
pub struct Capture {
    config: CaptureConfig,
    buffer: Arc<DoubleBuffer>,
    ctx: Arc<CaptureContext>,
}

impl Capture {
    /// Validate `config` and allocate both slots.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::Config` if the configuration is invalid.
    pub fn new(config: CaptureConfig) -> CaptureResult<Self> {
        config.validate()?;

        let buffer = Arc::new(DoubleBuffer::new(config.slot_capacity, config.swap_policy));
        let ctx = Arc::new(CaptureContext::new(config.stats_enabled));

        info!(
            slot_capacity = config.slot_capacity,
            writers = config.writer_count,
            output = %config.output.display(),
            framing = ?config.framing,
            swap = ?config.swap_policy,
            backpressure = ?config.backpressure,
            "capture initialized"
        );

        Ok(Self {
            config,
            buffer,
            ctx,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Shared shutdown flag and statistics
    pub fn context(&self) -> Arc<CaptureContext> {
        Arc::clone(&self.ctx)
    }

    /// The double buffer
    pub fn buffer(&self) -> &Arc<DoubleBuffer> {
        &self.buffer
    }

    /// Ask every thread to stop
    pub fn shutdown(&self) {
        self.ctx.request_shutdown();
    }

    /// Run the capture to completion on the calling thread.
    ///
    /// `sources` is called once per writer id. Returns when every source is
    /// exhausted or shutdown is requested, after the final drain.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError` if a thread cannot be spawned or panics, or the
    /// drain fails.
    pub fn run<S, F, R>(&self, sink: S, sources: F) -> CaptureResult<CaptureReport>
    where
        S: Sink + 'static,
        F: FnMut(u32) -> R,
        R: RecordSource + 'static,
    {
        self.run_with(sink, sources, |name, job| spawn(name, job))
    }

    /// Writer threads are started through `spawn_writer`. A failed start
    /// stops the capture but still drains what was already committed.
    fn run_with<S, F, R, W>(
        &self,
        sink: S,
        mut sources: F,
        mut spawn_writer: W,
    ) -> CaptureResult<CaptureReport>
    where
        S: Sink + 'static,
        F: FnMut(u32) -> R,
        R: RecordSource + 'static,
        W: FnMut(String, WriterJob) -> CaptureResult<thread::JoinHandle<WriterReport>>,
    {
        let started = Instant::now();

        let mut reader = ReaderDrain::new(
            Arc::clone(&self.buffer),
            Arc::clone(&self.ctx),
            sink,
            &self.config,
        );
        let drain_ctx = Arc::clone(&self.ctx);
        let drain = spawn("swapcap-drain".to_string(), move || {
            let result = reader.run();
            if result.is_err() {
                drain_ctx.request_shutdown();
            }
            (reader, result)
        })?;

        let mut writers = Vec::with_capacity(self.config.writer_count);
        let mut failure = None;
        for id in 0..self.config.writer_count as u32 {
            let writer = WriterHandle::new(
                id,
                Arc::clone(&self.buffer),
                Arc::clone(&self.ctx),
                &self.config,
            );
            let source = sources(id);
            let ctx = Arc::clone(&self.ctx);
            let job: WriterJob = Box::new(move || write_loop(writer, source, &ctx));
            match spawn_writer(format!("swapcap-writer-{id}"), job) {
                Ok(handle) => writers.push((id, handle)),
                Err(err) => {
                    error!(writer = id, %err, "writer failed to start, stopping capture");
                    self.ctx.request_shutdown();
                    failure = Some(err);
                    break;
                }
            }
        }

        let mut reports = Vec::with_capacity(writers.len());
        for (id, handle) in writers {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    error!(writer = id, "writer thread panicked");
                    if failure.is_none() {
                        failure = Some(CaptureError::WriterPanicked(id));
                    }
                }
            }
        }

        debug!("writers stopped, stopping drain");
        self.ctx.request_shutdown();
        let (mut reader, result) = drain.join().map_err(|_| CaptureError::DrainPanicked)?;
        result?;
        reader.shutdown_drain()?;

        if let Some(err) = failure {
            return Err(err);
        }

        let stats = self.ctx.snapshot();
        let report = CaptureReport {
            output: self.config.output.clone(),
            stats,
            generation: self.buffer.generation(),
            writers: reports,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };

        info!(
            records = report.committed(),
            bytes = stats.bytes_read,
            swaps = report.generation,
            elapsed_secs = report.elapsed_secs,
            "capture complete"
        );
        if self.config.stats_enabled && !stats.is_balanced() {
            warn!(%stats, "written and persisted totals differ");
        }

        Ok(report)
    }
}

/// Body of one writer thread
type WriterJob = Box<dyn FnOnce() -> WriterReport + Send + 'static>;

fn spawn<T, F>(name: String, f: F) -> CaptureResult<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| CaptureError::Spawn { name, source })
}

fn write_loop<R: RecordSource>(
    mut writer: WriterHandle,
    mut source: R,
    ctx: &CaptureContext,
) -> WriterReport {
    let mut report = WriterReport::new(writer.id());

    while !ctx.is_shutdown() {
        let Some(record) = source.next_record() else {
            debug!(writer = writer.id(), "source exhausted");
            break;
        };

        match writer.append(&record) {
            Ok(AppendOutcome::Committed { .. }) => report.committed += 1,
            Ok(AppendOutcome::Dropped) => report.dropped += 1,
            Err(AppendError::Backpressure { attempts }) => {
                report.refused += 1;
                debug!(writer = writer.id(), attempts, "record refused");
            }
            Err(err @ AppendError::RecordTooLarge { .. }) => {
                report.too_large += 1;
                warn!(writer = writer.id(), %err, "skipping record");
            }
        }
    }

    debug!(
        writer = report.id,
        committed = report.committed,
        dropped = report.dropped,
        refused = report.refused,
        "writer finished"
    );
    report
}

/// Limits and reporting for [`run_until_signal`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after this long
    pub duration: Option<Duration>,
    /// Log statistics at this interval
    pub stats_interval: Option<Duration>,
}

/// Run `capture` on a blocking task until its sources are exhausted, Ctrl-C
/// is pressed, or the configured duration elapses.
///
/// # Errors
///
/// Returns `CaptureError` if the capture fails or the signal handler cannot
/// be installed.
pub async fn run_until_signal<S, F, R>(
    capture: Capture,
    sink: S,
    sources: F,
    options: RunOptions,
) -> CaptureResult<CaptureReport>
where
    S: Sink + 'static,
    F: FnMut(u32) -> R + Send + 'static,
    R: RecordSource + 'static,
{
    let ctx = capture.context();
    let mut task = tokio::task::spawn_blocking(move || capture.run(sink, sources));

    let deadline = tokio::time::sleep(options.duration.unwrap_or(Duration::MAX));
    tokio::pin!(deadline);

    let stats_every = options.stats_interval.unwrap_or(Duration::from_secs(3600));
    let mut ticker = tokio::time::interval(stats_every);
    ticker.reset();

    let mut stopping = false;
    loop {
        tokio::select! {
            joined = &mut task => {
                return joined.map_err(|err| CaptureError::Task(err.to_string()))?;
            }
            signal = tokio::signal::ctrl_c(), if !stopping => {
                signal.map_err(CaptureError::Signal)?;
                info!("interrupt received, stopping capture");
                ctx.request_shutdown();
                stopping = true;
            }
            () = &mut deadline, if options.duration.is_some() && !stopping => {
                info!("capture duration elapsed");
                ctx.request_shutdown();
                stopping = true;
            }
            _ = ticker.tick(), if options.stats_interval.is_some() => {
                info!(stats = %ctx.snapshot(), "capture progress");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SyntheticSource;
    use swapcap_core::{MemorySink, RecordFraming};

    fn small_config(writers: usize) -> CaptureConfig {
        CaptureConfig::new()
            .with_slot_capacity(2048)
            .with_writer_count(writers)
            .with_framing(RecordFraming::Full)
            .with_output("memory")
            .with_flush_interval(Some(Duration::from_millis(5)))
            .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_run_drains_finite_sources() {
        let capture = Capture::new(small_config(3)).unwrap();
        let sink = MemorySink::new();
        let report = capture
            .run(sink.clone(), |id| {
                SyntheticSource::new(id, 8, 64).with_limit(200)
            })
            .unwrap();

        assert_eq!(report.writers.len(), 3);
        assert_eq!(report.committed(), 600);
        assert!(report.stats.is_balanced());
        assert_eq!(report.stats.blocks_read, 600);
        assert_eq!(sink.len() as u64, report.stats.bytes_read);
        assert!(capture.buffer().is_empty());
    }

    #[test]
    fn test_writer_spawn_failure_still_drains_committed_records() {
        let capture = Capture::new(small_config(2)).unwrap();
        let ctx = capture.context();
        let sink = MemorySink::new();

        let err = capture
            .run_with(
                sink.clone(),
                |id| SyntheticSource::new(id, 8, 64).with_limit(200),
                |name, job| {
                    if name.ends_with("-0") {
                        return spawn(name, job);
                    }
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while ctx.snapshot().blocks_written < 50 && Instant::now() < deadline {
                        thread::sleep(Duration::from_millis(1));
                    }
                    Err(CaptureError::Spawn {
                        name,
                        source: std::io::Error::other("thread limit reached"),
                    })
                },
            )
            .unwrap_err();

        assert!(matches!(err, CaptureError::Spawn { .. }));
        let stats = ctx.snapshot();
        assert!(stats.blocks_written >= 50);
        assert!(stats.is_balanced());
        assert_eq!(sink.len() as u64, stats.bytes_written);
        assert!(capture.buffer().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Capture::new(small_config(0)).unwrap_err();
        assert!(matches!(err, CaptureError::Config(_)));
    }

    #[test]
    fn test_oversized_records_are_skipped() {
        let config = small_config(1).with_slot_capacity(64);
        let capture = Capture::new(config).unwrap();
        let report = capture
            .run(MemorySink::new(), |id| {
                SyntheticSource::new(id, 100, 100).with_limit(3)
            })
            .unwrap();
        assert_eq!(report.writers[0].too_large, 3);
        assert_eq!(report.committed(), 0);
    }

    #[tokio::test]
    async fn test_duration_stops_unbounded_sources() {
        let capture = Capture::new(small_config(2)).unwrap();
        let sink = MemorySink::new();
        let options = RunOptions {
            duration: Some(Duration::from_millis(50)),
            stats_interval: None,
        };
        let report = run_until_signal(
            capture,
            sink.clone(),
            |id| SyntheticSource::new(id, 16, 32),
            options,
        )
        .await
        .unwrap();

        assert!(report.committed() > 0);
        assert!(report.stats.is_balanced());
        assert_eq!(sink.len() as u64, report.stats.bytes_written);
    }
}
