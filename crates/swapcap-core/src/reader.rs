//! Single-consumer drain loop
//!
//! The drain waits for a sealed slot, hands its committed bytes to the sink,
//! and recycles the slot. A slot stays Draining until the sink has
//! acknowledged every byte, so a slow or failing sink turns into writer
//! backpressure instead of lost records.

use crate::buffer::{DoubleBuffer, SlotDrain};
use crate::config::{CaptureConfig, RetryPolicy};
use crate::context::CaptureContext;
use crate::error::{DrainError, DrainResult, SinkError, SwapError};
use crate::sink::Sink;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Wait rounds the shutdown drain allows for in-flight writers to settle
const SHUTDOWN_ROUNDS: u32 = 64;

/// Consumer side of the double buffer
#[derive(Debug)]
pub struct ReaderDrain<S> {
    buffer: Arc<DoubleBuffer>,
    ctx: Arc<CaptureContext>,
    sink: S,
    retry: RetryPolicy,
    flush_interval: Option<Duration>,
    poll_interval: Duration,
}

impl<S: Sink> ReaderDrain<S> {
    /// Create a drain persisting into `sink`
    pub fn new(
        buffer: Arc<DoubleBuffer>,
        ctx: Arc<CaptureContext>,
        sink: S,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            buffer,
            ctx,
            sink,
            retry: config.retry,
            flush_interval: config.flush_interval,
            poll_interval: config.poll_interval,
        }
    }

    /// The sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Give the sink back
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Drain until shutdown is requested or the sink fails for good.
    ///
    /// Slots still holding data when shutdown is requested are left for
    /// [`shutdown_drain`](Self::shutdown_drain).
    pub fn run(&mut self) -> DrainResult<()> {
        info!(
            flush_interval = ?self.flush_interval,
            poll_interval = ?self.poll_interval,
            "drain started"
        );

        while !self.ctx.is_shutdown() {
            let token = self.buffer.sealed_token();
            if self.drain_once()? {
                continue;
            }
            if self.flush_if_due() {
                continue;
            }
            self.buffer.wait_for_sealed(token, self.poll_interval);
        }

        debug!("drain loop stopped");
        Ok(())
    }

    /// Settle and drain at most one sealed slot. Returns true if a slot was
    /// recycled.
    pub fn drain_once(&mut self) -> DrainResult<bool> {
        self.ctx.stats().observe_generation(self.buffer.generation());
        self.buffer.settle();

        let buffer = Arc::clone(&self.buffer);
        match buffer.claim_sealed() {
            Some(drain) => {
                self.persist_slot(drain)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Force a swap if the active slot has held bytes longer than the flush
    /// interval. Returns true if a swap happened.
    pub fn flush_if_due(&self) -> bool {
        let Some(interval) = self.flush_interval else {
            return false;
        };
        if !self.buffer.flush_due(interval) {
            return false;
        }

        match self.buffer.try_swap(true) {
            Ok(outcome) => {
                debug!(
                    slot = outcome.sealed,
                    bytes = outcome.sealed_len,
                    "timer flush"
                );
                true
            }
            Err(err) => {
                trace!(%err, "timer flush deferred");
                false
            }
        }
    }

    /// Seal and persist everything still buffered. Call once writers have
    /// stopped.
    pub fn shutdown_drain(&mut self) -> DrainResult<()> {
        let mut rounds = 0;
        loop {
            while self.drain_once()? {}

            if self.buffer.is_empty() {
                self.ctx.stats().observe_generation(self.buffer.generation());
                info!(generation = self.buffer.generation(), "final drain complete");
                return Ok(());
            }

            rounds += 1;
            if rounds > SHUTDOWN_ROUNDS {
                let active = self.buffer.active_index();
                return Err(DrainError::Incomplete(format!(
                    "slot {active} holds {} bytes with {} writers in flight",
                    self.buffer.slot_cursor(active),
                    self.buffer.slot_in_flight(active) + self.buffer.slot_in_flight(active ^ 1),
                )));
            }

            let token = self.buffer.sealed_token();
            if !self.buffer.has_pending() {
                match self.buffer.try_swap(true) {
                    Ok(_) => continue,
                    Err(SwapError::Race) => std::thread::yield_now(),
                    Err(err) => trace!(%err, "final swap deferred"),
                }
            }
            self.buffer.wait_for_sealed(token, self.poll_interval);
        }
    }

    fn persist_slot(&mut self, drain: SlotDrain<'_>) -> DrainResult<()> {
        let slot = drain.index();
        let len = drain.len();
        let records = drain.records();

        if drain.is_empty() {
            trace!(slot, "recycling empty slot");
            drain.finish();
            self.ctx.stats().record_drain(0, 0);
            return Ok(());
        }

        let mut attempts = 0u32;
        while drain.persisted() < len {
            let result = match self.sink.persist(drain.remaining()) {
                Ok(ack) if ack.bytes == 0 => Err(SinkError::NoProgress),
                other => other,
            };
            match result {
                Ok(ack) => {
                    drain.acknowledge(ack.bytes);
                    attempts = 0;
                    if drain.persisted() < len {
                        trace!(slot, persisted = drain.persisted(), len, "partial persist");
                    }
                }
                Err(err) => {
                    attempts += 1;
                    self.retry_or_fail(slot, attempts, drain.persisted(), err)?;
                }
            }
        }

        attempts = 0;
        while let Err(err) = self.sink.sync() {
            attempts += 1;
            self.retry_or_fail(slot, attempts, len, err)?;
        }

        drain.finish();
        self.ctx.stats().record_drain(records, len);
        debug!(slot, bytes = len, records, "slot persisted");
        Ok(())
    }

    fn retry_or_fail(
        &self,
        slot: usize,
        attempts: u32,
        offset: usize,
        err: SinkError,
    ) -> DrainResult<()> {
        if attempts >= self.retry.max_attempts {
            error!(slot, attempts, offset, %err, "sink failed, giving up");
            return Err(DrainError::PersistFailure {
                slot,
                attempts,
                offset,
                source: err,
            });
        }

        let delay = self.retry.backoff(attempts);
        warn!(slot, attempts, offset, %err, ?delay, "sink failed, retrying");
        self.ctx.stats().record_persist_retry();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }
}
