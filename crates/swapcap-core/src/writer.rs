//! Per-thread writer handle
//!
//! Turns a payload into a framed record, reserves room for it, copies it in,
//! and commits. Backpressure is handled according to the configured
//! [`BackpressurePolicy`].

use crate::buffer::DoubleBuffer;
use crate::config::{BackpressurePolicy, CaptureConfig};
use crate::context::CaptureContext;
use crate::error::{AppendError, ReserveError};
use crate::record::RecordFraming;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// What happened to an appended record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record is in the buffer and will be persisted
    Committed {
        /// Slot the record landed in
        slot: usize,
        /// Offset of the frame within the slot
        offset: usize,
        /// Writer sequence number of the record
        sequence: u64,
    },
    /// The record was discarded under [`BackpressurePolicy::Drop`]
    Dropped,
}

impl AppendOutcome {
    /// Whether the record was committed
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Writer facade owned by one producer thread
#[derive(Debug)]
pub struct WriterHandle {
    id: u32,
    sequence: u64,
    buffer: Arc<DoubleBuffer>,
    ctx: Arc<CaptureContext>,
    framing: RecordFraming,
    policy: BackpressurePolicy,
    max_retries: u32,
    block_timeout: Duration,
}

impl WriterHandle {
    /// Create the handle for writer `id`
    pub fn new(
        id: u32,
        buffer: Arc<DoubleBuffer>,
        ctx: Arc<CaptureContext>,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            id,
            sequence: 0,
            buffer,
            ctx,
            framing: config.framing,
            policy: config.backpressure,
            max_retries: config.max_append_retries,
            block_timeout: config.block_timeout,
        }
    }

    /// Writer id recorded in full frame headers
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Sequence number the next committed record receives
    pub fn next_sequence(&self) -> u64 {
        self.sequence
    }

    /// Backpressure policy in effect
    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Append one record
    pub fn append(&mut self, payload: &[u8]) -> Result<AppendOutcome, AppendError> {
        let size = self.framing.frame_len(payload.len());
        let mut attempts = 0u32;

        loop {
            // Taken before reserving so a slot freed in between still wakes us
            let space = self.buffer.space_token();
            attempts += 1;

            let mut ticket = match self.buffer.reserve(size) {
                Ok(ticket) => ticket,
                Err(ReserveError::RecordTooLarge { size, capacity }) => {
                    return Err(AppendError::RecordTooLarge { size, capacity });
                }
                Err(ReserveError::Backpressure) => {
                    self.ctx.stats().record_backpressure();
                    trace!(writer = self.id, attempts, "backpressure");
                    self.on_backpressure(attempts, space)?;
                    if self.policy == BackpressurePolicy::Drop {
                        self.ctx.stats().record_dropped();
                        return Ok(AppendOutcome::Dropped);
                    }
                    continue;
                }
            };

            let sequence = self.sequence;
            self.framing
                .encode(ticket.bytes_mut(), self.id, sequence, payload);
            let (slot, offset) = (ticket.slot(), ticket.offset());

            self.ctx.stats().record_write(size);
            self.buffer.commit(ticket);
            self.sequence += 1;

            return Ok(AppendOutcome::Committed {
                slot,
                offset,
                sequence,
            });
        }
    }

    fn on_backpressure(&self, attempts: u32, space: u64) -> Result<(), AppendError> {
        match self.policy {
            BackpressurePolicy::Fail => return Err(AppendError::Backpressure { attempts }),
            BackpressurePolicy::Drop => return Ok(()),
            BackpressurePolicy::Spin | BackpressurePolicy::Block => {}
        }

        if attempts > self.max_retries || self.ctx.is_shutdown() {
            warn!(
                writer = self.id,
                attempts,
                policy = ?self.policy,
                "giving up after sustained backpressure"
            );
            return Err(AppendError::Backpressure { attempts });
        }

        if self.policy == BackpressurePolicy::Spin {
            std::thread::yield_now();
        } else {
            self.buffer.wait_for_space(space, self.block_timeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwapPolicy;
    use crate::record::RecordReader;

    fn setup(capacity: usize, config: &CaptureConfig) -> (Arc<DoubleBuffer>, Arc<CaptureContext>) {
        let buffer = Arc::new(DoubleBuffer::new(capacity, config.swap_policy));
        let ctx = Arc::new(CaptureContext::new(true));
        (buffer, ctx)
    }

    fn drain_all(buffer: &DoubleBuffer) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(drain) = buffer.claim_sealed() {
            out.extend_from_slice(drain.bytes());
            drain.acknowledge(drain.len());
            drain.finish();
        }
        out
    }

    #[test]
    fn test_append_frames_and_sequences() {
        let config = CaptureConfig::new().with_framing(RecordFraming::Full);
        let (buffer, ctx) = setup(256, &config);
        let mut writer = WriterHandle::new(3, Arc::clone(&buffer), Arc::clone(&ctx), &config);

        let first = writer.append(b"one").unwrap();
        let second = writer.append(b"two!").unwrap();
        assert_eq!(
            first,
            AppendOutcome::Committed {
                slot: 0,
                offset: 0,
                sequence: 0
            }
        );
        assert_eq!(
            second,
            AppendOutcome::Committed {
                slot: 0,
                offset: 19,
                sequence: 1
            }
        );

        buffer.try_swap(true).unwrap();
        let bytes = drain_all(&buffer);
        let records: Vec<_> = RecordReader::new(&bytes, RecordFraming::Full)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].writer_id, 3);
        assert_eq!(records[1].sequence, 1);
        assert_eq!(records[1].payload, b"two!");

        let stats = ctx.snapshot();
        assert_eq!(stats.blocks_written, 2);
        assert_eq!(stats.bytes_written, 39);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let config = CaptureConfig::new().with_framing(RecordFraming::Length);
        let (buffer, ctx) = setup(16, &config);
        let mut writer = WriterHandle::new(0, Arc::clone(&buffer), ctx, &config);
        assert_eq!(
            writer.append(&[0; 13]),
            Err(AppendError::RecordTooLarge {
                size: 17,
                capacity: 16
            })
        );
        assert_eq!(buffer.slot_cursor(0), 0);
        assert_eq!(writer.next_sequence(), 0);
    }

    fn saturated(
        policy: BackpressurePolicy,
        retries: u32,
    ) -> (Arc<DoubleBuffer>, Arc<CaptureContext>, WriterHandle) {
        let config = CaptureConfig::new()
            .with_framing(RecordFraming::None)
            .with_swap_policy(SwapPolicy::OnFill)
            .with_backpressure(policy)
            .with_max_append_retries(retries);
        let (buffer, ctx) = setup(8, &config);
        let mut writer = WriterHandle::new(0, Arc::clone(&buffer), Arc::clone(&ctx), &config);
        writer.append(&[1; 8]).unwrap();
        writer.append(&[2; 8]).unwrap();
        (buffer, ctx, writer)
    }

    #[test]
    fn test_fail_policy_surfaces_backpressure() {
        let (_buffer, ctx, mut writer) = saturated(BackpressurePolicy::Fail, 3);
        assert_eq!(
            writer.append(&[3; 4]),
            Err(AppendError::Backpressure { attempts: 1 })
        );
        assert_eq!(ctx.snapshot().backpressure_events, 1);
    }

    #[test]
    fn test_drop_policy_counts_dropped_record() {
        let (_buffer, ctx, mut writer) = saturated(BackpressurePolicy::Drop, 3);
        assert_eq!(writer.append(&[3; 4]), Ok(AppendOutcome::Dropped));
        let stats = ctx.snapshot();
        assert_eq!(stats.records_dropped, 1);
        assert_eq!(stats.blocks_written, 2);
        assert_eq!(writer.next_sequence(), 2);
    }

    #[test]
    fn test_spin_policy_gives_up_after_retries() {
        let (_buffer, _ctx, mut writer) = saturated(BackpressurePolicy::Spin, 3);
        assert_eq!(
            writer.append(&[3; 4]),
            Err(AppendError::Backpressure { attempts: 4 })
        );
    }

    #[test]
    fn test_block_policy_resumes_when_slot_freed() {
        let (buffer, _ctx, mut writer) = saturated(BackpressurePolicy::Block, 1000);
        let drainer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(5));
                let drain = buffer.claim_sealed().unwrap();
                let bytes = drain.bytes().to_vec();
                drain.acknowledge(drain.len());
                drain.finish();
                bytes
            })
        };
        let outcome = writer.append(&[3; 4]);
        let drained = drainer.join().unwrap();
        assert_eq!(drained, vec![1; 8]);
        assert!(outcome.unwrap().is_committed());
    }
}
