//! Lock-free double buffer
//!
//! Two [`BufferSlot`]s alternate between accepting reservations and being
//! drained. Writers reserve disjoint ranges in the active slot with a
//! compare-and-swap on its cursor, copy their bytes, and commit. A swap seals
//! the active slot and promotes the standby slot, which must already have
//! been recycled by the drain.
//!
//! # Protocol
//!
//! ```text
//! writer                         swap winner                  drain
//! ------                         -----------                  -----
//! in_flight += 1                 state: Active -> Sealing
//! state == Active ?              cursor |= CLOSED
//! cursor CAS [off, off+len)      standby: Free -> Active
//! copy bytes                     active = standby
//! in_flight -= 1                 in_flight == 0 ?  -> Sealed  Sealed -> Draining
//!   (last one out of a                                         persist [0, len)
//!    Sealing slot seals it)                                    Draining -> Free
//! ```
//!
//! Registration precedes the state check and sealing precedes the in-flight
//! check, both sequentially consistent, so a writer either sees the seal and
//! backs out, or the sealer sees the writer and waits for its commit.
//!
//! Swaps are serialized by a try-acquire flag: a losing swapper returns
//! [`SwapError::Race`] at once and never waits. Writers never touch it.

#![allow(unsafe_code)]

use crate::config::SwapPolicy;
use crate::error::{ReserveError, SwapError};
use crate::signal::Signal;
use crate::slot::{AdvanceError, BufferSlot, SlotState};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Lost races spun through before yielding the thread
const MAX_RACE_SPINS: u32 = 64;

/// `first_reserve_at` of a slot nothing has been reserved in
const NOT_STAMPED: u64 = u64::MAX;

/// Result of a successful swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutcome {
    /// Slot that was sealed
    pub sealed: usize,
    /// Bytes reserved in the sealed slot when its cursor closed
    pub sealed_len: usize,
    /// Slot that became active
    pub activated: usize,
    /// Generation after the swap
    pub generation: u64,
}

/// Two-slot capture buffer shared by all writers and the drain
pub struct DoubleBuffer {
    slots: [BufferSlot; 2],
    active: AtomicUsize,
    generation: AtomicU64,
    swapping: AtomicBool,
    swap_policy: SwapPolicy,
    created_at: Instant,
    first_reserve_at: AtomicU64,
    sealed: Signal,
    freed: Signal,
}

impl fmt::Debug for DoubleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoubleBuffer")
            .field("active", &self.active_index())
            .field("generation", &self.generation())
            .field("swap_policy", &self.swap_policy)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl DoubleBuffer {
    /// Create a buffer with two slots of `capacity` bytes; slot 0 starts
    /// active.
    pub fn new(capacity: usize, swap_policy: SwapPolicy) -> Self {
        Self {
            slots: [
                BufferSlot::new(0, capacity, SlotState::Active),
                BufferSlot::new(1, capacity, SlotState::Free),
            ],
            active: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            swapping: AtomicBool::new(false),
            swap_policy,
            created_at: Instant::now(),
            first_reserve_at: AtomicU64::new(NOT_STAMPED),
            sealed: Signal::new(),
            freed: Signal::new(),
        }
    }

    /// Capacity of each slot
    pub fn capacity(&self) -> usize {
        self.slots[0].capacity()
    }

    /// Index of the slot accepting reservations
    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of swaps performed
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Swap trigger in effect
    pub fn swap_policy(&self) -> SwapPolicy {
        self.swap_policy
    }

    /// Read-only access to a slot
    pub fn slot(&self, index: usize) -> &BufferSlot {
        &self.slots[index]
    }

    /// Lifecycle state of slot `index`
    pub fn slot_state(&self, index: usize) -> SlotState {
        self.slots[index].state()
    }

    /// Bytes reserved in slot `index` this epoch
    pub fn slot_cursor(&self, index: usize) -> usize {
        self.slots[index].cursor()
    }

    /// Writers holding uncommitted tickets in slot `index`
    pub fn slot_in_flight(&self, index: usize) -> usize {
        self.slots[index].in_flight()
    }

    /// Reserve `size` contiguous bytes in the active slot.
    ///
    /// Never takes a lock. Lost races against a concurrent swap are retried
    /// internally; backpressure is reported only when the active slot is
    /// full and the standby slot has not been recycled.
    pub fn reserve(&self, size: usize) -> Result<WriteTicket<'_>, ReserveError> {
        let capacity = self.capacity();
        if size > capacity {
            return Err(ReserveError::RecordTooLarge { size, capacity });
        }

        let mut races = 0u32;
        loop {
            let index = self.active.load(Ordering::SeqCst);
            let slot = &self.slots[index];

            slot.enter();
            if slot.state() != SlotState::Active {
                // Read the index just before a swap published the new slot
                self.release(slot);
                races = back_off(races);
                continue;
            }

            let generation = slot.epoch();
            match slot.try_advance(size) {
                Ok(offset) => {
                    if offset == 0 {
                        self.first_reserve_at
                            .store(self.elapsed_nanos(), Ordering::Release);
                    }
                    trace!(slot = index, offset, size, "reserved");
                    return Ok(WriteTicket {
                        buffer: self,
                        slot: index,
                        offset,
                        len: size,
                        generation,
                        committed: false,
                    });
                }
                Err(AdvanceError::Closed) => {
                    self.release(slot);
                    races = back_off(races);
                }
                Err(AdvanceError::NoRoom) => {
                    slot.mark_exhausted();
                    self.release(slot);
                    if self.swap_policy == SwapPolicy::Manual {
                        return Err(ReserveError::Backpressure);
                    }
                    match self.try_swap(false) {
                        Ok(_) | Err(SwapError::NotFull) => races = 0,
                        Err(SwapError::Race) => {
                            // The winning swapper holds the flag only briefly
                            std::thread::yield_now();
                        }
                        Err(SwapError::StandbyBusy(state)) => {
                            trace!(standby = %state, "swap refused, backpressure");
                            return Err(ReserveError::Backpressure);
                        }
                    }
                }
            }
        }
    }

    /// Commit a ticket whose range has been filled
    pub fn commit(&self, ticket: WriteTicket<'_>) {
        debug_assert!(std::ptr::eq(ticket.buffer, self));
        ticket.commit();
    }

    /// Seal the active slot and promote the standby slot.
    ///
    /// `force = false` only seals a full slot; `force = true` seals any
    /// content, including none. The standby slot must be Free.
    pub fn try_swap(&self, force: bool) -> Result<SwapOutcome, SwapError> {
        if self
            .swapping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SwapError::Race);
        }
        let result = self.swap_exclusive(force);
        self.swapping.store(false, Ordering::Release);
        result
    }

    fn swap_exclusive(&self, force: bool) -> Result<SwapOutcome, SwapError> {
        let index = self.active.load(Ordering::SeqCst);
        let current = &self.slots[index];
        let standby = &self.slots[index ^ 1];

        if !force && !current.is_full() {
            return Err(SwapError::NotFull);
        }

        let standby_state = standby.state();
        if standby_state != SlotState::Free {
            return Err(SwapError::StandbyBusy(standby_state));
        }

        if !current.transition(SlotState::Active, SlotState::Sealing) {
            return Err(SwapError::Race);
        }
        let sealed_len = current.close();

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        standby.prepare(generation);
        self.first_reserve_at.store(NOT_STAMPED, Ordering::Release);
        let promoted = standby.transition(SlotState::Free, SlotState::Active);
        debug_assert!(promoted, "standby left Free during an exclusive swap");
        self.active.store(index ^ 1, Ordering::SeqCst);

        debug!(
            sealed = index,
            sealed_len,
            activated = index ^ 1,
            generation,
            force,
            "swapped slots"
        );

        if current.try_settle() {
            self.on_sealed(current);
        }

        Ok(SwapOutcome {
            sealed: index,
            sealed_len,
            activated: index ^ 1,
            generation,
        })
    }

    /// Deregister a writer and finish a pending seal if it was the last.
    fn release(&self, slot: &BufferSlot) {
        if slot.leave() && slot.state() == SlotState::Sealing && slot.try_settle() {
            self.on_sealed(slot);
        }
    }

    fn on_sealed(&self, slot: &BufferSlot) {
        debug!(
            slot = slot.index(),
            bytes = slot.cursor(),
            records = slot.records(),
            "slot sealed"
        );
        self.sealed.notify();
    }

    /// Advance any quiescent Sealing slot to Sealed. Returns true if one was
    /// settled by this call.
    pub fn settle(&self) -> bool {
        let mut settled = false;
        for slot in &self.slots {
            if slot.state() == SlotState::Sealing && slot.try_settle() {
                self.on_sealed(slot);
                settled = true;
            }
        }
        settled
    }

    /// Claim the sealed slot for draining, if there is one
    pub fn claim_sealed(&self) -> Option<SlotDrain<'_>> {
        self.slots
            .iter()
            .find(|slot| slot.transition(SlotState::Sealed, SlotState::Draining))
            .map(|slot| SlotDrain {
                buffer: self,
                slot,
                len: slot.cursor(),
            })
    }

    /// Whether either slot is between seal and recycle
    pub fn has_pending(&self) -> bool {
        self.slots.iter().any(|slot| {
            matches!(
                slot.state(),
                SlotState::Sealing | SlotState::Sealed | SlotState::Draining
            )
        })
    }

    /// Whether the active slot holds no bytes and nothing awaits draining
    pub fn is_empty(&self) -> bool {
        !self.has_pending() && self.slots[self.active_index()].cursor() == 0
    }

    /// Whether the active slot has held bytes for at least `interval`,
    /// counted from its first reservation
    pub fn flush_due(&self, interval: Duration) -> bool {
        let active = &self.slots[self.active_index()];
        if active.cursor() == 0 {
            return false;
        }
        let since = self.first_reserve_at.load(Ordering::Acquire);
        if since == NOT_STAMPED {
            return false;
        }
        self.elapsed_nanos().saturating_sub(since) >= interval.as_nanos() as u64
    }

    /// Token for [`wait_for_sealed`](Self::wait_for_sealed)
    pub fn sealed_token(&self) -> u64 {
        self.sealed.token()
    }

    /// Park until a slot is sealed after `token` was taken, or `timeout`
    pub fn wait_for_sealed(&self, token: u64, timeout: Duration) -> bool {
        self.sealed.wait_since(token, timeout)
    }

    /// Token for [`wait_for_space`](Self::wait_for_space)
    pub fn space_token(&self) -> u64 {
        self.freed.token()
    }

    /// Park until a slot is recycled after `token` was taken, or `timeout`
    pub fn wait_for_space(&self, token: u64, timeout: Duration) -> bool {
        self.freed.wait_since(token, timeout)
    }

    fn elapsed_nanos(&self) -> u64 {
        self.created_at.elapsed().as_nanos() as u64
    }
}

/// Spin through the first lost races, then give the thread up
fn back_off(races: u32) -> u32 {
    if races < MAX_RACE_SPINS {
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
    races.saturating_add(1)
}

/// Exclusive claim on a reserved range, consumed by commit
///
/// Not `Clone`: a range can be filled and committed exactly once. Dropping
/// an uncommitted ticket zero-fills the range and releases it so the slot
/// can still seal.
pub struct WriteTicket<'a> {
    buffer: &'a DoubleBuffer,
    slot: usize,
    offset: usize,
    len: usize,
    generation: u64,
    committed: bool,
}

impl fmt::Debug for WriteTicket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTicket")
            .field("slot", &self.slot)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("generation", &self.generation)
            .finish()
    }
}

impl WriteTicket<'_> {
    /// Slot holding the range
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Start of the range within the slot
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the range
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slot epoch the range was granted in
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The reserved bytes
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let slot = &self.buffer.slots[self.slot];
        // SAFETY: `try_advance` granted this range to this ticket alone and
        // the slot cannot seal while the ticket is registered in-flight.
        unsafe { slot.range_mut(self.offset, self.len) }
    }

    /// Publish the range to the drain
    pub fn commit(mut self) {
        self.finish(true);
    }

    fn finish(&mut self, commit: bool) {
        let slot = &self.buffer.slots[self.slot];
        debug_assert_eq!(slot.epoch(), self.generation);
        if commit {
            slot.count_record();
        }
        self.committed = true;
        self.buffer.release(slot);
    }
}

impl Drop for WriteTicket<'_> {
    fn drop(&mut self) {
        if !self.committed {
            warn!(
                slot = self.slot,
                offset = self.offset,
                len = self.len,
                "ticket dropped without commit, zero-filling range"
            );
            self.bytes_mut().fill(0);
            self.finish(false);
        }
    }
}

/// Drain-side claim on a quiescent slot
///
/// The slot stays Draining until [`finish`](Self::finish) is called, so a
/// failed persist keeps it out of the swap rotation.
pub struct SlotDrain<'a> {
    buffer: &'a DoubleBuffer,
    slot: &'a BufferSlot,
    len: usize,
}

impl fmt::Debug for SlotDrain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotDrain")
            .field("slot", &self.slot.index())
            .field("len", &self.len)
            .field("persisted", &self.persisted())
            .finish()
    }
}

impl SlotDrain<'_> {
    /// Slot index
    pub fn index(&self) -> usize {
        self.slot.index()
    }

    /// Committed length
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the slot was sealed without content
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records committed into the slot
    pub fn records(&self) -> usize {
        self.slot.records()
    }

    /// Epoch the slot was sealed in
    pub fn generation(&self) -> u64 {
        self.slot.epoch()
    }

    /// Committed bytes `[0, len)`
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: the slot is Draining; every writer has committed and no
        // reservation can be granted until it is recycled.
        unsafe { self.slot.committed(self.len) }
    }

    /// Bytes the sink has acknowledged
    pub fn persisted(&self) -> usize {
        self.slot.persisted()
    }

    /// Bytes still to deliver
    pub fn remaining(&self) -> &[u8] {
        &self.bytes()[self.persisted()..]
    }

    /// Record a sink acknowledgement of `bytes` more bytes
    pub fn acknowledge(&self, bytes: usize) {
        let persisted = (self.persisted() + bytes).min(self.len);
        self.slot.set_persisted(persisted);
    }

    /// Recycle the slot once everything is persisted
    pub fn finish(self) {
        debug_assert_eq!(self.persisted(), self.len);
        let freed = self
            .slot
            .transition(SlotState::Draining, SlotState::Free);
        debug_assert!(freed, "drained slot left Draining");
        debug!(slot = self.slot.index(), bytes = self.len, "slot recycled");
        self.buffer.freed.notify();
    }
}
