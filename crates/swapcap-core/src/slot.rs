//! Buffer slot: a fixed-capacity byte arena with an atomic write cursor,
//! an in-flight writer count, and a lifecycle state word.
//!
//! Slots cycle `Free → Active → Sealing → Sealed → Draining → Free`. The
//! arena is only addressed through bounds-checked offsets; writers receive
//! exclusive sub-ranges through tickets and the drain reads the committed
//! prefix once the slot is quiescent.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

/// Lifecycle state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotState {
    /// Recycled, waiting to be swapped in
    Free = 0,
    /// Accepting reservations
    Active = 1,
    /// No new reservations; waiting for in-flight writers
    Sealing = 2,
    /// Quiescent, ready for the drain
    Sealed = 3,
    /// Owned by the drain until the sink acknowledges every byte
    Draining = 4,
}

impl SlotState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Free,
            1 => Self::Active,
            2 => Self::Sealing,
            3 => Self::Sealed,
            _ => Self::Draining,
        }
    }
}

/// Why a cursor advance was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AdvanceError {
    /// The range does not fit in the remaining space
    NoRoom,
    /// The slot was sealed; the cursor no longer moves
    Closed,
}

// High bit of the cursor word marks a sealed slot
const CLOSED: usize = 1 << (usize::BITS - 1);

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Active => "active",
            Self::Sealing => "sealing",
            Self::Sealed => "sealed",
            Self::Draining => "draining",
        };
        f.write_str(name)
    }
}

// Writer-hot counters sit on their own cache lines
#[repr(align(64))]
#[derive(Debug)]
struct CacheAlignedAtomicUsize(AtomicUsize);

impl CacheAlignedAtomicUsize {
    const fn new(value: usize) -> Self {
        Self(AtomicUsize::new(value))
    }
}

impl std::ops::Deref for CacheAlignedAtomicUsize {
    type Target = AtomicUsize;

    #[inline]
    fn deref(&self) -> &AtomicUsize {
        &self.0
    }
}

/// One of the two arenas owned by a [`DoubleBuffer`](crate::DoubleBuffer)
pub struct BufferSlot {
    index: usize,
    bytes: Box<[UnsafeCell<u8>]>,
    cursor: CacheAlignedAtomicUsize,
    in_flight: CacheAlignedAtomicUsize,
    state: AtomicU8,
    epoch: AtomicU64,
    exhausted: AtomicBool,
    records: AtomicUsize,
    persisted: AtomicUsize,
}

// SAFETY: the arena is only mutated through ranges handed out by
// `try_advance`, which are pairwise disjoint within an epoch, and only read
// by the drain after the in-flight count has reached zero.
unsafe impl Sync for BufferSlot {}

impl fmt::Debug for BufferSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSlot")
            .field("index", &self.index)
            .field("capacity", &self.capacity())
            .field("state", &self.state())
            .field("cursor", &self.cursor())
            .field("in_flight", &self.in_flight())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

impl BufferSlot {
    pub(crate) fn new(index: usize, capacity: usize, state: SlotState) -> Self {
        assert!(capacity < CLOSED, "slot capacity out of range");
        let bytes = (0..capacity).map(|_| UnsafeCell::new(0u8)).collect();
        Self {
            index,
            bytes,
            cursor: CacheAlignedAtomicUsize::new(0),
            in_flight: CacheAlignedAtomicUsize::new(0),
            state: AtomicU8::new(state as u8),
            epoch: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
            records: AtomicUsize::new(0),
            persisted: AtomicUsize::new(0),
        }
    }

    /// Slot index within the double buffer
    pub fn index(&self) -> usize {
        self.index
    }

    /// Arena size in bytes
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Bytes reserved so far in this epoch
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire) & !CLOSED
    }

    /// Whether the cursor has been closed by a seal
    pub fn is_closed(&self) -> bool {
        self.cursor.load(Ordering::Acquire) & CLOSED != 0
    }

    /// Writers between reserve and commit
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Generation at which this slot was last activated
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Committed records in this epoch
    pub fn records(&self) -> usize {
        self.records.load(Ordering::Acquire)
    }

    /// Bytes the sink has acknowledged during the current drain
    pub fn persisted(&self) -> usize {
        self.persisted.load(Ordering::Acquire)
    }

    /// Whether a non-forced swap may seal this slot
    pub fn is_full(&self) -> bool {
        self.exhausted.load(Ordering::Acquire) || self.cursor() >= self.capacity()
    }

    /// Single-winner state transition
    pub(crate) fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Reset counters and open the slot for a new epoch. Only the swap
    /// winner calls this, while the slot is still Free.
    pub(crate) fn prepare(&self, epoch: u64) {
        self.cursor.store(0, Ordering::Release);
        self.records.store(0, Ordering::Release);
        self.persisted.store(0, Ordering::Release);
        self.exhausted.store(false, Ordering::Release);
        self.epoch.store(epoch, Ordering::Release);
    }

    /// Register a writer. Must precede the state check so a concurrent seal
    /// cannot miss it.
    pub(crate) fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Deregister a writer; returns true when this was the last one.
    pub(crate) fn leave(&self) -> bool {
        self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub(crate) fn mark_exhausted(&self) {
        self.exhausted.store(true, Ordering::Release);
    }

    pub(crate) fn count_record(&self) {
        self.records.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn set_persisted(&self, offset: usize) {
        self.persisted.store(offset, Ordering::Release);
    }

    /// Advance the cursor by `size` without ever granting bytes past
    /// capacity. Returns the start offset of the granted range.
    pub(crate) fn try_advance(&self, size: usize) -> Result<usize, AdvanceError> {
        let capacity = self.capacity();
        let mut current = self.cursor.load(Ordering::Acquire);
        loop {
            if current & CLOSED != 0 {
                return Err(AdvanceError::Closed);
            }
            let end = match current.checked_add(size) {
                Some(end) if end <= capacity => end,
                _ => return Err(AdvanceError::NoRoom),
            };
            match self.cursor.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(observed) => current = observed,
            }
        }
    }

    /// Stop the cursor; returns the final committed length of the epoch.
    pub(crate) fn close(&self) -> usize {
        self.cursor.fetch_or(CLOSED, Ordering::AcqRel) & !CLOSED
    }

    /// Sealing → Sealed once no writer remains. Returns true if this call
    /// performed the transition.
    pub(crate) fn try_settle(&self) -> bool {
        self.in_flight() == 0 && self.transition(SlotState::Sealing, SlotState::Sealed)
    }

    /// Exclusive view of a granted range.
    ///
    /// # Safety
    ///
    /// The caller must own `[offset, offset + len)` exclusively: the range was
    /// returned by `try_advance` in the current epoch and no other view of it
    /// exists.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn range_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        let cells = &self.bytes[offset..offset + len];
        // SAFETY: `UnsafeCell<u8>` has the layout of `u8`; exclusivity is
        // guaranteed by the caller.
        unsafe { std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), len) }
    }

    /// Committed prefix of a quiescent slot.
    ///
    /// # Safety
    ///
    /// The slot must be Sealed or Draining so no writer holds a range in it.
    pub(crate) unsafe fn committed(&self, end: usize) -> &[u8] {
        let cells = &self.bytes[..end];
        // SAFETY: no mutable view exists while the slot is quiescent.
        unsafe { std::slice::from_raw_parts(UnsafeCell::raw_get(cells.as_ptr()).cast_const(), end) }
    }
}
