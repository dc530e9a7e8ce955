//! Wake signal between the buffer's writers and its drain.
//!
//! A counter guarded by a mutex and paired with a condition variable. Waiters
//! take a token before checking their condition and only sleep if no
//! notification arrived since, so a wake-up between check and wait is never
//! lost.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Edge-triggered wake signal
#[derive(Debug, Default)]
pub struct Signal {
    seq: Mutex<u64>,
    cond: Condvar,
}

impl Signal {
    /// Create a new signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Current notification count
    pub fn token(&self) -> u64 {
        *self.seq.lock()
    }

    /// Wake every waiter
    pub fn notify(&self) {
        let mut seq = self.seq.lock();
        *seq = seq.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Sleep until a notification newer than `token` arrives or `timeout`
    /// elapses. Returns true if notified.
    pub fn wait_since(&self, token: u64, timeout: Duration) -> bool {
        let mut seq = self.seq.lock();
        if *seq != token {
            return true;
        }
        // A spurious wake-up just returns early; callers re-check state.
        let _ = self.cond.wait_for(&mut seq, timeout);
        *seq != token
    }
}
