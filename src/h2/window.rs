//! Flow-control window holder
//!
//! A `WindowSize` tracks one direction of send credit, either for a
//! single stream or shared across the whole connection. Booking takes
//! credit (suspending while none is available), crediting adds it back
//! and wakes every suspended booker. Crediting never takes a lock, so a
//! producer posting WINDOW_UPDATE credit cannot be stalled by bookers.

use super::MAX_WINDOW_SIZE;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Notify;

/// Async flow-control credit holder
#[derive(Debug)]
pub struct WindowSize {
    credit: AtomicI64,
    notify: Notify,
}

impl WindowSize {
    /// Create a holder with the given initial credit
    pub fn new(initial: u32) -> Self {
        WindowSize {
            credit: AtomicI64::new(i64::from(initial)),
            notify: Notify::new(),
        }
    }

    /// Current credit; may be negative after an initial-window-size
    /// renegotiation shrank live windows
    pub fn available(&self) -> i64 {
        self.credit.load(Ordering::Acquire)
    }

    /// Take up to `want` bytes of credit without waiting
    ///
    /// Returns the granted amount, 0 when no credit is available.
    pub fn try_book(&self, want: usize) -> usize {
        let want = want as i64;
        if want == 0 {
            return 0;
        }
        let mut current = self.credit.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return 0;
            }
            let grant = current.min(want);
            match self.credit.compare_exchange_weak(
                current,
                current - grant,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return grant as usize,
                Err(actual) => current = actual,
            }
        }
    }

    /// Take up to `want` bytes of credit, suspending while the window
    /// is empty
    ///
    /// Grants are all-or-nothing up to the request: the caller receives
    /// `min(want, credit)` and books again for any remainder. The wait
    /// composes with cancellation via `select!`.
    pub async fn book(&self, want: usize) -> usize {
        if want == 0 {
            return 0;
        }
        loop {
            // Register for wakeup before the credit check so an update
            // arriving between the check and the await is not lost.
            let notified = self.notify.notified();
            let granted = self.try_book(want);
            if granted > 0 {
                return granted;
            }
            notified.await;
        }
    }

    /// Add credit (WINDOW_UPDATE), saturating at 2^31-1, and wake all
    /// suspended bookers
    pub fn credit(&self, increment: u32) {
        self.add(i64::from(increment));
    }

    /// Return unused credit from a short read
    ///
    /// Identical to crediting: the refund must be visible to other
    /// bookers immediately, not at end-of-stream.
    pub fn refund(&self, amount: usize) {
        if amount > 0 {
            self.add(amount as i64);
        }
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE delta; may drive the credit
    /// negative, in which case bookers stay suspended until enough
    /// WINDOW_UPDATE credit arrives
    pub fn adjust(&self, delta: i64) {
        self.add(delta);
    }

    fn add(&self, delta: i64) {
        let mut current = self.credit.load(Ordering::Acquire);
        loop {
            let new = (current + delta).min(MAX_WINDOW_SIZE);
            match self.credit.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if delta > 0 {
            self.notify.notify_waiters();
        }
    }
}
