//! Cancellation signals
//!
//! A `CancelHandle` is a broadcast flag that can be fired once and
//! observed from any number of tasks without polling. Each stream runs
//! under a `CancelScope` combining an optional caller-supplied handle
//! with the connection's fault handle, so firing either one cancels that
//! stream's pending operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// One-shot broadcast cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    /// Create an unfired handle
    pub fn new() -> Self {
        CancelHandle::default()
    }

    /// Fire the handle, waking every waiter; subsequent calls are no-ops
    pub fn cancel(&self) {
        self.inner.fired.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether the handle has fired
    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Resolve once the handle fires; resolves immediately if it
    /// already has
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Which side of a scope fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The caller abandoned this stream
    Caller,
    /// The owning connection faulted
    Connection,
}

/// Per-stream cancellation scope
///
/// Combines the caller's handle (if any) with the connection's fault
/// handle. The connection side is checked with priority so a faulted
/// connection reports as such even when both fired.
#[derive(Debug, Clone)]
pub struct CancelScope {
    caller: Option<CancelHandle>,
    connection: CancelHandle,
}

impl CancelScope {
    /// Create a scope from an optional caller handle and the
    /// connection's fault handle
    pub fn new(caller: Option<CancelHandle>, connection: CancelHandle) -> Self {
        CancelScope { caller, connection }
    }

    /// Non-blocking check; `None` while neither side has fired
    pub fn cause(&self) -> Option<CancelCause> {
        if self.connection.is_cancelled() {
            return Some(CancelCause::Connection);
        }
        if let Some(caller) = &self.caller {
            if caller.is_cancelled() {
                return Some(CancelCause::Caller);
            }
        }
        None
    }

    /// Resolve once either side fires
    ///
    /// Biased toward the connection side so this agrees with `cause()`
    /// when both handles have fired.
    pub async fn cancelled(&self) -> CancelCause {
        match &self.caller {
            Some(caller) => {
                tokio::select! {
                    biased;
                    _ = self.connection.cancelled() => CancelCause::Connection,
                    _ = caller.cancelled() => CancelCause::Caller,
                }
            }
            None => {
                self.connection.cancelled().await;
                CancelCause::Connection
            }
        }
    }
}
