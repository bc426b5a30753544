//! Stream admission and routing
//!
//! The `StreamPool` is the connection's registry of live streams: it
//! bounds concurrency with a counting semaphore sized to the negotiated
//! max-concurrent-streams, hands out odd stream identifiers (assigned
//! once, never reused), routes inbound frames to the owning
//! `StreamManager`, and tears every stream down when the connection
//! faults.
//!
//! Disposal is idempotent: each stream releases its admission permit
//! exactly once no matter how many paths (completion, reset, fault)
//! race to finish it.

use super::error::{Error, Result};
use super::settings::Settings;
use super::stream::StreamManager;
use super::window::WindowSize;
use super::write_queue::WriteQueue;
use super::{DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, MAX_STREAM_ID};
use crate::cancel::{CancelHandle, CancelScope};
use crate::exchange::Exchange;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

/// Admission control and routing table for one connection
pub struct StreamPool {
    registry: Mutex<HashMap<u32, Arc<StreamManager>>>,
    admission: Arc<Semaphore>,
    admission_cap: Mutex<u32>,
    next_id: AtomicU32,
    fault: CancelHandle,
    draining: AtomicBool,
    conn_window: Arc<WindowSize>,
    queue: WriteQueue,
    peer_max_frame_size: Arc<AtomicU32>,
    peer_initial_window: AtomicU32,
    local_initial_window: u32,
    conn_recv_consumed: Mutex<u64>,
    drained: Notify,
}

impl StreamPool {
    /// Create a pool for a fresh connection
    ///
    /// `max_concurrent` is the local cap used until the peer advertises
    /// its own limit; `local_initial_window` is our advertised
    /// SETTINGS_INITIAL_WINDOW_SIZE, the base for per-stream receive
    /// accounting. The connection-level receive window is a separate,
    /// fixed 65535 octets: SETTINGS_INITIAL_WINDOW_SIZE does not apply
    /// to it, and this engine never grows it.
    pub fn new(
        queue: WriteQueue,
        conn_window: Arc<WindowSize>,
        fault: CancelHandle,
        max_concurrent: u32,
        local_initial_window: u32,
    ) -> Arc<Self> {
        Arc::new(StreamPool {
            registry: Mutex::new(HashMap::new()),
            admission: Arc::new(Semaphore::new(max_concurrent as usize)),
            admission_cap: Mutex::new(max_concurrent),
            next_id: AtomicU32::new(1),
            fault,
            draining: AtomicBool::new(false),
            conn_window,
            queue,
            peer_max_frame_size: Arc::new(AtomicU32::new(DEFAULT_MAX_FRAME_SIZE)),
            peer_initial_window: AtomicU32::new(DEFAULT_INITIAL_WINDOW_SIZE),
            local_initial_window,
            conn_recv_consumed: Mutex::new(0),
            drained: Notify::new(),
        })
    }

    fn registry_lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<StreamManager>>> {
        match self.registry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Admit one exchange, blocking while the concurrency limit is
    /// reached
    ///
    /// Fails with `ConnectionFaulted` once the connection is in error
    /// state or draining; no new streams are admitted post-fault.
    pub async fn create_stream(
        self: &Arc<Self>,
        exchange: Exchange,
        caller_cancel: Option<CancelHandle>,
    ) -> Result<Arc<StreamManager>> {
        if self.fault.is_cancelled() || self.draining.load(Ordering::Acquire) {
            return Err(Error::ConnectionFaulted);
        }

        let permit = tokio::select! {
            _ = self.fault.cancelled() => return Err(Error::ConnectionFaulted),
            permit = self.admission.clone().acquire_owned() => {
                permit.map_err(|_| Error::ConnectionFaulted)?
            }
        };

        let id = self.next_id.fetch_add(2, Ordering::Relaxed);
        if id > MAX_STREAM_ID {
            warn!("stream identifier space exhausted");
            return Err(Error::ConnectionFaulted);
        }

        let scope = CancelScope::new(caller_cancel, self.fault.clone());
        let manager = StreamManager::new(
            id,
            exchange,
            scope,
            Arc::downgrade(self),
            self.conn_window.clone(),
            self.queue.clone(),
            self.peer_max_frame_size.clone(),
            self.peer_initial_window.load(Ordering::Acquire),
            self.local_initial_window,
            permit,
        );

        self.registry_lock().insert(id, manager.clone());

        // Admission raced the connection dying: the fault sweep may
        // already have drained the registry, so finish this stream the
        // same way and report the fault.
        if self.fault.is_cancelled() {
            self.dispose(&manager);
            manager.fail_connection();
            return Err(Error::ConnectionFaulted);
        }

        debug!(stream_id = id, "stream admitted");
        Ok(manager)
    }

    /// Look up the stream a frame belongs to
    ///
    /// `None` means the frame refers to an unknown or already-closed
    /// stream; the read loop skips it.
    pub fn route(&self, stream_id: u32) -> Option<Arc<StreamManager>> {
        self.registry_lock().get(&stream_id).cloned()
    }

    /// Remove a stream and release its admission slot (idempotent)
    pub fn dispose(&self, stream: &StreamManager) {
        if !stream.mark_disposed() {
            return;
        }
        self.registry_lock().remove(&stream.id());
        stream.release_permit();
        debug!(stream_id = stream.id(), "stream disposed");
        self.drained.notify_waiters();
    }

    /// Connection-level receive accounting
    ///
    /// Returns a non-zero WINDOW_UPDATE increment once accumulated
    /// consumption exceeds half the connection window, 0 otherwise.
    /// The threshold base is the protocol's fixed 65535-octet
    /// connection window, not the advertised stream initial window,
    /// which never applies at connection level.
    pub fn note_consumed(&self, bytes: usize) -> u32 {
        if bytes == 0 {
            return 0;
        }
        let mut consumed = match self.conn_recv_consumed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *consumed += bytes as u64;
        if *consumed * 2 >= u64::from(DEFAULT_INITIAL_WINDOW_SIZE) {
            let increment = (*consumed).min(0x7FFF_FFFF) as u32;
            *consumed = 0;
            increment
        } else {
            0
        }
    }

    /// Apply a SETTINGS frame from the peer
    ///
    /// Updates the shared max-frame-size, resizes admission to the
    /// peer's stream limit, and applies the initial-window-size delta
    /// to every live stream.
    pub fn apply_remote_settings(&self, settings: &Settings) {
        if let Some(max_frame) = settings.max_frame_size {
            self.peer_max_frame_size.store(max_frame, Ordering::Release);
        }
        if let Some(max_streams) = settings.max_concurrent_streams {
            self.resize_admission(max_streams);
        }
        if let Some(new_window) = settings.initial_window_size {
            let old = self.peer_initial_window.swap(new_window, Ordering::AcqRel);
            let delta = i64::from(new_window) - i64::from(old);
            if delta != 0 {
                for manager in self.registry_lock().values() {
                    manager.window().adjust(delta);
                }
                debug!(delta, "applied initial window delta to live streams");
            }
        }
    }

    fn resize_admission(&self, new_cap: u32) {
        let mut cap = match self.admission_cap.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if new_cap > *cap {
            self.admission.add_permits((new_cap - *cap) as usize);
        } else if new_cap < *cap {
            // Shrinking mid-life is best effort: permits currently held
            // by live streams come back on dispose, so the cap converges
            // as streams finish.
            match self.admission.try_acquire_many(*cap - new_cap) {
                Ok(permit) => permit.forget(),
                Err(_) => warn!(
                    from = *cap,
                    to = new_cap,
                    "cannot shrink admission below live stream count yet"
                ),
            }
        }
        *cap = new_cap;
    }

    /// Stop admitting new streams (graceful close)
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::Release);
    }

    /// Fail every live stream exactly once (connection fault sweep)
    pub fn fault_all(&self) {
        let drained: Vec<Arc<StreamManager>> = {
            let mut registry = self.registry_lock();
            registry.drain().map(|(_, manager)| manager).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing live streams on connection fault");
        }
        for manager in drained {
            manager.fail_connection();
            if manager.mark_disposed() {
                manager.release_permit();
            }
        }
        self.drained.notify_waiters();
    }

    /// Number of live streams
    pub fn live_streams(&self) -> usize {
        self.registry_lock().len()
    }

    /// Free admission slots (for invariant checks and introspection)
    pub fn available_permits(&self) -> usize {
        self.admission.available_permits()
    }

    /// Shared handle to the peer's advertised max frame size
    pub(crate) fn peer_max_frame_size(&self) -> Arc<AtomicU32> {
        self.peer_max_frame_size.clone()
    }

    /// Resolve once the registry is empty
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.registry_lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPool")
            .field("live_streams", &self.live_streams())
            .field("available_permits", &self.available_permits())
            .field("faulted", &self.fault.is_cancelled())
            .finish()
    }
}
