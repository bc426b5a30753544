//! HTTP/2 connection
//!
//! One `Connection` owns one physical duplex stream. Exactly one read
//! task and one write task are alive for its lifetime: the read loop
//! parses one frame at a time and dispatches it, the write loop drains
//! the write queue in batches, coalesces WINDOW_UPDATE frames and puts
//! everything on the wire in order. No other component ever touches the
//! transport halves.
//!
//! Teardown is idempotent and triggered by either loop terminating: the
//! connection faults, every live stream fails once, and still-queued
//! write tasks are resolved as cancelled.

use super::codec::{FrameCodec, FRAME_HEADER_SIZE};
use super::config::ConnectionConfig;
use super::error::{Error, ErrorCode, Result};
use super::frames::{Frame, FrameType, GoawayFrame, PingFrame, SettingsFrame};
use super::pool::StreamPool;
use super::settings::Settings;
use super::stream::StreamManager;
use super::window::WindowSize;
use super::write_queue::{
    prepare_batch, Completion, OutboundFrame, WriteQueue, WriteRequest, WriteTask,
};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID, DEFAULT_INITIAL_WINDOW_SIZE};
use crate::cancel::CancelHandle;
use crate::exchange::Exchange;
use crate::headers::{HeaderDecoder, HeaderEncoder};
use crate::transport::Transport;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Preface and SETTINGS written, loops starting
    Connecting,
    /// Waiting for the peer to acknowledge our SETTINGS
    AwaitingSettings,
    /// Streams may be admitted
    Ready,
    /// GOAWAY sent, existing streams finishing
    Draining,
    /// Torn down
    Closed,
}

struct Shared {
    pool: Arc<StreamPool>,
    queue: WriteQueue,
    conn_window: Arc<WindowSize>,
    fault: CancelHandle,
    encoder: HeaderEncoder,
    state: Mutex<ConnectionState>,
    remote_settings: Mutex<Settings>,
    goaway_code: Mutex<Option<ErrorCode>>,
    fault_error: Mutex<Option<Error>>,
    pings: Mutex<HashMap<[u8; 8], oneshot::Sender<()>>>,
    ping_counter: AtomicU64,
    torn: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Shared {
    fn record_fault(&self, err: Error) {
        let mut slot = lock(&self.fault_error);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take_fault_error(&self) -> Option<Error> {
        lock(&self.fault_error).take()
    }

    /// Idempotent connection-wide teardown
    fn teardown(&self) {
        if self.torn.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("tearing down connection");
        *lock(&self.state) = ConnectionState::Closed;
        self.fault.cancel();
        self.pool.fault_all();
        // Dropping the senders resolves outstanding pings as faulted
        lock(&self.pings).clear();
    }
}

/// One multiplexed HTTP/2 connection to an upstream
pub struct Connection {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Establish the HTTP/2 layer over an existing transport
    ///
    /// Writes the connection preface and initial SETTINGS, starts the
    /// read and write loops, and waits for the peer to acknowledge the
    /// SETTINGS. On timeout both loops are torn down and joined before
    /// `SettingsTimeout` is returned.
    pub async fn connect<T: Transport>(transport: T, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let mut local_settings = config.settings.clone();
        // Server push is rejected by this engine, unconditionally
        local_settings.enable_push = Some(false);

        let (read_half, mut write_half) = tokio::io::split(transport);

        // The write loop is not running yet, so the single-writer rule
        // holds for these two direct writes.
        write_half.write_all(CONNECTION_PREFACE).await?;
        let settings_frame =
            FrameCodec::encode_settings_frame(&SettingsFrame::new(local_settings.clone()));
        write_half.write_all(&settings_frame).await?;
        write_half.flush().await?;
        trace!("preface and initial settings written");

        let fault = CancelHandle::new();
        let conn_window = Arc::new(WindowSize::new(DEFAULT_INITIAL_WINDOW_SIZE));
        let (queue, queue_rx) = WriteQueue::channel();
        let pool = StreamPool::new(
            queue.clone(),
            conn_window.clone(),
            fault.clone(),
            config.local_max_concurrent_streams(),
            local_settings.get_initial_window_size(),
        );

        let shared = Arc::new(Shared {
            pool,
            queue,
            conn_window,
            fault,
            encoder: HeaderEncoder::new(),
            state: Mutex::new(ConnectionState::AwaitingSettings),
            remote_settings: Mutex::new(Settings::new()),
            goaway_code: Mutex::new(None),
            fault_error: Mutex::new(None),
            pings: Mutex::new(HashMap::new()),
            ping_counter: AtomicU64::new(0),
            torn: AtomicBool::new(false),
        });

        let (ack_tx, ack_rx) = oneshot::channel();
        let write_task = tokio::spawn(write_loop(write_half, queue_rx, shared.clone()));
        let read_task = tokio::spawn(read_loop(
            read_half,
            shared.clone(),
            config.read_buffer_size,
            ack_tx,
        ));

        match timeout(config.settings_ack_timeout, ack_rx).await {
            Ok(Ok(())) => {
                if !shared.torn.load(Ordering::Acquire) {
                    *lock(&shared.state) = ConnectionState::Ready;
                }
                debug!("settings acknowledged, connection ready");
                Ok(Connection {
                    shared,
                    tasks: Mutex::new(vec![read_task, write_task]),
                })
            }
            Ok(Err(_)) => {
                // The read loop died before the ack arrived
                shared.teardown();
                let _ = read_task.await;
                let _ = write_task.await;
                Err(shared
                    .take_fault_error()
                    .unwrap_or(Error::ConnectionFaulted))
            }
            Err(_) => {
                shared.teardown();
                let _ = read_task.await;
                let _ = write_task.await;
                Err(Error::SettingsTimeout)
            }
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Whether the connection is in error state
    pub fn is_faulted(&self) -> bool {
        self.shared.fault.is_cancelled()
    }

    /// Error code from a received GOAWAY, if any
    pub fn goaway_code(&self) -> Option<ErrorCode> {
        *lock(&self.shared.goaway_code)
    }

    /// Settings the peer has advertised so far
    pub fn remote_settings(&self) -> Settings {
        lock(&self.shared.remote_settings).clone()
    }

    /// Number of streams currently live on this connection
    pub fn live_streams(&self) -> usize {
        self.shared.pool.live_streams()
    }

    /// The shared header encoder for this connection
    pub fn encoder(&self) -> &HeaderEncoder {
        &self.shared.encoder
    }

    /// Admit an exchange without driving it; the caller sends the
    /// request through the returned manager
    pub async fn open_stream(
        &self,
        exchange: Exchange,
        caller_cancel: Option<CancelHandle>,
    ) -> Result<Arc<StreamManager>> {
        self.shared.pool.create_stream(exchange, caller_cancel).await
    }

    /// Admit an exchange and drive the request side in a background
    /// task; the response arrives through the exchange's handle
    pub async fn submit(&self, exchange: Exchange) -> Result<Arc<StreamManager>> {
        self.submit_with_cancel(exchange, None).await
    }

    /// `submit` with a caller-supplied cancellation handle
    pub async fn submit_with_cancel(
        &self,
        exchange: Exchange,
        caller_cancel: Option<CancelHandle>,
    ) -> Result<Arc<StreamManager>> {
        let manager = self
            .shared
            .pool
            .create_stream(exchange, caller_cancel)
            .await?;

        let shared = self.shared.clone();
        let driver = manager.clone();
        tokio::spawn(async move {
            if let Err(err) = driver.send_request(&shared.encoder).await {
                match err {
                    Error::Cancelled => driver.reset(ErrorCode::Cancel),
                    // The fault sweep already failed the stream
                    Error::ConnectionFaulted => {}
                    err => {
                        debug!(stream_id = driver.id(), error = %err, "request send failed");
                        driver.reset(ErrorCode::InternalError);
                    }
                }
            }
        });
        Ok(manager)
    }

    /// Round-trip a PING through the peer
    pub async fn ping(&self) -> Result<Duration> {
        let seq = self.shared.ping_counter.fetch_add(1, Ordering::Relaxed);
        let data = seq.to_be_bytes();
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pings).insert(data, tx);

        let frame = FrameCodec::encode_ping_frame(&PingFrame::new(data));
        let started = Instant::now();
        if let Err(err) =
            self.shared
                .queue
                .submit_detached(WriteRequest::control(FrameType::Ping, 0, frame))
        {
            lock(&self.shared.pings).remove(&data);
            return Err(err);
        }

        match rx.await {
            Ok(()) => Ok(started.elapsed()),
            Err(_) => Err(Error::ConnectionFaulted),
        }
    }

    /// Graceful shutdown: stop admitting streams, send GOAWAY, wait for
    /// in-flight streams to finish, then tear down
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = lock(&self.shared.state);
            if *state == ConnectionState::Closed {
                return Ok(());
            }
            *state = ConnectionState::Draining;
        }
        self.shared.pool.begin_drain();
        debug!("draining connection");

        let goaway = FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            0,
            ErrorCode::NoError,
            Bytes::new(),
        ));
        if let Ok(done) = self
            .shared
            .queue
            .submit(WriteRequest::control(FrameType::Goaway, 0, goaway))
        {
            let _ = done.await;
        }

        tokio::select! {
            _ = self.shared.fault.cancelled() => {}
            _ = self.shared.pool.wait_drained() => {}
        }

        self.shared.teardown();
        self.join_tasks().await;
        Ok(())
    }

    async fn join_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The owner dropping the handle disposes the connection; the
        // loops observe the fault and exit on their own.
        self.shared.teardown();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pool", &self.shared.pool)
            .finish()
    }
}

/// Read exactly one frame: 9-byte header, then the declared payload
async fn read_frame<T: Transport>(
    rd: &mut ReadHalf<T>,
    max_frame: usize,
) -> Result<Frame> {
    let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
    rd.read_exact(&mut header_bytes).await?;
    let header = FrameCodec::decode_header(&header_bytes);

    if header.length as usize > max_frame {
        return Err(Error::MalformedFrame(format!(
            "frame of {} bytes exceeds the {} byte read buffer",
            header.length, max_frame
        )));
    }

    let mut payload = vec![0u8; header.length as usize];
    if !payload.is_empty() {
        rd.read_exact(&mut payload).await?;
    }
    trace!(
        kind = header.kind,
        stream_id = header.stream_id,
        length = header.length,
        "frame read"
    );
    FrameCodec::decode_payload(&header, Bytes::from(payload))
}

async fn read_loop<T: Transport>(
    mut rd: ReadHalf<T>,
    shared: Arc<Shared>,
    read_buffer_size: usize,
    ack_tx: oneshot::Sender<()>,
) {
    let mut decoder = HeaderDecoder::new();
    let mut ack_tx = Some(ack_tx);
    if let Err(err) = drive_read(&mut rd, &shared, read_buffer_size, &mut decoder, &mut ack_tx).await
    {
        debug!(error = %err, "read loop terminating");
        shared.record_fault(err);
    }
    shared.teardown();
    debug!("read loop terminated");
}

async fn drive_read<T: Transport>(
    rd: &mut ReadHalf<T>,
    shared: &Arc<Shared>,
    read_buffer_size: usize,
    decoder: &mut HeaderDecoder,
    ack_tx: &mut Option<oneshot::Sender<()>>,
) -> Result<()> {
    // Reassembly buffer for header blocks addressed to unknown streams;
    // they are still decoded so the HPACK dynamic table stays in sync.
    let mut orphan_block = BytesMut::new();

    loop {
        let frame = tokio::select! {
            _ = shared.fault.cancelled() => return Ok(()),
            frame = read_frame(rd, read_buffer_size) => frame?,
        };

        match frame {
            Frame::Settings(frame) => {
                if frame.ack {
                    if let Some(tx) = ack_tx.take() {
                        let _ = tx.send(());
                    }
                } else {
                    frame.settings.validate()?;
                    shared.pool.apply_remote_settings(&frame.settings);
                    lock(&shared.remote_settings).merge(&frame.settings);
                    let ack = FrameCodec::encode_settings_frame(&SettingsFrame::ack());
                    shared
                        .queue
                        .submit_detached(WriteRequest::control(FrameType::Settings, 0, ack))?;
                }
            }
            Frame::Ping(frame) => {
                if frame.ack {
                    if let Some(tx) = lock(&shared.pings).remove(&frame.data) {
                        let _ = tx.send(());
                    }
                } else {
                    let pong = FrameCodec::encode_ping_frame(&PingFrame::ack(frame.data));
                    shared
                        .queue
                        .submit_detached(WriteRequest::control(FrameType::Ping, 0, pong))?;
                }
            }
            Frame::WindowUpdate(frame) => {
                if frame.stream_id == CONNECTION_STREAM_ID {
                    shared.conn_window.credit(frame.size_increment);
                } else if let Some(stream) = shared.pool.route(frame.stream_id) {
                    stream.receive_window_update(frame.size_increment);
                } else {
                    trace!(stream_id = frame.stream_id, "window update for unknown stream");
                }
            }
            Frame::Headers(frame) => {
                if let Some(priority) = frame.priority {
                    if let Some(stream) = shared.pool.route(frame.stream_id) {
                        stream.set_priority(
                            priority.weight,
                            priority.stream_dependency,
                            priority.exclusive,
                        );
                    }
                }
                dispatch_header_block(
                    shared,
                    decoder,
                    &mut orphan_block,
                    frame.stream_id,
                    &frame.header_block,
                    frame.end_headers,
                    frame.end_stream,
                )?;
            }
            Frame::Continuation(frame) => {
                dispatch_header_block(
                    shared,
                    decoder,
                    &mut orphan_block,
                    frame.stream_id,
                    &frame.header_block,
                    frame.end_headers,
                    false,
                )?;
            }
            Frame::Data(frame) => {
                let len = frame.data.len();
                if let Some(stream) = shared.pool.route(frame.stream_id) {
                    let receipt = stream.receive_body_fragment(frame.data, frame.end_stream);
                    if receipt.stream_window_increment > 0 {
                        shared.queue.submit_detached(WriteRequest::WindowUpdate {
                            stream_id: frame.stream_id,
                            increment: receipt.stream_window_increment,
                        })?;
                    }
                    if receipt.completed {
                        shared.pool.dispose(&stream);
                    }
                } else {
                    trace!(stream_id = frame.stream_id, len, "data for unknown stream");
                }
                // Unknown-stream data still consumed the connection
                // window, so it is acknowledged either way.
                let conn_increment = shared.pool.note_consumed(len);
                if conn_increment > 0 {
                    shared.queue.submit_detached(WriteRequest::WindowUpdate {
                        stream_id: CONNECTION_STREAM_ID,
                        increment: conn_increment,
                    })?;
                }
            }
            Frame::RstStream(frame) => {
                if let Some(stream) = shared.pool.route(frame.stream_id) {
                    stream.handle_remote_reset(frame.code());
                } else {
                    trace!(stream_id = frame.stream_id, "reset for unknown stream");
                }
            }
            Frame::Priority(frame) => {
                if let Some(stream) = shared.pool.route(frame.stream_id) {
                    stream.set_priority(
                        frame.priority.weight,
                        frame.priority.stream_dependency,
                        frame.priority.exclusive,
                    );
                }
            }
            Frame::Goaway(frame) => {
                debug!(
                    last_stream_id = frame.last_stream_id,
                    code = %frame.code(),
                    "goaway received"
                );
                *lock(&shared.goaway_code) = Some(frame.code());
                return Ok(());
            }
            Frame::PushPromise { stream_id } => {
                warn!(stream_id, "push promise received with push disabled");
                let goaway = FrameCodec::encode_goaway_frame(&GoawayFrame::new(
                    0,
                    ErrorCode::ProtocolError,
                    Bytes::from_static(b"push disabled"),
                ));
                let _ = shared
                    .queue
                    .submit_detached(WriteRequest::control(FrameType::Goaway, 0, goaway));
                return Err(Error::MalformedFrame(
                    "PUSH_PROMISE received with push disabled".to_string(),
                ));
            }
            Frame::Unknown { kind, stream_id } => {
                trace!(kind, stream_id, "unknown frame type ignored");
            }
        }
    }
}

/// Route a header block fragment, keeping HPACK state coherent even for
/// fragments addressed to unknown streams
#[allow(clippy::too_many_arguments)]
fn dispatch_header_block(
    shared: &Arc<Shared>,
    decoder: &mut HeaderDecoder,
    orphan_block: &mut BytesMut,
    stream_id: u32,
    block: &[u8],
    end_headers: bool,
    end_stream: bool,
) -> Result<()> {
    if let Some(stream) = shared.pool.route(stream_id) {
        let completed =
            stream.receive_header_fragment(block, end_headers, end_stream, decoder)?;
        if completed {
            shared.pool.dispose(&stream);
        }
        return Ok(());
    }

    warn!(stream_id, "header block for unknown stream skipped");
    orphan_block.extend_from_slice(block);
    if end_headers {
        let buf = orphan_block.split().freeze();
        let _ = decoder.decode(&buf)?;
    }
    Ok(())
}

async fn write_loop<T: Transport>(
    mut wr: WriteHalf<T>,
    mut rx: mpsc::UnboundedReceiver<WriteTask>,
    shared: Arc<Shared>,
) {
    loop {
        // Block for the first task, then drain everything queued into
        // one batch.
        let first = tokio::select! {
            biased;
            _ = shared.fault.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        let mut batch = vec![first];
        while let Ok(task) = rx.try_recv() {
            batch.push(task);
        }

        let frames = prepare_batch(batch);
        if let Some(err) = write_frames(&mut wr, frames).await {
            debug!(error = %err, "write loop terminating on I/O failure");
            shared.record_fault(Error::Io(err));
            break;
        }
    }

    // Fail everything still queued but never written
    rx.close();
    while let Ok(task) = rx.try_recv() {
        if let Some(done) = task.done {
            let _ = done.send(Err(Error::Cancelled));
        }
    }
    shared.teardown();
    debug!("write loop terminated");
}

/// Write one prepared batch; returns the I/O error that killed the
/// transport, if any
async fn write_frames<T: Transport>(
    wr: &mut WriteHalf<T>,
    frames: Vec<OutboundFrame>,
) -> Option<io::Error> {
    let mut written: Vec<Completion> = Vec::new();
    let mut iter = frames.into_iter();

    while let Some(frame) = iter.next() {
        match wr.write_all(&frame.bytes).await {
            Ok(()) => {
                trace!(len = frame.bytes.len(), "frame written");
                written.extend(frame.done);
            }
            Err(err) => {
                // The failing task gets the real error; everything else
                // in the batch is cancelled, because a partial write
                // corrupts the transport's byte alignment.
                for done in frame.done {
                    let _ = done.send(Err(Error::Io(io::Error::new(
                        err.kind(),
                        err.to_string(),
                    ))));
                }
                for rest in iter.by_ref() {
                    for done in rest.done {
                        let _ = done.send(Err(Error::Cancelled));
                    }
                }
                for done in written {
                    let _ = done.send(Err(Error::Cancelled));
                }
                return Some(err);
            }
        }
    }

    match wr.flush().await {
        Ok(()) => {
            for done in written {
                let _ = done.send(Ok(()));
            }
            None
        }
        Err(err) => {
            for done in written {
                let _ = done.send(Err(Error::Io(io::Error::new(
                    err.kind(),
                    err.to_string(),
                ))));
            }
            Some(err)
        }
    }
}
