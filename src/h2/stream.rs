//! Per-stream state machine
//!
//! A `StreamManager` owns one logical exchange multiplexed over a
//! connection: it drives the request side (HEADERS, then DATA under
//! two-level flow control) and absorbs the response side (header
//! reassembly, body pipe), with an orthogonal terminal reset path
//! reachable from any state.
//!
//! The caller's task drives the send path; the connection's read loop
//! calls the `receive_*` methods. Both sides go through one mutex and
//! never hold it across a suspension point.

use super::codec::{FrameCodec, FRAME_HEADER_SIZE};
use super::error::{Error, ErrorCode, Result};
use super::frames::{DataFrame, FrameType, PrioritySpec, RstStreamFrame};
use super::pool::StreamPool;
use super::window::WindowSize;
use super::write_queue::{WriteQueue, WriteRequest};
use crate::cancel::{CancelCause, CancelScope};
use crate::exchange::{BodySource, Exchange, RequestHead, ResponseHead};
use crate::headers::{HeaderDecoder, HeaderEncoder};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, trace};

/// Lifecycle of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Admitted, nothing sent yet
    Idle,
    /// Request HEADERS submitted to the write queue
    HeaderSent,
    /// Request DATA frames in flight
    BodySending,
    /// Request finished, response header not yet complete
    AwaitingResponseHeader,
    /// Response header delivered, body frames arriving
    ReceivingBody,
    /// Response fully received
    Complete,
    /// Terminal failure (RST_STREAM, cancellation or connection fault)
    Reset(ErrorCode),
}

impl StreamState {
    /// Whether the stream reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Complete | StreamState::Reset(_))
    }
}

/// Result of feeding one DATA frame into a stream
#[derive(Debug, Default)]
pub(crate) struct BodyReceipt {
    /// Stream completed (read loop should dispose it)
    pub completed: bool,
    /// Non-zero once the stream's receive accounting crossed the
    /// ack-every-half-window threshold
    pub stream_window_increment: u32,
    /// Bytes accepted (feeds connection-level accounting)
    pub consumed: usize,
}

struct Inner {
    state: StreamState,
    priority: Option<PrioritySpec>,
    head: Option<RequestHead>,
    body: Option<BodySource>,
    header_buf: BytesMut,
    pending_end_stream: bool,
    response_header_seen: bool,
    header_tx: Option<oneshot::Sender<Result<ResponseHead>>>,
    body_tx: Option<UnboundedSender<Result<Bytes>>>,
    permit: Option<OwnedSemaphorePermit>,
    recv_consumed: u64,
}

/// One logical exchange in flight on a connection
pub struct StreamManager {
    id: u32,
    window: WindowSize,
    conn_window: Arc<WindowSize>,
    queue: WriteQueue,
    cancel: CancelScope,
    pool: Weak<StreamPool>,
    peer_max_frame_size: Arc<AtomicU32>,
    local_window: u32,
    disposed: AtomicBool,
    inner: Mutex<Inner>,
}

impl StreamManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u32,
        exchange: Exchange,
        cancel: CancelScope,
        pool: Weak<StreamPool>,
        conn_window: Arc<WindowSize>,
        queue: WriteQueue,
        peer_max_frame_size: Arc<AtomicU32>,
        send_window: u32,
        local_window: u32,
        permit: OwnedSemaphorePermit,
    ) -> Arc<Self> {
        let priority = exchange.head.priority;
        Arc::new(StreamManager {
            id,
            window: WindowSize::new(send_window),
            conn_window,
            queue,
            cancel,
            pool,
            peer_max_frame_size,
            local_window,
            disposed: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                state: StreamState::Idle,
                priority,
                head: Some(exchange.head),
                body: Some(exchange.body),
                header_buf: BytesMut::new(),
                pending_end_stream: false,
                response_header_seen: false,
                header_tx: Some(exchange.header_tx),
                body_tx: Some(exchange.body_tx),
                permit: Some(permit),
                recv_consumed: 0,
            }),
        })
    }

    /// Stream identifier (odd, unique for the connection's lifetime)
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Current state
    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    /// This stream's outbound flow-control window
    pub(crate) fn window(&self) -> &WindowSize {
        &self.window
    }

    /// Store priority for inclusion in subsequent write-task ordering
    pub fn set_priority(&self, weight: u8, dependency: u32, exclusive: bool) {
        self.lock().priority = Some(PrioritySpec::new(dependency, exclusive, weight));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panicked task mid-update; the stream
        // is unusable either way, so propagate the inner state as-is.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cancel_error(cause: CancelCause) -> Error {
        match cause {
            CancelCause::Caller => Error::Cancelled,
            CancelCause::Connection => Error::ConnectionFaulted,
        }
    }

    /// Drive the full request side: header, then body
    pub async fn send_request(&self, encoder: &HeaderEncoder) -> Result<()> {
        self.enqueue_request_header(encoder).await?;
        self.send_request_body().await
    }

    /// Encode and submit the request HEADERS, awaiting the physical
    /// write
    ///
    /// END_STREAM is set when the exchange has no body.
    pub async fn enqueue_request_header(&self, encoder: &HeaderEncoder) -> Result<()> {
        let (head, priority, end_stream) = {
            let mut inner = self.lock();
            if let StreamState::Reset(code) = inner.state {
                return Err(Error::StreamReset(code));
            }
            let head = match inner.head.take() {
                Some(head) => head,
                None => return Err(Error::Cancelled),
            };
            let end_stream = inner
                .body
                .as_ref()
                .map(|body| body.is_known_empty())
                .unwrap_or(true);
            let priority = inner.priority;
            inner.state = StreamState::HeaderSent;
            (head, priority, end_stream)
        };

        let max_frame = self.peer_max_frame_size.load(Ordering::Acquire) as usize;
        let bytes = encoder.encode(&head.fields, self.id, priority, end_stream, max_frame)?;

        let completion = self.queue.submit(WriteRequest::Frame {
            kind: FrameType::Headers,
            stream_id: self.id,
            dependency: priority.map(|p| p.stream_dependency).unwrap_or(0),
            weight: priority.map(|p| p.weight).unwrap_or(0),
            bytes,
        })?;

        let written = tokio::select! {
            cause = self.cancel.cancelled() => return Err(Self::cancel_error(cause)),
            result = completion => result,
        };
        written.map_err(|_| Error::ConnectionFaulted)??;
        trace!(stream_id = self.id, end_stream, "request header written");

        let mut inner = self.lock();
        if inner.state == StreamState::HeaderSent {
            inner.state = if end_stream {
                StreamState::AwaitingResponseHeader
            } else {
                StreamState::BodySending
            };
        }
        Ok(())
    }

    /// Stream the request body as DATA frames under flow control
    ///
    /// Each frame books credit from the stream window and then the
    /// connection window; a short read refunds the unused credit to
    /// both immediately. The final frame (possibly empty) carries
    /// END_STREAM.
    pub async fn send_request_body(&self) -> Result<()> {
        let mut body = {
            let mut inner = self.lock();
            if let StreamState::Reset(code) = inner.state {
                return Err(Error::StreamReset(code));
            }
            match inner.body.take() {
                Some(body) => body,
                None => return Ok(()),
            }
        };

        // Header already carried END_STREAM for a known-empty body
        if body.is_known_empty() {
            return Ok(());
        }

        loop {
            let budget = (self.peer_max_frame_size.load(Ordering::Acquire) as usize)
                .saturating_sub(FRAME_HEADER_SIZE)
                .max(1);

            let stream_grant = tokio::select! {
                cause = self.cancel.cancelled() => return Err(Self::cancel_error(cause)),
                granted = self.window.book(budget) => granted,
            };
            let booked = tokio::select! {
                cause = self.cancel.cancelled() => {
                    self.window.refund(stream_grant);
                    return Err(Self::cancel_error(cause));
                }
                granted = self.conn_window.book(stream_grant) => {
                    if granted < stream_grant {
                        self.window.refund(stream_grant - granted);
                    }
                    granted
                }
            };

            let chunk = tokio::select! {
                cause = self.cancel.cancelled() => {
                    self.window.refund(booked);
                    self.conn_window.refund(booked);
                    return Err(Self::cancel_error(cause));
                }
                chunk = body.pull(booked) => chunk,
            };

            match chunk {
                Some(data) => {
                    let unused = booked - data.len();
                    if unused > 0 {
                        self.window.refund(unused);
                        self.conn_window.refund(unused);
                    }
                    let last = body.is_known_empty();
                    self.write_data_frame(data, last).await?;
                    if last {
                        break;
                    }
                }
                None => {
                    // Body ended exactly on a chunk boundary: close the
                    // stream with an empty END_STREAM frame and give the
                    // unused booking back.
                    self.window.refund(booked);
                    self.conn_window.refund(booked);
                    self.write_data_frame(Bytes::new(), true).await?;
                    break;
                }
            }
        }

        let mut inner = self.lock();
        if matches!(
            inner.state,
            StreamState::HeaderSent | StreamState::BodySending
        ) {
            inner.state = StreamState::AwaitingResponseHeader;
        }
        Ok(())
    }

    async fn write_data_frame(&self, data: Bytes, end_stream: bool) -> Result<()> {
        let len = data.len();
        let frame = DataFrame::new(self.id, data, end_stream);
        let (dependency, weight) = {
            let inner = self.lock();
            match inner.priority {
                Some(p) => (p.stream_dependency, p.weight),
                None => (0, 0),
            }
        };
        let completion = self.queue.submit(WriteRequest::Frame {
            kind: FrameType::Data,
            stream_id: self.id,
            dependency,
            weight,
            bytes: FrameCodec::encode_data_frame(&frame),
        })?;

        let written = tokio::select! {
            cause = self.cancel.cancelled() => return Err(Self::cancel_error(cause)),
            result = completion => result,
        };
        written.map_err(|_| Error::ConnectionFaulted)??;
        trace!(stream_id = self.id, len, end_stream, "data frame written");
        Ok(())
    }

    /// Absorb a HEADERS or CONTINUATION fragment from the read loop
    ///
    /// Returns `true` when the stream completed (HEADERS carried
    /// END_STREAM), so the caller disposes it.
    pub(crate) fn receive_header_fragment(
        &self,
        block: &[u8],
        end_headers: bool,
        end_stream: bool,
        decoder: &mut HeaderDecoder,
    ) -> Result<bool> {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            trace!(stream_id = self.id, "header fragment for finished stream ignored");
            return Ok(false);
        }

        inner.header_buf.extend_from_slice(block);
        inner.pending_end_stream |= end_stream;
        if !end_headers {
            return Ok(false);
        }

        let buf = inner.header_buf.split().freeze();
        let fields = decoder.decode(&buf)?;

        if inner.response_header_seen {
            // Trailers: decoded to keep HPACK state coherent, dropped
            debug!(stream_id = self.id, count = fields.len(), "trailers dropped");
        } else {
            inner.response_header_seen = true;
            if let Some(tx) = inner.header_tx.take() {
                let _ = tx.send(Ok(ResponseHead { fields }));
            }
        }

        if inner.pending_end_stream {
            inner.body_tx = None;
            inner.state = StreamState::Complete;
            debug!(stream_id = self.id, "response complete on headers");
            return Ok(true);
        }

        if inner.state != StreamState::ReceivingBody {
            inner.state = StreamState::ReceivingBody;
        }
        Ok(false)
    }

    /// Absorb a DATA frame from the read loop
    pub(crate) fn receive_body_fragment(&self, data: Bytes, end_stream: bool) -> BodyReceipt {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            trace!(stream_id = self.id, "data for finished stream ignored");
            return BodyReceipt::default();
        }

        let consumed = data.len();
        if let Some(tx) = &inner.body_tx {
            // A dropped receiver means the caller abandoned the body;
            // keep draining frames so the connection stays healthy.
            let _ = tx.send(Ok(data));
        }

        let mut receipt = BodyReceipt {
            consumed,
            ..BodyReceipt::default()
        };

        inner.recv_consumed += consumed as u64;
        if !end_stream && inner.recv_consumed * 2 >= u64::from(self.local_window) {
            receipt.stream_window_increment = inner.recv_consumed.min(0x7FFF_FFFF) as u32;
            inner.recv_consumed = 0;
        }

        if end_stream {
            inner.body_tx = None;
            inner.state = StreamState::Complete;
            receipt.completed = true;
            debug!(stream_id = self.id, "response body complete");
        }
        receipt
    }

    /// Credit this stream's send window (WINDOW_UPDATE from the peer)
    pub(crate) fn receive_window_update(&self, increment: u32) {
        self.window.credit(increment);
    }

    /// Peer reset: fail the exchange and dispose the stream
    pub(crate) fn handle_remote_reset(&self, code: ErrorCode) {
        debug!(stream_id = self.id, code = %code, "stream reset by peer");
        self.fail_with(code, || Error::StreamReset(code));
        if let Some(pool) = self.pool.upgrade() {
            pool.dispose(self);
        }
    }

    /// Self-initiated reset: send RST_STREAM, fail the exchange,
    /// dispose the stream
    pub fn reset(&self, code: ErrorCode) {
        debug!(stream_id = self.id, code = %code, "resetting stream");
        let frame = FrameCodec::encode_rst_stream_frame(&RstStreamFrame::new(self.id, code));
        let _ = self.queue.submit_detached(WriteRequest::control(
            FrameType::RstStream,
            self.id,
            frame,
        ));
        self.fail_with(code, || Error::StreamReset(code));
        if let Some(pool) = self.pool.upgrade() {
            pool.dispose(self);
        }
    }

    /// Connection-fault path: fail the exchange without touching the
    /// registry (the pool is draining it)
    pub(crate) fn fail_connection(&self) {
        self.fail_with(ErrorCode::InternalError, || Error::ConnectionFaulted);
    }

    /// Fail every waiter exactly once and enter the terminal state
    fn fail_with(&self, code: ErrorCode, make_error: impl Fn() -> Error) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = StreamState::Reset(code);
        inner.head = None;
        inner.body = None;
        if let Some(tx) = inner.header_tx.take() {
            let _ = tx.send(Err(make_error()));
        }
        if let Some(tx) = inner.body_tx.take() {
            let _ = tx.send(Err(make_error()));
        }
    }

    /// First call wins; later calls see an already-disposed stream
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    /// Release the admission permit (exactly once, via `mark_disposed`)
    pub(crate) fn release_permit(&self) {
        self.lock().permit = None;
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
