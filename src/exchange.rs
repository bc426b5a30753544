//! Logical request/response exchanges
//!
//! An `Exchange` is what the proxy core hands to the engine: the
//! outbound header fields, a body source, and the slots the engine
//! publishes the response into. The matching `ResponseHandle` is the
//! caller's side: a one-shot future for the response header and a byte
//! pipe for the body.
//!
//! The engine never interprets header semantics beyond framing; whether
//! a request has a body (and therefore whether HEADERS carries
//! END_STREAM) is decided here by the body source.

use crate::h2::error::{Error, ErrorCode, Result};
use crate::h2::frames::PrioritySpec;
use crate::headers::HeaderField;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot};

/// Outbound request header
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Header fields in encode order (pseudo-headers first)
    pub fields: Vec<HeaderField>,
    /// Optional priority advertised with the request
    pub priority: Option<PrioritySpec>,
}

impl RequestHead {
    /// Create a head from fields, without priority
    pub fn new(fields: Vec<HeaderField>) -> Self {
        RequestHead {
            fields,
            priority: None,
        }
    }

    /// Attach a priority
    pub fn with_priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Inbound response header
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// Decoded header fields
    pub fields: Vec<HeaderField>,
}

impl ResponseHead {
    /// The `:status` pseudo-header, if present and numeric
    pub fn status(&self) -> Option<u16> {
        self.fields
            .iter()
            .find(|field| field.name == ":status")
            .and_then(|field| field.value.parse().ok())
    }
}

/// Source of outbound request body bytes
///
/// A pull-based cursor: the stream's send loop asks for at most the
/// number of bytes it has booked flow-control credit for, and whatever
/// the source cannot supply is refunded.
#[derive(Debug)]
pub struct BodySource {
    chunks: VecDeque<Bytes>,
    channel: Option<mpsc::Receiver<Bytes>>,
}

impl BodySource {
    /// A request with no body
    pub fn empty() -> Self {
        BodySource {
            chunks: VecDeque::new(),
            channel: None,
        }
    }

    /// A fully buffered body
    pub fn buffered(data: Bytes) -> Self {
        let mut chunks = VecDeque::new();
        if !data.is_empty() {
            chunks.push_back(data);
        }
        BodySource {
            chunks,
            channel: None,
        }
    }

    /// A streamed body fed through a channel; the sender closing the
    /// channel marks the end of the body
    pub fn streamed(rx: mpsc::Receiver<Bytes>) -> Self {
        BodySource {
            chunks: VecDeque::new(),
            channel: Some(rx),
        }
    }

    /// Whether the body is known to be over
    ///
    /// True before the first pull for an empty buffered body (deciding
    /// END_STREAM on the HEADERS frame), and after the last pull once
    /// every chunk is drained and the feeding channel has closed.
    pub fn is_known_empty(&self) -> bool {
        self.chunks.is_empty() && self.channel.is_none()
    }

    /// Pull up to `max` bytes; `None` once the body is exhausted
    pub async fn pull(&mut self, max: usize) -> Option<Bytes> {
        if max == 0 {
            return Some(Bytes::new());
        }
        loop {
            if let Some(front) = self.chunks.front_mut() {
                if front.is_empty() {
                    self.chunks.pop_front();
                    continue;
                }
                let take = front.len().min(max);
                let out = front.split_to(take);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                self.drain_ready();
                return Some(out);
            }
            match &mut self.channel {
                Some(rx) => match rx.recv().await {
                    Some(chunk) => {
                        self.chunks.push_back(chunk);
                        self.drain_ready();
                    }
                    None => {
                        self.channel = None;
                        return None;
                    }
                },
                None => return None,
            }
        }
    }

    /// Fold in whatever the sender has already queued, so a finished
    /// sender is observed before the final chunk is framed (the last
    /// DATA frame should carry END_STREAM instead of being followed by
    /// an empty one)
    fn drain_ready(&mut self) {
        if let Some(rx) = &mut self.channel {
            loop {
                match rx.try_recv() {
                    Ok(chunk) => self.chunks.push_back(chunk),
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        self.channel = None;
                        break;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                }
            }
        }
    }
}

/// One logical exchange submitted to the engine
pub struct Exchange {
    /// Request header fields
    pub head: RequestHead,
    /// Request body source
    pub body: BodySource,
    pub(crate) header_tx: oneshot::Sender<Result<ResponseHead>>,
    pub(crate) body_tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl Exchange {
    /// Create an exchange and the handle its response arrives through
    pub fn new(head: RequestHead, body: BodySource) -> (Exchange, ResponseHandle) {
        let (header_tx, header_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        (
            Exchange {
                head,
                body,
                header_tx,
                body_tx,
            },
            ResponseHandle {
                header_rx: Some(header_rx),
                header: None,
                body_rx,
            },
        )
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("head", &self.head)
            .field("body", &self.body)
            .finish()
    }
}

/// Caller-side view of an exchange's response
pub struct ResponseHandle {
    header_rx: Option<oneshot::Receiver<Result<ResponseHead>>>,
    header: Option<ResponseHead>,
    body_rx: mpsc::UnboundedReceiver<Result<Bytes>>,
}

impl ResponseHandle {
    /// Await the response header
    ///
    /// Resolves with the stream's failure when the exchange dies before
    /// headers arrive. Repeated calls return the already-received head.
    pub async fn header(&mut self) -> Result<ResponseHead> {
        if let Some(head) = &self.header {
            return Ok(head.clone());
        }
        let rx = match self.header_rx.take() {
            Some(rx) => rx,
            None => return Err(Error::StreamReset(ErrorCode::InternalError)),
        };
        match rx.await {
            Ok(Ok(head)) => {
                self.header = Some(head.clone());
                Ok(head)
            }
            Ok(Err(err)) => Err(err),
            // Publisher dropped without resolving: the connection died
            Err(_) => Err(Error::ConnectionFaulted),
        }
    }

    /// Next body chunk; `None` once the body completed cleanly
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.body_rx.recv().await
    }

    /// Drain the body to completion into one buffer
    pub async fn body(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.body_rx.recv().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }
}
