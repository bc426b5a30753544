//! Outbound write task queue
//!
//! Every outbound frame goes through one unbounded multi-producer
//! queue whose single consumer is the connection's write loop. A task
//! carries pre-serialized frame bytes (except WINDOW_UPDATE, which
//! carries a bare increment so a batch can coalesce updates for the
//! same stream into one frame) and an optional completion signal the
//! submitter can await.
//!
//! Batch preparation is pure so the ordering rules are testable without
//! I/O: within one batch, coalesced WINDOW_UPDATE frames are written
//! first (connection-level, then ascending stream id), and the
//! remaining frames are stably ordered with data-bearing frames
//! (HEADERS/DATA/CONTINUATION) ahead of control frames, zero stream
//! dependency ahead of non-zero, then ascending stream id, then
//! descending priority weight. The sort is stable, so frames for the
//! same stream are never reordered against each other.

use super::error::{Error, Result};
use super::frames::{FrameType, WindowUpdateFrame};
use super::codec::FrameCodec;
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};

/// Completion side of one write task
pub type Completion = oneshot::Sender<Result<()>>;

/// Description of one outbound frame
#[derive(Debug)]
pub enum WriteRequest {
    /// A pre-serialized frame (header + body bytes)
    Frame {
        kind: FrameType,
        stream_id: u32,
        /// Stream dependency used only for cross-stream ordering
        dependency: u32,
        /// Priority weight used only for cross-stream ordering
        weight: u8,
        bytes: Bytes,
    },
    /// A WINDOW_UPDATE increment, serialized after coalescing
    WindowUpdate { stream_id: u32, increment: u32 },
}

impl WriteRequest {
    /// Frame bytes for a control frame with neutral ordering fields
    pub fn control(kind: FrameType, stream_id: u32, bytes: Bytes) -> Self {
        WriteRequest::Frame {
            kind,
            stream_id,
            dependency: 0,
            weight: 0,
            bytes,
        }
    }
}

/// One queued write
#[derive(Debug)]
pub struct WriteTask {
    pub request: WriteRequest,
    pub done: Option<Completion>,
}

/// Multi-producer handle to a connection's write loop
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteTask>,
}

impl WriteQueue {
    /// Create the queue and the consumer end for the write loop
    pub fn channel() -> (WriteQueue, mpsc::UnboundedReceiver<WriteTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (WriteQueue { tx }, rx)
    }

    /// Submit a task and receive a completion to await
    ///
    /// Fails with `ConnectionFaulted` once the write loop is gone.
    pub fn submit(&self, request: WriteRequest) -> Result<oneshot::Receiver<Result<()>>> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(WriteTask {
                request,
                done: Some(done),
            })
            .map_err(|_| Error::ConnectionFaulted)?;
        Ok(rx)
    }

    /// Submit a task without waiting for the physical write
    pub fn submit_detached(&self, request: WriteRequest) -> Result<()> {
        self.tx
            .send(WriteTask {
                request,
                done: None,
            })
            .map_err(|_| Error::ConnectionFaulted)
    }
}

/// One wire write produced from a batch
#[derive(Debug)]
pub struct OutboundFrame {
    /// Frame bytes to put on the wire
    pub bytes: Bytes,
    /// Completions resolved when this write finishes (a coalesced
    /// WINDOW_UPDATE resolves every task folded into it)
    pub done: Vec<Completion>,
}

/// Turn one drained batch into ordered wire writes
pub fn prepare_batch(batch: Vec<WriteTask>) -> Vec<OutboundFrame> {
    let mut updates: BTreeMap<u32, (u64, Vec<Completion>)> = BTreeMap::new();
    let mut frames = Vec::new();

    for task in batch {
        match task.request {
            WriteRequest::WindowUpdate {
                stream_id,
                increment,
            } => {
                let entry = updates.entry(stream_id).or_insert((0, Vec::new()));
                entry.0 += u64::from(increment);
                if let Some(done) = task.done {
                    entry.1.push(done);
                }
            }
            WriteRequest::Frame { .. } => frames.push(task),
        }
    }

    // BTreeMap iteration yields the connection-level entry (stream 0)
    // first, then streams in ascending order.
    let mut out: Vec<OutboundFrame> = updates
        .into_iter()
        .map(|(stream_id, (sum, done))| {
            let increment = sum.min(0x7FFF_FFFF) as u32;
            OutboundFrame {
                bytes: FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(
                    stream_id, increment,
                )),
                done,
            }
        })
        .collect();

    frames.sort_by_key(|task| match &task.request {
        WriteRequest::Frame {
            kind,
            stream_id,
            dependency,
            weight,
            ..
        } => (
            // Data-bearing frames ahead of control frames
            u8::from(!kind.carries_payload()),
            u8::from(*dependency != 0),
            *stream_id,
            u8::MAX - *weight,
        ),
        WriteRequest::WindowUpdate { .. } => unreachable!("window updates were partitioned out"),
    });

    out.extend(frames.into_iter().map(|task| match task.request {
        WriteRequest::Frame { bytes, .. } => OutboundFrame {
            bytes,
            done: task.done.into_iter().collect(),
        },
        WriteRequest::WindowUpdate { .. } => unreachable!("window updates were partitioned out"),
    }));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h2::codec::FRAME_HEADER_SIZE;
    use crate::h2::frames::{Frame, FrameHeader};

    fn frame_task(kind: FrameType, stream_id: u32, tag: &'static [u8]) -> WriteTask {
        WriteTask {
            request: WriteRequest::Frame {
                kind,
                stream_id,
                dependency: 0,
                weight: 0,
                bytes: Bytes::from_static(tag),
            },
            done: None,
        }
    }

    fn window_task(stream_id: u32, increment: u32) -> WriteTask {
        WriteTask {
            request: WriteRequest::WindowUpdate {
                stream_id,
                increment,
            },
            done: None,
        }
    }

    fn decode_window_update(bytes: &Bytes) -> WindowUpdateFrame {
        let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
        header_bytes.copy_from_slice(&bytes[..FRAME_HEADER_SIZE]);
        let header: FrameHeader = FrameCodec::decode_header(&header_bytes);
        match FrameCodec::decode_payload(&header, bytes.slice(FRAME_HEADER_SIZE..)).unwrap() {
            Frame::WindowUpdate(frame) => frame,
            other => panic!("expected WINDOW_UPDATE, got {:?}", other),
        }
    }

    #[test]
    fn test_window_updates_coalesce_per_stream_before_data() {
        let batch = vec![
            window_task(3, 100),
            window_task(3, 50),
            frame_task(FrameType::Data, 3, b"data-3"),
        ];

        let out = prepare_batch(batch);
        assert_eq!(out.len(), 2);

        let update = decode_window_update(&out[0].bytes);
        assert_eq!(update.stream_id, 3);
        assert_eq!(update.size_increment, 150);

        assert_eq!(out[1].bytes, Bytes::from_static(b"data-3"));
    }

    #[test]
    fn test_connection_level_update_written_first() {
        let batch = vec![
            window_task(5, 10),
            window_task(0, 20),
            window_task(3, 30),
        ];

        let out = prepare_batch(batch);
        let streams: Vec<u32> = out
            .iter()
            .map(|frame| decode_window_update(&frame.bytes).stream_id)
            .collect();
        assert_eq!(streams, vec![0, 3, 5]);
    }

    #[test]
    fn test_coalesced_increment_saturates() {
        let batch = vec![window_task(1, 0x7FFF_FFFF), window_task(1, 0x7FFF_FFFF)];
        let out = prepare_batch(batch);
        assert_eq!(decode_window_update(&out[0].bytes).size_increment, 0x7FFF_FFFF);
    }

    #[test]
    fn test_data_bearing_frames_ahead_of_control() {
        // Data-bearing frames are deliberately ranked ahead of control
        // frames within a batch; coalesced WINDOW_UPDATE frames are the
        // exception and lead the batch.
        let batch = vec![
            frame_task(FrameType::RstStream, 5, b"rst-5"),
            frame_task(FrameType::Data, 7, b"data-7"),
            frame_task(FrameType::Headers, 3, b"hdr-3"),
            frame_task(FrameType::Ping, 0, b"ping"),
        ];

        let out = prepare_batch(batch);
        let order: Vec<&[u8]> = out.iter().map(|frame| frame.bytes.as_ref()).collect();
        assert_eq!(
            order,
            vec![
                b"hdr-3".as_ref(),
                b"data-7".as_ref(),
                b"ping".as_ref(),
                b"rst-5".as_ref(),
            ]
        );
    }

    #[test]
    fn test_same_stream_order_is_preserved() {
        // HEADERS then DATA for the same stream must never swap, no
        // matter how the batch is mixed.
        let batch = vec![
            frame_task(FrameType::Data, 9, b"data-9"),
            frame_task(FrameType::Headers, 3, b"hdr-3"),
            frame_task(FrameType::Data, 3, b"data-3a"),
            frame_task(FrameType::Data, 3, b"data-3b"),
        ];

        let out = prepare_batch(batch);
        let order: Vec<&[u8]> = out.iter().map(|frame| frame.bytes.as_ref()).collect();
        assert_eq!(
            order,
            vec![
                b"hdr-3".as_ref(),
                b"data-3a".as_ref(),
                b"data-3b".as_ref(),
                b"data-9".as_ref(),
            ]
        );
    }

    #[test]
    fn test_zero_dependency_sorts_first() {
        let dependent = WriteTask {
            request: WriteRequest::Frame {
                kind: FrameType::Data,
                stream_id: 3,
                dependency: 1,
                weight: 0,
                bytes: Bytes::from_static(b"dep"),
            },
            done: None,
        };
        let batch = vec![dependent, frame_task(FrameType::Data, 9, b"root")];

        let out = prepare_batch(batch);
        assert_eq!(out[0].bytes, Bytes::from_static(b"root"));
        assert_eq!(out[1].bytes, Bytes::from_static(b"dep"));
    }

    #[tokio::test]
    async fn test_queue_submit_after_consumer_drop_faults() {
        let (queue, rx) = WriteQueue::channel();
        drop(rx);
        let result = queue.submit_detached(WriteRequest::WindowUpdate {
            stream_id: 0,
            increment: 1,
        });
        assert!(matches!(result, Err(Error::ConnectionFaulted)));
    }
}
