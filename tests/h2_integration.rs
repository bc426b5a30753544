//! End-to-end HTTP/2 connection tests
//!
//! Each test drives a real `Connection` over an in-memory duplex
//! transport against a scripted peer that speaks raw frames through the
//! same codec.

use bytes::Bytes;
use h2mux::exchange::{BodySource, Exchange, RequestHead};
use h2mux::h2::codec::{FrameCodec, FRAME_HEADER_SIZE};
use h2mux::h2::frames::{
    DataFrame, Frame, FrameFlags, FrameHeader, GoawayFrame, PingFrame, RstStreamFrame,
    SettingsFrame, WindowUpdateFrame,
};
use h2mux::h2::{
    Connection, ErrorCode, Settings, SettingsBuilder, StreamState, CONNECTION_PREFACE,
};
use h2mux::headers::{HeaderDecoder, HeaderEncoder, HeaderField};
use h2mux::{ConnectionConfig, Error};
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Scripted far end of the connection
struct Peer {
    stream: DuplexStream,
    decoder: HeaderDecoder,
    encoder: HeaderEncoder,
}

impl Peer {
    fn new(stream: DuplexStream) -> Self {
        Peer {
            stream,
            decoder: HeaderDecoder::new(),
            encoder: HeaderEncoder::new(),
        }
    }

    async fn read_preface(&mut self) {
        let mut buf = [0u8; 24];
        self.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], CONNECTION_PREFACE);
    }

    async fn read_frame(&mut self) -> Frame {
        let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
        self.stream.read_exact(&mut header_bytes).await.unwrap();
        let header: FrameHeader = FrameCodec::decode_header(&header_bytes);
        let mut payload = vec![0u8; header.length as usize];
        if !payload.is_empty() {
            self.stream.read_exact(&mut payload).await.unwrap();
        }
        FrameCodec::decode_payload(&header, Bytes::from(payload)).unwrap()
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Consume the preface and client SETTINGS, reply with our own
    /// SETTINGS and the ack
    async fn handshake(&mut self, settings: Settings) {
        self.read_preface().await;
        match self.read_frame().await {
            Frame::Settings(frame) => assert!(!frame.ack),
            other => panic!("expected client SETTINGS, got {:?}", other),
        }
        self.send(&FrameCodec::encode_settings_frame(&SettingsFrame::new(
            settings,
        )))
        .await;
        self.send(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()))
            .await;
    }

    /// Read until the next request HEADERS, skipping acks and other
    /// client control traffic
    async fn expect_request(&mut self) -> (u32, Vec<HeaderField>, bool) {
        loop {
            match self.read_frame().await {
                Frame::Headers(frame) => {
                    assert!(frame.end_headers);
                    let fields = self.decoder.decode(&frame.header_block).unwrap();
                    return (frame.stream_id, fields, frame.end_stream);
                }
                Frame::Settings(_) | Frame::WindowUpdate(_) | Frame::Ping(_) => continue,
                other => panic!("expected HEADERS, got {:?}", other),
            }
        }
    }

    /// Read until the next DATA frame, skipping control traffic
    async fn expect_data(&mut self) -> DataFrame {
        loop {
            match self.read_frame().await {
                Frame::Data(frame) => return frame,
                Frame::Settings(_) | Frame::WindowUpdate(_) | Frame::Ping(_) => continue,
                other => panic!("expected DATA, got {:?}", other),
            }
        }
    }

    async fn send_response_headers(&mut self, stream_id: u32, status: &str, end_stream: bool) {
        let framed = self
            .encoder
            .encode(
                &[HeaderField::new(":status", status)],
                stream_id,
                None,
                end_stream,
                16384,
            )
            .unwrap();
        self.send(&framed).await;
    }

    async fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        self.send(&FrameCodec::encode_data_frame(&DataFrame::new(
            stream_id,
            Bytes::copy_from_slice(data),
            end_stream,
        )))
        .await;
    }
}

fn test_config() -> ConnectionConfig {
    ConnectionConfig::default().settings_ack_timeout(Duration::from_secs(2))
}

fn get_request() -> RequestHead {
    RequestHead::new(vec![
        HeaderField::new(":method", "GET"),
        HeaderField::new(":path", "/"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":authority", "upstream.test"),
    ])
}

fn post_request() -> RequestHead {
    RequestHead::new(vec![
        HeaderField::new(":method", "POST"),
        HeaderField::new(":path", "/upload"),
        HeaderField::new(":scheme", "https"),
        HeaderField::new(":authority", "upstream.test"),
    ])
}

#[tokio::test]
async fn test_handshake_and_simple_get() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(
            SettingsBuilder::new()
                .max_concurrent_streams(16)
                .build()
                .unwrap(),
        )
        .await;

        let (stream_id, fields, end_stream) = peer.expect_request().await;
        assert_eq!(stream_id, 1);
        assert!(end_stream);
        assert!(fields
            .iter()
            .any(|f| f.name == ":method" && f.value == "GET"));

        // An unknown frame type in between must be ignored
        let unknown = FrameCodec::encode_header(&FrameHeader {
            length: 3,
            kind: 0x42,
            flags: FrameFlags::empty(),
            stream_id: 0,
        });
        peer.send(&unknown).await;
        peer.send(b"abc").await;

        peer.send_response_headers(1, "200", false).await;
        peer.send_data(1, b"hello", true).await;
        peer
    });

    let conn = Connection::connect(client_io, test_config()).await.unwrap();
    assert_eq!(conn.remote_settings().get_max_concurrent_streams(), Some(16));

    let (exchange, mut handle) = Exchange::new(get_request(), BodySource::empty());
    let manager = conn.submit(exchange).await.unwrap();

    let head = handle.header().await.unwrap();
    assert_eq!(head.status(), Some(200));
    assert_eq!(handle.body().await.unwrap(), Bytes::from_static(b"hello"));
    assert_eq!(manager.state(), StreamState::Complete);
    assert_eq!(conn.live_streams(), 0);

    let _peer = peer_task.await.unwrap();
}

#[tokio::test]
async fn test_settings_timeout_leaves_no_loops_running() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.read_preface().await;
        let _ = peer.read_frame().await; // client SETTINGS, never acknowledged

        // Both loops must be gone after the timeout: the transport
        // halves are dropped and this read sees a clean EOF.
        let mut buf = [0u8; 1];
        let n = peer.stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    });

    let config = ConnectionConfig::default().settings_ack_timeout(Duration::from_millis(50));
    let result = Connection::connect(client_io, config).await;
    assert!(matches!(result, Err(Error::SettingsTimeout)));

    peer_task.await.unwrap();
}

#[tokio::test]
async fn test_stream_window_bounds_every_data_frame() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(
            SettingsBuilder::new()
                .initial_window_size(50)
                .build()
                .unwrap(),
        )
        .await;

        let (stream_id, _fields, end_stream) = peer.expect_request().await;
        assert!(!end_stream);

        // 100-byte body against a 50-byte stream window: the first
        // frame carries exactly the window, the remainder only after a
        // WINDOW_UPDATE.
        let first = peer.expect_data().await;
        assert_eq!(first.data.len(), 50);
        assert!(!first.end_stream);

        peer.send(&FrameCodec::encode_window_update_frame(
            &WindowUpdateFrame::new(stream_id, 50),
        ))
        .await;

        let second = peer.expect_data().await;
        assert_eq!(second.data.len(), 50);
        assert!(second.end_stream);

        peer.send_response_headers(stream_id, "201", true).await;
        peer
    });

    let conn = Connection::connect(client_io, test_config()).await.unwrap();
    let (exchange, mut handle) = Exchange::new(
        post_request(),
        BodySource::buffered(Bytes::from(vec![9u8; 100])),
    );
    conn.submit(exchange).await.unwrap();

    assert_eq!(handle.header().await.unwrap().status(), Some(201));
    let _peer = peer_task.await.unwrap();
}

#[tokio::test]
async fn test_rst_stream_mid_body_isolates_the_stream() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(Settings::new()).await;

        let (stream_id, _fields, _end) = peer.expect_request().await;
        peer.send_response_headers(stream_id, "200", false).await;
        peer.send_data(stream_id, b"partial", false).await;
        peer.send(&FrameCodec::encode_rst_stream_frame(&RstStreamFrame::new(
            stream_id,
            ErrorCode::Cancel,
        )))
        .await;
        peer
    });

    let conn = Connection::connect(client_io, test_config()).await.unwrap();
    let (exchange, mut handle) = Exchange::new(get_request(), BodySource::empty());
    let manager = conn.submit(exchange).await.unwrap();

    assert_eq!(handle.header().await.unwrap().status(), Some(200));
    match handle.body().await {
        Err(Error::StreamReset(code)) => assert_eq!(code, ErrorCode::Cancel),
        other => panic!("expected StreamReset(CANCEL), got {:?}", other),
    }

    assert_eq!(manager.state(), StreamState::Reset(ErrorCode::Cancel));
    assert_eq!(conn.live_streams(), 0);
    // The reset is isolated: the connection itself stays healthy
    assert!(!conn.is_faulted());

    let _peer = peer_task.await.unwrap();
}

#[tokio::test]
async fn test_goaway_fails_all_inflight_streams() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(Settings::new()).await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            let (stream_id, _fields, _end) = peer.expect_request().await;
            seen.push(stream_id);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 3, 5]);

        peer.send(&FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            0,
            ErrorCode::NoError,
            Bytes::new(),
        )))
        .await;
        peer
    });

    let conn = Connection::connect(client_io, test_config()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let (exchange, handle) = Exchange::new(get_request(), BodySource::empty());
        conn.submit(exchange).await.unwrap();
        handles.push(handle);
    }

    for mut handle in handles {
        match handle.header().await {
            Err(Error::ConnectionFaulted) => {}
            other => panic!("expected ConnectionFaulted, got {:?}", other),
        }
    }

    assert!(conn.is_faulted());
    assert_eq!(conn.goaway_code(), Some(ErrorCode::NoError));
    assert_eq!(conn.live_streams(), 0);

    // Post-fault admission is refused
    let (exchange, _handle) = Exchange::new(get_request(), BodySource::empty());
    assert!(matches!(
        conn.submit(exchange).await,
        Err(Error::ConnectionFaulted)
    ));

    let _peer = peer_task.await.unwrap();
}

#[tokio::test]
async fn test_ping_roundtrip() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(Settings::new()).await;
        loop {
            match peer.read_frame().await {
                Frame::Ping(frame) if !frame.ack => {
                    peer.send(&FrameCodec::encode_ping_frame(&PingFrame::ack(frame.data)))
                        .await;
                    break;
                }
                _ => continue,
            }
        }
    });

    let conn = Connection::connect(client_io, test_config()).await.unwrap();
    let rtt = conn.ping().await.unwrap();
    assert!(rtt <= Duration::from_secs(2));

    peer_task.await.unwrap();
}

#[tokio::test]
async fn test_receive_side_window_updates_after_half_window() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(Settings::new()).await;

        let (stream_id, _fields, _end) = peer.expect_request().await;
        peer.send_response_headers(stream_id, "200", false).await;

        // Push past half of the client's 65535-byte window
        peer.send_data(stream_id, &vec![1u8; 16384], false).await;
        peer.send_data(stream_id, &vec![2u8; 16384], false).await;
        peer.send_data(stream_id, &vec![3u8; 7232], true).await;

        // The client must acknowledge consumption at both levels
        let mut saw_stream_ack = false;
        let mut saw_connection_ack = false;
        while !(saw_stream_ack && saw_connection_ack) {
            match peer.read_frame().await {
                Frame::WindowUpdate(frame) => {
                    if frame.stream_id == 0 {
                        assert!(frame.size_increment >= 32768);
                        saw_connection_ack = true;
                    } else {
                        assert_eq!(frame.stream_id, stream_id);
                        assert!(frame.size_increment >= 32768);
                        saw_stream_ack = true;
                    }
                }
                _ => continue,
            }
        }
        peer
    });

    let conn = Connection::connect(client_io, test_config()).await.unwrap();
    let (exchange, mut handle) = Exchange::new(get_request(), BodySource::empty());
    conn.submit(exchange).await.unwrap();

    assert_eq!(handle.header().await.unwrap().status(), Some(200));
    assert_eq!(handle.body().await.unwrap().len(), 40000);

    let _peer = peer_task.await.unwrap();
}

#[tokio::test]
async fn test_push_promise_is_a_connection_error() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(Settings::new()).await;

        let (stream_id, _fields, _end) = peer.expect_request().await;
        // PUSH_PROMISE payload: promised stream id (4 bytes)
        let header = FrameCodec::encode_header(&FrameHeader {
            length: 4,
            kind: 0x5,
            flags: FrameFlags::from_u8(FrameFlags::END_HEADERS),
            stream_id,
        });
        peer.send(&header).await;
        peer.send(&2u32.to_be_bytes()).await;
        peer
    });

    let conn = Connection::connect(client_io, test_config()).await.unwrap();
    let (exchange, mut handle) = Exchange::new(get_request(), BodySource::empty());
    conn.submit(exchange).await.unwrap();

    match handle.header().await {
        Err(Error::ConnectionFaulted) => {}
        other => panic!("expected ConnectionFaulted, got {:?}", other),
    }
    assert!(conn.is_faulted());

    let _peer = peer_task.await.unwrap();
}

#[tokio::test]
async fn test_graceful_close_sends_goaway() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(Settings::new()).await;

        loop {
            match peer.read_frame().await {
                Frame::Goaway(frame) => {
                    assert_eq!(frame.code(), ErrorCode::NoError);
                    break;
                }
                _ => continue,
            }
        }

        let mut buf = [0u8; 1];
        let n = peer.stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    });

    let conn = Connection::connect(client_io, test_config()).await.unwrap();
    conn.close().await.unwrap();

    peer_task.await.unwrap();
}

#[tokio::test]
async fn test_streamed_request_body() {
    let (client_io, server_io) = duplex(1 << 20);

    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(Settings::new()).await;

        let (stream_id, _fields, end_stream) = peer.expect_request().await;
        assert!(!end_stream);

        let mut body = Vec::new();
        loop {
            let frame = peer.expect_data().await;
            body.extend_from_slice(&frame.data);
            if frame.end_stream {
                break;
            }
        }
        assert_eq!(body, b"chunk-one chunk-two");

        peer.send_response_headers(stream_id, "200", true).await;
        peer
    });

    let conn = Connection::connect(client_io, test_config()).await.unwrap();
    let (body_tx, body_rx) = tokio::sync::mpsc::channel(4);
    let (exchange, mut handle) = Exchange::new(post_request(), BodySource::streamed(body_rx));
    conn.submit(exchange).await.unwrap();

    body_tx
        .send(Bytes::from_static(b"chunk-one "))
        .await
        .unwrap();
    body_tx
        .send(Bytes::from_static(b"chunk-two"))
        .await
        .unwrap();
    drop(body_tx);

    assert_eq!(handle.header().await.unwrap().status(), Some(200));
    let _peer = peer_task.await.unwrap();
}

#[tokio::test]
async fn test_connection_pool_reuses_until_fault() {
    use h2mux::{Authority, ConnectionPool};
    use std::sync::Arc;

    let pool = ConnectionPool::new();
    let authority = Authority::new("Upstream.Test", 443, true);

    let (client_io, server_io) = duplex(1 << 20);
    let peer_task = tokio::spawn(async move {
        let mut peer = Peer::new(server_io);
        peer.handshake(Settings::new()).await;
        peer
    });

    let conn = pool
        .checkout(authority.clone(), test_config(), || async move {
            Ok(client_io)
        })
        .await
        .unwrap();
    let _peer = peer_task.await.unwrap();
    assert_eq!(pool.len().await, 1);

    // A healthy pooled connection is reused: the dial factory hands out
    // a dead pipe, so an actual dial would time out instead.
    let again = pool
        .checkout(authority.clone(), test_config(), || async {
            Ok(duplex(64).0)
        })
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&conn, &again));
    assert_eq!(pool.len().await, 1);

    // A faulted connection is evicted and replaced on the next checkout
    conn.close().await.unwrap();
    assert!(conn.is_faulted());

    let (fresh_io, fresh_server) = duplex(1 << 20);
    let fresh_peer = tokio::spawn(async move {
        let mut peer = Peer::new(fresh_server);
        peer.handshake(Settings::new()).await;
        peer
    });
    let replacement = pool
        .checkout(authority.clone(), test_config(), || async move {
            Ok(fresh_io)
        })
        .await
        .unwrap();
    let _fresh = fresh_peer.await.unwrap();

    assert!(!Arc::ptr_eq(&conn, &replacement));
    assert_eq!(pool.len().await, 1);
}
