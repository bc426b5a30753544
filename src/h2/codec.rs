//! HTTP/2 frame encoding and decoding
//!
//! Stateless byte-level codec: 9-byte header parse/serialize plus typed
//! payload decode and per-type encoders. A frame whose declared length
//! disagrees with its payload is malformed, and malformed frames are
//! always fatal to the connection.

use super::error::{Error, Result};
use super::frames::*;
use super::settings::Settings;
use bytes::{BufMut, Bytes, BytesMut};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size expressible in the 24-bit length field
pub const MAX_FRAME_PAYLOAD: usize = 0x00FF_FFFF;

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header into a 9-byte array
    pub fn encode_header(header: &FrameHeader) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        out[0] = ((header.length >> 16) & 0xFF) as u8;
        out[1] = ((header.length >> 8) & 0xFF) as u8;
        out[2] = (header.length & 0xFF) as u8;

        // Type (8 bits)
        out[3] = header.kind;

        // Flags (8 bits)
        out[4] = header.flags.as_u8();

        // Stream ID (31 bits, big-endian, reserved bit is 0)
        let stream_id = header.stream_id & 0x7FFF_FFFF;
        out[5] = ((stream_id >> 24) & 0xFF) as u8;
        out[6] = ((stream_id >> 16) & 0xFF) as u8;
        out[7] = ((stream_id >> 8) & 0xFF) as u8;
        out[8] = (stream_id & 0xFF) as u8;

        out
    }

    /// Decode a frame header from 9 bytes
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        // Length (24 bits, big-endian)
        let length =
            ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32);

        // Stream ID (31 bits, reserved bit masked)
        let stream_id = ((bytes[5] as u32 & 0x7F) << 24)
            | ((bytes[6] as u32) << 16)
            | ((bytes[7] as u32) << 8)
            | (bytes[8] as u32);

        FrameHeader {
            length,
            kind: bytes[3],
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    /// Decode a frame payload into a typed frame
    ///
    /// The payload must be exactly `header.length` bytes; the caller is
    /// responsible for reading that many bytes off the wire.
    pub fn decode_payload(header: &FrameHeader, payload: Bytes) -> Result<Frame> {
        if payload.len() != header.length as usize {
            return Err(Error::MalformedFrame(format!(
                "declared length {} but payload is {} bytes",
                header.length,
                payload.len()
            )));
        }

        let frame_type = match header.frame_type() {
            Some(t) => t,
            None => {
                return Ok(Frame::Unknown {
                    kind: header.kind,
                    stream_id: header.stream_id,
                })
            }
        };

        match frame_type {
            FrameType::Data => Self::decode_data(header, payload),
            FrameType::Headers => Self::decode_headers(header, payload),
            FrameType::Priority => Self::decode_priority(header, payload),
            FrameType::RstStream => Self::decode_rst_stream(header, payload),
            FrameType::Settings => Self::decode_settings(header, payload),
            FrameType::PushPromise => Ok(Frame::PushPromise {
                stream_id: header.stream_id,
            }),
            FrameType::Ping => Self::decode_ping(header, payload),
            FrameType::Goaway => Self::decode_goaway(header, payload),
            FrameType::WindowUpdate => Self::decode_window_update(header, payload),
            FrameType::Continuation => Ok(Frame::Continuation(ContinuationFrame {
                stream_id: header.stream_id,
                header_block: payload,
                end_headers: header.flags.is_end_headers(),
            })),
        }
    }

    fn decode_data(header: &FrameHeader, mut payload: Bytes) -> Result<Frame> {
        if header.flags.is_padded() {
            payload = Self::strip_padding(payload)?;
        }
        Ok(Frame::Data(DataFrame {
            stream_id: header.stream_id,
            data: payload,
            end_stream: header.flags.is_end_stream(),
        }))
    }

    fn decode_headers(header: &FrameHeader, mut payload: Bytes) -> Result<Frame> {
        if header.flags.is_padded() {
            payload = Self::strip_padding(payload)?;
        }

        let priority = if header.flags.is_priority() {
            if payload.len() < 5 {
                return Err(Error::MalformedFrame(
                    "HEADERS with PRIORITY flag shorter than 5 bytes".to_string(),
                ));
            }
            let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let weight = payload[4];
            payload = payload.slice(5..);
            Some(PrioritySpec {
                stream_dependency: raw & 0x7FFF_FFFF,
                exclusive: raw & 0x8000_0000 != 0,
                weight,
            })
        } else {
            None
        };

        Ok(Frame::Headers(HeadersFrame {
            stream_id: header.stream_id,
            header_block: payload,
            end_stream: header.flags.is_end_stream(),
            end_headers: header.flags.is_end_headers(),
            priority,
        }))
    }

    fn decode_priority(header: &FrameHeader, payload: Bytes) -> Result<Frame> {
        if payload.len() != 5 {
            return Err(Error::MalformedFrame(format!(
                "PRIORITY payload must be 5 bytes, got {}",
                payload.len()
            )));
        }
        let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(Frame::Priority(PriorityFrame {
            stream_id: header.stream_id,
            priority: PrioritySpec {
                stream_dependency: raw & 0x7FFF_FFFF,
                exclusive: raw & 0x8000_0000 != 0,
                weight: payload[4],
            },
        }))
    }

    fn decode_rst_stream(header: &FrameHeader, payload: Bytes) -> Result<Frame> {
        if payload.len() != 4 {
            return Err(Error::MalformedFrame(format!(
                "RST_STREAM payload must be 4 bytes, got {}",
                payload.len()
            )));
        }
        Ok(Frame::RstStream(RstStreamFrame {
            stream_id: header.stream_id,
            error_code: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
        }))
    }

    fn decode_settings(header: &FrameHeader, payload: Bytes) -> Result<Frame> {
        if header.flags.is_ack() {
            if !payload.is_empty() {
                return Err(Error::MalformedFrame(
                    "SETTINGS ACK must have an empty payload".to_string(),
                ));
            }
            return Ok(Frame::Settings(SettingsFrame::ack()));
        }

        if payload.len() % 6 != 0 {
            return Err(Error::MalformedFrame(format!(
                "SETTINGS payload length {} is not a multiple of 6",
                payload.len()
            )));
        }

        let mut settings = Settings::new();
        let mut pos = 0;
        while pos + 6 <= payload.len() {
            let id = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
            let value = u32::from_be_bytes([
                payload[pos + 2],
                payload[pos + 3],
                payload[pos + 4],
                payload[pos + 5],
            ]);
            settings.apply_entry(id, value);
            pos += 6;
        }

        Ok(Frame::Settings(SettingsFrame::new(settings)))
    }

    fn decode_ping(header: &FrameHeader, payload: Bytes) -> Result<Frame> {
        if payload.len() != 8 {
            return Err(Error::MalformedFrame(format!(
                "PING payload must be 8 bytes, got {}",
                payload.len()
            )));
        }
        let mut data = [0u8; 8];
        data.copy_from_slice(&payload);
        Ok(Frame::Ping(PingFrame {
            ack: header.flags.is_ack(),
            data,
        }))
    }

    fn decode_goaway(_header: &FrameHeader, payload: Bytes) -> Result<Frame> {
        if payload.len() < 8 {
            return Err(Error::MalformedFrame(format!(
                "GOAWAY payload must be at least 8 bytes, got {}",
                payload.len()
            )));
        }
        let last_stream_id =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
        let error_code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        Ok(Frame::Goaway(GoawayFrame {
            last_stream_id,
            error_code,
            debug_data: payload.slice(8..),
        }))
    }

    fn decode_window_update(header: &FrameHeader, payload: Bytes) -> Result<Frame> {
        if payload.len() != 4 {
            return Err(Error::MalformedFrame(format!(
                "WINDOW_UPDATE payload must be 4 bytes, got {}",
                payload.len()
            )));
        }
        let increment =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
        if increment == 0 {
            return Err(Error::MalformedFrame(
                "WINDOW_UPDATE increment must be non-zero".to_string(),
            ));
        }
        Ok(Frame::WindowUpdate(WindowUpdateFrame {
            stream_id: header.stream_id,
            size_increment: increment,
        }))
    }

    /// Strip the pad-length prefix and trailing padding
    fn strip_padding(payload: Bytes) -> Result<Bytes> {
        if payload.is_empty() {
            return Err(Error::MalformedFrame(
                "PADDED frame with empty payload".to_string(),
            ));
        }
        let pad_len = payload[0] as usize;
        if pad_len + 1 > payload.len() {
            return Err(Error::MalformedFrame(format!(
                "padding length {} exceeds payload of {} bytes",
                pad_len,
                payload.len()
            )));
        }
        Ok(payload.slice(1..payload.len() - pad_len))
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }

        let header = FrameHeader {
            length: frame.data.len() as u32,
            kind: FrameType::Data.as_u8(),
            flags,
            stream_id: frame.stream_id,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.data.len());
        buf.put_slice(&Self::encode_header(&header));
        buf.put_slice(&frame.data);
        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let mut payload_len = frame.header_block.len();
        if frame.priority.is_some() {
            flags.set(FrameFlags::PRIORITY);
            payload_len += 5;
        }

        let header = FrameHeader {
            length: payload_len as u32,
            kind: FrameType::Headers.as_u8(),
            flags,
            stream_id: frame.stream_id,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(&header));
        if let Some(priority) = &frame.priority {
            let mut dep = priority.stream_dependency & 0x7FFF_FFFF;
            if priority.exclusive {
                dep |= 0x8000_0000;
            }
            buf.put_u32(dep);
            buf.put_u8(priority.weight);
        }
        buf.put_slice(&frame.header_block);
        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let header = FrameHeader {
            length: frame.header_block.len() as u32,
            kind: FrameType::Continuation.as_u8(),
            flags,
            stream_id: frame.stream_id,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.header_block.len());
        buf.put_slice(&Self::encode_header(&header));
        buf.put_slice(&frame.header_block);
        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        // Each setting is 6 bytes (2 byte ID + 4 byte value)
        let entries = if frame.ack {
            Vec::new()
        } else {
            frame.settings.entries()
        };

        let header = FrameHeader {
            length: (entries.len() * 6) as u32,
            kind: FrameType::Settings.as_u8(),
            flags,
            stream_id: 0,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + entries.len() * 6);
        buf.put_slice(&Self::encode_header(&header));
        for (id, value) in entries {
            buf.put_u16(id);
            buf.put_u32(value);
        }
        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        let header = FrameHeader {
            length: 8,
            kind: FrameType::Ping.as_u8(),
            flags,
            stream_id: 0,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        buf.put_slice(&Self::encode_header(&header));
        buf.put_slice(&frame.data);
        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let payload_len = 8 + frame.debug_data.len();

        let header = FrameHeader {
            length: payload_len as u32,
            kind: FrameType::Goaway.as_u8(),
            flags: FrameFlags::empty(),
            stream_id: 0,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(&header));
        buf.put_u32(frame.last_stream_id & 0x7FFF_FFFF);
        buf.put_u32(frame.error_code);
        buf.put_slice(&frame.debug_data);
        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let header = FrameHeader {
            length: 4,
            kind: FrameType::WindowUpdate.as_u8(),
            flags: FrameFlags::empty(),
            stream_id: frame.stream_id,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(&header));
        buf.put_u32(frame.size_increment & 0x7FFF_FFFF);
        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let header = FrameHeader {
            length: 4,
            kind: FrameType::RstStream.as_u8(),
            flags: FrameFlags::empty(),
            stream_id: frame.stream_id,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(&header));
        buf.put_u32(frame.error_code);
        buf.freeze()
    }

    /// Encode a PRIORITY frame
    pub fn encode_priority_frame(frame: &PriorityFrame) -> Bytes {
        let header = FrameHeader {
            length: 5,
            kind: FrameType::Priority.as_u8(),
            flags: FrameFlags::empty(),
            stream_id: frame.stream_id,
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 5);
        buf.put_slice(&Self::encode_header(&header));
        let mut dep = frame.priority.stream_dependency & 0x7FFF_FFFF;
        if frame.priority.exclusive {
            dep |= 0x8000_0000;
        }
        buf.put_u32(dep);
        buf.put_u8(frame.priority.weight);
        buf.freeze()
    }
}
