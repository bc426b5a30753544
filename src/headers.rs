//! Header codec boundary
//!
//! HPACK compression is an external concern: the engine hands a list of
//! header fields to the encoder and gets back fully framed
//! HEADERS+CONTINUATION bytes, and hands reassembled header blocks to
//! the decoder and gets fields back. The `hpack` crate does the actual
//! compression.
//!
//! The encoder is shared by every stream on a connection and internally
//! locked; the decoder is owned by the read loop, which is the only
//! task that ever sees inbound header blocks.

use crate::h2::codec::FrameCodec;
use crate::h2::error::{Error, Result};
use crate::h2::frames::{ContinuationFrame, HeadersFrame, PrioritySpec};
use bytes::{Bytes, BytesMut};
use std::sync::Mutex;

/// One decoded header field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    /// Create a field
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        HeaderField {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Shared HPACK encoder producing framed HEADERS+CONTINUATION bytes
pub struct HeaderEncoder {
    inner: Mutex<hpack::Encoder<'static>>,
}

impl HeaderEncoder {
    /// Create an encoder with a fresh dynamic table
    pub fn new() -> Self {
        HeaderEncoder {
            inner: Mutex::new(hpack::Encoder::new()),
        }
    }

    /// Encode fields into a HEADERS frame plus however many
    /// CONTINUATION frames the block needs at `max_frame_size`
    ///
    /// END_STREAM is set on the HEADERS frame when `end_stream` is
    /// true; END_HEADERS lands on whichever frame carries the final
    /// fragment.
    pub fn encode(
        &self,
        fields: &[HeaderField],
        stream_id: u32,
        priority: Option<PrioritySpec>,
        end_stream: bool,
        max_frame_size: usize,
    ) -> Result<Bytes> {
        let tuples: Vec<(&[u8], &[u8])> = fields
            .iter()
            .map(|field| (field.name.as_bytes(), field.value.as_bytes()))
            .collect();

        let mut block = Vec::new();
        {
            let mut encoder = self
                .inner
                .lock()
                .map_err(|_| Error::Compression("encoder lock poisoned".to_string()))?;
            encoder
                .encode_into(tuples, &mut block)
                .map_err(|e| Error::Compression(format!("HPACK encode error: {}", e)))?;
        }

        // Budget for the first fragment: the HEADERS payload also has
        // to fit the 5-byte priority section when one is present.
        let first_budget = max_frame_size.saturating_sub(if priority.is_some() { 5 } else { 0 });
        let first_len = block.len().min(first_budget.max(1));
        let rest = block.split_off(first_len);

        let mut out = BytesMut::new();
        let mut headers = HeadersFrame::new(
            stream_id,
            Bytes::from(block),
            end_stream,
            rest.is_empty(),
        );
        if let Some(priority) = priority {
            headers = headers.with_priority(priority);
        }
        out.extend_from_slice(&FrameCodec::encode_headers_frame(&headers));

        let mut remaining = Bytes::from(rest);
        while !remaining.is_empty() {
            let take = remaining.len().min(max_frame_size);
            let fragment = remaining.split_to(take);
            let continuation = ContinuationFrame {
                stream_id,
                header_block: fragment,
                end_headers: remaining.is_empty(),
            };
            out.extend_from_slice(&FrameCodec::encode_continuation_frame(&continuation));
        }

        Ok(out.freeze())
    }
}

impl Default for HeaderEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// HPACK decoder owned by a connection's read loop
pub struct HeaderDecoder {
    inner: hpack::Decoder<'static>,
}

impl HeaderDecoder {
    /// Create a decoder with a fresh dynamic table
    pub fn new() -> Self {
        HeaderDecoder {
            inner: hpack::Decoder::new(),
        }
    }

    /// Decode one complete header block
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        let decoded = self
            .inner
            .decode(block)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;

        Ok(decoded
            .into_iter()
            .map(|(name, value)| HeaderField {
                name: String::from_utf8_lossy(&name).to_string(),
                value: String::from_utf8_lossy(&value).to_string(),
            })
            .collect())
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}
