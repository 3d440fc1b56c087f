//! Framed wire messages
//!
//! Every message on the wire is a 12-byte big-endian header followed by the
//! message body. The header carries the total frame length and the
//! request/response correlation ids the pooling layer checks on receive.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::{Error, Result};

/// Length of the fixed message header in bytes
pub const HEADER_LEN: usize = 12;

static REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Next process-wide request id.
///
/// Ids are only required to be unique among in-flight requests on a single
/// connection, so wrapping is harmless.
pub fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Fixed header prefixed to every framed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total frame length in bytes, header included
    pub message_length: i32,
    /// Id of this message
    pub request_id: i32,
    /// Id of the request this message replies to; 0 for requests
    pub response_to: i32,
}

impl MessageHeader {
    /// Header for a request frame with the given body length
    pub fn request(request_id: i32, body_len: usize) -> Self {
        Self {
            message_length: (HEADER_LEN + body_len) as i32,
            request_id,
            response_to: 0,
        }
    }

    /// Encode to the 12-byte wire form
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_i32(self.message_length);
        buf.put_i32(self.request_id);
        buf.put_i32(self.response_to);
        buf.freeze()
    }

    /// Decode from the 12-byte wire form
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_LEN {
            return Err(Error::socket(format!(
                "truncated message header: {} of {} bytes",
                src.len(),
                HEADER_LEN
            )));
        }
        let mut src = src;
        let header = Self {
            message_length: src.get_i32(),
            request_id: src.get_i32(),
            response_to: src.get_i32(),
        };
        if (header.message_length as usize) < HEADER_LEN {
            return Err(Error::socket(format!(
                "invalid message length {}",
                header.message_length
            )));
        }
        Ok(header)
    }

    /// Length of the body that follows the header
    pub fn body_len(&self) -> usize {
        self.message_length as usize - HEADER_LEN
    }
}

/// Assemble a request frame as the buffer list a connection sends
pub fn encode_frame(request_id: i32, body: Bytes) -> Vec<Bytes> {
    let header = MessageHeader::request(request_id, body.len());
    vec![header.encode(), body]
}

/// A received reply: header plus undecoded body
#[derive(Debug, Clone)]
pub struct ResponseBuffers {
    header: MessageHeader,
    body: Bytes,
}

impl ResponseBuffers {
    /// Create from a decoded header and its body
    pub fn new(header: MessageHeader, body: Bytes) -> Self {
        Self { header, body }
    }

    /// The reply header
    pub fn reply_header(&self) -> &MessageHeader {
        &self.header
    }

    /// The undecoded reply body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume into the reply body
    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// Arguments for receiving a reply on a channel
#[derive(Debug, Clone, Copy)]
pub struct ReceiveArgs {
    /// Request id the reply must correlate to
    pub response_to: i32,
    /// When set, replies longer than this are rejected as protocol errors
    pub max_message_size: Option<i32>,
}

impl ReceiveArgs {
    /// Expect a reply to the given request id, with no size enforcement
    pub fn new(response_to: i32) -> Self {
        Self {
            response_to,
            max_message_size: None,
        }
    }

    /// Enforce a maximum reply length
    pub fn with_max_message_size(mut self, max: i32) -> Self {
        self.max_message_size = Some(max);
        self
    }
}
