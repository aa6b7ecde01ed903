//! Frame envelope and content-type tagging for the management channel.
//!
//! A frame is a fixed 16-byte header followed by a JSON body. The header
//! carries the content-type tag the dispatch loop routes on, the sender's
//! sequence number, and the sequence number of the request a reply answers.
//! WebSocket owns the framing underneath; this module only owns the header.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ChannelError, Result};

/// Reserved content type for the generic `{success, message}` result
/// envelope, distinct from all domain message types.
pub const RESULT_TYPE: i32 = 1000;

// validate terminators family
pub const VALIDATE_TERMINATORS_REQUEST: i32 = 1101;
pub const VALIDATE_TERMINATORS_RESPONSE: i32 = 1102;
pub const TERMINATOR_DETAIL: i32 = 1103;

// validate router links family
pub const VALIDATE_ROUTER_LINKS_REQUEST: i32 = 1111;
pub const VALIDATE_ROUTER_LINKS_RESPONSE: i32 = 1112;
pub const ROUTER_LINK_DETAILS: i32 = 1113;

// validate router data model family
pub const VALIDATE_ROUTER_DATA_MODEL_REQUEST: i32 = 1121;
pub const VALIDATE_ROUTER_DATA_MODEL_RESPONSE: i32 = 1122;
pub const ROUTER_DATA_MODEL_DETAILS: i32 = 1123;

// validate router sdk terminators family
pub const VALIDATE_ROUTER_SDK_TERMINATORS_REQUEST: i32 = 1131;
pub const VALIDATE_ROUTER_SDK_TERMINATORS_RESPONSE: i32 = 1132;
pub const ROUTER_SDK_TERMINATORS_DETAILS: i32 = 1133;

// validate router ert terminators family
pub const VALIDATE_ROUTER_ERT_TERMINATORS_REQUEST: i32 = 1141;
pub const VALIDATE_ROUTER_ERT_TERMINATORS_RESPONSE: i32 = 1142;
pub const ROUTER_ERT_TERMINATORS_DETAILS: i32 = 1143;

// validate identity connection statuses family
pub const VALIDATE_IDENTITY_CONNECTION_STATUSES_REQUEST: i32 = 1151;
pub const VALIDATE_IDENTITY_CONNECTION_STATUSES_RESPONSE: i32 = 1152;
pub const IDENTITY_CONNECTION_STATUSES_DETAILS: i32 = 1153;

// event streaming family
pub const STREAM_EVENTS_REQUEST: i32 = 1201;
pub const STREAM_EVENTS_EVENT: i32 = 1202;

/// One framed message on the management channel.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub content_type: i32,
    pub sequence: u32,
    /// Sequence number of the request this message answers. Requests carry
    /// `None`; sequence 0 is reserved to encode it on the wire.
    pub reply_for: Option<u32>,
    pub body: Bytes,
}

impl Envelope {
    pub const HEADER_LEN: usize = 16;

    pub fn new(content_type: i32, body: Bytes) -> Self {
        Self {
            content_type,
            sequence: 0,
            reply_for: None,
            body,
        }
    }

    /// A reply to the request numbered `request_sequence`.
    pub fn reply_to(request_sequence: u32, content_type: i32, body: Bytes) -> Self {
        Self {
            content_type,
            sequence: 0,
            reply_for: Some(request_sequence),
            body,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + self.body.len());
        buf.put_i32(self.content_type);
        buf.put_u32(self.sequence);
        buf.put_u32(self.reply_for.unwrap_or(0));
        buf.put_u32(self.body.len() as u32);
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }

    pub fn decode(mut frame: Bytes) -> Result<Self> {
        if frame.len() < Self::HEADER_LEN {
            return Err(ChannelError::Decode(format!(
                "frame too short: {} bytes",
                frame.len()
            )));
        }
        let content_type = frame.get_i32();
        let sequence = frame.get_u32();
        let reply_for = frame.get_u32();
        let body_len = frame.get_u32() as usize;
        if frame.remaining() != body_len {
            return Err(ChannelError::Decode(format!(
                "frame body length mismatch: header says {}, got {}",
                body_len,
                frame.remaining()
            )));
        }
        Ok(Self {
            content_type,
            sequence,
            reply_for: (reply_for != 0).then_some(reply_for),
            body: frame,
        })
    }
}

pub fn encode_body<T: Serialize>(value: &T) -> Result<Bytes> {
    let raw = serde_json::to_vec(value).map_err(|err| ChannelError::Encode(err.to_string()))?;
    Ok(Bytes::from(raw))
}

pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|err| ChannelError::Decode(err.to_string()))
}
