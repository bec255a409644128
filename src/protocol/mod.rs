//! Protocol module - messages, addressing, wire format and framing.
//!
//! This module implements the data plane protocol:
//! - [`Request`] / [`Response`] messages and status codes
//! - [`ServiceAddress`] and [`ServiceName`]
//! - 4-byte big-endian length prefix framing
//! - [`FrameBuffer`] for accumulating partial reads, [`FrameDecoder`] on top of it

mod address;
mod frame_buffer;
mod frame_codec;
mod message;
mod wire_format;

pub use address::{ServiceAddress, ServiceName};
pub use frame_buffer::FrameBuffer;
pub use frame_codec::{encode_message, FrameDecoder};
pub use message::{
    generate_request_id, Request, Response, STATUS_INTERNAL_ERROR, STATUS_NOT_FOUND, STATUS_OK,
    STATUS_TIMEOUT,
};
pub use wire_format::{
    decode_length, encode_frame, encode_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};
