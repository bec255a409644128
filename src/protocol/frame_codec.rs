//! Typed frame codec: framing plus a serializer.
//!
//! The client decodes [`Response`](super::Response)s and encodes
//! [`Request`](super::Request)s; the server does the opposite. The declared type is
//! fixed per decoder, mirroring the per-direction agreement on the wire.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::frame_buffer::FrameBuffer;
use super::wire_format::encode_frame;
use crate::codec::Serializer;
use crate::error::Result;

/// Serialize `value` and wrap it in a length-prefixed frame.
pub fn encode_message<T: Serialize>(serializer: Serializer, value: &T) -> Result<Bytes> {
    let body = serializer.encode(value)?;
    encode_frame(&body)
}

/// Stream-incremental decoder for frames carrying `T`.
pub struct FrameDecoder<T> {
    buffer: FrameBuffer,
    serializer: Serializer,
    _message: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FrameDecoder<T> {
    pub fn new(serializer: Serializer, max_frame_size: usize) -> Self {
        Self {
            buffer: FrameBuffer::with_max_frame_size(max_frame_size),
            serializer,
            _message: PhantomData,
        }
    }

    /// Feed bytes read from the socket.
    ///
    /// The outer error means the stream itself is corrupt and the connection must
    /// be closed. Each inner result is one message: a body that fails to
    /// deserialize only fails that message.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Result<T>>> {
        let bodies = self.buffer.push(data)?;
        Ok(bodies
            .iter()
            .map(|body| self.serializer.decode::<T>(body))
            .collect())
    }
}
