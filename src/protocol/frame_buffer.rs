//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Bytes are only consumed once a
//! whole frame (prefix and body) is buffered; until then the read position stays
//! at the start of the incomplete frame.
//!
//! # Example
//!
//! ```
//! use simple_rpc::protocol::{encode_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let frame = encode_frame(b"hello").unwrap();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&frame[..3]).unwrap().is_empty());
//! let bodies = buffer.push(&frame[3..]).unwrap();
//! assert_eq!(&bodies[0][..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{decode_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
use crate::error::{Result, RpcError};

/// Buffer for accumulating incoming bytes and extracting complete frame bodies.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Maximum allowed body size.
    max_frame_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max body: 16MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom max body size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frame bodies.
    ///
    /// Partial frames are kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Format`] if a declared length is negative or exceeds
    /// the maximum. The stream is corrupt at that point and the connection must be
    /// dropped; the buffer is left untouched.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut bodies = Vec::new();
        while let Some(body) = self.try_extract_one()? {
            bodies.push(body);
        }

        Ok(bodies)
    }

    /// Try to extract a single frame body.
    ///
    /// Returns:
    /// - `Ok(Some(body))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a corrupt length prefix
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        let declared = match decode_length(&self.buffer) {
            Some(len) => len,
            None => return Ok(None),
        };

        if declared < 0 {
            return Err(RpcError::Format(format!(
                "Negative frame length {}",
                declared
            )));
        }

        let len = declared as usize;
        if len > self.max_frame_size {
            return Err(RpcError::Format(format!(
                "Frame length {} exceeds maximum {}",
                len, self.max_frame_size
            )));
        }

        if self.buffer.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }

        let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
