//! Wire format encoding and decoding.
//!
//! Every message is one frame:
//! ```text
//! ┌──────────────┬──────────────────────────┐
//! │ Length       │ Body                     │
//! │ 4 bytes      │ `Length` bytes           │
//! │ int32 BE     │ serialized Request/Resp. │
//! └──────────────┴──────────────────────────┘
//! ```
//!
//! No magic number and no version byte: serializer and codec compatibility is a
//! deployment concern.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, RpcError};

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame body size (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Encode the length prefix for a body of `len` bytes.
///
/// # Errors
///
/// Returns a format error if `len` does not fit a signed 32-bit length.
#[inline]
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_SIZE]> {
    let len = i32::try_from(len)
        .map_err(|_| RpcError::Format(format!("Frame body of {} bytes is too large", len)))?;
    Ok(len.to_be_bytes())
}

/// Peek the declared body length from the first four bytes of `buf`.
///
/// Returns `None` if fewer than four bytes are available.
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<i32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Build a complete frame (prefix + body) as one contiguous buffer.
///
/// # Example
///
/// ```
/// use simple_rpc::protocol::encode_frame;
///
/// let frame = encode_frame(b"hello").unwrap();
/// assert_eq!(&frame[..4], &[0, 0, 0, 5]);
/// assert_eq!(&frame[4..], b"hello");
/// ```
pub fn encode_frame(body: &[u8]) -> Result<Bytes> {
    let prefix = encode_length(body.len())?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_slice(&prefix);
    buf.put_slice(body);
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_is_big_endian() {
        let prefix = encode_length(0x0102_0304).unwrap();
        assert_eq!(prefix, [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decode_length(&prefix), Some(0x0102_0304));
    }

    #[test]
    fn test_decode_length_needs_four_bytes() {
        assert_eq!(decode_length(&[0, 0, 1]), None);
        assert_eq!(decode_length(&[0, 0, 0, 1, 99]), Some(1));
    }

    #[test]
    fn test_decode_negative_length() {
        assert_eq!(decode_length(&[0xFF, 0xFF, 0xFF, 0xFF]), Some(-1));
    }

    #[test]
    fn test_encode_length_rejects_oversized() {
        let result = encode_length(i32::MAX as usize + 1);
        assert!(matches!(result, Err(RpcError::Format(_))));
    }

    #[test]
    fn test_encode_empty_frame() {
        let frame = encode_frame(b"").unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 0]);
    }
}
