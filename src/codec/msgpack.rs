//! MsgPack codec using `rmp-serde`.
//!
//! This is the binary serializer and the default on both ends of a connection.
//! Structs are always written with `to_vec_named` so that they travel as maps
//! keyed by field name; positional arrays would break as soon as either side adds
//! an optional field.
//!
//! # Example
//!
//! ```
//! use simple_rpc::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Message = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use crate::error::{Result, RpcError};

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Serialization`] if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| RpcError::Serialization(e.to_string()))
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Deserialization`] if the bytes cannot be decoded as `T`.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| RpcError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: TestStruct = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_decode_primitives() {
        let encoded = MsgPackCodec::encode("hello world").unwrap();
        let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, "hello world");

        let encoded = MsgPackCodec::encode(&-12345i64).unwrap();
        let decoded: i64 = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, -12345);

        let encoded = MsgPackCodec::encode(&3.5f64).unwrap();
        let decoded: f64 = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, 3.5);
    }

    #[test]
    fn test_struct_is_written_as_map() {
        let test = TestStruct {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgPackCodec::encode(&test).unwrap();

        // fixmap with 3 entries; positional encoding would start with 0x93
        assert_eq!(encoded[0], 0x83, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_dynamic_values_survive() {
        // Request parameters and response data travel as serde_json::Value
        let value = json!({
            "list": [1, -2, 3.25, "four", null, true],
            "nested": { "big": u64::MAX, "neg": i64::MIN },
        });

        let encoded = MsgPackCodec::encode(&value).unwrap();
        let decoded: serde_json::Value = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<TestStruct> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(matches!(result, Err(RpcError::Deserialization(_))));
    }

    #[test]
    fn test_decode_error_on_type_mismatch() {
        let encoded = MsgPackCodec::encode(&"a string").unwrap();
        let result: Result<u32> = MsgPackCodec::decode(&encoded);
        assert!(matches!(result, Err(RpcError::Deserialization(_))));
    }
}
