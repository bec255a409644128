//! JSON codec using `serde_json`.
//!
//! Human-readable alternative to [`MsgPackCodec`](super::MsgPackCodec), handy when
//! inspecting traffic with generic tools.

use crate::error::{Result, RpcError};

/// JSON codec for structured data.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| RpcError::Serialization(e.to_string()))
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| RpcError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Greeting {
        to: String,
        times: u8,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Greeting {
            to: "world".to_string(),
            times: 3,
        };

        let encoded = JsonCodec::encode(&original).unwrap();
        assert_eq!(encoded, br#"{"to":"world","times":3}"#);

        let decoded: Greeting = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_non_string_map_keys_fail_to_encode() {
        let mut map = std::collections::HashMap::new();
        map.insert(vec![1u8], 1);

        let result = JsonCodec::encode(&map);
        assert!(matches!(result, Err(RpcError::Serialization(_))));
    }

    #[test]
    fn test_decode_error_on_malformed_input() {
        let result: Result<Greeting> = JsonCodec::decode(b"{\"to\": ");
        assert!(matches!(result, Err(RpcError::Deserialization(_))));

        let result: Result<Greeting> = JsonCodec::decode(br#"{"to": 1, "times": 2}"#);
        assert!(matches!(result, Err(RpcError::Deserialization(_))));
    }
}
