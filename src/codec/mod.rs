//! Codec module - serialization/deserialization for frame bodies.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (binary, default)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! # Design
//!
//! Codecs are marker structs with static generic methods. Transports pick one at
//! construction time through the [`Serializer`] selector; there is no runtime
//! negotiation, so both ends of a deployment must be configured alike.
//!
//! # Example
//!
//! ```
//! use simple_rpc::codec::Serializer;
//!
//! let serializer = Serializer::Json;
//! let bytes = serializer.encode(&vec![1, 2, 3]).unwrap();
//! let back: Vec<i32> = serializer.decode(&bytes).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Construction-time serializer choice for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    /// Binary MessagePack.
    #[default]
    MsgPack,
    /// Text JSON.
    Json,
}

impl Serializer {
    /// Serialize a value into a frame body.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Serializer::MsgPack => MsgPackCodec::encode(value),
            Serializer::Json => JsonCodec::encode(value),
        }
    }

    /// Deserialize a frame body into `T`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Serializer::MsgPack => MsgPackCodec::decode(bytes),
            Serializer::Json => JsonCodec::decode(bytes),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Serializer::MsgPack => "msgpack",
            Serializer::Json => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::protocol::{Request, Response};
    use serde_json::json;

    fn sample_request() -> Request {
        Request {
            request_id: "7b0c1c1e".to_string(),
            interface_name: "com.example.Echo".to_string(),
            method_name: "concat".to_string(),
            parameter_types: vec!["String".to_string(), "String".to_string()],
            parameters: vec![json!("a"), json!("b")],
            version: Some("1.0.0".to_string()),
        }
    }

    #[test]
    fn test_request_round_trip_both_serializers() {
        for serializer in [Serializer::MsgPack, Serializer::Json] {
            let request = sample_request();
            let bytes = serializer.encode(&request).unwrap();
            let decoded: Request = serializer.decode(&bytes).unwrap();
            assert_eq!(decoded, request, "serializer {}", serializer.name());
        }
    }

    #[test]
    fn test_response_round_trip_both_serializers() {
        let responses = [
            Response::success("r1", json!({"sum": 3, "items": ["x", "y"]})),
            Response::failure("r2", 500, "boom"),
        ];

        for serializer in [Serializer::MsgPack, Serializer::Json] {
            for response in &responses {
                let bytes = serializer.encode(response).unwrap();
                let decoded: Response = serializer.decode(&bytes).unwrap();
                assert_eq!(&decoded, response);
            }
        }
    }

    #[test]
    fn test_serializers_are_not_interchangeable() {
        let bytes = Serializer::MsgPack.encode(&sample_request()).unwrap();
        let result: Result<Request> = Serializer::Json.decode(&bytes);
        assert!(matches!(result, Err(RpcError::Deserialization(_))));
    }

    #[test]
    fn test_default_is_msgpack() {
        assert_eq!(Serializer::default(), Serializer::MsgPack);
    }
}
