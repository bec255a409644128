//! Request and response messages.
//!
//! Both travel as a single frame body. Field names are camelCase on the wire
//! regardless of the serializer in use.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Successful invocation.
pub const STATUS_OK: i32 = 200;
/// The target service is not exposed by the server that received the request.
pub const STATUS_NOT_FOUND: i32 = 404;
/// Invocation or transport failure.
pub const STATUS_INTERNAL_ERROR: i32 = 500;
/// No response within the client's wait window (client-synthesized).
pub const STATUS_TIMEOUT: i32 = 504;

/// A remote method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Correlation key, unique per call.
    pub request_id: String,
    /// Interface the method belongs to.
    pub interface_name: String,
    /// Method to invoke.
    pub method_name: String,
    /// Type identifiers of the parameters, in declaration order.
    pub parameter_types: Vec<String>,
    /// Argument values, one per parameter type.
    pub parameters: Vec<Value>,
    /// Optional service version.
    #[serde(default)]
    pub version: Option<String>,
}

impl Request {
    /// Create a request with a fresh unique id.
    pub fn new(
        interface_name: impl Into<String>,
        method_name: impl Into<String>,
        parameter_types: Vec<String>,
        parameters: Vec<Value>,
        version: Option<String>,
    ) -> Self {
        Self {
            request_id: generate_request_id(),
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            parameter_types,
            parameters,
            version: version.filter(|v| !v.is_empty()),
        }
    }

    /// Check the descriptor/value arity invariant.
    #[inline]
    pub fn is_well_formed(&self) -> bool {
        self.parameter_types.len() == self.parameters.len()
    }
}

/// Outcome of a remote method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Id of the request this answers.
    pub request_id: String,
    /// 200 on success, anything else is a failure.
    pub status_code: i32,
    /// Human-readable failure description.
    #[serde(default)]
    pub message: Option<String>,
    /// Return value, present only on success.
    #[serde(default)]
    pub data: Option<Value>,
}

impl Response {
    /// Build a success response.
    ///
    /// A `null` result is stored as absent data so that it survives serializers
    /// which cannot tell `nil` from a missing value.
    pub fn success(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            status_code: STATUS_OK,
            message: None,
            data: if data.is_null() { None } else { Some(data) },
        }
    }

    /// Build a failure response.
    pub fn failure(request_id: impl Into<String>, status_code: i32, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status_code,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Check if this is a success response.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    /// The failure message, or an empty string.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    /// Take the result value (`null` when absent).
    pub fn into_data(self) -> Value {
        self.data.unwrap_or(Value::Null)
    }
}

/// Generate a globally unique request id.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_request_new_assigns_unique_ids() {
        let ids: HashSet<String> = (0..1000)
            .map(|_| Request::new("I", "m", vec![], vec![], None).request_id)
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_request_empty_version_is_absent() {
        let request = Request::new("I", "m", vec![], vec![], Some(String::new()));
        assert_eq!(request.version, None);
    }

    #[test]
    fn test_request_well_formed() {
        let mut request = Request::new(
            "I",
            "m",
            vec!["String".to_string()],
            vec![json!("x")],
            None,
        );
        assert!(request.is_well_formed());

        request.parameters.push(json!(1));
        assert!(!request.is_well_formed());
    }

    #[test]
    fn test_request_wire_field_names() {
        let request = Request::new("I", "m", vec![], vec![], Some("1".to_string()));
        let value = serde_json::to_value(&request).unwrap();

        for key in [
            "requestId",
            "interfaceName",
            "methodName",
            "parameterTypes",
            "parameters",
            "version",
        ] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_response_success() {
        let response = Response::success("r", json!("ab"));
        assert!(response.is_success());
        assert_eq!(response.message(), "");
        assert_eq!(response.into_data(), json!("ab"));
    }

    #[test]
    fn test_response_success_null_data() {
        let response = Response::success("r", Value::Null);
        assert_eq!(response.data, None);
        assert_eq!(response.into_data(), Value::Null);
    }

    #[test]
    fn test_response_failure() {
        let response = Response::failure("r", STATUS_NOT_FOUND, "service not found: X");
        assert!(!response.is_success());
        assert_eq!(response.status_code, 404);
        assert_eq!(response.message(), "service not found: X");
        assert_eq!(response.data, None);
    }
}
