//! Error types for simple-rpc.

use thiserror::Error;

/// Main error type for all RPC operations.
///
/// Faults that still allow a [`Response`](crate::protocol::Response) to be produced
/// (remote failures, write failures, timeouts inside the transport) travel as
/// non-200 responses instead; this enum covers the ones surfaced to callers.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed wire data or address string.
    #[error("Format error: {0}")]
    Format(String),

    /// A value could not be encoded by the serializer.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A payload could not be decoded into the expected type.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Discovery returned no instances for the service.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A connection could not be established or was lost.
    #[error("Connection error to {address}: {reason}")]
    Connection { address: String, reason: String },

    /// No response arrived within the configured window.
    #[error("Request {0} timed out")]
    Timeout(String),

    /// The resolved provider does not host the requested service (status 404).
    #[error("Remote service not found: {0}")]
    RemoteNotFound(String),

    /// The remote method failed (any non-200 status other than 404/504).
    #[error("Remote invocation failed with status {status}: {message}")]
    RemoteInvocation { status: i32, message: String },

    /// The coordination service was unreachable at registry construction.
    #[error("Registry connect error: {0}")]
    RegistryConnect(String),

    /// A registry operation failed after connecting.
    #[error("Registry error: {0}")]
    Registry(String),

    /// A service instance references methods its interface does not declare.
    #[error("Invalid service: {0}")]
    InvalidService(String),

    /// Call arguments do not match the interface description.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Operation not allowed in the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The server could not bind its listening socket.
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A request with the same id is already awaiting a response.
    #[error("Duplicate request id: {0}")]
    DuplicateRequest(String),

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    Backpressure,

    /// The transport or connection has been closed.
    #[error("Transport closed")]
    Closed,
}

impl RpcError {
    pub(crate) fn connection(address: impl Into<String>, reason: impl ToString) -> Self {
        RpcError::Connection {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
