//! Client transport - pooled connections and request/response correlation.
//!
//! [`ClientTransport::send`] encodes a [`Request`], pushes it over the pooled
//! connection for the target address and waits for the [`Response`] with the same
//! request id. Many requests share one connection; responses may come back in any
//! order.
//!
//! Transport faults that happen after the request left the caller are reported as
//! responses, not errors: a failed write or a lost connection yields status `500`
//! and an expired wait yields status `504`. Either way the pending entry is gone
//! when `send` returns.

mod pending;
mod pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

pub use pending::PendingRequests;
pub use pool::{Connection, ConnectionPool};

use crate::codec::Serializer;
use crate::error::{Result, RpcError};
use crate::protocol::{
    encode_message, Request, Response, ServiceAddress, DEFAULT_MAX_FRAME_SIZE,
    STATUS_INTERNAL_ERROR, STATUS_TIMEOUT,
};
use crate::writer::WriterConfig;

/// Default time to wait for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time to wait for a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client transport configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Body encoding; must match the server's.
    pub serializer: Serializer,
    /// Response wait window used by [`ClientTransport::send`].
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Largest accepted response frame body.
    pub max_frame_size: usize,
    /// Per-connection writer task settings.
    pub writer: WriterConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            serializer: Serializer::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            writer: WriterConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }
}

/// Sends requests and correlates responses.
///
/// Shareable behind an `Arc`; all methods take `&self`.
pub struct ClientTransport {
    config: ClientConfig,
    pool: ConnectionPool,
    pending: Arc<PendingRequests>,
    closed: AtomicBool,
}

impl ClientTransport {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            pool: ConnectionPool::new(),
            pending: Arc::new(PendingRequests::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `request` to `address` and wait up to the configured timeout.
    pub async fn send(&self, address: &ServiceAddress, request: &Request) -> Result<Response> {
        self.send_with_timeout(address, request, self.config.request_timeout)
            .await
    }

    /// Send `request` to `address` and wait up to `timeout`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Serialization`] if the request cannot be encoded
    /// - [`RpcError::Connection`] if no connection can be established
    /// - [`RpcError::DuplicateRequest`] if the request id is already in flight
    /// - [`RpcError::Closed`] after [`close`](Self::close)
    pub async fn send_with_timeout(
        &self,
        address: &ServiceAddress,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }

        let frame = encode_message(self.config.serializer, request)?;
        let connection = self
            .pool
            .get_or_connect(address, &self.config, &self.pending)
            .await?;

        let request_id = request.request_id.as_str();
        let mut wait = PendingWait {
            pending: &self.pending,
            request_id,
            rx: self.pending.register(request_id, connection.id())?,
        };

        // The reader may have died between pool lookup and registration.
        if !connection.is_alive() {
            return Ok(Response::failure(
                request_id,
                STATUS_INTERNAL_ERROR,
                format!("connection to {} closed", address),
            ));
        }

        tracing::debug!(
            "Sending {}.{} ({}) to {}",
            request.interface_name,
            request.method_name,
            request_id,
            address
        );

        if let Err(e) = connection.send(frame).await {
            return Ok(Response::failure(
                request_id,
                STATUS_INTERNAL_ERROR,
                format!("write to {} failed: {}", address, e),
            ));
        }

        match tokio::time::timeout(timeout, &mut wait.rx).await {
            Ok(Ok(response)) => Ok(response),
            // Slot dropped without an answer: the transport was closed.
            Ok(Err(_)) => Ok(Response::failure(
                request_id,
                STATUS_INTERNAL_ERROR,
                "connection closed",
            )),
            Err(_) => {
                tracing::debug!("Request {} to {} timed out", request_id, address);
                Ok(Response::failure(
                    request_id,
                    STATUS_TIMEOUT,
                    format!("no response within {} ms", timeout.as_millis()),
                ))
            }
        }
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of pooled connections.
    pub fn pooled_connections(&self) -> usize {
        self.pool.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every connection and fail every pending request. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.pool.close_all();
        let failed = self.pending.fail_all("client closed");
        tracing::info!("Client transport closed ({} pending request(s) failed)", failed);
    }
}

/// A registered slot for one `send`.
///
/// Dropping it unresolved, on any early return or when the caller drops the
/// `send` future, removes the slot from the table.
struct PendingWait<'a> {
    pending: &'a PendingRequests,
    request_id: &'a str,
    rx: oneshot::Receiver<Response>,
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        self.rx.close();
        self.pending.abandon(self.request_id);
    }
}

impl Default for ClientTransport {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for ClientTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FrameDecoder, STATUS_OK};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn request(method: &str) -> Request {
        Request::new("Echo", method, vec!["String".into()], vec![json!("x")], None)
    }

    /// Accept one connection and answer each request with `reply(request)`, if any.
    async fn fake_server<F>(reply: F) -> ServiceAddress
    where
        F: Fn(Request) -> Option<Response> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _): (TcpStream, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::<Request>::new(Serializer::MsgPack, DEFAULT_MAX_FRAME_SIZE);
            let mut buf = vec![0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    return;
                }
                for request in decoder.push(&buf[..n]).unwrap() {
                    if let Some(response) = reply(request.unwrap()) {
                        let frame = encode_message(Serializer::MsgPack, &response).unwrap();
                        socket.write_all(&frame).await.unwrap();
                    }
                }
            }
        });

        ServiceAddress::new("127.0.0.1", port)
    }

    #[test]
    fn test_config_setters() {
        let config = ClientConfig::default()
            .serializer(Serializer::Json)
            .request_timeout(Duration::from_millis(250))
            .connect_timeout(Duration::from_secs(1))
            .max_frame_size(1024);

        assert_eq!(config.serializer, Serializer::Json);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.max_frame_size, 1024);
    }

    #[tokio::test]
    async fn test_send_receives_matching_response() {
        let address = fake_server(|req| {
            Some(Response::success(req.request_id, json!(req.method_name)))
        })
        .await;
        let client = ClientTransport::default();

        let req = request("hello");
        let response = client.send(&address, &req).await.unwrap();

        assert_eq!(response.status_code, STATUS_OK);
        assert_eq!(response.request_id, req.request_id);
        assert_eq!(response.data, Some(json!("hello")));
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.pooled_connections(), 1);
    }

    #[tokio::test]
    async fn test_timeout_yields_504_and_clears_pending() {
        let address = fake_server(|_| None).await;
        let client = ClientTransport::new(
            ClientConfig::default().request_timeout(Duration::from_millis(100)),
        );

        let req = request("silent");
        let response = client.send(&address, &req).await.unwrap();

        assert_eq!(response.status_code, STATUS_TIMEOUT);
        assert_eq!(response.request_id, req.request_id);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_sends_leave_nothing_pending() {
        let address = fake_server(|_| None).await;
        let client = ClientTransport::new(
            ClientConfig::default().request_timeout(Duration::from_millis(200)),
        );

        for _ in 0..50 {
            let cancelled =
                tokio::time::timeout(Duration::from_millis(20), client.send(&address, &request("slow")))
                    .await;
            assert!(cancelled.is_err());
        }

        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.pooled_connections(), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = ClientTransport::default();
        let result = client
            .send(&ServiceAddress::new("127.0.0.1", port), &request("x"))
            .await;

        assert!(matches!(result, Err(RpcError::Connection { .. })));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let address = fake_server(|_| None).await;
        let client = Arc::new(ClientTransport::default());

        let waiting = {
            let client = client.clone();
            let address = address.clone();
            tokio::spawn(async move { client.send(&address, &request("slow")).await })
        };

        while client.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        client.close();
        client.close();

        let response = waiting.await.unwrap().unwrap();
        assert_eq!(response.status_code, STATUS_INTERNAL_ERROR);
        assert_eq!(client.pooled_connections(), 0);
        assert!(matches!(
            client.send(&address, &request("late")).await,
            Err(RpcError::Closed)
        ));
    }
}
