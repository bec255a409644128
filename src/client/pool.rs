//! Connection pool: at most one live connection per `host:port`.
//!
//! Every connection runs two tasks: the writer task (see [`crate::writer`]) and a
//! reader task that decodes responses and resolves pending slots. When the reader
//! ends for any reason it marks the connection dead, evicts it from the pool if
//! the pool still points at it, and fails the requests that were sent over it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;

use super::pending::PendingRequests;
use super::ClientConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{FrameDecoder, Response, ServiceAddress};
use crate::writer::{spawn_writer_task, WriterHandle};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// One multiplexed connection to a provider.
pub struct Connection {
    id: u64,
    address: ServiceAddress,
    writer: WriterHandle,
    closed: Arc<AtomicBool>,
    reader_task: AbortHandle,
    writer_task: AbortHandle,
}

impl Connection {
    fn spawn<S, F>(
        id: u64,
        address: ServiceAddress,
        stream: S,
        config: &ClientConfig,
        pending: Arc<PendingRequests>,
        on_close: F,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, &config.writer);
        let writer_task = writer_task.abort_handle();
        let closed = Arc::new(AtomicBool::new(false));
        let decoder = FrameDecoder::<Response>::new(config.serializer, config.max_frame_size);

        let reader_task = tokio::spawn({
            let closed = closed.clone();
            let writer_task = writer_task.clone();
            let address = address.clone();
            async move {
                match read_loop(read_half, decoder, &pending).await {
                    Ok(()) => tracing::debug!("Connection {} to {} closed by peer", id, address),
                    Err(e) => tracing::error!("Connection {} to {} failed: {}", id, address, e),
                }

                closed.store(true, Ordering::Release);
                writer_task.abort();
                on_close();

                let failed = pending.fail_connection(id, "connection closed");
                if failed > 0 {
                    tracing::warn!("Failed {} pending request(s) on {}", failed, address);
                }
            }
        })
        .abort_handle();

        Self {
            id,
            address,
            writer,
            closed,
            reader_task,
            writer_task,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    /// Check that both the reader and the writer are still running.
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.writer.is_closed()
    }

    /// Queue one encoded frame.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.writer.send(frame).await
    }

    /// Tear the connection down without waiting for queued frames.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    mut decoder: FrameDecoder<Response>,
    pending: &PendingRequests,
) -> Result<()> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for message in decoder.push(&buf[..n])? {
            match message {
                Ok(response) => {
                    if let Err(late) = pending.complete(response) {
                        tracing::warn!(
                            "Dropping response for unknown or expired request {}",
                            late.request_id
                        );
                    }
                }
                Err(e) => tracing::warn!("Dropping undecodable response: {}", e),
            }
        }
    }
}

/// Connections keyed by `host:port`.
#[derive(Default)]
pub struct ConnectionPool {
    connections: Arc<DashMap<String, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live pooled connection to `address`, connecting if needed.
    ///
    /// Concurrent callers racing to connect the same address end up sharing
    /// whichever connection reached the pool first.
    pub async fn get_or_connect(
        &self,
        address: &ServiceAddress,
        config: &ClientConfig,
        pending: &Arc<PendingRequests>,
    ) -> Result<Arc<Connection>> {
        let key = address.to_string();

        if let Some(connection) = self.connections.get(&key) {
            if connection.is_alive() {
                return Ok(connection.clone());
            }
        }

        let connect = TcpStream::connect((address.host.as_str(), address.port));
        let stream = match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(RpcError::connection(&key, e)),
            Err(_) => return Err(RpcError::connection(&key, "connect timed out")),
        };
        stream.set_nodelay(true)?;

        let connection = Arc::new(self.open(address.clone(), stream, config, pending.clone()));

        match self.connections.entry(key) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_alive() {
                    connection.close();
                    return Ok(existing.get().clone());
                }
                // The old reader may still be running behind a dead writer.
                let stale = existing.insert(connection.clone());
                stale.close();
                let failed = pending.fail_connection(stale.id(), "connection closed");
                if failed > 0 {
                    tracing::warn!("Failed {} pending request(s) on {}", failed, address);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(connection.clone());
            }
        }

        tracing::debug!("Connected to {} (connection {})", address, connection.id());
        Ok(connection)
    }

    fn open<S>(
        &self,
        address: ServiceAddress,
        stream: S,
        config: &ClientConfig,
        pending: Arc<PendingRequests>,
    ) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connections = self.connections.clone();
        let key = address.to_string();

        let on_close = move || {
            // A newer connection may already have replaced this one.
            connections.remove_if(&key, |_, current| current.id() == id);
        };

        Connection::spawn(id, address, stream, config, pending, on_close)
    }

    /// Number of pooled connections, dead ones not yet evicted included.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close and forget every connection.
    pub fn close_all(&self) {
        let keys: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, connection)) = self.connections.remove(&key) {
                connection.close();
            }
        }
    }
}
