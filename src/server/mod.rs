//! Server transport - accept loop, routing and worker pool.
//!
//! [`ServerTransport`] listens on a TCP port, decodes [`Request`](crate::protocol::Request)s
//! and routes each one by [`ServiceName`] to a [`ServiceInstance`]. Unknown services
//! are answered with `404` straight from the connection task; known ones run on a
//! bounded worker pool and answer with `200` or `500`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use simple_rpc::{InterfaceDescriptor, ServerConfig, ServerTransport, ServiceInstance};
//!
//! # async fn run() -> simple_rpc::Result<()> {
//! let echo = Arc::new(
//!     InterfaceDescriptor::new("com.example.Echo")
//!         .method("concat", &["String", "String"], "String"),
//! );
//! let server = ServerTransport::new(ServerConfig::default());
//! server.add_service(
//!     "com.example.Echo",
//!     ServiceInstance::new(echo).handle("concat", |(a, b): (String, String)| async move {
//!         Ok::<_, String>(a + &b)
//!     }),
//! )?;
//!
//! let addr = server.start(9000).await?;
//! println!("listening on {}", addr);
//! # Ok(())
//! # }
//! ```

mod connection;
mod service;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

pub use service::{
    AsyncHandler, BlockingHandler, BoxFuture, InvocationResult, MethodHandler, ServiceInstance,
};

use crate::codec::Serializer;
use crate::error::{Result, RpcError};
use crate::protocol::{ServiceName, DEFAULT_MAX_FRAME_SIZE};
use crate::writer::WriterConfig;
use connection::{serve_connection, Dispatcher};

/// Default time `stop` waits for in-flight dispatches.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default worker pool size: twice the available parallelism.
pub fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
}

/// Server transport configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Body encoding; must match the clients'.
    pub serializer: Serializer,
    /// Interface to bind, `0.0.0.0` by default.
    pub bind_host: String,
    /// Maximum concurrently running dispatches.
    pub worker_threads: usize,
    /// Largest accepted request frame body.
    pub max_frame_size: usize,
    /// How long `stop` waits for in-flight dispatches.
    pub drain_timeout: Duration,
    pub writer: WriterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            serializer: Serializer::default(),
            bind_host: "0.0.0.0".to_string(),
            worker_threads: default_worker_threads(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            writer: WriterConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Set the worker pool size (at least one).
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }
}

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

/// Service instances exposed by a server, keyed by service name.
#[derive(Default)]
pub struct ServiceMap {
    services: DashMap<ServiceName, Arc<ServiceInstance>>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the replaced instance.
    pub fn insert(
        &self,
        name: ServiceName,
        instance: Arc<ServiceInstance>,
    ) -> Option<Arc<ServiceInstance>> {
        self.services.insert(name, instance)
    }

    pub fn get(&self, name: &ServiceName) -> Option<Arc<ServiceInstance>> {
        self.services.get(name).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, name: &ServiceName) -> Option<Arc<ServiceInstance>> {
        self.services.remove(name).map(|(_, instance)| instance)
    }

    pub fn contains(&self, name: &ServiceName) -> bool {
        self.services.contains_key(name)
    }

    /// Sorted service names.
    pub fn names(&self) -> Vec<ServiceName> {
        let mut names: Vec<ServiceName> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

struct Lifecycle {
    state: ServerState,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
}

/// Listens for requests and dispatches them to registered services.
pub struct ServerTransport {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Mutex<Lifecycle>,
}

impl ServerTransport {
    pub fn new(config: ServerConfig) -> Self {
        let worker_threads = config.worker_threads.max(1);
        let dispatcher = Arc::new(Dispatcher {
            serializer: config.serializer,
            max_frame_size: config.max_frame_size,
            writer: config.writer.clone(),
            services: Arc::new(ServiceMap::new()),
            workers: Arc::new(Semaphore::new(worker_threads)),
        });

        Self {
            config: ServerConfig {
                worker_threads,
                ..config
            },
            dispatcher,
            lifecycle: Mutex::new(Lifecycle {
                state: ServerState::Stopped,
                local_addr: None,
                shutdown: None,
                accept_task: None,
            }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Expose `instance` under `name`, replacing any previous instance.
    ///
    /// Allowed before and after `start`.
    ///
    /// # Errors
    ///
    /// [`RpcError::InvalidService`] if a handler does not match a method of the
    /// instance's interface.
    pub fn add_service(&self, name: impl Into<ServiceName>, instance: ServiceInstance) -> Result<()> {
        instance.validate()?;
        let name = name.into();

        tracing::info!(
            "Exposing service {} ({} method(s) of {})",
            name,
            instance.method_count(),
            instance.interface().name()
        );
        self.dispatcher.services.insert(name, Arc::new(instance));
        Ok(())
    }

    /// Stop exposing `name`. Requests for it are answered with `404` from now on.
    pub fn remove_service(&self, name: &ServiceName) -> bool {
        self.dispatcher.services.remove(name).is_some()
    }

    /// Names of the exposed services.
    pub fn services(&self) -> Vec<ServiceName> {
        self.dispatcher.services.names()
    }

    /// Bind `port` on the configured host and start accepting connections.
    ///
    /// Port `0` picks an ephemeral port. Returns the bound address.
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state != ServerState::Stopped {
                return Err(RpcError::InvalidState(format!(
                    "cannot start server while {:?}",
                    lifecycle.state
                )));
            }
            lifecycle.state = ServerState::Starting;
        }

        let bound = match TcpListener::bind((self.config.bind_host.as_str(), port)).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.lifecycle().state = ServerState::Stopped;
                return Err(RpcError::Bind { port, source });
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, self.dispatcher.clone(), shutdown_rx));

        let mut lifecycle = self.lifecycle();
        lifecycle.state = ServerState::Listening;
        lifecycle.local_addr = Some(local_addr);
        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.accept_task = Some(accept_task);

        tracing::info!(
            "Server listening on {} ({}, {} workers)",
            local_addr,
            self.config.serializer.name(),
            self.config.worker_threads
        );
        Ok(local_addr)
    }

    /// Stop accepting, close connections and drain in-flight dispatches.
    ///
    /// Idempotent; does nothing unless the server is listening.
    pub async fn stop(&self) {
        let (shutdown, accept_task) = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state != ServerState::Listening {
                return;
            }
            lifecycle.state = ServerState::Stopping;
            (lifecycle.shutdown.take(), lifecycle.accept_task.take())
        };

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(task) = accept_task {
            let _ = task.await;
        }

        let workers = self.config.worker_threads as u32;
        let drain = self.dispatcher.workers.acquire_many(workers);
        match tokio::time::timeout(self.config.drain_timeout, drain).await {
            Ok(_) => {}
            Err(_) => tracing::warn!(
                "Dispatches still running after {} ms drain timeout",
                self.config.drain_timeout.as_millis()
            ),
        }

        let mut lifecycle = self.lifecycle();
        lifecycle.state = ServerState::Stopped;
        lifecycle.local_addr = None;
        tracing::info!("Server stopped");
    }

    pub fn state(&self) -> ServerState {
        self.lifecycle().state
    }

    /// The bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle().local_addr
    }
}

impl Drop for ServerTransport {
    fn drop(&mut self) {
        if let Some(shutdown) = self.lifecycle().shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    tracing::debug!("Accepted connection from {}", peer);
                    tokio::spawn(serve_connection(
                        stream,
                        peer.to_string(),
                        dispatcher.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::InterfaceDescriptor;

    fn echo_instance() -> ServiceInstance {
        let interface = Arc::new(InterfaceDescriptor::new("Echo").method("ping", &[], "String"));
        ServiceInstance::new(interface).handle("ping", |_: ()| async { Ok::<_, String>("pong") })
    }

    fn local() -> ServerConfig {
        ServerConfig::default().bind_host("127.0.0.1")
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_host, "0.0.0.0");
        assert!(config.worker_threads >= 2);
        assert_eq!(config.drain_timeout, DEFAULT_DRAIN_TIMEOUT);
        assert_eq!(ServerConfig::default().worker_threads(0).worker_threads, 1);
    }

    #[test]
    fn test_add_service_validates() {
        let server = ServerTransport::new(local());
        assert!(server.add_service("Echo", echo_instance()).is_ok());

        let interface = Arc::new(InterfaceDescriptor::new("Echo"));
        let bogus = ServiceInstance::new(interface).handle("ping", |_: ()| async { Ok::<_, String>(1) });
        assert!(matches!(
            server.add_service("Echo-2", bogus),
            Err(RpcError::InvalidService(_))
        ));

        assert_eq!(server.services(), vec![ServiceName::from("Echo")]);
        assert!(server.remove_service(&ServiceName::from("Echo")));
        assert!(server.services().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let server = ServerTransport::new(local());
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());

        let addr = server.start(0).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.state(), ServerState::Listening);
        assert_eq!(server.local_addr(), Some(addr));

        assert!(matches!(server.start(0).await, Err(RpcError::InvalidState(_))));

        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
        server.stop().await;

        // Restartable after a stop.
        server.start(0).await.unwrap();
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_returns_to_stopped() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let server = ServerTransport::new(local());
        let result = server.start(port).await;

        assert!(matches!(result, Err(RpcError::Bind { port: p, .. }) if p == port));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_when_never_started() {
        let server = ServerTransport::new(local());
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
