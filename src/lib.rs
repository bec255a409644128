//! # simple-rpc
//!
//! Lightweight RPC framework: call methods on remote service implementations as
//! if they were local.
//!
//! ## Architecture
//!
//! ```text
//! ServiceProxy ─► Registry::discover ─► ClientTransport::send ─► (TCP)
//!                                                                  │
//! ServiceProxy ◄─ pending slot ◄─ reader task ◄─ (TCP) ◄─ ServerTransport ─► ServiceInstance
//! ```
//!
//! - **Wire** - `[i32 big-endian length][body]` frames, MessagePack (default) or JSON bodies
//! - **Client** - one pooled connection per provider, many requests in flight on it,
//!   correlated by request id
//! - **Server** - per-connection decode loop, `404` for unknown services, bounded worker pool
//! - **Registry** - providers as ephemeral nodes under `/simple-rpc/{service}`, discovery
//!   served from a cache that a child watch keeps fresh
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use simple_rpc::registry::{CoordinatedRegistry, MemoryEnsemble, Registry, RegistryConfig};
//! use simple_rpc::{
//!     ClientTransport, InterfaceDescriptor, ProxyFactory, ServerConfig, ServerTransport,
//!     ServiceAddress, ServiceInstance, ServiceName,
//! };
//!
//! #[tokio::main]
//! async fn main() -> simple_rpc::Result<()> {
//!     let echo = Arc::new(
//!         InterfaceDescriptor::new("com.example.Echo")
//!             .method("concat", &["String", "String"], "String"),
//!     );
//!     let ensemble = MemoryEnsemble::new();
//!
//!     // Provider
//!     let server = ServerTransport::new(ServerConfig::default());
//!     server.add_service(
//!         "com.example.Echo",
//!         ServiceInstance::new(echo.clone())
//!             .handle("concat", |(a, b): (String, String)| async move { Ok::<_, String>(a + &b) }),
//!     )?;
//!     let bound = server.start(9000).await?;
//!     let provider = CoordinatedRegistry::new(ensemble.connect().await, RegistryConfig::default());
//!     provider
//!         .register(&ServiceName::from("com.example.Echo"), &ServiceAddress::new("127.0.0.1", bound.port()))
//!         .await?;
//!
//!     // Consumer
//!     let consumer = Arc::new(CoordinatedRegistry::new(ensemble.connect().await, RegistryConfig::default()));
//!     let factory = ProxyFactory::new(Arc::new(ClientTransport::default()), consumer);
//!     let proxy = factory.create(echo, None, 0);
//!
//!     let joined: String = proxy.call("concat", ("a", "b")).await?;
//!     assert_eq!(joined, "ab");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod interface;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod writer;

pub use client::{ClientConfig, ClientTransport};
pub use codec::Serializer;
pub use error::{Result, RpcError};
pub use interface::{encode_args, InterfaceDescriptor, MethodDescriptor};
pub use protocol::{Request, Response, ServiceAddress, ServiceName};
pub use proxy::{select_random, ProxyFactory, ServiceProxy};
pub use registry::{CoordinatedRegistry, DiscoveryCache, MemoryEnsemble, Registry, RegistryConfig};
pub use server::{ServerConfig, ServerState, ServerTransport, ServiceInstance, ServiceMap};
pub use writer::WriterConfig;
