//! Service registry - registration and cached, watch-driven discovery.
//!
//! - [`Registry`] - the capability set used by providers and proxies
//! - [`CoordinatedRegistry`] - implementation over a [`Coordinator`] session
//! - [`DiscoveryCache`] - local copy of the topology, replaced on change
//! - [`MemoryEnsemble`] - in-process coordination service
//! - `ZkCoordinator` - Apache ZooKeeper session (feature `zookeeper`)

mod cache;
mod coordinated;
mod coordinator;
mod memory;
#[cfg(feature = "zookeeper")]
mod zookeeper;

use async_trait::async_trait;

pub use cache::DiscoveryCache;
pub use coordinated::{CoordinatedRegistry, RegistryConfig, DEFAULT_REGISTRY_CONNECT_TIMEOUT};
pub use coordinator::{ChildWatch, Coordinator, WatchEvent};
pub use memory::{MemoryCoordinator, MemoryEnsemble};
#[cfg(feature = "zookeeper")]
pub use self::zookeeper::ZkCoordinator;

use crate::error::Result;
use crate::protocol::{ServiceAddress, ServiceName};

/// Root namespace node of the registry layout.
pub const ROOT_PATH: &str = "/simple-rpc";

/// Maps service names to provider addresses.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Announce that `address` provides `name`.
    async fn register(&self, name: &ServiceName, address: &ServiceAddress) -> Result<()>;

    /// Withdraw a registration. Unknown registrations are ignored.
    async fn unregister(&self, name: &ServiceName, address: &ServiceAddress) -> Result<()>;

    /// Current providers of `name`; empty when there are none.
    async fn discover(&self, name: &ServiceName) -> Result<Vec<ServiceAddress>>;

    /// Release the registry. Idempotent.
    async fn close(&self);
}
