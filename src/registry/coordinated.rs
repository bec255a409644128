//! Registry backed by a coordination service.
//!
//! Layout under the root (default `/simple-rpc`):
//!
//! ```text
//! /simple-rpc
//!   /{service name}          persistent, one per service
//!     /{host:port}           ephemeral, one per registered provider
//! ```
//!
//! Providers vanish from discovery when their session ends, crash included.
//! Consumers list a service directory on first use, cache the result and keep it
//! fresh with a child watch handled by one background task per service.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::cache::DiscoveryCache;
use super::coordinator::{ChildWatch, Coordinator, WatchEvent};
use super::{Registry, ROOT_PATH};
use crate::error::{Result, RpcError};
use crate::protocol::{ServiceAddress, ServiceName};

/// Default bound on establishing the coordination session.
pub const DEFAULT_REGISTRY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinated registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Namespace node all services live under.
    pub root: String,
    /// How long [`CoordinatedRegistry::connect`] waits for a session.
    pub connect_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: ROOT_PATH.to_string(),
            connect_timeout: DEFAULT_REGISTRY_CONNECT_TIMEOUT,
        }
    }
}

impl RegistryConfig {
    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Registry over any [`Coordinator`].
pub struct CoordinatedRegistry<C: Coordinator> {
    coordinator: Arc<C>,
    config: RegistryConfig,
    cache: Arc<DiscoveryCache>,
    watches: DashMap<ServiceName, JoinHandle<()>>,
    closed: AtomicBool,
}

impl<C: Coordinator> CoordinatedRegistry<C> {
    /// Wrap an established session.
    pub fn new(coordinator: C, config: RegistryConfig) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            config,
            cache: Arc::new(DiscoveryCache::new()),
            watches: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Establish the session with a bounded wait.
    ///
    /// # Errors
    ///
    /// [`RpcError::RegistryConnect`] if `connect` fails or does not finish within
    /// the configured timeout.
    pub async fn connect<F>(connect: F, config: RegistryConfig) -> Result<Self>
    where
        F: Future<Output = Result<C>>,
    {
        match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(coordinator)) => {
                tracing::info!("Connected to coordination service (root {})", config.root);
                Ok(Self::new(coordinator, config))
            }
            Ok(Err(e)) => Err(RpcError::RegistryConnect(e.to_string())),
            Err(_) => Err(RpcError::RegistryConnect(format!(
                "no session within {} ms",
                config.connect_timeout.as_millis()
            ))),
        }
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    /// Number of services with a running watch task.
    pub fn active_watches(&self) -> usize {
        self.watches.iter().filter(|w| !w.value().is_finished()).count()
    }

    fn service_path(&self, name: &ServiceName) -> String {
        format!("{}/{}", self.config.root, name)
    }

    fn instance_path(&self, name: &ServiceName, address: &ServiceAddress) -> String {
        format!("{}/{}/{}", self.config.root, name, address)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RpcError::Closed);
        }
        Ok(())
    }

    fn has_live_watch(&self, name: &ServiceName) -> bool {
        self.watches
            .get(name)
            .is_some_and(|task| !task.is_finished())
    }

    /// Seed the cache entry for `name` and start its watch task, unless a
    /// running task already owns the entry.
    ///
    /// The seed is written before the task exists, so a listing read by the
    /// task always lands after it.
    fn install_watch(
        &self,
        name: &ServiceName,
        path: String,
        addresses: Vec<ServiceAddress>,
        watch: ChildWatch,
    ) -> bool {
        match self.watches.entry(name.clone()) {
            Entry::Occupied(entry) if !entry.get().is_finished() => false,
            entry => {
                self.cache.replace(name.clone(), addresses);
                let task = tokio::spawn(watch_loop(
                    self.coordinator.clone(),
                    self.cache.clone(),
                    name.clone(),
                    path,
                    watch,
                ));
                match entry {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(task);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(task);
                    }
                }
                true
            }
        }
    }
}

/// Parse child node names into addresses, skipping malformed ones.
fn parse_children(name: &ServiceName, children: &[String]) -> Vec<ServiceAddress> {
    children
        .iter()
        .filter_map(|child| match child.parse::<ServiceAddress>() {
            Ok(address) => Some(address),
            Err(e) => {
                tracing::warn!("Skipping registry entry {} under {}: {}", child, name, e);
                None
            }
        })
        .collect()
}

/// Keep the cache entry for `name` in step with the directory at `path`.
async fn watch_loop<C: Coordinator>(
    coordinator: Arc<C>,
    cache: Arc<DiscoveryCache>,
    name: ServiceName,
    path: String,
    mut watch: ChildWatch,
) {
    loop {
        match watch.await {
            WatchEvent::ChildrenChanged => match coordinator.watch_children(&path).await {
                Ok(Some((children, next))) => {
                    let addresses = parse_children(&name, &children);
                    tracing::debug!("Service {} now has {} instance(s)", name, addresses.len());
                    cache.replace(name.clone(), addresses);
                    watch = next;
                }
                Ok(None) => {
                    cache.replace(name, Vec::new());
                    return;
                }
                Err(e) => {
                    tracing::warn!("Lost watch on {}, keeping cached entry: {}", name, e);
                    return;
                }
            },
            WatchEvent::NodeDeleted => {
                tracing::debug!("Service directory for {} deleted", name);
                cache.replace(name, Vec::new());
                return;
            }
            WatchEvent::SessionClosed => {
                tracing::warn!("Coordination session closed, {} served from cache", name);
                return;
            }
        }
    }
}

#[async_trait]
impl<C: Coordinator> Registry for CoordinatedRegistry<C> {
    async fn register(&self, name: &ServiceName, address: &ServiceAddress) -> Result<()> {
        self.ensure_open()?;

        self.coordinator
            .ensure_persistent(&self.service_path(name))
            .await?;
        let created = self
            .coordinator
            .create_ephemeral(&self.instance_path(name, address))
            .await?;
        if !created {
            tracing::debug!("{} already registered for {}", address, name);
        }

        self.cache.add(name, address);
        tracing::info!("Registered {} at {}", name, address);
        Ok(())
    }

    async fn unregister(&self, name: &ServiceName, address: &ServiceAddress) -> Result<()> {
        self.ensure_open()?;

        self.coordinator
            .delete(&self.instance_path(name, address))
            .await?;
        self.cache.remove_address(name, address);
        tracing::info!("Unregistered {} at {}", name, address);
        Ok(())
    }

    async fn discover(&self, name: &ServiceName) -> Result<Vec<ServiceAddress>> {
        self.ensure_open()?;

        if let Some(cached) = self.cache.get(name) {
            return Ok(cached);
        }

        let path = self.service_path(name);

        // A running watch task owns the entry; list without arming another watch.
        if self.has_live_watch(name) {
            let children = self.coordinator.children(&path).await?.unwrap_or_default();
            return Ok(parse_children(name, &children));
        }

        let Some((children, watch)) = self.coordinator.watch_children(&path).await? else {
            tracing::debug!("No registry directory for {}", name);
            return Ok(Vec::new());
        };

        let addresses = parse_children(name, &children);
        if !self.install_watch(name, path, addresses.clone(), watch) {
            tracing::debug!("Watch on {} already running", name);
        }

        tracing::info!("Discovered {} instance(s) of {}", addresses.len(), name);
        Ok(addresses)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for entry in self.watches.iter() {
            entry.value().abort();
        }
        self.watches.clear();
        self.cache.clear();
        self.coordinator.close().await;
        tracing::info!("Registry closed");
    }
}

impl<C: Coordinator> Drop for CoordinatedRegistry<C> {
    fn drop(&mut self) {
        for entry in self.watches.iter() {
            entry.value().abort();
        }
    }
}
