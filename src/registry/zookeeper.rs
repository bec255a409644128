//! Apache ZooKeeper session (feature `zookeeper`).

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use zookeeper_client as zk;

use super::coordinator::{ChildWatch, Coordinator, WatchEvent};
use crate::error::{Result, RpcError};

fn registry_error(path: &str, e: zk::Error) -> RpcError {
    RpcError::Registry(format!("{}: {}", path, e))
}

/// A ZooKeeper session usable as a registry [`Coordinator`].
///
/// ```no_run
/// use simple_rpc::registry::{CoordinatedRegistry, RegistryConfig, ZkCoordinator};
///
/// # async fn run() -> simple_rpc::Result<()> {
/// let registry =
///     CoordinatedRegistry::connect(ZkCoordinator::connect("127.0.0.1:2181"), RegistryConfig::default())
///         .await?;
/// # Ok(())
/// # }
/// ```
pub struct ZkCoordinator {
    client: Mutex<Option<zk::Client>>,
}

impl ZkCoordinator {
    /// Connect to `cluster` (`host:port[,host:port...]`).
    pub async fn connect(cluster: &str) -> Result<Self> {
        let client = zk::Client::connect(cluster)
            .await
            .map_err(|e| RpcError::RegistryConnect(format!("{}: {}", cluster, e)))?;
        Ok(Self {
            client: Mutex::new(Some(client)),
        })
    }

    fn client(&self) -> Result<zk::Client> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| RpcError::Registry("ZooKeeper session closed".to_string()))
    }
}

#[async_trait]
impl Coordinator for ZkCoordinator {
    async fn ensure_persistent(&self, path: &str) -> Result<()> {
        let client = self.client()?;
        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());

        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            match client.create(&current, &[], &options).await {
                Ok(_) | Err(zk::Error::NodeExists) => {}
                Err(e) => return Err(registry_error(&current, e)),
            }
        }
        Ok(())
    }

    async fn create_ephemeral(&self, path: &str) -> Result<bool> {
        let client = self.client()?;
        let options = zk::CreateMode::Ephemeral.with_acls(zk::Acls::anyone_all());

        match client.create(path, &[], &options).await {
            Ok(_) => Ok(true),
            Err(zk::Error::NodeExists) => Ok(false),
            Err(e) => Err(registry_error(path, e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.client()?.delete(path, None).await {
            Ok(()) | Err(zk::Error::NoNode) => Ok(()),
            Err(e) => Err(registry_error(path, e)),
        }
    }

    async fn children(&self, path: &str) -> Result<Option<Vec<String>>> {
        match self.client()?.list_children(path).await {
            Ok(children) => Ok(Some(children)),
            Err(zk::Error::NoNode) => Ok(None),
            Err(e) => Err(registry_error(path, e)),
        }
    }

    async fn watch_children(&self, path: &str) -> Result<Option<(Vec<String>, ChildWatch)>> {
        let (children, watcher) = match self.client()?.list_and_watch_children(path).await {
            Ok(listed) => listed,
            Err(zk::Error::NoNode) => return Ok(None),
            Err(e) => return Err(registry_error(path, e)),
        };

        let watch = ChildWatch::new(async move {
            let event = watcher.changed().await;
            match event.event_type {
                zk::EventType::NodeDeleted => WatchEvent::NodeDeleted,
                zk::EventType::Session => WatchEvent::SessionClosed,
                _ => WatchEvent::ChildrenChanged,
            }
        });
        Ok(Some((children, watch)))
    }

    async fn close(&self) {
        // Dropping the last client handle closes the session.
        let client = self.client.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(client);
    }
}
