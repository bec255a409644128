//! In-process coordination service.
//!
//! [`MemoryEnsemble`] holds one node tree shared by any number of
//! [`MemoryCoordinator`] sessions, with the same ephemeral-node and child-watch
//! behavior a real ensemble has. It backs tests and single-process deployments.
//!
//! # Example
//!
//! ```
//! use simple_rpc::registry::{Coordinator, MemoryEnsemble};
//!
//! # async fn run() -> simple_rpc::Result<()> {
//! let ensemble = MemoryEnsemble::new();
//! let provider = ensemble.connect().await;
//! let consumer = ensemble.connect().await;
//!
//! provider.ensure_persistent("/simple-rpc/Echo").await?;
//! provider.create_ephemeral("/simple-rpc/Echo/10.0.0.1:9000").await?;
//! assert_eq!(
//!     consumer.children("/simple-rpc/Echo").await?,
//!     Some(vec!["10.0.0.1:9000".to_string()])
//! );
//!
//! provider.expire();
//! assert_eq!(consumer.children("/simple-rpc/Echo").await?, Some(vec![]));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use super::coordinator::{ChildWatch, Coordinator, WatchEvent};
use crate::error::{Result, RpcError};

struct Watcher {
    session: u64,
    tx: oneshot::Sender<WatchEvent>,
}

#[derive(Default)]
struct Node {
    /// Owning session for ephemeral nodes.
    owner: Option<u64>,
    watchers: Vec<Watcher>,
}

struct Tree {
    nodes: BTreeMap<String, Node>,
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", "")) | None => None,
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
    }
}

fn validate(path: &str) -> Result<()> {
    if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) || path.contains("//") {
        return Err(RpcError::Registry(format!("Invalid node path: {}", path)));
    }
    Ok(())
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::default());
        Self { nodes }
    }

    fn children(&self, path: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|key| parent_of(key) == Some(path))
            .filter_map(|key| key.rsplit_once('/').map(|(_, name)| name.to_string()))
            .collect()
    }

    fn fire(&mut self, path: &str, event: WatchEvent) {
        if let Some(node) = self.nodes.get_mut(path) {
            for watcher in node.watchers.drain(..) {
                let _ = watcher.tx.send(event);
            }
        }
    }

    fn insert(&mut self, path: &str, owner: Option<u64>) {
        self.nodes.insert(
            path.to_string(),
            Node {
                owner,
                watchers: Vec::new(),
            },
        );
        if let Some(parent) = parent_of(path) {
            self.fire(parent, WatchEvent::ChildrenChanged);
        }
    }

    fn remove(&mut self, path: &str) {
        if let Some(mut node) = self.nodes.remove(path) {
            for watcher in node.watchers.drain(..) {
                let _ = watcher.tx.send(WatchEvent::NodeDeleted);
            }
            if let Some(parent) = parent_of(path) {
                self.fire(parent, WatchEvent::ChildrenChanged);
            }
        }
    }

    /// Drop a session's watches and ephemeral nodes.
    fn end_session(&mut self, session: u64) -> usize {
        for node in self.nodes.values_mut() {
            let (gone, kept): (Vec<_>, Vec<_>) =
                node.watchers.drain(..).partition(|w| w.session == session);
            node.watchers = kept;
            for watcher in gone {
                let _ = watcher.tx.send(WatchEvent::SessionClosed);
            }
        }

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            self.remove(path);
        }
        owned.len()
    }
}

struct EnsembleInner {
    tree: Mutex<Tree>,
    reachable: watch::Sender<bool>,
    next_session: AtomicU64,
}

/// A shared in-process node tree.
#[derive(Clone)]
pub struct MemoryEnsemble {
    inner: Arc<EnsembleInner>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        let (reachable, _) = watch::channel(true);
        Self {
            inner: Arc::new(EnsembleInner {
                tree: Mutex::new(Tree::new()),
                reachable,
                next_session: AtomicU64::new(1),
            }),
        }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.inner.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new session. Waits while the ensemble is unreachable.
    pub async fn connect(&self) -> MemoryCoordinator {
        let mut reachable = self.inner.reachable.subscribe();
        // The sender lives in `self`, so this only returns once reachable.
        let _ = reachable.wait_for(|up| *up).await;

        let session = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Opened coordination session {}", session);
        MemoryCoordinator {
            ensemble: self.clone(),
            session,
            closed: AtomicBool::new(false),
        }
    }

    /// Make new connections hang (`false`) or succeed again (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.send_replace(reachable);
    }

    /// Whether a node exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.tree().nodes.contains_key(path)
    }

    /// Child watches currently armed on `path`.
    pub fn watcher_count(&self, path: &str) -> usize {
        self.tree()
            .nodes
            .get(path)
            .map_or(0, |node| node.watchers.len())
    }
}

/// One session on a [`MemoryEnsemble`].
pub struct MemoryCoordinator {
    ensemble: MemoryEnsemble,
    session: u64,
    closed: AtomicBool,
}

impl MemoryCoordinator {
    pub fn session_id(&self) -> u64 {
        self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Expire the session as the service would after losing contact: ephemeral
    /// nodes vanish and watches report [`WatchEvent::SessionClosed`].
    pub fn expire(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let removed = self.ensemble.tree().end_session(self.session);
        tracing::debug!(
            "Session {} ended, {} ephemeral node(s) removed",
            self.session,
            removed
        );
    }

    fn live_tree(&self) -> Result<MutexGuard<'_, Tree>> {
        if self.is_closed() {
            return Err(RpcError::Registry(format!(
                "Session {} is closed",
                self.session
            )));
        }
        Ok(self.ensemble.tree())
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn ensure_persistent(&self, path: &str) -> Result<()> {
        validate(path)?;
        let mut tree = self.live_tree()?;

        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            match tree.nodes.get(&current) {
                Some(node) if node.owner.is_some() => {
                    return Err(RpcError::Registry(format!(
                        "Ephemeral node {} cannot have children",
                        current
                    )));
                }
                Some(_) => {}
                None => tree.insert(&current, None),
            }
        }
        Ok(())
    }

    async fn create_ephemeral(&self, path: &str) -> Result<bool> {
        validate(path)?;
        let mut tree = self.live_tree()?;

        if tree.nodes.contains_key(path) {
            return Ok(false);
        }
        let parent = parent_of(path)
            .ok_or_else(|| RpcError::Registry(format!("Cannot create {}", path)))?;
        match tree.nodes.get(parent) {
            None => {
                return Err(RpcError::Registry(format!("No parent node for {}", path)));
            }
            Some(node) if node.owner.is_some() => {
                return Err(RpcError::Registry(format!(
                    "Ephemeral node {} cannot have children",
                    parent
                )));
            }
            Some(_) => {}
        }

        tree.insert(path, Some(self.session));
        Ok(true)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate(path)?;
        let mut tree = self.live_tree()?;

        if path == "/" || !tree.nodes.contains_key(path) {
            return Ok(());
        }
        if !tree.children(path).is_empty() {
            return Err(RpcError::Registry(format!("Node {} is not empty", path)));
        }
        tree.remove(path);
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Option<Vec<String>>> {
        validate(path)?;
        let tree = self.live_tree()?;

        if !tree.nodes.contains_key(path) {
            return Ok(None);
        }
        Ok(Some(tree.children(path)))
    }

    async fn watch_children(&self, path: &str) -> Result<Option<(Vec<String>, ChildWatch)>> {
        validate(path)?;
        let mut tree = self.live_tree()?;

        let children = tree.children(path);
        let Some(node) = tree.nodes.get_mut(path) else {
            return Ok(None);
        };

        // Watches whose receiver was dropped will never be observed.
        node.watchers.retain(|w| !w.tx.is_closed());
        let (tx, rx) = oneshot::channel();
        node.watchers.push(Watcher {
            session: self.session,
            tx,
        });
        Ok(Some((children, ChildWatch::from_receiver(rx))))
    }

    async fn close(&self) {
        self.expire();
    }
}

impl Drop for MemoryCoordinator {
    fn drop(&mut self) {
        self.expire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/"), None);
        assert_eq!(parent_of("/a"), Some("/"));
        assert_eq!(parent_of("/a/b"), Some("/a"));
    }

    #[tokio::test]
    async fn test_ensure_persistent_creates_ancestors() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect().await;

        session.ensure_persistent("/simple-rpc/Echo").await.unwrap();
        session.ensure_persistent("/simple-rpc/Echo").await.unwrap();

        assert!(ensemble.exists("/simple-rpc"));
        assert_eq!(
            session.children("/simple-rpc").await.unwrap(),
            Some(vec!["Echo".to_string()])
        );
        assert_eq!(session.children("/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ephemeral_rules() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect().await;

        assert!(session.create_ephemeral("/nope/child").await.is_err());

        session.ensure_persistent("/svc").await.unwrap();
        assert!(session.create_ephemeral("/svc/a:1").await.unwrap());
        assert!(!session.create_ephemeral("/svc/a:1").await.unwrap());
        assert!(session.create_ephemeral("/svc/a:1/x").await.is_err());
        assert!(session.delete("/svc").await.is_err());

        session.delete("/svc/a:1").await.unwrap();
        session.delete("/svc/a:1").await.unwrap();
        assert_eq!(session.children("/svc").await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_invalid_paths() {
        let session = MemoryEnsemble::new().connect().await;
        assert!(session.ensure_persistent("relative").await.is_err());
        assert!(session.ensure_persistent("/a//b").await.is_err());
        assert!(session.children("/a/").await.is_err());
    }

    #[tokio::test]
    async fn test_watch_fires_on_child_change() {
        let ensemble = MemoryEnsemble::new();
        let provider = ensemble.connect().await;
        let consumer = ensemble.connect().await;
        provider.ensure_persistent("/svc").await.unwrap();

        let (children, watch) = consumer.watch_children("/svc").await.unwrap().unwrap();
        assert!(children.is_empty());

        provider.create_ephemeral("/svc/a:1").await.unwrap();
        assert_eq!(watch.await, WatchEvent::ChildrenChanged);
    }

    #[tokio::test]
    async fn test_watch_fires_on_node_deletion() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect().await;
        session.ensure_persistent("/svc").await.unwrap();

        let (_, watch) = session.watch_children("/svc").await.unwrap().unwrap();
        session.delete("/svc").await.unwrap();
        assert_eq!(watch.await, WatchEvent::NodeDeleted);
    }

    #[tokio::test]
    async fn test_expire_removes_ephemerals_and_ends_watches() {
        let ensemble = MemoryEnsemble::new();
        let provider = ensemble.connect().await;
        let consumer = ensemble.connect().await;
        provider.ensure_persistent("/svc").await.unwrap();
        provider.create_ephemeral("/svc/a:1").await.unwrap();

        let (_, consumer_watch) = consumer.watch_children("/svc").await.unwrap().unwrap();
        let (_, provider_watch) = provider.watch_children("/svc").await.unwrap().unwrap();

        provider.expire();

        assert_eq!(provider_watch.await, WatchEvent::SessionClosed);
        assert_eq!(consumer_watch.await, WatchEvent::ChildrenChanged);
        assert_eq!(consumer.children("/svc").await.unwrap(), Some(vec![]));
        assert!(ensemble.exists("/svc"));
        assert!(provider.children("/svc").await.is_err());
    }

    #[tokio::test]
    async fn test_abandoned_watches_are_pruned() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.connect().await;
        session.ensure_persistent("/svc").await.unwrap();

        for _ in 0..100 {
            let (_, watch) = session.watch_children("/svc").await.unwrap().unwrap();
            drop(watch);
        }
        assert_eq!(ensemble.watcher_count("/svc"), 1);

        let (_, watch) = session.watch_children("/svc").await.unwrap().unwrap();
        session.create_ephemeral("/svc/a:1").await.unwrap();
        assert_eq!(watch.await, WatchEvent::ChildrenChanged);
        assert_eq!(ensemble.watcher_count("/svc"), 0);
    }

    #[tokio::test]
    async fn test_unreachable_connect_hangs() {
        let ensemble = MemoryEnsemble::new();
        ensemble.set_reachable(false);

        let attempt = tokio::time::timeout(Duration::from_millis(50), ensemble.connect()).await;
        assert!(attempt.is_err());

        ensemble.set_reachable(true);
        let session = ensemble.connect().await;
        assert!(!session.is_closed());
    }
}
