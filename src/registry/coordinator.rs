//! Coordination service abstraction.
//!
//! A coordination service is a hierarchical key store. Nodes are addressed by
//! absolute `/`-separated paths and are either persistent or ephemeral; an
//! ephemeral node belongs to the session that created it and disappears when that
//! session ends. Clients can watch a node's child list for a single change.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::Result;

/// What ended a child watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// A child was added or removed.
    ChildrenChanged,
    /// The watched node itself was deleted.
    NodeDeleted,
    /// The session that installed the watch is gone; no more events will come.
    SessionClosed,
}

/// One-shot notification for a change to a node's children.
///
/// Resolves once; install a new watch to keep observing.
pub struct ChildWatch {
    inner: Pin<Box<dyn Future<Output = WatchEvent> + Send>>,
}

impl ChildWatch {
    /// Wrap a future that resolves with the watch event.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = WatchEvent> + Send + 'static,
    {
        Self {
            inner: Box::pin(future),
        }
    }

    /// A watch fired through a oneshot channel; a dropped sender reads as a
    /// closed session.
    pub fn from_receiver(rx: oneshot::Receiver<WatchEvent>) -> Self {
        Self::new(async move { rx.await.unwrap_or(WatchEvent::SessionClosed) })
    }
}

impl Future for ChildWatch {
    type Output = WatchEvent;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WatchEvent> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for ChildWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildWatch").finish_non_exhaustive()
    }
}

/// A session with a coordination service.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Create a persistent node at `path`, creating missing ancestors. Existing
    /// nodes are left alone.
    async fn ensure_persistent(&self, path: &str) -> Result<()>;

    /// Create an ephemeral node owned by this session.
    ///
    /// Returns `false` when the node already exists. The parent must exist.
    async fn create_ephemeral(&self, path: &str) -> Result<bool>;

    /// Delete a childless node. A missing node is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Child names of `path`, or `None` if it does not exist.
    async fn children(&self, path: &str) -> Result<Option<Vec<String>>>;

    /// Child names of `path` plus a watch on its child list, or `None` if it
    /// does not exist.
    async fn watch_children(&self, path: &str) -> Result<Option<(Vec<String>, ChildWatch)>>;

    /// End the session, dropping its ephemeral nodes.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_from_receiver() {
        let (tx, rx) = oneshot::channel();
        let watch = ChildWatch::from_receiver(rx);
        tx.send(WatchEvent::ChildrenChanged).unwrap();
        assert_eq!(watch.await, WatchEvent::ChildrenChanged);
    }

    #[tokio::test]
    async fn test_dropped_sender_reads_as_session_closed() {
        let (tx, rx) = oneshot::channel::<WatchEvent>();
        drop(tx);
        assert_eq!(ChildWatch::from_receiver(rx).await, WatchEvent::SessionClosed);
    }
}
