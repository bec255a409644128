//! Pending-request table.
//!
//! Each in-flight request owns a oneshot slot keyed by its request id. A slot is
//! resolved at most once: whoever removes the entry from the map is the only one
//! that can send on it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{Result, RpcError};
use crate::protocol::{Response, STATUS_INTERNAL_ERROR};

struct PendingSlot {
    tx: oneshot::Sender<Response>,
    connection_id: u64,
}

/// Requests awaiting their response, keyed by request id.
#[derive(Default)]
pub struct PendingRequests {
    slots: DashMap<String, PendingSlot>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for `request_id` sent over connection `connection_id`.
    pub fn register(
        &self,
        request_id: &str,
        connection_id: u64,
    ) -> Result<oneshot::Receiver<Response>> {
        match self.slots.entry(request_id.to_string()) {
            Entry::Occupied(_) => Err(RpcError::DuplicateRequest(request_id.to_string())),
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(PendingSlot { tx, connection_id });
                Ok(rx)
            }
        }
    }

    /// Deliver a response to its waiter.
    ///
    /// Hands the response back when no request with that id is pending (it
    /// already timed out, or the id is unknown).
    pub fn complete(&self, response: Response) -> std::result::Result<(), Response> {
        match self.slots.remove(&response.request_id) {
            Some((_, slot)) => {
                // The waiter may have given up in the meantime; nothing to do then.
                let _ = slot.tx.send(response);
                Ok(())
            }
            None => Err(response),
        }
    }

    /// Drop the slot without resolving it.
    pub fn remove(&self, request_id: &str) -> bool {
        self.slots.remove(request_id).is_some()
    }

    /// Drop the slot for `request_id` if nobody waits on it any more.
    ///
    /// A slot re-registered under the same id by another caller is left alone.
    pub fn abandon(&self, request_id: &str) -> bool {
        self.slots
            .remove_if(request_id, |_, slot| slot.tx.is_closed())
            .is_some()
    }

    /// Fail every request sent over `connection_id`. Returns how many were failed.
    pub fn fail_connection(&self, connection_id: u64, message: &str) -> usize {
        let ids: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| entry.value().connection_id == connection_id)
            .map(|entry| entry.key().clone())
            .collect();

        self.fail_ids(ids, message)
    }

    /// Fail every pending request.
    pub fn fail_all(&self, message: &str) -> usize {
        let ids: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        self.fail_ids(ids, message)
    }

    fn fail_ids(&self, ids: Vec<String>, message: &str) -> usize {
        let mut failed = 0;
        for id in ids {
            if let Some((id, slot)) = self.slots.remove(&id) {
                let _ = slot
                    .tx
                    .send(Response::failure(id, STATUS_INTERNAL_ERROR, message));
                failed += 1;
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
