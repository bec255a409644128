//! Local discovery cache.
//!
//! A possibly stale copy of the registry topology. Entries are replaced whole on
//! every refresh, so readers see either the old or the new address set, never a
//! mix.

use dashmap::DashMap;

use crate::protocol::{ServiceAddress, ServiceName};

#[derive(Debug, Default)]
pub struct DiscoveryCache {
    entries: DashMap<ServiceName, Vec<ServiceAddress>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached addresses for `name`. An empty entry counts as a miss.
    pub fn get(&self, name: &ServiceName) -> Option<Vec<ServiceAddress>> {
        self.entries
            .get(name)
            .filter(|entry| !entry.is_empty())
            .map(|entry| entry.value().clone())
    }

    /// Replace the entry for `name`.
    pub fn replace(&self, name: ServiceName, addresses: Vec<ServiceAddress>) {
        self.entries.insert(name, addresses);
    }

    /// Add `address` to an existing entry. Returns `false` if there was no entry.
    pub fn add(&self, name: &ServiceName, address: &ServiceAddress) -> bool {
        match self.entries.get_mut(name) {
            Some(mut entry) => {
                if !entry.contains(address) {
                    entry.push(address.clone());
                }
                true
            }
            None => false,
        }
    }

    /// Remove `address` from the entry for `name`, if cached.
    pub fn remove_address(&self, name: &ServiceName, address: &ServiceAddress) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.retain(|a| a != address);
        }
    }

    pub fn invalidate(&self, name: &ServiceName) {
        self.entries.remove(name);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached names, empty entries included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
