//! The network directory kept by a leader.
//!
//! One entry per registered logical address. Re-registering an address
//! replaces its entry, so a restarted node with a fresh peer id simply takes
//! its address back. Departed nodes are marked rather than removed, keeping
//! the history visible until the leader prunes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Whether a directory entry is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// The node registered and has not announced departure.
    Active,
    /// The node announced departure (or the leader marked it gone).
    Left,
}

/// One registered node.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// The node's logical address.
    pub address: String,
    /// The node's peer id.
    pub peer_id: String,
    /// Endpoints the node can be dialed at.
    pub endpoints: Vec<String>,
    /// Liveness of the entry.
    pub state: EntryState,
    /// When the node (last) registered.
    pub joined_at: DateTime<Utc>,
}

/// Directory of registered nodes, keyed by logical address.
#[derive(Clone, Default)]
pub struct NodeDirectory {
    entries: Arc<RwLock<HashMap<String, DirectoryEntry>>>,
}

impl NodeDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, replacing any previous entry for its address.
    pub fn register(
        &self,
        address: impl Into<String>,
        peer_id: impl Into<String>,
        endpoints: Vec<String>,
    ) -> DirectoryEntry {
        let entry = DirectoryEntry {
            address: address.into(),
            peer_id: peer_id.into(),
            endpoints,
            state: EntryState::Active,
            joined_at: Utc::now(),
        };
        info!(address = %entry.address, peer_id = %entry.peer_id, "directory registration");
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(entry.address.clone(), entry.clone());
        entry
    }

    /// Look up an entry by address.
    pub fn get(&self, address: &str) -> Option<DirectoryEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(address).cloned()
    }

    /// Mark an address as departed. Unknown addresses are ignored.
    pub fn mark_left(&self, address: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(address) {
            info!(address = %address, "directory departure");
            entry.state = EntryState::Left;
        }
    }

    /// Remove an entry entirely.
    pub fn remove(&self, address: &str) -> Option<DirectoryEntry> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(address)
    }

    /// Every active entry, unordered.
    pub fn active(&self) -> Vec<DirectoryEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter(|e| e.state == EntryState::Active)
            .cloned()
            .collect()
    }

    /// Active entries whose address sits under `prefix`'s namespace (the
    /// prefix itself included).
    pub fn find(&self, prefix: &str) -> Vec<DirectoryEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter(|e| {
                e.state == EntryState::Active
                    && (e.address == prefix
                        || e.address.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/')))
            })
            .cloned()
            .collect()
    }

    /// Count of active entries.
    pub fn active_count(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|e| e.state == EntryState::Active).count()
    }

    /// Count of all entries, departed included.
    pub fn total_count(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }
}
