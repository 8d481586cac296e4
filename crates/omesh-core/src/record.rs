//! Persisted node record.
//!
//! A node's address and identity are written as TOML under a directory
//! scoped by node type and peer id, so a restarted node can be matched to
//! its previous registration. No core logic depends on the schema beyond
//! these fields.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// What survives a node restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// The node's logical address.
    pub address: String,
    /// The node's type segment (e.g. `leader`, `tool`).
    pub node_type: String,
    /// Hex peer id derived from the node's identity.
    pub peer_id: String,
}

/// Default root for persisted node records (`~/.omesh`).
pub fn default_config_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".omesh"))
        .unwrap_or_else(|| PathBuf::from(".omesh"))
}

impl NodeRecord {
    /// Where a record lives: `<root>/<node_type>/<peer_id>/node.toml`.
    pub fn path(root: &Path, node_type: &str, peer_id: &str) -> PathBuf {
        root.join(node_type).join(peer_id).join("node.toml")
    }

    /// Write the record under `root`, creating directories as needed.
    pub fn save(&self, root: &Path) -> std::io::Result<PathBuf> {
        let path = Self::path(root, &self.node_type, &self.peer_id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Load a record, or `None` when it is absent or unreadable.
    pub fn load(root: &Path, node_type: &str, peer_id: &str) -> Option<NodeRecord> {
        let path = Self::path(root, node_type, peer_id);
        let contents = std::fs::read_to_string(&path).ok()?;
        match toml::from_str(&contents) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse node record");
                None
            }
        }
    }
}
