//! JSON snapshot persistence for MendOps control-plane state.
//!
//! Provides [`SnapshotStore`], a keyed JSON file store used by the incident
//! table, knowledge base, and audit domains. Data lives in memory at the
//! owning store and is snapshotted to `{state_path}/state/{domain}.json` on
//! every write, via a temp-file-then-rename so a crash mid-write never leaves
//! a truncated snapshot behind.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// A JSON file-backed store for a single domain of keyed records.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create a store for `domain` under `state_path`.
    pub fn new(state_path: &Path, domain: &str) -> Self {
        let path = state_path.join("state").join(format!("{domain}.json"));
        Self { path }
    }

    /// The snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the domain from disk. A missing file is an empty domain; a
    /// corrupt file is logged and treated as empty rather than poisoning
    /// startup.
    pub fn load<T: for<'de> Deserialize<'de>>(&self) -> HashMap<String, T> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt snapshot, starting fresh");
                HashMap::new()
            }),
            Err(_) => {
                debug!(path = %self.path.display(), "no snapshot, starting fresh");
                HashMap::new()
            }
        }
    }

    /// Persist the domain. Creates parent directories as needed; writes to a
    /// sibling temp file and renames into place.
    pub fn save<T: Serialize>(&self, data: &HashMap<String, T>) -> PersistResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
