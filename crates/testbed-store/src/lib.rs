//! Filesystem layout, snapshot storages, and artifact purge for testbed.
//!
//! This crate owns everything a run leaves on disk or keeps in memory for
//! later verification: `WorkspaceLayout` describes the disposable working
//! copy of the test data, `ResourceSnapshot`/`ResourceStorage` capture
//! resource state for before/after assertions, `StorageRegistry` holds the
//! named storages with a switchable current one, and `Purger` removes the
//! generated artifacts on teardown.

pub mod layout;
pub mod purge;
pub mod registry;
pub mod snapshot;

pub use layout::WorkspaceLayout;
pub use purge::{PurgeReport, Purger};
pub use registry::{StorageRegistry, DEFAULT_STORAGE};
pub use snapshot::{ResourceSnapshot, ResourceState, ResourceStorage};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("resource storage not found: {0}")]
    StorageNotFound(String),
    #[error("no current resource storage selected")]
    NoCurrentStorage,
    #[error("resource '{path}' was not captured in storage '{storage}'")]
    SnapshotMissing { storage: String, path: String },
    #[error("integrity check failed for '{path}': expected {expected}, got {actual}")]
    IntegrityFailure {
        path: String,
        expected: String,
        actual: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_storage_not_found() {
        let e = StoreError::StorageNotFound("after".to_owned());
        assert!(e.to_string().contains("after"));
    }

    #[test]
    fn store_error_display_snapshot_missing() {
        let e = StoreError::SnapshotMissing {
            storage: "default".to_owned(),
            path: "/sites/default/index.html".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("default"));
        assert!(msg.contains("index.html"));
    }

    #[test]
    fn store_error_display_integrity_failure() {
        let e = StoreError::IntegrityFailure {
            path: "s.json".to_owned(),
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }
}
