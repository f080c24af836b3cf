use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use testbed_schema::{ContentHash, StorageName};

/// Lifecycle state of a repository resource at capture time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    #[default]
    Unchanged,
    Changed,
    New,
    Deleted,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceState::Unchanged => write!(f, "unchanged"),
            ResourceState::Changed => write!(f, "changed"),
            ResourceState::New => write!(f, "new"),
            ResourceState::Deleted => write!(f, "deleted"),
        }
    }
}

/// Captured state of one managed resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub path: String,
    pub resource_id: String,
    pub kind: String,
    pub content_hash: ContentHash,
    pub size: u64,
    #[serde(default)]
    pub state: ResourceState,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub captured_at: String,
}

impl ResourceSnapshot {
    pub fn capture(
        path: impl Into<String>,
        resource_id: impl Into<String>,
        kind: impl Into<String>,
        content: &[u8],
    ) -> Self {
        Self {
            path: path.into(),
            resource_id: resource_id.into(),
            kind: kind.into(),
            content_hash: ContentHash::new(blake3::hash(content).to_hex().to_string()),
            size: content.len() as u64,
            state: ResourceState::Unchanged,
            properties: BTreeMap::new(),
            captured_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Names of the fields that differ from `other`. Capture time is ignored.
    pub fn diff(&self, other: &ResourceSnapshot) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.path != other.path {
            fields.push("path");
        }
        if self.resource_id != other.resource_id {
            fields.push("resource_id");
        }
        if self.kind != other.kind {
            fields.push("kind");
        }
        if self.content_hash != other.content_hash {
            fields.push("content_hash");
        }
        if self.size != other.size {
            fields.push("size");
        }
        if self.state != other.state {
            fields.push("state");
        }
        if self.properties != other.properties {
            fields.push("properties");
        }
        fields
    }
}

impl PartialEq for ResourceSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.diff(other).is_empty()
    }
}

impl Eq for ResourceSnapshot {}

/// Named, insertion-ordered collection of snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceStorage {
    name: StorageName,
    snapshots: Vec<ResourceSnapshot>,
}

#[derive(Serialize, Deserialize)]
struct StoredStorage {
    storage: ResourceStorage,
    checksum: String,
}

impl ResourceStorage {
    pub fn new(name: impl Into<StorageName>) -> Self {
        Self {
            name: name.into(),
            snapshots: Vec::new(),
        }
    }

    pub fn name(&self) -> &StorageName {
        &self.name
    }

    /// Record a snapshot. A snapshot for an already captured path replaces
    /// the old one in place, keeping its position.
    pub fn capture(&mut self, snapshot: ResourceSnapshot) {
        match self.snapshots.iter_mut().find(|s| s.path == snapshot.path) {
            Some(existing) => *existing = snapshot,
            None => self.snapshots.push(snapshot),
        }
    }

    pub fn get(&self, path: &str) -> Option<&ResourceSnapshot> {
        self.snapshots.iter().find(|s| s.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn remove(&mut self, path: &str) -> Option<ResourceSnapshot> {
        let idx = self.snapshots.iter().position(|s| s.path == path)?;
        Some(self.snapshots.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceSnapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Compare the current state of a resource against its captured state.
    /// Returns the differing field names; empty means unchanged.
    pub fn compare(&self, current: &ResourceSnapshot) -> Result<Vec<&'static str>, StoreError> {
        let captured = self
            .get(&current.path)
            .ok_or_else(|| StoreError::SnapshotMissing {
                storage: self.name.to_string(),
                path: current.path.clone(),
            })?;
        Ok(captured.diff(current))
    }

    /// Persist atomically with an embedded blake3 checksum.
    pub fn write_to(&self, path: &Path) -> Result<(), StoreError> {
        let checksum = self.checksum()?;
        let content = serde_json::to_string_pretty(&StoredStorage {
            storage: self.clone(),
            checksum,
        })?;

        let dir = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path)?;
        let stored: StoredStorage = serde_json::from_str(&content)?;
        let actual = stored.storage.checksum()?;
        if actual != stored.checksum {
            return Err(StoreError::IntegrityFailure {
                path: path.display().to_string(),
                expected: stored.checksum,
                actual,
            });
        }
        Ok(stored.storage)
    }

    fn checksum(&self) -> Result<String, StoreError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}
