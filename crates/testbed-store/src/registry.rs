use crate::snapshot::ResourceStorage;
use crate::StoreError;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use testbed_schema::StorageName;

/// Name of the storage every ready handle starts with.
pub const DEFAULT_STORAGE: &str = "default";

/// Named snapshot storages with a switchable "current" pointer.
///
/// Switching never creates, clears, or copies a storage; it only rebinds
/// which storage the `current*` accessors resolve to.
#[derive(Debug, Default)]
pub struct StorageRegistry {
    storages: HashMap<StorageName, ResourceStorage>,
    current: Option<StorageName>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty storage, silently replacing one with the same name.
    pub fn create(&mut self, name: &str) -> &mut ResourceStorage {
        let key = StorageName::from(name);
        let storage = ResourceStorage::new(key.clone());
        match self.storages.entry(key) {
            Entry::Occupied(mut slot) => {
                slot.insert(storage);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(storage),
        }
    }

    /// Insert a previously persisted storage under its own name.
    pub fn insert(&mut self, storage: ResourceStorage) {
        self.storages.insert(storage.name().clone(), storage);
    }

    pub fn get(&self, name: &str) -> Option<&ResourceStorage> {
        self.storages.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ResourceStorage> {
        self.storages.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.storages.contains_key(name)
    }

    pub fn switch_current(&mut self, name: &str) -> Result<(), StoreError> {
        match self.storages.get_key_value(name) {
            Some((key, _)) => {
                self.current = Some(key.clone());
                Ok(())
            }
            None => Err(StoreError::StorageNotFound(name.to_owned())),
        }
    }

    pub fn current_name(&self) -> Option<&StorageName> {
        self.current.as_ref()
    }

    pub fn current(&self) -> Result<&ResourceStorage, StoreError> {
        let name = self.current.as_ref().ok_or(StoreError::NoCurrentStorage)?;
        self.storages
            .get(name)
            .ok_or_else(|| StoreError::StorageNotFound(name.to_string()))
    }

    pub fn current_mut(&mut self) -> Result<&mut ResourceStorage, StoreError> {
        let name = self.current.as_ref().ok_or(StoreError::NoCurrentStorage)?;
        self.storages
            .get_mut(name)
            .ok_or_else(|| StoreError::StorageNotFound(name.to_string()))
    }

    /// Sorted storage names.
    pub fn names(&self) -> Vec<&StorageName> {
        let mut names: Vec<_> = self.storages.keys().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }

    /// Drop every storage and the current pointer.
    pub fn clear(&mut self) {
        self.storages.clear();
        self.current = None;
    }
}
