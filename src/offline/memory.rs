//! Transient in-memory adapter for ephemeral sessions and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use super::{item_id, item_root_id, Collection, OfflineAdapter, OfflineError};

type Collections = HashMap<Collection, BTreeMap<String, Value>>;

/// In-memory implementation of the offline contract.
///
/// BTreeMap keeps iteration order stable, matching what the durable
/// adapter's key-ordered scans produce.
#[derive(Default)]
pub struct MemoryAdapter {
    collections: RwLock<Collections>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a writer panicked mid-clone; the map
    // itself is still coherent, so recover the guard.
    fn read(&self) -> RwLockReadGuard<'_, Collections> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Collections> {
        self.collections.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.read().get(&collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }
}

impl OfflineAdapter for MemoryAdapter {
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, OfflineError> {
        Ok(self
            .read()
            .get(&collection)
            .and_then(|items| items.get(id))
            .cloned())
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, OfflineError> {
        Ok(self
            .read()
            .get(&collection)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default())
    }

    fn by_document_root_id(
        &self,
        collection: Collection,
        root_id: &str,
    ) -> Result<Vec<Value>, OfflineError> {
        self.filter(collection, &|item| {
            item_root_id(item).as_deref() == Some(root_id)
        })
    }

    fn put(&self, collection: Collection, item: &Value) -> Result<(), OfflineError> {
        let id = item_id(item)?;
        self.write()
            .entry(collection)
            .or_default()
            .insert(id, item.clone());
        Ok(())
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<bool, OfflineError> {
        Ok(self
            .write()
            .get_mut(&collection)
            .and_then(|items| items.remove(id))
            .is_some())
    }

    fn filter(
        &self,
        collection: Collection,
        predicate: &dyn Fn(&Value) -> bool,
    ) -> Result<Vec<Value>, OfflineError> {
        Ok(self
            .read()
            .get(&collection)
            .map(|items| items.values().filter(|v| predicate(v)).cloned().collect())
            .unwrap_or_default())
    }
}
