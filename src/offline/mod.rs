//! Offline storage: a keyed-collection contract that can stand in for the
//! entire network API.
//!
//! Two implementations share the contract: [`rocks::RocksAdapter`]
//! (durable, on-disk) and [`memory::MemoryAdapter`] (transient, for
//! ephemeral sessions and tests). [`api::OfflineApi`] layers the full
//! [`crate::api::DocumentApi`] request/response contract on top, so when
//! offline mode is active the record store's call sites keep working
//! unchanged.
//!
//! Items are JSON objects with an `"id"` field (string or UUID); items
//! carrying a `"documentRootId"` string are secondarily indexed for
//! [`OfflineAdapter::by_document_root_id`].

pub mod api;
pub mod memory;
pub mod rocks;

use serde_json::Value;

pub use api::OfflineApi;
pub use memory::MemoryAdapter;
pub use rocks::{RocksAdapter, RocksConfig};

/// The keyed collections the disk schema defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Records (primary key `id`, secondary index `documentRootId`)
    Records,
    /// Student group metadata
    Groups,
    /// Permission grants
    Grants,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Records, Self::Groups, Self::Grants];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::Groups => "groups",
            Self::Grants => "grants",
        }
    }
}

/// Offline storage errors.
#[derive(Debug, Clone)]
pub enum OfflineError {
    /// Underlying database failure
    Database(String),
    /// Item has no usable `"id"` field
    MissingId,
    /// Stored bytes did not decode
    Corrupt(String),
}

impl std::fmt::Display for OfflineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database error: {e}"),
            Self::MissingId => write!(f, "Item has no 'id' field"),
            Self::Corrupt(e) => write!(f, "Corrupt stored item: {e}"),
        }
    }
}

impl std::error::Error for OfflineError {}

impl From<rocksdb::Error> for OfflineError {
    fn from(e: rocksdb::Error) -> Self {
        OfflineError::Database(e.to_string())
    }
}

/// Extract the primary key from an item.
pub(crate) fn item_id(item: &Value) -> Result<String, OfflineError> {
    item.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(OfflineError::MissingId)
}

/// Extract the secondary index key, when present.
pub(crate) fn item_root_id(item: &Value) -> Option<String> {
    item.get("documentRootId")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The storage contract shared by the durable and transient adapters.
///
/// Operations are transactional at single-item granularity; no multi-item
/// transactions are required by the design.
pub trait OfflineAdapter: Send + Sync {
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, OfflineError>;

    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, OfflineError>;

    /// Items whose `documentRootId` equals `root_id`.
    fn by_document_root_id(
        &self,
        collection: Collection,
        root_id: &str,
    ) -> Result<Vec<Value>, OfflineError>;

    /// Insert or replace by the item's `"id"` field.
    fn put(&self, collection: Collection, item: &Value) -> Result<(), OfflineError>;

    /// Returns whether anything was deleted.
    fn delete(&self, collection: Collection, id: &str) -> Result<bool, OfflineError>;

    fn filter(
        &self,
        collection: Collection,
        predicate: &dyn Fn(&Value) -> bool,
    ) -> Result<Vec<Value>, OfflineError>;
}
