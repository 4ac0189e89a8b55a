//! RocksDB-backed durable adapter.
//!
//! Column families:
//! - `records`    — record items (LZ4-compressed JSON, keyed by id)
//! - `groups`     — student group metadata
//! - `grants`     — permission grants
//! - `root_index` — secondary index: `<collection>/<rootId>\0<id>` → id
//!
//! Every item is stored as LZ4-compressed JSON; JSON (not a binary codec)
//! because record payloads are dynamic `serde_json::Value`s, which need a
//! self-describing format to decode.

use std::path::PathBuf;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde_json::Value;

use super::{item_id, item_root_id, Collection, OfflineAdapter, OfflineError};

const CF_ROOT_INDEX: &str = "root_index";

const COLUMN_FAMILIES: &[&str] = &["records", "groups", "grants", CF_ROOT_INDEX];

/// Durable adapter configuration.
#[derive(Debug, Clone)]
pub struct RocksConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for RocksConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("campus_sync_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
        }
    }
}

impl RocksConfig {
    /// Config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// RocksDB implementation of the offline contract.
pub struct RocksAdapter {
    db: DBWithThreadMode<SingleThreaded>,
    config: RocksConfig,
}

impl RocksAdapter {
    /// Open (or create) the database at the configured path.
    pub fn open(config: RocksConfig) -> Result<Self, OfflineError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db, config })
    }

    fn cf_options(config: &RocksConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // Values are LZ4'd by us already
        opts.set_compression_type(DBCompressionType::None);
        opts
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, OfflineError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| OfflineError::Database(format!("missing column family '{name}'")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn encode(item: &Value) -> Result<Vec<u8>, OfflineError> {
        let json = serde_json::to_vec(item).map_err(|e| OfflineError::Corrupt(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&json))
    }

    fn decode(bytes: &[u8]) -> Result<Value, OfflineError> {
        let json = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| OfflineError::Corrupt(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| OfflineError::Corrupt(e.to_string()))
    }

    /// Index key: `<collection>/<rootId>\0<id>`.
    fn index_key(collection: Collection, root_id: &str, id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(collection.name().len() + root_id.len() + id.len() + 2);
        key.extend_from_slice(collection.name().as_bytes());
        key.push(b'/');
        key.extend_from_slice(root_id.as_bytes());
        key.push(0);
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn index_prefix(collection: Collection, root_id: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(collection.name().len() + root_id.len() + 2);
        prefix.extend_from_slice(collection.name().as_bytes());
        prefix.push(b'/');
        prefix.extend_from_slice(root_id.as_bytes());
        prefix.push(0);
        prefix
    }
}

impl OfflineAdapter for RocksAdapter {
    fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, OfflineError> {
        let cf = self.cf(collection.name())?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<Value>, OfflineError> {
        let cf = self.cf(collection.name())?;
        let mut items = Vec::new();
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, bytes) = entry?;
            items.push(Self::decode(&bytes)?);
        }
        Ok(items)
    }

    fn by_document_root_id(
        &self,
        collection: Collection,
        root_id: &str,
    ) -> Result<Vec<Value>, OfflineError> {
        let index_cf = self.cf(CF_ROOT_INDEX)?;
        let prefix = Self::index_prefix(collection, root_id);

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(index_cf, IteratorMode::From(&prefix, Direction::Forward));
        for entry in iter {
            let (key, value) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(String::from_utf8_lossy(&value).into_owned());
        }

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.get(collection, &id)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn put(&self, collection: Collection, item: &Value) -> Result<(), OfflineError> {
        let id = item_id(item)?;
        let cf = self.cf(collection.name())?;
        let index_cf = self.cf(CF_ROOT_INDEX)?;

        let mut batch = WriteBatch::default();

        // Drop a stale index entry when the item moved roots
        if let Some(previous) = self.get(collection, &id)? {
            if let Some(old_root) = item_root_id(&previous) {
                if item_root_id(item).as_deref() != Some(old_root.as_str()) {
                    batch.delete_cf(index_cf, Self::index_key(collection, &old_root, &id));
                }
            }
        }

        batch.put_cf(cf, id.as_bytes(), Self::encode(item)?);
        if let Some(root_id) = item_root_id(item) {
            batch.put_cf(index_cf, Self::index_key(collection, &root_id, &id), id.as_bytes());
        }

        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<bool, OfflineError> {
        let cf = self.cf(collection.name())?;
        let index_cf = self.cf(CF_ROOT_INDEX)?;

        let existing = match self.get(collection, id)? {
            Some(item) => item,
            None => return Ok(false),
        };

        let mut batch = WriteBatch::default();
        batch.delete_cf(cf, id.as_bytes());
        if let Some(root_id) = item_root_id(&existing) {
            batch.delete_cf(index_cf, Self::index_key(collection, &root_id, id));
        }
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(true)
    }

    fn filter(
        &self,
        collection: Collection,
        predicate: &dyn Fn(&Value) -> bool,
    ) -> Result<Vec<Value>, OfflineError> {
        Ok(self
            .get_all(collection)?
            .into_iter()
            .filter(|v| predicate(v))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_temp() -> (tempfile::TempDir, RocksAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = RocksAdapter::open(RocksConfig::for_testing(dir.path())).unwrap();
        (dir, adapter)
    }

    fn item(id: &str, root: &str) -> Value {
        json!({ "id": id, "documentRootId": root, "data": { "text": "hi" } })
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, adapter) = open_temp();
        let stored = item("a", "r1");
        adapter.put(Collection::Records, &stored).unwrap();
        assert_eq!(adapter.get(Collection::Records, "a").unwrap(), Some(stored));
        assert_eq!(adapter.get(Collection::Records, "zz").unwrap(), None);
    }

    #[test]
    fn test_secondary_index_scan() {
        let (_dir, adapter) = open_temp();
        adapter.put(Collection::Records, &item("a", "r1")).unwrap();
        adapter.put(Collection::Records, &item("b", "r1")).unwrap();
        adapter.put(Collection::Records, &item("c", "r2")).unwrap();

        let r1 = adapter.by_document_root_id(Collection::Records, "r1").unwrap();
        assert_eq!(r1.len(), 2);
        assert!(adapter
            .by_document_root_id(Collection::Records, "r9")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_index_prefix_no_bleed() {
        // "r1" must not match "r10"
        let (_dir, adapter) = open_temp();
        adapter.put(Collection::Records, &item("a", "r1")).unwrap();
        adapter.put(Collection::Records, &item("b", "r10")).unwrap();

        let r1 = adapter.by_document_root_id(Collection::Records, "r1").unwrap();
        assert_eq!(r1.len(), 1);
        assert_eq!(r1[0]["id"], "a");
    }

    #[test]
    fn test_put_moves_index_on_root_change() {
        let (_dir, adapter) = open_temp();
        adapter.put(Collection::Records, &item("a", "r1")).unwrap();
        adapter.put(Collection::Records, &item("a", "r2")).unwrap();

        assert!(adapter
            .by_document_root_id(Collection::Records, "r1")
            .unwrap()
            .is_empty());
        assert_eq!(
            adapter.by_document_root_id(Collection::Records, "r2").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_delete_cleans_index() {
        let (_dir, adapter) = open_temp();
        adapter.put(Collection::Records, &item("a", "r1")).unwrap();

        assert!(adapter.delete(Collection::Records, "a").unwrap());
        assert!(!adapter.delete(Collection::Records, "a").unwrap());
        assert!(adapter
            .by_document_root_id(Collection::Records, "r1")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_durability_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let adapter = RocksAdapter::open(RocksConfig::for_testing(dir.path())).unwrap();
            adapter.put(Collection::Records, &item("a", "r1")).unwrap();
            adapter.put(Collection::Grants, &item("g", "r1")).unwrap();
        }
        let adapter = RocksAdapter::open(RocksConfig::for_testing(dir.path())).unwrap();
        assert!(adapter.get(Collection::Records, "a").unwrap().is_some());
        assert!(adapter.get(Collection::Grants, "g").unwrap().is_some());
        assert_eq!(
            adapter.by_document_root_id(Collection::Records, "r1").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_get_all_and_filter() {
        let (_dir, adapter) = open_temp();
        adapter.put(Collection::Groups, &json!({ "id": "g1", "name": "7B" })).unwrap();
        adapter.put(Collection::Groups, &json!({ "id": "g2", "name": "8A" })).unwrap();

        assert_eq!(adapter.get_all(Collection::Groups).unwrap().len(), 2);
        let hits = adapter
            .filter(Collection::Groups, &|v| v["name"] == "8A")
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["id"], "g2");
    }

    #[test]
    fn test_item_without_root_not_indexed() {
        let (_dir, adapter) = open_temp();
        adapter.put(Collection::Groups, &json!({ "id": "g1", "name": "7B" })).unwrap();
        // No documentRootId — reachable by id, invisible to root scans
        assert!(adapter.get(Collection::Groups, "g1").unwrap().is_some());
    }
}
