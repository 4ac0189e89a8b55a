//! The record store: single owner of the in-memory record table and the
//! CRUD orchestrator around it.
//!
//! Every mutation flows through here: local edits are applied
//! optimistically, persisted through the [`DocumentApi`] (debounced or
//! immediate), and pushed onto the realtime channel; inbound remote changes
//! are merged by recency and never echoed back.
//!
//! Table mutations publish a version bump over a `watch` channel; derived
//! views (`main_documents`, permissions, sync status) are pure
//! recomputations over the table, so observers re-read after a bump instead
//! of relying on implicit reactivity.
//!
//! Persistence ordering per record: at most one in-flight write, a newer
//! debounced write is issued only after the current one settles, and a
//! superseding write invalidates the in-flight result (generation token —
//! last caller wins). Cross-record writes are unordered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use uuid::Uuid;

use crate::access::{AccessLevel, Viewer};
use crate::api::{ApiError, CreateDocument, CreateOptions, DocumentApi, UpdateDocument};
use crate::channel::{ClientEvent, ServerEvent};
use crate::record::{RawRecord, Record, RecordState, SetOutcome, Source};
use crate::registry::{RecordRegistry, RegistryError};
use crate::root::{DocumentRoot, MainDocument};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Trailing-edge debounce window for local edits
    pub debounce: Duration,
    /// Issue writes with `onBehalfOf` (educator acting for a student)
    pub on_behalf_of: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            on_behalf_of: false,
        }
    }
}

impl SyncConfig {
    /// Config for testing (short debounce window).
    pub fn for_testing() -> Self {
        Self {
            debounce: Duration::from_millis(10),
            ..Self::default()
        }
    }
}

/// Store errors.
#[derive(Debug)]
pub enum StoreError {
    Api(ApiError),
    Registry(RegistryError),
    NotFound(Uuid),
    RootNotFound(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Api(e) => write!(f, "Persistence failed: {e}"),
            Self::Registry(e) => write!(f, "{e}"),
            Self::NotFound(id) => write!(f, "Record not found: {id}"),
            Self::RootNotFound(id) => write!(f, "Document root not found: {id}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<ApiError> for StoreError {
    fn from(e: ApiError) -> Self {
        Self::Api(e)
    }
}

impl From<RegistryError> for StoreError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

/// Per-record persistence slot.
///
/// `generation` is the supersede token: every local edit bumps it, and a
/// flush only proceeds (and only applies its result) when it still carries
/// the latest generation.
#[derive(Debug, Default)]
struct SaveSlot {
    generation: u64,
    in_flight: bool,
    rerun: bool,
}

/// Central registry and CRUD orchestrator for synchronized records.
pub struct RecordStore {
    /// The record table: exclusive owner of every record, keyed by id
    records: RwLock<HashMap<Uuid, Record>>,
    /// Document roots, keyed by root id
    roots: RwLock<HashMap<String, DocumentRoot>>,
    /// Type → constructor table (fixed after startup)
    registry: RecordRegistry,
    viewer: RwLock<Viewer>,
    api: Arc<dyn DocumentApi>,
    config: SyncConfig,

    save_slots: Mutex<HashMap<Uuid, SaveSlot>>,

    /// Outbound channel sender, present while the realtime channel is up
    channel: RwLock<Option<mpsc::Sender<ClientEvent>>>,
    channel_connected: AtomicBool,
    /// Presence counts per joined root
    connected_clients: RwLock<HashMap<String, usize>>,

    version: AtomicU64,
    version_tx: watch::Sender<u64>,
}

impl RecordStore {
    pub fn new(api: Arc<dyn DocumentApi>, registry: RecordRegistry, config: SyncConfig) -> Arc<Self> {
        let (version_tx, _) = watch::channel(0);
        Arc::new(Self {
            records: RwLock::new(HashMap::new()),
            roots: RwLock::new(HashMap::new()),
            registry,
            viewer: RwLock::new(Viewer::anonymous()),
            api,
            config,
            save_slots: Mutex::new(HashMap::new()),
            channel: RwLock::new(None),
            channel_connected: AtomicBool::new(false),
            connected_clients: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            version_tx,
        })
    }

    /// Observe table changes: every mutation bumps the published version.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) {
        let v = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        self.version_tx.send_replace(v);
    }

    // ─── Identity & roots ─────────────────────────────────────────────

    pub async fn set_viewer(&self, viewer: Viewer) {
        *self.viewer.write().await = viewer;
        self.bump();
    }

    pub async fn viewer(&self) -> Viewer {
        self.viewer.read().await.clone()
    }

    pub async fn add_root(&self, root: DocumentRoot) {
        self.roots.write().await.insert(root.id.clone(), root);
        self.bump();
    }

    pub async fn root(&self, root_id: &str) -> Option<DocumentRoot> {
        self.roots.read().await.get(root_id).cloned()
    }

    /// Effective permission for the current viewer on a root.
    ///
    /// An unknown root resolves to `None`: without its grant list there is
    /// nothing to authorize a write against.
    pub async fn permission(&self, root_id: &str) -> AccessLevel {
        let viewer = self.viewer.read().await;
        match self.roots.read().await.get(root_id) {
            Some(root) => root.permission(&viewer),
            None => AccessLevel::None,
        }
    }

    // ─── Lookups (pure derived views) ─────────────────────────────────

    pub async fn find(&self, id: Uuid) -> Option<Record> {
        self.records.read().await.get(&id).cloned()
    }

    pub async fn find_by_document_root(&self, root_id: &str) -> Vec<Record> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.document_root_id == root_id)
            .cloned()
            .collect()
    }

    /// The root's persisted records with no parent, oldest first.
    pub async fn main_documents(&self, root_id: &str) -> Vec<Record> {
        let mut mains: Vec<Record> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.document_root_id == root_id && r.is_main() && !r.is_draft())
            .cloned()
            .collect();
        mains.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        mains
    }

    /// The canonical singleton for single-main-document record types.
    ///
    /// Prefers a persisted record; falls back to a draft so pre-auth UI has
    /// something to render. Callers must pattern-match on the variant.
    pub async fn first_main_document(&self, root_id: &str) -> Option<MainDocument> {
        if let Some(first) = self.main_documents(root_id).await.into_iter().next() {
            return Some(MainDocument::Persisted(first));
        }
        self.records
            .read()
            .await
            .values()
            .find(|r| r.document_root_id == root_id && r.is_draft())
            .cloned()
            .map(MainDocument::Draft)
    }

    pub async fn connected_clients(&self, root_id: &str) -> usize {
        self.connected_clients.read().await.get(root_id).copied().unwrap_or(0)
    }

    // ─── Drafts ───────────────────────────────────────────────────────

    /// Fabricate (or return) the ephemeral placeholder for a root.
    ///
    /// The draft renders interactive UI before sign-in or before the real
    /// record exists; it is dropped transparently once a real main record
    /// for the root is observed.
    pub async fn ensure_draft(&self, root_id: &str) -> Result<MainDocument, StoreError> {
        if let Some(existing) = self.first_main_document(root_id).await {
            return Ok(existing);
        }
        let record_type = self
            .root(root_id)
            .await
            .map(|r| r.record_type)
            .ok_or_else(|| StoreError::RootNotFound(root_id.to_string()))?;
        let draft = self.registry.draft(&record_type, root_id)?;
        self.records.write().await.insert(draft.id, draft.clone());
        self.bump();
        Ok(MainDocument::Draft(draft))
    }

    // ─── Mutations ────────────────────────────────────────────────────

    /// Apply a payload to a record according to its source tag.
    ///
    /// LOCAL edits below ReadWrite are silent no-ops (the UI is expected to
    /// have hidden the affordance). Applied LOCAL edits are optimistic and
    /// schedule a debounced write; REMOTE payloads are merged by recency
    /// and never persisted or re-broadcast.
    pub async fn set_data(
        self: &Arc<Self>,
        id: Uuid,
        data: Value,
        source: Source,
        updated_at: Option<u64>,
    ) -> Result<SetOutcome, StoreError> {
        let root_id = {
            let records = self.records.read().await;
            let record = records.get(&id).ok_or(StoreError::NotFound(id))?;
            record.document_root_id.clone()
        };

        // Drafts never reach storage, so the gate does not apply to them;
        // that is what lets a signed-out user type into a placeholder.
        let access = match source {
            Source::Local => self.permission(&root_id).await,
            Source::Remote => AccessLevel::None,
        };

        let outcome = {
            let mut records = self.records.write().await;
            let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            let access = if record.is_draft() { AccessLevel::ReadWrite } else { access };
            record.set_data(data, source, updated_at, access)
        };

        match outcome {
            SetOutcome::Applied { persist: true } => {
                self.bump();
                self.schedule_save(id, self.config.debounce).await;
            }
            SetOutcome::Applied { persist: false } => self.bump(),
            // Silent by design: no state change, no notification
            SetOutcome::Denied | SetOutcome::Stale => {}
        }
        Ok(outcome)
    }

    /// Flush a record's pending write immediately.
    ///
    /// Used around structurally significant operations where losing the
    /// next op would corrupt a wider transaction (create/delete flows).
    pub async fn save_now(self: &Arc<Self>, id: Uuid) {
        let generation = {
            let mut slots = self.save_slots.lock().await;
            let slot = slots.entry(id).or_default();
            slot.generation += 1;
            slot.generation
        };
        self.flush(id, generation).await;
    }

    /// Create a record, optimistically inserting a provisional one.
    ///
    /// On success the provisional id and timestamps are replaced by the
    /// server-confirmed values; on failure the provisional record is
    /// removed and the error surfaced.
    pub async fn create(
        self: &Arc<Self>,
        doc: CreateDocument,
        unique_main: bool,
        optimistic: bool,
    ) -> Result<Record, StoreError> {
        let provisional_id = if optimistic {
            let now = crate::record::epoch_millis();
            let raw = RawRecord {
                id: Uuid::new_v4(),
                record_type: doc.record_type.clone(),
                author_id: doc.author_id,
                parent_id: doc.parent_id,
                document_root_id: doc.document_root_id.clone(),
                data: doc.data.clone(),
                created_at: now,
                updated_at: now,
            };
            // Validate the shape up front so a doomed create never renders
            let record = Record::pending_create(self.registry.construct(raw)?.to_raw());
            let id = record.id;
            self.records.write().await.insert(id, record);
            self.bump();
            Some(id)
        } else {
            None
        };

        let opts = CreateOptions {
            on_behalf_of: self.config.on_behalf_of,
            unique_main,
        };

        match self.api.create_document(doc, opts).await {
            Ok(raw) => {
                let confirmed = self.registry.construct(raw)?;
                let mut records = self.records.write().await;
                if let Some(id) = provisional_id {
                    records.remove(&id);
                }
                if confirmed.is_main() {
                    // The real record replaces any placeholder for its root
                    records.retain(|_, r| {
                        !(r.is_draft() && r.document_root_id == confirmed.document_root_id)
                    });
                }
                records.insert(confirmed.id, confirmed.clone());
                drop(records);
                self.bump();
                Ok(confirmed)
            }
            Err(e) => {
                if let Some(id) = provisional_id {
                    self.records.write().await.remove(&id);
                    self.bump();
                }
                log::warn!("Create failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Optimistic delete: removed locally first, re-inserted on failure.
    pub async fn api_delete(self: &Arc<Self>, id: Uuid) -> Result<(), StoreError> {
        let removed = {
            let mut records = self.records.write().await;
            records.remove(&id).ok_or(StoreError::NotFound(id))?
        };
        self.bump();

        if removed.is_draft() {
            // Nothing was ever persisted
            return Ok(());
        }

        match self.api.delete_document(id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.records.write().await.insert(id, removed);
                self.bump();
                log::warn!("Delete failed for {id}: {e}");
                Err(e.into())
            }
        }
    }

    /// Re-parent a record (immediate persistence, not debounced).
    pub async fn link(self: &Arc<Self>, id: Uuid, parent_id: Uuid) -> Result<(), StoreError> {
        let raw = self.api.link_document(id, parent_id).await?;
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&id) {
            record.parent_id = raw.parent_id;
            record.updated_at = record.updated_at.max(raw.updated_at);
        }
        drop(records);
        self.bump();
        Ok(())
    }

    /// Idempotent upsert used for initial load and inbound channel events.
    ///
    /// An existing record is replaced in place (observers keep its
    /// identity), guarded by last-write-wins; an unknown id is constructed
    /// through the registry. Records of unregistered types are rejected.
    pub async fn add_to_store(&self, raw: RawRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get_mut(&raw.id) {
            let outcome = existing.set_data(
                raw.data.clone(),
                Source::Remote,
                Some(raw.updated_at),
                AccessLevel::None,
            );
            if outcome == (SetOutcome::Applied { persist: false }) {
                existing.parent_id = raw.parent_id;
                existing.author_id = raw.author_id;
            }
        } else {
            let record = match self.registry.construct(raw) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Dropping inbound record: {e}");
                    return Err(e.into());
                }
            };
            if record.is_main() {
                records.retain(|_, r| {
                    !(r.is_draft() && r.document_root_id == record.document_root_id)
                });
            }
            records.insert(record.id, record);
        }
        drop(records);
        self.bump();
        Ok(())
    }

    /// Apply an inbound channel event to the table.
    pub async fn apply_server_event(self: &Arc<Self>, event: ServerEvent) {
        match event {
            ServerEvent::NewRecord(raw) | ServerEvent::ChangedRecord(raw) => {
                let _ = self.add_to_store(raw).await;
            }
            ServerEvent::ChangedDocument { record_id, data, updated_at } => {
                match self.set_data(record_id, data, Source::Remote, Some(updated_at)).await {
                    Ok(_) => {}
                    Err(StoreError::NotFound(_)) => {
                        log::debug!("Update for unknown record {record_id}; ignoring");
                    }
                    Err(e) => log::warn!("Failed to apply remote update: {e}"),
                }
            }
            ServerEvent::DeletedRecord { record_id } => {
                // Already deleted upstream: local removal only, no echo
                if self.records.write().await.remove(&record_id).is_some() {
                    self.bump();
                }
            }
            ServerEvent::ConnectedClients { root_id, count } => {
                self.connected_clients.write().await.insert(root_id, count);
                self.bump();
            }
            // Relayed payloads are the channel layer's concern
            ServerEvent::UserMessage { .. } => {}
        }
    }

    /// Full re-fetch of the given roots after a channel reconnect.
    ///
    /// Missed events are not replayed anywhere, so fetched state is
    /// authoritative: records of those roots that no longer exist upstream
    /// are dropped, everything else is upserted under the usual
    /// last-write-wins guard. Returns the number of fetched records.
    pub async fn resync(self: &Arc<Self>, root_ids: &[String]) -> Result<usize, StoreError> {
        let fetched = self.api.documents_by_roots(root_ids).await?;
        let fetched_ids: std::collections::HashSet<Uuid> = fetched.iter().map(|r| r.id).collect();

        {
            let mut records = self.records.write().await;
            records.retain(|id, r| {
                !root_ids.contains(&r.document_root_id)
                    || r.is_draft()
                    || r.state == RecordState::PendingCreate
                    || fetched_ids.contains(id)
            });
        }
        self.bump();

        let count = fetched.len();
        for raw in fetched {
            let _ = self.add_to_store(raw).await;
        }
        Ok(count)
    }

    // ─── Channel wiring ───────────────────────────────────────────────

    pub async fn set_channel(&self, sender: mpsc::Sender<ClientEvent>) {
        *self.channel.write().await = Some(sender);
    }

    pub fn set_channel_connected(&self, connected: bool) {
        self.channel_connected.store(connected, Ordering::Release);
        self.bump();
    }

    /// False while disconnected or while a reconnect's resync has failed;
    /// the UI's persistent "disconnected" indicator.
    pub fn channel_connected(&self) -> bool {
        self.channel_connected.load(Ordering::Acquire)
    }

    async fn emit_update(&self, record_id: Uuid, data: Value, updated_at: u64) {
        let tx = self.channel.read().await.clone();
        if let Some(tx) = tx {
            let event = ClientEvent::ChangedDocument { record_id, data, updated_at };
            if tx.send(event).await.is_err() {
                log::debug!("Channel writer gone; update not broadcast");
            }
        }
    }

    // ─── Persistence internals ────────────────────────────────────────

    /// Trailing-edge debounce: bump the generation, sleep, flush if still
    /// the latest.
    async fn schedule_save(self: &Arc<Self>, id: Uuid, delay: Duration) {
        let generation = {
            let mut slots = self.save_slots.lock().await;
            let slot = slots.entry(id).or_default();
            slot.generation += 1;
            slot.generation
        };

        let store = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            store.flush(id, generation).await;
        });
    }

    /// Issue the write for `id` if `generation` is still the latest.
    ///
    /// At most one write per record is in flight; a flush arriving while
    /// one is pending marks the slot for a rerun instead. A result whose
    /// generation was superseded while in flight is discarded and the
    /// latest state re-issued: last caller wins.
    async fn flush(self: &Arc<Self>, id: Uuid, generation: u64) {
        {
            let mut slots = self.save_slots.lock().await;
            let slot = match slots.get_mut(&id) {
                Some(slot) => slot,
                None => return,
            };
            if slot.generation != generation {
                return;
            }
            if slot.in_flight {
                slot.rerun = true;
                return;
            }
            slot.in_flight = true;
        }

        let snapshot = {
            let records = self.records.read().await;
            records
                .get(&id)
                .filter(|r| !r.is_draft())
                .map(|r| (r.data.clone(), r.updated_at))
        };

        let Some((data, updated_at)) = snapshot else {
            // Deleted (or a draft) while the save was pending
            self.save_slots.lock().await.entry(id).or_default().in_flight = false;
            return;
        };

        let result = self
            .api
            .update_document(id, UpdateDocument { data, updated_at }, self.config.on_behalf_of)
            .await;

        let (superseded, catch_up_generation) = {
            let mut slots = self.save_slots.lock().await;
            let slot = slots.entry(id).or_default();
            slot.in_flight = false;
            let superseded = slot.generation != generation || slot.rerun;
            slot.rerun = false;
            if superseded {
                // The catch-up below takes over the latest edit's write;
                // its still-sleeping debounce task must find a stale
                // generation and no-op, or the same PUT goes out twice.
                slot.generation += 1;
            }
            (superseded, slot.generation)
        };

        match result {
            Ok(raw) => {
                if superseded {
                    // A newer local edit owns the record now; this result
                    // no longer describes it.
                } else {
                    {
                        let mut records = self.records.write().await;
                        if let Some(record) = records.get_mut(&id) {
                            record.confirm(&raw);
                        }
                    }
                    self.bump();
                    self.emit_update(id, raw.data, raw.updated_at).await;
                }
            }
            Err(e) => {
                if !superseded {
                    log::warn!("Write failed for {id}: {e}");
                    {
                        let mut records = self.records.write().await;
                        if let Some(record) = records.get_mut(&id) {
                            record.rollback();
                        }
                    }
                    self.bump();
                }
            }
        }

        if superseded {
            Self::spawn_flush(Arc::clone(self), id, catch_up_generation);
        }
    }

    /// Indirection so `flush` can respawn itself: constructing the spawned
    /// async block inside `flush` makes its future type self-referential,
    /// which the compiler cannot prove `Send`.
    fn spawn_flush(store: Arc<Self>, id: Uuid, generation: u64) {
        tokio::spawn(async move {
            store.flush(id, generation).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::PermissionGrant;
    use crate::offline::{Collection, MemoryAdapter, OfflineAdapter, OfflineApi};
    use crate::registry::RecordKind;
    use serde_json::json;

    struct NoteKind;

    impl RecordKind for NoteKind {
        fn type_name(&self) -> &str {
            "note"
        }

        fn validate(&self, data: &Value) -> Result<(), RegistryError> {
            if data.is_object() {
                Ok(())
            } else {
                Err(RegistryError::InvalidData {
                    record_type: "note".to_string(),
                    reason: "expected object".to_string(),
                })
            }
        }

        fn initial_data(&self) -> Value {
            json!({ "text": "" })
        }
    }

    fn registry() -> RecordRegistry {
        let mut registry = RecordRegistry::new();
        registry.register(Arc::new(NoteKind));
        registry
    }

    fn store() -> Arc<RecordStore> {
        let api = Arc::new(OfflineApi::new(Arc::new(MemoryAdapter::new())));
        RecordStore::new(api, registry(), SyncConfig::for_testing())
    }

    async fn writable_root(store: &Arc<RecordStore>, root_id: &str) {
        store
            .add_root(
                DocumentRoot::new(root_id, "note", AccessLevel::None).with_grants(vec![
                    PermissionGrant::root_wide(root_id, AccessLevel::ReadWrite),
                ]),
            )
            .await;
    }

    fn raw(root_id: &str, updated_at: u64) -> RawRecord {
        RawRecord {
            id: Uuid::new_v4(),
            record_type: "note".to_string(),
            author_id: None,
            parent_id: None,
            document_root_id: root_id.to_string(),
            data: json!({ "text": "seed" }),
            created_at: updated_at,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_add_to_store_insert_and_find() {
        let store = store();
        let raw = raw("r1", 10);
        store.add_to_store(raw.clone()).await.unwrap();

        let found = store.find(raw.id).await.unwrap();
        assert_eq!(found.data, json!({ "text": "seed" }));
        assert_eq!(store.find_by_document_root("r1").await.len(), 1);
        assert!(store.find_by_document_root("r2").await.is_empty());
    }

    #[tokio::test]
    async fn test_add_to_store_is_lww_upsert() {
        let store = store();
        let mut raw = raw("r1", 10);
        store.add_to_store(raw.clone()).await.unwrap();

        raw.data = json!({ "text": "newer" });
        raw.updated_at = 20;
        store.add_to_store(raw.clone()).await.unwrap();
        assert_eq!(store.find(raw.id).await.unwrap().data, json!({ "text": "newer" }));

        raw.data = json!({ "text": "older" });
        raw.updated_at = 5;
        store.add_to_store(raw.clone()).await.unwrap();
        assert_eq!(store.find(raw.id).await.unwrap().data, json!({ "text": "newer" }));
    }

    #[tokio::test]
    async fn test_add_to_store_rejects_unknown_type() {
        let store = store();
        let mut raw = raw("r1", 10);
        raw.record_type = "quiz".to_string();
        assert!(store.add_to_store(raw.clone()).await.is_err());
        assert!(store.find(raw.id).await.is_none());
    }

    #[tokio::test]
    async fn test_main_documents_ordering() {
        let store = store();
        let mut a = raw("r1", 30);
        a.created_at = 30;
        let mut b = raw("r1", 10);
        b.created_at = 10;
        let mut child = raw("r1", 20);
        child.parent_id = Some(a.id);

        store.add_to_store(a.clone()).await.unwrap();
        store.add_to_store(b.clone()).await.unwrap();
        store.add_to_store(child).await.unwrap();

        let mains = store.main_documents("r1").await;
        assert_eq!(mains.len(), 2);
        assert_eq!(mains[0].id, b.id);
        assert_eq!(mains[1].id, a.id);

        let first = store.first_main_document("r1").await.unwrap();
        assert!(!first.is_draft());
        assert_eq!(first.record().id, b.id);
    }

    #[tokio::test]
    async fn test_empty_root_is_not_an_error() {
        let store = store();
        assert!(store.main_documents("nothing-here").await.is_empty());
        assert!(store.first_main_document("nothing-here").await.is_none());
    }

    #[tokio::test]
    async fn test_draft_lifecycle() {
        let store = store();
        store.add_root(DocumentRoot::new("r1", "note", AccessLevel::None)).await;

        // No main record yet: a draft is fabricated and reused
        let draft = store.ensure_draft("r1").await.unwrap();
        assert!(draft.is_draft());
        let again = store.ensure_draft("r1").await.unwrap();
        assert_eq!(draft.record().id, again.record().id);

        // A signed-out viewer can still type into the placeholder
        let outcome = store
            .set_data(draft.record().id, json!({ "text": "typing" }), Source::Local, None)
            .await
            .unwrap();
        assert_eq!(outcome, SetOutcome::Applied { persist: false });

        // A real record arriving replaces the draft transparently
        store.add_to_store(raw("r1", 10)).await.unwrap();
        let first = store.first_main_document("r1").await.unwrap();
        assert!(!first.is_draft());
        assert!(store.find(draft.record().id).await.is_none());
    }

    #[tokio::test]
    async fn test_ensure_draft_unknown_root() {
        let store = store();
        assert!(matches!(
            store.ensure_draft("missing").await,
            Err(StoreError::RootNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_permission_gate_blocks_local_writes() {
        let store = store();
        store.add_root(DocumentRoot::new("r1", "note", AccessLevel::ReadOnly)).await;
        let raw = raw("r1", 10);
        store.add_to_store(raw.clone()).await.unwrap();

        let before = store.version();
        let outcome = store
            .set_data(raw.id, json!({ "text": "nope" }), Source::Local, None)
            .await
            .unwrap();
        assert_eq!(outcome, SetOutcome::Denied);
        assert_eq!(store.find(raw.id).await.unwrap().data, json!({ "text": "seed" }));
        // Silent no-op: not even a version bump
        assert_eq!(store.version(), before);
    }

    #[tokio::test]
    async fn test_unknown_root_denies_local_writes() {
        let store = store();
        let raw = raw("unregistered-root", 10);
        store.add_to_store(raw.clone()).await.unwrap();
        let outcome = store
            .set_data(raw.id, json!({ "text": "x" }), Source::Local, None)
            .await
            .unwrap();
        assert_eq!(outcome, SetOutcome::Denied);
    }

    #[tokio::test]
    async fn test_remote_set_data_ignores_permissions() {
        let store = store();
        store.add_root(DocumentRoot::new("r1", "note", AccessLevel::None)).await;
        let raw = raw("r1", 10);
        store.add_to_store(raw.clone()).await.unwrap();

        let outcome = store
            .set_data(raw.id, json!({ "text": "remote" }), Source::Remote, Some(20))
            .await
            .unwrap();
        assert_eq!(outcome, SetOutcome::Applied { persist: false });
        assert_eq!(store.find(raw.id).await.unwrap().state, RecordState::Synced);
    }

    #[tokio::test]
    async fn test_apply_server_events() {
        let store = store();
        let record = raw("r1", 10);
        store.apply_server_event(ServerEvent::NewRecord(record.clone())).await;
        assert!(store.find(record.id).await.is_some());

        store
            .apply_server_event(ServerEvent::ChangedDocument {
                record_id: record.id,
                data: json!({ "text": "pushed" }),
                updated_at: 50,
            })
            .await;
        assert_eq!(store.find(record.id).await.unwrap().data, json!({ "text": "pushed" }));

        store
            .apply_server_event(ServerEvent::ConnectedClients {
                root_id: "r1".to_string(),
                count: 4,
            })
            .await;
        assert_eq!(store.connected_clients("r1").await, 4);
        assert_eq!(store.connected_clients("r2").await, 0);

        store
            .apply_server_event(ServerEvent::DeletedRecord { record_id: record.id })
            .await;
        assert!(store.find(record.id).await.is_none());
    }

    #[tokio::test]
    async fn test_version_bumps_on_mutation() {
        let store = store();
        let mut rx = store.subscribe();
        let before = *rx.borrow();

        store.add_to_store(raw("r1", 10)).await.unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow() > before);
    }

    #[tokio::test]
    async fn test_resync_drops_vanished_records() {
        let adapter = Arc::new(MemoryAdapter::new());
        let api = Arc::new(OfflineApi::new(adapter.clone()));
        let store = RecordStore::new(api, registry(), SyncConfig::for_testing());
        writable_root(&store, "r1").await;

        // One record exists upstream, one only locally (deleted while away)
        let kept = raw("r1", 10);
        adapter
            .put(Collection::Records, &serde_json::to_value(&kept).unwrap())
            .unwrap();
        let vanished = raw("r1", 10);
        store.add_to_store(vanished.clone()).await.unwrap();
        let unrelated = raw("r2", 10);
        store.add_to_store(unrelated.clone()).await.unwrap();

        let count = store.resync(&["r1".to_string()]).await.unwrap();
        assert_eq!(count, 1);
        assert!(store.find(kept.id).await.is_some());
        assert!(store.find(vanished.id).await.is_none());
        // Other roots are untouched by a scoped resync
        assert!(store.find(unrelated.id).await.is_some());
    }
}
