//! # campus-sync — Document synchronization engine
//!
//! The sync core of an educational content platform: many concurrent
//! clients read and optimistically mutate shared, typed, permissioned
//! records, persist them to a backend, and propagate changes to the other
//! clients in near real time — degrading to a fully offline, disk-backed
//! mode when no network is available.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  set_data(LOCAL)   ┌───────────────┐
//! │ UI / feature  │ ─────────────────► │  RecordStore  │
//! │ modules       │ ◄───────────────── │  (table +     │
//! └───────────────┘   watch version    │   registry)   │
//!                                      └──────┬────────┘
//!                             debounced PUT   │   post-save push
//!                      ┌──────────────────────┼──────────────────┐
//!                      ▼                      ▼                  ▼
//!               ┌─────────────┐      ┌────────────────┐   ┌─────────────┐
//!               │ DocumentApi │      │ ChannelClient  │   │ other       │
//!               │ (HTTP  or   │      │ (rooms, JSON   │──►│ clients'    │
//!               │  offline)   │      │  WebSocket)    │   │ stores      │
//!               └──────┬──────┘      └────────────────┘   └─────────────┘
//!                      ▼
//!               ┌─────────────┐
//!               │ RocksDB /   │
//!               │ in-memory   │
//!               └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`access`] — pure grant resolution (`ReadWrite > ReadOnly > None`)
//! - [`record`] — record model, source tags, last-write-wins reconciliation
//! - [`registry`] — pluggable type → constructor table
//! - [`root`] — document roots: permission and grouping boundaries
//! - [`store`] — record table, CRUD orchestration, debounced persistence
//! - [`api`] — the HTTP wire contract and its reqwest implementation
//! - [`channel`] — room-multiplexed realtime channel with resync-on-reconnect
//! - [`offline`] — disk-backed and in-memory substitutes for the API
//!
//! Conflict resolution is last-write-wins by `updatedAt`: concurrent edits
//! to the same record from two clients silently drop the older one. There
//! is no operational transform or CRDT merging, and no event replay after a
//! disconnect — reconnection always triggers a full re-fetch of the joined
//! roots.

pub mod access;
pub mod api;
pub mod channel;
pub mod offline;
pub mod record;
pub mod registry;
pub mod root;
pub mod store;

// Re-exports for convenience
pub use access::{
    effective_access, highest_access, AccessLevel, GrantScope, PermissionGrant, ScopedAccess,
    StudentGroup, Viewer,
};
pub use api::{ApiError, CreateDocument, CreateOptions, DocumentApi, HttpApi, UpdateDocument};
pub use channel::{
    ChannelClient, ChannelError, ChannelEvent, ChannelState, ClientEvent, ServerEvent, UserMessage,
};
pub use offline::{
    Collection, MemoryAdapter, OfflineAdapter, OfflineApi, OfflineError, RocksAdapter, RocksConfig,
};
pub use record::{epoch_millis, RawRecord, Record, RecordState, SetOutcome, Source};
pub use registry::{RecordKind, RecordRegistry, RegistryError};
pub use root::{DocumentRoot, MainDocument};
pub use store::{RecordStore, StoreError, SyncConfig};
