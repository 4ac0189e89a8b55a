//! The record model: one synchronized document and its optimistic
//! state transitions.
//!
//! A [`Record`] wraps the wire shape ([`RawRecord`]) with the sync state
//! machine and the last server-confirmed baseline. All reconciliation is
//! last-write-wins on `updated_at`; every mutation carries a [`Source`] tag
//! so that remote changes are merged but never re-persisted or re-broadcast
//! (no echo loops).
//!
//! `set_data` is deliberately pure — it decides *what* happened
//! (applied / denied / stale) and whether persistence is wanted; the record
//! store owns the I/O that follows.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access::AccessLevel;

/// Milliseconds since the Unix epoch; the clock behind every `updated_at`.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// This client originated it: apply optimistically, persist, broadcast.
    Local,
    /// Arrived from storage or another client: merge by recency only.
    Remote,
}

/// Sync lifecycle of a record as observable by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Locally fabricated placeholder, never persisted
    Draft,
    /// Optimistically inserted, create request in flight
    PendingCreate,
    /// Matches the last server-confirmed state
    Synced,
    /// A local change is awaiting persistence
    Syncing,
    /// The last persistence attempt failed; state was rolled back
    Error,
}

/// Outcome of a `set_data` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The payload was applied; `persist` asks the store to schedule a write
    Applied { persist: bool },
    /// Local write below ReadWrite — dropped silently
    Denied,
    /// Remote payload older than current state — dropped deterministically
    Stale,
}

/// Wire/persisted shape of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub id: Uuid,
    /// Discriminant selecting the data shape and registered behavior
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<Uuid>,
    /// Non-null marks this as a child record, not a main document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub document_root_id: String,
    pub data: Value,
    pub created_at: u64,
    pub updated_at: u64,
}

/// One synchronized record with its optimistic state machine.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: Uuid,
    pub record_type: String,
    pub author_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub document_root_id: String,
    pub data: Value,
    pub created_at: u64,
    pub updated_at: u64,
    pub state: RecordState,
    /// Last server-confirmed payload, the rollback target
    confirmed_data: Value,
    confirmed_updated_at: u64,
}

impl Record {
    /// Wrap a server-confirmed payload.
    pub fn from_raw(raw: RawRecord) -> Self {
        Self {
            id: raw.id,
            record_type: raw.record_type,
            author_id: raw.author_id,
            parent_id: raw.parent_id,
            document_root_id: raw.document_root_id,
            confirmed_data: raw.data.clone(),
            confirmed_updated_at: raw.updated_at,
            data: raw.data,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            state: RecordState::Synced,
        }
    }

    /// Fabricate an ephemeral draft for a root.
    ///
    /// Drafts render interactive UI before sign-in or before the real
    /// record exists; they are dropped once a real main record for the
    /// same root is observed.
    pub fn draft(record_type: impl Into<String>, document_root_id: impl Into<String>, data: Value) -> Self {
        let now = epoch_millis();
        Self {
            id: Uuid::new_v4(),
            record_type: record_type.into(),
            author_id: None,
            parent_id: None,
            document_root_id: document_root_id.into(),
            confirmed_data: data.clone(),
            confirmed_updated_at: now,
            data,
            created_at: now,
            updated_at: now,
            state: RecordState::Draft,
        }
    }

    /// Provisional record inserted ahead of a create request.
    pub fn pending_create(raw: RawRecord) -> Self {
        let mut record = Self::from_raw(raw);
        record.state = RecordState::PendingCreate;
        record
    }

    pub fn is_draft(&self) -> bool {
        self.state == RecordState::Draft
    }

    /// A main document is a root-level record (no parent).
    pub fn is_main(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Current wire shape of this record.
    pub fn to_raw(&self) -> RawRecord {
        RawRecord {
            id: self.id,
            record_type: self.record_type.clone(),
            author_id: self.author_id,
            parent_id: self.parent_id,
            document_root_id: self.document_root_id.clone(),
            data: self.data.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Apply a payload according to its source tag.
    ///
    /// LOCAL: gated on `access >= ReadWrite`; applied optimistically with a
    /// fresh timestamp, marking the record `Syncing`. Persistence is
    /// requested unless this is a draft (drafts never touch the network).
    ///
    /// REMOTE: last-write-wins — applied only if `updated_at` is not older
    /// than the current state (ties apply the incoming value). Updates the
    /// confirmed baseline and never requests persistence.
    pub fn set_data(
        &mut self,
        data: Value,
        source: Source,
        updated_at: Option<u64>,
        access: AccessLevel,
    ) -> SetOutcome {
        match source {
            Source::Local => {
                if access < AccessLevel::ReadWrite {
                    return SetOutcome::Denied;
                }
                self.data = data;
                self.updated_at = updated_at.unwrap_or_else(epoch_millis);
                if self.state != RecordState::Draft {
                    self.state = RecordState::Syncing;
                }
                SetOutcome::Applied {
                    persist: self.state != RecordState::Draft,
                }
            }
            Source::Remote => {
                let incoming = updated_at.unwrap_or_else(epoch_millis);
                if incoming < self.updated_at {
                    return SetOutcome::Stale;
                }
                self.data = data.clone();
                self.updated_at = incoming;
                self.confirmed_data = data;
                self.confirmed_updated_at = incoming;
                self.state = RecordState::Synced;
                SetOutcome::Applied { persist: false }
            }
        }
    }

    /// Adopt a server response for a completed write.
    ///
    /// A newer remote change may have landed while the write was in
    /// flight, so the response is only adopted if it is not older than the
    /// current state; either way the record leaves `Syncing`.
    pub fn confirm(&mut self, raw: &RawRecord) {
        if raw.updated_at >= self.updated_at {
            self.data = raw.data.clone();
            self.updated_at = raw.updated_at;
            self.parent_id = raw.parent_id;
            self.author_id = raw.author_id;
            self.confirmed_data = raw.data.clone();
            self.confirmed_updated_at = raw.updated_at;
        }
        self.state = RecordState::Synced;
    }

    /// Roll back to the last confirmed state after a failed write.
    ///
    /// The record surfaces `Error` until the user triggers a re-save.
    pub fn rollback(&mut self) {
        self.data = self.confirmed_data.clone();
        self.updated_at = self.confirmed_updated_at;
        self.state = RecordState::Error;
    }

    #[cfg(test)]
    pub(crate) fn confirmed_data(&self) -> &Value {
        &self.confirmed_data
    }
}
