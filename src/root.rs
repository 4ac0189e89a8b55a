//! Document roots: the permission and grouping boundary for records.
//!
//! A root declares exactly one record type and carries the grant list that
//! [`crate::access::effective_access`] resolves against. The derived views
//! over the record table (`main_documents`, `first_main_document`) live on
//! [`crate::store::RecordStore`], which owns the table; they are pure
//! recomputations, never mutated directly.

use serde::{Deserialize, Serialize};

use crate::access::{effective_access, AccessLevel, PermissionGrant, Viewer};
use crate::record::Record;

/// A named permission boundary containing records of one declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRoot {
    pub id: String,
    /// The single record type this root contains
    #[serde(rename = "type")]
    pub record_type: String,
    /// Intrinsic access when no grant applies
    #[serde(default)]
    pub default_access: AccessLevel,
    #[serde(default)]
    pub grants: Vec<PermissionGrant>,
}

impl DocumentRoot {
    pub fn new(
        id: impl Into<String>,
        record_type: impl Into<String>,
        default_access: AccessLevel,
    ) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            default_access,
            grants: Vec::new(),
        }
    }

    pub fn with_grants(mut self, grants: Vec<PermissionGrant>) -> Self {
        self.grants = grants;
        self
    }

    /// Effective permission for a viewer (pure derived view).
    pub fn permission(&self, viewer: &Viewer) -> AccessLevel {
        effective_access(self.default_access, &self.grants, viewer)
    }

    /// The raw grant list.
    pub fn permissions(&self) -> &[PermissionGrant] {
        &self.grants
    }
}

/// The canonical singleton view over a root's main documents.
///
/// Callers must pattern-match: a draft is a locally fabricated placeholder
/// that has never been persisted, not a real record with a sentinel author.
#[derive(Debug, Clone)]
pub enum MainDocument {
    Draft(Record),
    Persisted(Record),
}

impl MainDocument {
    pub fn record(&self) -> &Record {
        match self {
            Self::Draft(r) | Self::Persisted(r) => r,
        }
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, Self::Draft(_))
    }
}
