//! Access policy: grant resolution for document roots.
//!
//! A document root carries an intrinsic default access level plus a list of
//! explicit grants. Grants are scoped (whole root, student group, single
//! user) and wire-serialized as `RW_DocumentRoot`, `RO_StudentGroup`,
//! `None_User` and so on. Resolution is a pure function over the grant set:
//! no hidden state, no I/O.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Effective access to a document root.
///
/// Total order: `ReadWrite > ReadOnly > None` (variant order matters for
/// the derived `Ord`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum AccessLevel {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

/// Scope of a permission grant, from least to most specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantScope {
    /// Applies to everyone who can see the root
    DocumentRoot,
    /// Applies to members of one student group
    StudentGroup,
    /// Applies to one user
    User,
}

/// A scoped access level as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopedAccess {
    #[serde(rename = "None_DocumentRoot")]
    NoneDocumentRoot,
    #[serde(rename = "RO_DocumentRoot")]
    RoDocumentRoot,
    #[serde(rename = "RW_DocumentRoot")]
    RwDocumentRoot,
    #[serde(rename = "None_StudentGroup")]
    NoneStudentGroup,
    #[serde(rename = "RO_StudentGroup")]
    RoStudentGroup,
    #[serde(rename = "RW_StudentGroup")]
    RwStudentGroup,
    #[serde(rename = "None_User")]
    NoneUser,
    #[serde(rename = "RO_User")]
    RoUser,
    #[serde(rename = "RW_User")]
    RwUser,
}

impl ScopedAccess {
    /// Build the scoped variant from its two axes.
    pub fn new(scope: GrantScope, level: AccessLevel) -> Self {
        match (scope, level) {
            (GrantScope::DocumentRoot, AccessLevel::None) => Self::NoneDocumentRoot,
            (GrantScope::DocumentRoot, AccessLevel::ReadOnly) => Self::RoDocumentRoot,
            (GrantScope::DocumentRoot, AccessLevel::ReadWrite) => Self::RwDocumentRoot,
            (GrantScope::StudentGroup, AccessLevel::None) => Self::NoneStudentGroup,
            (GrantScope::StudentGroup, AccessLevel::ReadOnly) => Self::RoStudentGroup,
            (GrantScope::StudentGroup, AccessLevel::ReadWrite) => Self::RwStudentGroup,
            (GrantScope::User, AccessLevel::None) => Self::NoneUser,
            (GrantScope::User, AccessLevel::ReadOnly) => Self::RoUser,
            (GrantScope::User, AccessLevel::ReadWrite) => Self::RwUser,
        }
    }

    /// The access level this grant confers.
    pub fn level(&self) -> AccessLevel {
        match self {
            Self::NoneDocumentRoot | Self::NoneStudentGroup | Self::NoneUser => AccessLevel::None,
            Self::RoDocumentRoot | Self::RoStudentGroup | Self::RoUser => AccessLevel::ReadOnly,
            Self::RwDocumentRoot | Self::RwStudentGroup | Self::RwUser => AccessLevel::ReadWrite,
        }
    }

    /// The scope this grant applies at.
    pub fn scope(&self) -> GrantScope {
        match self {
            Self::NoneDocumentRoot | Self::RoDocumentRoot | Self::RwDocumentRoot => {
                GrantScope::DocumentRoot
            }
            Self::NoneStudentGroup | Self::RoStudentGroup | Self::RwStudentGroup => {
                GrantScope::StudentGroup
            }
            Self::NoneUser | Self::RoUser | Self::RwUser => GrantScope::User,
        }
    }
}

/// One explicit permission grant on a document root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGrant {
    pub id: Uuid,
    /// Root this grant belongs to
    pub document_root_id: String,
    pub access: ScopedAccess,
    /// User id for `_User` grants, group id for `_StudentGroup` grants,
    /// unused for root-wide grants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
}

impl PermissionGrant {
    pub fn root_wide(document_root_id: impl Into<String>, level: AccessLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_root_id: document_root_id.into(),
            access: ScopedAccess::new(GrantScope::DocumentRoot, level),
            subject_id: None,
        }
    }

    pub fn for_group(
        document_root_id: impl Into<String>,
        group_id: Uuid,
        level: AccessLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_root_id: document_root_id.into(),
            access: ScopedAccess::new(GrantScope::StudentGroup, level),
            subject_id: Some(group_id),
        }
    }

    pub fn for_user(
        document_root_id: impl Into<String>,
        user_id: Uuid,
        level: AccessLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_root_id: document_root_id.into(),
            access: ScopedAccess::new(GrantScope::User, level),
            subject_id: Some(user_id),
        }
    }
}

/// A student group: membership feeds group-scoped grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGroup {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

/// The identity signal consumed from the auth collaborator.
///
/// `user_id == None` means nobody is signed in; drafts are the only
/// writable records in that state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: Option<Uuid>,
    pub group_ids: Vec<Uuid>,
}

impl Viewer {
    pub fn signed_in(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            group_ids: Vec::new(),
        }
    }

    pub fn with_groups(user_id: Uuid, group_ids: Vec<Uuid>) -> Self {
        Self {
            user_id: Some(user_id),
            group_ids,
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Highest-ranked level in a set of applicable grants.
///
/// Empty set resolves to `None`.
pub fn highest_access(grants: &HashSet<AccessLevel>) -> AccessLevel {
    grants.iter().copied().max().unwrap_or(AccessLevel::None)
}

/// Resolve the effective access for a viewer against a root's grant list.
///
/// The most specific applicable scope wins: user grants over group grants
/// over root-wide grants, falling back to the root's intrinsic default when
/// no grant applies. Within the winning scope the highest level is taken.
pub fn effective_access(
    default_access: AccessLevel,
    grants: &[PermissionGrant],
    viewer: &Viewer,
) -> AccessLevel {
    let user_levels: HashSet<AccessLevel> = grants
        .iter()
        .filter(|g| {
            g.access.scope() == GrantScope::User
                && g.subject_id.is_some()
                && g.subject_id == viewer.user_id
        })
        .map(|g| g.access.level())
        .collect();
    if !user_levels.is_empty() {
        return highest_access(&user_levels);
    }

    let group_levels: HashSet<AccessLevel> = grants
        .iter()
        .filter(|g| {
            g.access.scope() == GrantScope::StudentGroup
                && g.subject_id.is_some_and(|id| viewer.group_ids.contains(&id))
        })
        .map(|g| g.access.level())
        .collect();
    if !group_levels.is_empty() {
        return highest_access(&group_levels);
    }

    let root_levels: HashSet<AccessLevel> = grants
        .iter()
        .filter(|g| g.access.scope() == GrantScope::DocumentRoot)
        .map(|g| g.access.level())
        .collect();
    if !root_levels.is_empty() {
        return highest_access(&root_levels);
    }

    default_access
}
