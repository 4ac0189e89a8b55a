//! Record type registry: the open end of the closed type→shape mapping.
//!
//! Each feature module defines a [`RecordKind`] for its record type and
//! registers it at startup. The store core dispatches through the registry
//! and never special-cases a concrete type, so new record types plug in
//! without touching this crate.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::record::{RawRecord, Record};

/// Behavior of one record type.
///
/// `validate` enforces the type's closed data shape on every payload that
/// enters the store; `initial_data` seeds draft records for the type.
pub trait RecordKind: Send + Sync {
    /// The wire discriminant, e.g. `"note"`.
    fn type_name(&self) -> &str;

    /// Reject payloads that do not match this type's data shape.
    fn validate(&self, data: &Value) -> Result<(), RegistryError>;

    /// Payload for a freshly fabricated draft record.
    fn initial_data(&self) -> Value;
}

/// Registry errors.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// No kind registered for the wire type
    UnknownType(String),
    /// Payload rejected by the kind's shape check
    InvalidData { record_type: String, reason: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownType(t) => write!(f, "No record kind registered for type '{t}'"),
            Self::InvalidData { record_type, reason } => {
                write!(f, "Invalid data for record type '{record_type}': {reason}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Type → constructor table, populated once at startup.
#[derive(Default, Clone)]
pub struct RecordRegistry {
    kinds: HashMap<String, Arc<dyn RecordKind>>,
}

impl RecordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record kind. Later registrations for the same type name
    /// replace earlier ones.
    pub fn register(&mut self, kind: Arc<dyn RecordKind>) {
        let name = kind.type_name().to_string();
        if self.kinds.insert(name.clone(), kind).is_some() {
            log::warn!("Record kind '{name}' registered twice; replacing");
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn RecordKind>> {
        self.kinds.get(type_name)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.kinds.contains_key(type_name)
    }

    pub fn registered_types(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }

    /// Construct a record from a raw payload, enforcing the kind's shape.
    pub fn construct(&self, raw: RawRecord) -> Result<Record, RegistryError> {
        let kind = self
            .kinds
            .get(&raw.record_type)
            .ok_or_else(|| RegistryError::UnknownType(raw.record_type.clone()))?;
        kind.validate(&raw.data)?;
        Ok(Record::from_raw(raw))
    }

    /// Fabricate a draft record for a root of the given type.
    pub fn draft(&self, type_name: &str, document_root_id: &str) -> Result<Record, RegistryError> {
        let kind = self
            .kinds
            .get(type_name)
            .ok_or_else(|| RegistryError::UnknownType(type_name.to_string()))?;
        Ok(Record::draft(type_name, document_root_id, kind.initial_data()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    struct NoteKind;

    impl RecordKind for NoteKind {
        fn type_name(&self) -> &str {
            "note"
        }

        fn validate(&self, data: &Value) -> Result<(), RegistryError> {
            if data.get("text").map(Value::is_string).unwrap_or(false) {
                Ok(())
            } else {
                Err(RegistryError::InvalidData {
                    record_type: "note".to_string(),
                    reason: "missing string field 'text'".to_string(),
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

    fn raw_note(data: Value) -> RawRecord {
        RawRecord {
            id: Uuid::new_v4(),
            record_type: "note".to_string(),
            author_id: None,
            parent_id: None,
            document_root_id: "root-1".to_string(),
            data,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_construct_valid() {
        let record = registry().construct(raw_note(json!({ "text": "hi" }))).unwrap();
        assert_eq!(record.record_type, "note");
        assert_eq!(record.data, json!({ "text": "hi" }));
    }

    #[test]
    fn test_construct_unknown_type() {
        let mut raw = raw_note(json!({ "text": "hi" }));
        raw.record_type = "quiz".to_string();
        let err = registry().construct(raw).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownType(t) if t == "quiz"));
    }

    #[test]
    fn test_construct_rejects_bad_shape() {
        let err = registry().construct(raw_note(json!({ "nope": 1 }))).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidData { .. }));
    }

    #[test]
    fn test_draft_uses_initial_data() {
        let draft = registry().draft("note", "root-1").unwrap();
        assert!(draft.is_draft());
        assert_eq!(draft.data, json!({ "text": "" }));
        assert_eq!(draft.document_root_id, "root-1");
    }

    #[test]
    fn test_registered_types() {
        let registry = registry();
        assert!(registry.is_registered("note"));
        assert!(!registry.is_registered("quiz"));
        assert_eq!(registry.registered_types(), vec!["note"]);
    }
}
