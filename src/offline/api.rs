//! The full HTTP API contract served from local storage.
//!
//! When offline mode is active the record store is constructed over an
//! [`OfflineApi`] instead of an `HttpApi`; every call site keeps working,
//! unaware that requests hit disk instead of the network.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{Collection, OfflineAdapter, OfflineError};
use crate::api::{ApiError, CreateDocument, CreateOptions, DocumentApi, UpdateDocument};
use crate::record::{epoch_millis, RawRecord};

/// `DocumentApi` implemented over any offline adapter.
pub struct OfflineApi {
    adapter: Arc<dyn OfflineAdapter>,
}

impl OfflineApi {
    pub fn new(adapter: Arc<dyn OfflineAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &Arc<dyn OfflineAdapter> {
        &self.adapter
    }

    fn decode(item: Value) -> Result<RawRecord, ApiError> {
        serde_json::from_value(item).map_err(|e| ApiError::Storage(e.to_string()))
    }

    fn encode(record: &RawRecord) -> Result<Value, ApiError> {
        serde_json::to_value(record).map_err(|e| ApiError::Storage(e.to_string()))
    }

    fn load(&self, id: Uuid) -> Result<RawRecord, ApiError> {
        match self.adapter.get(Collection::Records, &id.to_string())? {
            Some(item) => Self::decode(item),
            None => Err(ApiError::NotFound(id.to_string())),
        }
    }

    fn save(&self, record: &RawRecord) -> Result<(), ApiError> {
        self.adapter
            .put(Collection::Records, &Self::encode(record)?)
            .map_err(ApiError::from)
    }

    /// The existing main document for a root, if any (oldest first).
    fn existing_main(&self, root_id: &str) -> Result<Option<RawRecord>, ApiError> {
        let mut mains: Vec<RawRecord> = self
            .adapter
            .by_document_root_id(Collection::Records, root_id)?
            .into_iter()
            .map(Self::decode)
            .collect::<Result<_, _>>()?;
        mains.retain(|r| r.parent_id.is_none());
        mains.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(mains.into_iter().next())
    }
}

impl From<OfflineError> for ApiError {
    fn from(e: OfflineError) -> Self {
        ApiError::Storage(e.to_string())
    }
}

#[async_trait]
impl DocumentApi for OfflineApi {
    async fn get_document(&self, id: Uuid) -> Result<RawRecord, ApiError> {
        self.load(id)
    }

    async fn create_document(
        &self,
        doc: CreateDocument,
        opts: CreateOptions,
    ) -> Result<RawRecord, ApiError> {
        // onBehalfOf is meaningless without a server-side actor; ignored.
        if opts.unique_main && doc.parent_id.is_none() {
            if let Some(existing) = self.existing_main(&doc.document_root_id)? {
                return Ok(existing);
            }
        }

        let now = epoch_millis();
        let record = RawRecord {
            id: Uuid::new_v4(),
            record_type: doc.record_type,
            author_id: doc.author_id,
            parent_id: doc.parent_id,
            document_root_id: doc.document_root_id,
            data: doc.data,
            created_at: now,
            updated_at: now,
        };
        self.save(&record)?;
        Ok(record)
    }

    async fn update_document(
        &self,
        id: Uuid,
        update: UpdateDocument,
        _on_behalf_of: bool,
    ) -> Result<RawRecord, ApiError> {
        let mut record = self.load(id)?;
        record.data = update.data;
        record.updated_at = update.updated_at;
        self.save(&record)?;
        Ok(record)
    }

    async fn delete_document(&self, id: Uuid) -> Result<(), ApiError> {
        if self.adapter.delete(Collection::Records, &id.to_string())? {
            Ok(())
        } else {
            Err(ApiError::NotFound(id.to_string()))
        }
    }

    async fn documents_by_roots(&self, root_ids: &[String]) -> Result<Vec<RawRecord>, ApiError> {
        let mut records = Vec::new();
        for root_id in root_ids {
            for item in self.adapter.by_document_root_id(Collection::Records, root_id)? {
                records.push(Self::decode(item)?);
            }
        }
        Ok(records)
    }

    async fn link_document(&self, id: Uuid, parent_id: Uuid) -> Result<RawRecord, ApiError> {
        // Parent must exist for the link to mean anything
        self.load(parent_id)?;

        let mut record = self.load(id)?;
        record.parent_id = Some(parent_id);
        record.updated_at = epoch_millis();
        self.save(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::MemoryAdapter;
    use serde_json::json;

    fn api() -> OfflineApi {
        OfflineApi::new(Arc::new(MemoryAdapter::new()))
    }

    fn create_doc(root: &str) -> CreateDocument {
        CreateDocument {
            record_type: "note".to_string(),
            document_root_id: root.to_string(),
            parent_id: None,
            author_id: Some(Uuid::new_v4()),
            data: json!({ "text": "hello" }),
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let api = api();
        let created = api
            .create_document(create_doc("r1"), CreateOptions::default())
            .await
            .unwrap();
        let fetched = api.get_document(created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.record_type, "note");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let err = api().get_document(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_roundtrip() {
        let api = api();
        let created = api
            .create_document(create_doc("r1"), CreateOptions::default())
            .await
            .unwrap();

        let updated = api
            .update_document(
                created.id,
                UpdateDocument { data: json!({ "text": "edited" }), updated_at: created.updated_at + 5 },
                false,
            )
            .await
            .unwrap();
        assert_eq!(updated.data, json!({ "text": "edited" }));
        assert_eq!(updated.updated_at, created.updated_at + 5);

        let fetched = api.get_document(created.id).await.unwrap();
        assert_eq!(fetched, updated);
    }

    #[tokio::test]
    async fn test_delete() {
        let api = api();
        let created = api
            .create_document(create_doc("r1"), CreateOptions::default())
            .await
            .unwrap();
        api.delete_document(created.id).await.unwrap();
        let err = api.delete_document(created.id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_documents_by_roots() {
        let api = api();
        api.create_document(create_doc("r1"), CreateOptions::default()).await.unwrap();
        api.create_document(create_doc("r1"), CreateOptions::default()).await.unwrap();
        api.create_document(create_doc("r2"), CreateOptions::default()).await.unwrap();

        let both = api
            .documents_by_roots(&["r1".to_string(), "r2".to_string()])
            .await
            .unwrap();
        assert_eq!(both.len(), 3);

        let r2 = api.documents_by_roots(&["r2".to_string()]).await.unwrap();
        assert_eq!(r2.len(), 1);
    }

    #[tokio::test]
    async fn test_unique_main_returns_existing() {
        let api = api();
        let opts = CreateOptions { unique_main: true, ..Default::default() };
        let first = api.create_document(create_doc("r1"), opts).await.unwrap();
        let second = api.create_document(create_doc("r1"), opts).await.unwrap();
        assert_eq!(first.id, second.id);

        let all = api.documents_by_roots(&["r1".to_string()]).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_unique_main_ignores_children() {
        let api = api();
        let main = api
            .create_document(create_doc("r1"), CreateOptions::default())
            .await
            .unwrap();

        let mut child = create_doc("r1");
        child.parent_id = Some(main.id);
        let opts = CreateOptions { unique_main: true, ..Default::default() };
        let created_child = api.create_document(child, opts).await.unwrap();
        // Child creation is never collapsed onto the main document
        assert_ne!(created_child.id, main.id);
    }

    #[tokio::test]
    async fn test_link_document() {
        let api = api();
        let parent = api
            .create_document(create_doc("r1"), CreateOptions::default())
            .await
            .unwrap();
        let child = api
            .create_document(create_doc("r1"), CreateOptions::default())
            .await
            .unwrap();

        let linked = api.link_document(child.id, parent.id).await.unwrap();
        assert_eq!(linked.parent_id, Some(parent.id));

        let err = api.link_document(child.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
