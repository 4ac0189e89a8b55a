//! The document persistence contract and its HTTP implementation.
//!
//! [`DocumentApi`] is the seam between the record store and whatever
//! answers its reads and writes. Online that is [`HttpApi`] over the
//! backend's REST surface; offline it is
//! [`crate::offline::api::OfflineApi`] over a local adapter. Upper layers
//! cannot tell the two apart.
//!
//! REST surface:
//! ```text
//! GET    /documents/:id
//! POST   /documents[?onBehalfOf=true][&uniqueMain=true]
//! PUT    /documents/:id[?onBehalfOf=true]
//! DELETE /documents/:id
//! GET    /documents?rids=<rootId>&rids=<rootId>...
//! PUT    /documents/:id/linkTo/:id
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::record::RawRecord;

/// Body of a create request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocument {
    #[serde(rename = "type")]
    pub record_type: String,
    pub document_root_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<Uuid>,
    pub data: Value,
}

/// Query options for create requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Educator writing for a student
    pub on_behalf_of: bool,
    /// Return the existing main document instead of creating a second one
    pub unique_main: bool,
}

/// Body of an update request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocument {
    pub data: Value,
    pub updated_at: u64,
}

/// API errors.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// Transport-level failure (network unreachable, connection refused)
    Request(String),
    /// Server answered with a non-success status
    Status { code: u16, message: String },
    /// Document does not exist
    NotFound(String),
    /// Response body did not decode
    Decode(String),
    /// Local storage failure (offline implementation)
    Storage(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(e) => write!(f, "Request failed: {e}"),
            Self::Status { code, message } => write!(f, "Server returned {code}: {message}"),
            Self::NotFound(id) => write!(f, "Document not found: {id}"),
            Self::Decode(e) => write!(f, "Failed to decode response: {e}"),
            Self::Storage(e) => write!(f, "Storage error: {e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Request(e.to_string())
        }
    }
}

/// The request/response contract the record store persists through.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    async fn get_document(&self, id: Uuid) -> Result<RawRecord, ApiError>;

    async fn create_document(
        &self,
        doc: CreateDocument,
        opts: CreateOptions,
    ) -> Result<RawRecord, ApiError>;

    async fn update_document(
        &self,
        id: Uuid,
        update: UpdateDocument,
        on_behalf_of: bool,
    ) -> Result<RawRecord, ApiError>;

    async fn delete_document(&self, id: Uuid) -> Result<(), ApiError>;

    /// Bulk fetch of every record in the given roots.
    async fn documents_by_roots(&self, root_ids: &[String]) -> Result<Vec<RawRecord>, ApiError>;

    /// Re-parent a record under another record.
    async fn link_document(&self, id: Uuid, parent_id: Uuid) -> Result<RawRecord, ApiError>;
}

/// `DocumentApi` over the backend's REST surface.
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(response: reqwest::Response, id_hint: &str) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(id_hint.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                code: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl DocumentApi for HttpApi {
    async fn get_document(&self, id: Uuid) -> Result<RawRecord, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/documents/{id}")))
            .send()
            .await?;
        let response = Self::check(response, &id.to_string()).await?;
        Ok(response.json().await?)
    }

    async fn create_document(
        &self,
        doc: CreateDocument,
        opts: CreateOptions,
    ) -> Result<RawRecord, ApiError> {
        let mut request = self.client.post(self.url("/documents")).json(&doc);
        if opts.on_behalf_of {
            request = request.query(&[("onBehalfOf", "true")]);
        }
        if opts.unique_main {
            request = request.query(&[("uniqueMain", "true")]);
        }
        let response = Self::check(request.send().await?, &doc.document_root_id).await?;
        Ok(response.json().await?)
    }

    async fn update_document(
        &self,
        id: Uuid,
        update: UpdateDocument,
        on_behalf_of: bool,
    ) -> Result<RawRecord, ApiError> {
        let mut request = self
            .client
            .put(self.url(&format!("/documents/{id}")))
            .json(&update);
        if on_behalf_of {
            request = request.query(&[("onBehalfOf", "true")]);
        }
        let response = Self::check(request.send().await?, &id.to_string()).await?;
        Ok(response.json().await?)
    }

    async fn delete_document(&self, id: Uuid) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/documents/{id}")))
            .send()
            .await?;
        Self::check(response, &id.to_string()).await?;
        Ok(())
    }

    async fn documents_by_roots(&self, root_ids: &[String]) -> Result<Vec<RawRecord>, ApiError> {
        let query: Vec<(&str, &str)> = root_ids.iter().map(|r| ("rids", r.as_str())).collect();
        let response = self
            .client
            .get(self.url("/documents"))
            .query(&query)
            .send()
            .await?;
        let response = Self::check(response, "bulk").await?;
        Ok(response.json().await?)
    }

    async fn link_document(&self, id: Uuid, parent_id: Uuid) -> Result<RawRecord, ApiError> {
        let response = self
            .client
            .put(self.url(&format!("/documents/{id}/linkTo/{parent_id}")))
            .send()
            .await?;
        let response = Self::check(response, &id.to_string()).await?;
        Ok(response.json().await?)
    }
}
