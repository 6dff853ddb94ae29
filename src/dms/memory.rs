//! A fully working in-process `DmsClient`, used by the end-to-end tests and
//! the CLI's `--dms memory` local-demo mode.
//!
//! Grounded on `elevatelaw-prompt-scaler/src/drivers/echo.rs`'s `EchoDriver`:
//! a fake collaborator that exists purely so the rest of the pipeline can be
//! exercised without a live network dependency, here extended from "one
//! canned response" to a small stateful store behind `RwLock`-guarded maps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::model::{CustomField, Document, NamedEntity};
use crate::prelude::*;

use super::{
    CorrespondentRecord, DmsClient, DocumentType, DocumentUpdate, DownloadedImages, DownloadedPdf,
    TaskStatus, UploadMetadata,
};

struct UploadTask {
    status: TaskStatus,
}

/// An in-memory stand-in for a real DMS. Every operation is `async` to match
/// the trait, but none of them actually do I/O.
pub struct InMemoryDmsClient {
    documents: RwLock<HashMap<i64, Document>>,
    tags: RwLock<HashMap<String, i64>>,
    correspondents: RwLock<HashMap<String, i64>>,
    document_types: RwLock<HashMap<String, i64>>,
    custom_fields: RwLock<Vec<CustomField>>,
    tasks: RwLock<HashMap<String, UploadTask>>,
    next_id: AtomicI64,
}

impl Default for InMemoryDmsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDmsClient {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            tags: RwLock::new(HashMap::new()),
            correspondents: RwLock::new(HashMap::new()),
            document_types: RwLock::new(HashMap::new()),
            custom_fields: RwLock::new(Vec::new()),
            tasks: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Seed a document directly, for test setup.
    pub async fn insert_document(&self, document: Document) {
        self.documents.write().await.insert(document.id, document);
    }

    pub async fn insert_custom_field(&self, field: CustomField) {
        self.custom_fields.write().await.push(field);
    }

    /// Seed a document type directly, for test setup. Unlike tags and
    /// correspondents, the trait has no `create_document_type` operation
    /// (document types are DMS-managed taxonomy, never auto-created by the
    /// core), so this is the only way to make one visible to
    /// `get_all_document_types`.
    pub async fn insert_document_type(&self, name: &str) -> i64 {
        let mut document_types = self.document_types.write().await;
        if let Some(&id) = document_types.get(name) {
            return id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        document_types.insert(name.to_string(), id);
        id
    }

    fn next_task_id(&self) -> String {
        format!("task-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl DmsClient for InMemoryDmsClient {
    async fn get_documents_by_tags(&self, tags: &[String], page_size: usize) -> Result<Vec<Document>> {
        let documents = self.documents.read().await;
        let wanted: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        let mut matched: Vec<Document> = documents
            .values()
            .filter(|doc| {
                wanted
                    .iter()
                    .all(|tag| doc.tags.iter().any(|t| t.to_lowercase() == *tag))
            })
            .cloned()
            .collect();
        matched.sort_by_key(|doc| doc.id);
        matched.truncate(page_size);
        Ok(matched)
    }

    async fn get_document(&self, id: i64) -> Result<Document> {
        self.documents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("no such document {id}"))
    }

    async fn get_all_tags(&self) -> Result<HashMap<String, i64>> {
        Ok(self.tags.read().await.clone())
    }

    async fn get_all_correspondents(&self) -> Result<HashMap<String, i64>> {
        Ok(self.correspondents.read().await.clone())
    }

    async fn get_all_document_types(&self) -> Result<Vec<DocumentType>> {
        Ok(self
            .document_types
            .read()
            .await
            .iter()
            .map(|(name, &id)| NamedEntity {
                id,
                name: name.clone(),
            })
            .collect())
    }

    async fn get_custom_fields(&self) -> Result<Vec<CustomField>> {
        Ok(self.custom_fields.read().await.clone())
    }

    async fn create_tag(&self, name: &str) -> Result<i64> {
        let mut tags = self.tags.write().await;
        if let Some(&id) = tags.get(name) {
            return Ok(id);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tags.insert(name.to_string(), id);
        Ok(id)
    }

    async fn create_or_get_correspondent(&self, record: &CorrespondentRecord) -> Result<i64> {
        let mut correspondents = self.correspondents.write().await;
        if let Some(&id) = correspondents.get(&record.name) {
            return Ok(id);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        correspondents.insert(record.name.clone(), id);
        Ok(id)
    }

    async fn download_as_images(&self, id: i64, page_limit: usize) -> Result<DownloadedImages> {
        let _ = self.get_document(id).await?;
        let _ = page_limit;
        Ok(DownloadedImages {
            paths: Vec::new(),
            total_pages: 0,
        })
    }

    async fn download_as_pdf(&self, id: i64, page_limit: usize, _split: bool) -> Result<DownloadedPdf> {
        let _ = self.get_document(id).await?;
        let _ = page_limit;
        Ok(DownloadedPdf {
            paths: Vec::new(),
            bytes: Vec::new(),
            total_pages: 0,
        })
    }

    async fn upload_document(&self, bytes: &[u8], filename: &str, metadata: &UploadMetadata) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let document = Document {
            id,
            title: metadata.title.clone(),
            content: String::new(),
            tags: Vec::new(),
            correspondent: None,
            document_type: None,
            created_date: metadata.created_date,
            original_file_name: filename.to_string(),
            custom_fields: Vec::new(),
        };
        self.documents.write().await.insert(id, document);

        let task_id = self.next_task_id();
        self.tasks.write().await.insert(
            task_id.clone(),
            UploadTask {
                status: TaskStatus::Success,
            },
        );
        let _ = bytes;
        Ok(task_id)
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|task| task.status)
            .ok_or_else(|| anyhow!("no such task {task_id}"))
    }

    async fn delete_document(&self, id: i64) -> Result<()> {
        self.documents
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("no such document {id}"))
    }

    async fn patch_document(&self, update: &DocumentUpdate) -> Result<()> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(&update.document_id)
            .ok_or_else(|| anyhow!("no such document {}", update.document_id))?;

        if let Some(title) = &update.title {
            document.title = title.chars().take(128).collect();
        }
        if let Some(tags) = &update.tags {
            document.tags = tags.clone();
        }
        if let Some(correspondent) = &update.correspondent {
            document.correspondent = Some(correspondent.clone());
        }
        if let Some(document_type) = &update.document_type {
            document.document_type = Some(document_type.clone());
        }
        if let Some(created_date) = update.created_date {
            document.created_date = Some(created_date);
        }
        if let Some(custom_fields) = &update.custom_fields {
            document.custom_fields = custom_fields.clone();
        }
        if let Some(content) = &update.content {
            document.content = content.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document(id: i64) -> Document {
        Document {
            id,
            title: "Sample".to_string(),
            content: "hello world".to_string(),
            tags: vec!["invoice".to_string()],
            correspondent: None,
            document_type: None,
            created_date: None::<NaiveDate>,
            original_file_name: "sample.pdf".to_string(),
            custom_fields: Vec::new(),
        }
    }

    #[tokio::test]
    async fn filters_documents_by_tag_case_insensitively() {
        let client = InMemoryDmsClient::new();
        client.insert_document(sample_document(1)).await;
        let found = client
            .get_documents_by_tags(&["INVOICE".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
    }

    #[tokio::test]
    async fn patch_document_updates_only_provided_fields() {
        let client = InMemoryDmsClient::new();
        client.insert_document(sample_document(1)).await;
        client
            .patch_document(&DocumentUpdate {
                document_id: 1,
                title: Some("Renamed".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let document = client.get_document(1).await.unwrap();
        assert_eq!(document.title, "Renamed");
        assert_eq!(document.tags, vec!["invoice".to_string()]);
    }

    #[tokio::test]
    async fn patch_document_replaces_content() {
        let client = InMemoryDmsClient::new();
        client.insert_document(sample_document(1)).await;
        client
            .patch_document(&DocumentUpdate {
                document_id: 1,
                content: Some("ocred text".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let document = client.get_document(1).await.unwrap();
        assert_eq!(document.content, "ocred text");
    }

    #[tokio::test]
    async fn create_tag_is_idempotent() {
        let client = InMemoryDmsClient::new();
        let id1 = client.create_tag("urgent").await.unwrap();
        let id2 = client.create_tag("urgent").await.unwrap();
        assert_eq!(id1, id2);
    }
}
