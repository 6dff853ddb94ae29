//! The document management system client contract (`SPEC_FULL.md` §6.3) and
//! its concrete in-memory fake.

pub mod memory;

use crate::model::{CustomField, Document, NamedEntity};
use crate::prelude::*;

/// A correspondent record as submitted by `createOrGetCorrespondent`; the
/// DMS auto-creates one if no existing correspondent matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrespondentRecord {
    pub name: String,
}

/// A document type, as returned by `getAllDocumentTypes`.
pub type DocumentType = NamedEntity;

/// The visible/invisible page sources handed back by `downloadAsImages`.
#[derive(Debug, Clone)]
pub struct DownloadedImages {
    pub paths: Vec<PathBuf>,
    pub total_pages: usize,
}

/// The visible/invisible page sources handed back by `downloadAsPDF`.
#[derive(Debug, Clone)]
pub struct DownloadedPdf {
    pub paths: Vec<PathBuf>,
    pub bytes: Vec<u8>,
    pub total_pages: usize,
}

/// Metadata attached to an uploaded document.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub title: String,
    pub tag_ids: Vec<i64>,
    pub correspondent_id: Option<i64>,
    pub created_date: Option<chrono::NaiveDate>,
}

/// The lifecycle states of a DMS-side async task (e.g. a document import).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Success,
    Failure,
}

/// A single field-scoped document update, applied by `update_documents`.
///
/// This mirrors `model::DocumentSuggestion` rather than reusing it directly,
/// since a DMS client only ever needs the fields that changed — the
/// field-by-field diff against history happens in `crate::update` before
/// this type is constructed.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub document_id: i64,
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub correspondent: Option<String>,
    pub document_type: Option<String>,
    pub created_date: Option<chrono::NaiveDate>,
    pub custom_fields: Option<Vec<crate::model::CustomFieldValue>>,
    /// Replaces the document's extracted text, as written back after OCR.
    pub content: Option<String>,
}

/// The DMS client contract consumed by the rest of the core, mirroring
/// `SPEC_FULL.md` §6.3's operations one-to-one.
#[async_trait]
pub trait DmsClient: Send + Sync {
    async fn get_documents_by_tags(&self, tags: &[String], page_size: usize) -> Result<Vec<Document>>;
    async fn get_document(&self, id: i64) -> Result<Document>;
    async fn get_all_tags(&self) -> Result<std::collections::HashMap<String, i64>>;
    async fn get_all_correspondents(&self) -> Result<std::collections::HashMap<String, i64>>;
    async fn get_all_document_types(&self) -> Result<Vec<DocumentType>>;
    async fn get_custom_fields(&self) -> Result<Vec<CustomField>>;

    async fn create_tag(&self, name: &str) -> Result<i64>;
    async fn create_or_get_correspondent(&self, record: &CorrespondentRecord) -> Result<i64>;

    async fn download_as_images(&self, id: i64, page_limit: usize) -> Result<DownloadedImages>;
    async fn download_as_pdf(&self, id: i64, page_limit: usize, split: bool) -> Result<DownloadedPdf>;

    async fn upload_document(&self, bytes: &[u8], filename: &str, metadata: &UploadMetadata) -> Result<String>;
    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus>;
    async fn delete_document(&self, id: i64) -> Result<()>;

    /// Apply one PATCH-style update to a document's fields. `crate::update`
    /// is responsible for splitting a suggestion into one or two calls to
    /// this method per §6.3's tag-emptying-call-ordering rule; this trait
    /// method itself just performs the single PATCH it's given.
    async fn patch_document(&self, update: &DocumentUpdate) -> Result<()>;
}
