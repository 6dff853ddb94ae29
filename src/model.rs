//! Core data model shared across the OCR pipeline, the suggestion engine, the
//! job subsystem, and the history store. See `SPEC_FULL.md` §3.

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::prelude::*;

/// A document as seen by the core. Identity is the DMS-assigned integer id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub correspondent: Option<String>,
    pub document_type: Option<String>,
    pub created_date: Option<NaiveDate>,
    pub original_file_name: String,
    pub custom_fields: Vec<CustomFieldValue>,
}

/// A named entity with an integer id owned by the DMS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedEntity {
    pub id: i64,
    pub name: String,
}

/// The enumerated custom-field data types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CustomFieldType {
    String,
    Url,
    Date,
    Boolean,
    Integer,
    Float,
    Monetary,
    DocumentLink,
    Select,
}

/// A custom field definition, as returned by `getCustomFields`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomField {
    pub id: i64,
    pub name: String,
    pub data_type: CustomFieldType,
}

/// A custom field's polymorphic value, serialised as-is into the DMS update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomFieldValue {
    pub field_id: i64,
    pub value: Value,
}

/// The extracted result of OCRing a single page.
///
/// Invariant: `text` is never null (use an empty string for "nothing
/// extracted"). `hocr_page`, when present, describes the same page rendered
/// at the same DPI `text` was produced from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OcrResult {
    pub text: String,
    pub hocr_page: Option<crate::ocr::hocr::Page>,
    pub limit_hit: bool,
    pub generation_info: Value,
}

/// Aggregation of per-page `OcrResult`s into a whole-document result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProcessedDocument {
    /// Per-page text, joined by a blank line.
    pub text: String,
    /// The assembled hOCR document, if any backend page advertised geometry.
    pub hocr: Option<crate::ocr::hocr::Document>,
    /// `hocr` serialised to HTML, if `hocr` is present.
    pub hocr_html: Option<String>,
    /// A reconstructed searchable PDF, if PDF generation was requested and
    /// eligible (see `SPEC_FULL.md` §4.1, "Searchable-PDF assembly").
    pub pdf: Option<Vec<u8>>,
    /// How many of the document's true total pages were actually processed.
    pub processed_pages: usize,
    pub total_pages: usize,
}

/// The lifecycle states of an asynchronous OCR job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are absorbing: no further transitions are valid.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// An asynchronous OCR job, as exposed by `SPEC_FULL.md` §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub document_id: i64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pages_done: usize,
    pub total_pages: usize,
    /// Populated on `Completed`: the joined OCR text.
    pub result_text: Option<String>,
    /// Populated on `Failed`: the error message.
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(document_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_id,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            pages_done: 0,
            total_pages: 0,
            result_text: None,
            error_message: None,
        }
    }
}

/// A persisted per-page OCR result, keyed by `(document_id, page_index)`.
/// Overwritten on re-OCR.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcrPageResult {
    pub document_id: i64,
    pub page_index: usize,
    pub text: String,
    pub limit_hit: bool,
    pub generation_info: Value,
}

/// The set of fields a `ModificationHistory` row may record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HistoryField {
    Title,
    Tags,
    Content,
    CreatedDate,
    Correspondent,
    DocumentType,
}

impl HistoryField {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryField::Title => "title",
            HistoryField::Tags => "tags",
            HistoryField::Content => "content",
            HistoryField::CreatedDate => "created_date",
            HistoryField::Correspondent => "correspondent",
            HistoryField::DocumentType => "document_type",
        }
    }
}

/// An append-only modification history row. A row is written only when the
/// field actually changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModificationHistory {
    pub id: i64,
    pub document_id: i64,
    pub field: HistoryField,
    pub previous_value: String,
    pub new_value: String,
    pub undone: bool,
    pub created_at: DateTime<Utc>,
}

/// The custom-field write mode the DMS client is expected to honour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CustomFieldWriteMode {
    #[default]
    Append,
    Replace,
}

/// Enumerated settings consumed by the core. Persisted at `config/settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub custom_fields_enabled: bool,
    pub selected_custom_field_ids: Vec<i64>,
    pub custom_fields_write_mode: CustomFieldWriteMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            custom_fields_enabled: false,
            selected_custom_field_ids: Vec::new(),
            custom_fields_write_mode: CustomFieldWriteMode::default(),
        }
    }
}

/// The suggestion engine's output for one document: only the aspects that
/// were requested are `Some`; everything else is carried over unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DocumentSuggestion {
    pub document_id: i64,
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub correspondent: Option<String>,
    pub document_type: Option<String>,
    pub created_date: Option<NaiveDate>,
    pub custom_fields: Option<Vec<CustomFieldValue>>,
    /// Replaces the document's extracted text. Only ever set by the OCR
    /// write-back path and by undo of a `Content` history row.
    pub content: Option<String>,
    /// Always `{manual-review, auto-enrich}` per §4.2.
    pub remove_tags: Vec<String>,
    /// The configured completion marker, present only for auto-processing.
    pub add_tags: Vec<String>,
}

/// Which aspects to generate for a batch, plus whether this is an
/// autonomous (background-loop) run rather than a user-initiated one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AspectFlags {
    pub generate_title: bool,
    pub generate_tags: bool,
    pub generate_correspondent: bool,
    pub generate_document_type: bool,
    pub generate_created_date: bool,
    pub generate_custom_fields: bool,
    pub is_auto_processing: bool,
}

/// Well-known marker tags. See `SPEC_FULL.md` GLOSSARY.
pub mod markers {
    pub const MANUAL_REVIEW: &str = "manual-review";
    pub const AUTO_ENRICH: &str = "auto-enrich";
    pub const AUTO_OCR: &str = "auto-OCR";
    pub const OCR_COMPLETE: &str = "OCR-complete";
}
