//! OCR: page acquisition, backends, hOCR geometry, searchable-PDF assembly,
//! and the pipeline that sequences them over a whole document.

pub mod backend;
pub mod backends;
pub mod cache;
pub mod hocr;
pub mod page_source;
pub mod pdf_assemble;
pub mod pipeline;

pub use backend::{OcrBackend, OcrBackendKind, OcrPageInput};
pub use cache::PageCache;
pub use page_source::{ProcessMode, SourcePage, acquire_pages};
pub use pdf_assemble::assemble as assemble_searchable_pdf;
pub use pipeline::{Cancelled, OcrOptions, Pipeline};
