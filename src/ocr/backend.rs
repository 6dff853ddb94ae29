//! The OCR backend contract (`SPEC_FULL.md` §6.4) and its dispatch enum.
//!
//! Per §9's design note, backends are modelled as a tagged enum rather than
//! trait-object inheritance. Each backend's `process_image` call returns an
//! `OcrResult` whose `hocr_page` is populated directly when the backend can
//! produce geometry; there is no separate stateful "reset/accumulate" API —
//! the pipeline (`ocr::pipeline`) is what assembles the per-page `hocr_page`s
//! into a whole-document `hocr::Document` after the last page, which is where
//! §4.1's "hOCR aggregation" step actually happens.

use crate::model::OcrResult;
use crate::prelude::*;

/// One page's raw bytes, handed to a backend.
#[derive(Debug, Clone)]
pub struct OcrPageInput {
    /// Page number as seen by the backend; `0` means "whole document" for
    /// `whole_pdf` mode.
    pub page_number: usize,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// `processImage(ctx, bytes, pageNumber) -> OCRResult` from §6.4.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn process_image(&self, input: OcrPageInput) -> Result<OcrResult>;

    /// Whether this backend can populate `OcrResult::hocr_page`. Probed at
    /// runtime rather than encoded as a separate trait, since both concrete
    /// backends either always or never produce geometry.
    fn is_hocr_capable(&self) -> bool {
        false
    }
}

/// The tagged dispatch enum over concrete backend implementations.
pub enum OcrBackendKind {
    VisionLlm(crate::ocr::backends::vision_llm::VisionLlmBackend),
    Textract(crate::ocr::backends::textract::TextractBackend),
}

#[async_trait]
impl OcrBackend for OcrBackendKind {
    async fn process_image(&self, input: OcrPageInput) -> Result<OcrResult> {
        match self {
            OcrBackendKind::VisionLlm(b) => b.process_image(input).await,
            OcrBackendKind::Textract(b) => b.process_image(input).await,
        }
    }

    fn is_hocr_capable(&self) -> bool {
        match self {
            OcrBackendKind::VisionLlm(b) => b.is_hocr_capable(),
            OcrBackendKind::Textract(b) => b.is_hocr_capable(),
        }
    }
}
