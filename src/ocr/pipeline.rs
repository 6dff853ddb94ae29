//! The OCR pipeline: page acquisition, sequential backend dispatch, hOCR
//! aggregation, and searchable-PDF assembly (`SPEC_FULL.md` §4.1).
//!
//! Grounded on `elevatelaw-prompt-scaler/src/queues/ocr/mod.rs`'s
//! `ocr_file_inner` (page iteration, per-page error accumulation, status
//! derivation), adapted from its buffered-concurrent page dispatch to the
//! strictly sequential dispatch §4.1 requires, since the assembled text and
//! hOCR must preserve page order and the teacher's engines don't carry
//! per-page geometry the way this pipeline's backends do.

use std::fmt;

use lopdf::Document as PdfDocument;
use lopdf::Object;
use tokio_util::sync::CancellationToken;

use crate::dms::{DmsClient, UploadMetadata};
use crate::error::CoreError;
use crate::history::HistoryStore;
use crate::model::{OcrPageResult, ProcessedDocument};
use crate::ocr::backend::{OcrBackend, OcrPageInput};
use crate::ocr::cache::PageCache;
use crate::ocr::hocr;
use crate::ocr::page_source::{self, ProcessMode, SourcePage};
use crate::prelude::*;

/// How many times, and at what interval, to poll the upload task when
/// `replace_original` is set (§4.1).
const REPLACE_POLL_ATTEMPTS: u32 = 12;
const REPLACE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Options controlling one pipeline run. Mirrors §4.1's enumerated options.
#[derive(Debug, Clone)]
pub struct OcrOptions {
    pub upload_pdf: bool,
    pub replace_original: bool,
    pub copy_metadata: bool,
    /// `0` means "no limit".
    pub limit_pages: usize,
    pub process_mode: ProcessMode,
    pub pdf_skip_existing_ocr: bool,
}

impl OcrOptions {
    fn validate(&self) -> Result<()> {
        if self.replace_original && !self.upload_pdf {
            return Err(CoreError::InvalidOptions(
                "replace_original requires upload_pdf".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// Carries the partial result alongside the cancellation error, per §4.1:
/// "ctx cancellation at any point causes the pipeline to return partial
/// results along with the cancellation error."
#[derive(Debug)]
pub struct Cancelled {
    pub partial: ProcessedDocument,
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OCR cancelled after {} of {} pages",
            self.partial.processed_pages, self.partial.total_pages
        )
    }
}

impl std::error::Error for Cancelled {}

/// Everything the pipeline needs that isn't an argument to `run`: the DMS
/// client, the OCR backend, the history store, and the cache root.
pub struct Pipeline<'a, B: OcrBackend> {
    pub dms: &'a dyn DmsClient,
    pub backend: &'a B,
    pub history: &'a HistoryStore,
    pub cache_root: &'a Path,
    /// The name of the "OCR complete" tag, auto-created on first use.
    pub ocr_complete_tag: &'a str,
}

impl<'a, B: OcrBackend> Pipeline<'a, B> {
    /// Run the pipeline for `document_id`. `cancel`, if given, is checked at
    /// page boundaries; on trip, the pipeline returns partial results
    /// alongside the cancellation error. `progress`, if given, is called with
    /// `(pages_done, total_pages)` after each page, for a job's `pagesDone`.
    #[instrument(level = "debug", skip(self, cancel, progress), fields(document_id))]
    pub async fn run(
        &self,
        document_id: i64,
        options: &OcrOptions,
        cancel: Option<&CancellationToken>,
        progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> Result<ProcessedDocument> {
        options.validate()?;

        let document = self.dms.get_document(document_id).await.map_err(CoreError::DmsError)?;

        if self.ocr_complete_tag_present(&document) {
            debug!(document_id, "OCR complete tag present, short-circuiting");
            return Ok(ProcessedDocument {
                text: document.content,
                ..Default::default()
            });
        }

        let downloaded = self
            .dms
            .download_as_pdf(document_id, options.limit_pages, false)
            .await
            .map_err(CoreError::DmsError)?;

        if options.pdf_skip_existing_ocr
            && matches!(options.process_mode, ProcessMode::Pdf | ProcessMode::WholePdf)
            && pdf_has_existing_text_layer(&downloaded.bytes)
        {
            debug!(document_id, "existing text layer detected, short-circuiting");
            return Ok(ProcessedDocument {
                text: document.content,
                ..Default::default()
            });
        }

        let tmp_pdf = tempfile::NamedTempFile::new().context("failed to create temp PDF file")?;
        tokio::fs::write(tmp_pdf.path(), &downloaded.bytes)
            .await
            .context("failed to stage downloaded PDF")?;

        let effective_pages = if options.limit_pages > 0 {
            downloaded.total_pages.min(options.limit_pages)
        } else {
            downloaded.total_pages
        };

        let cache = PageCache::new(self.cache_root, document_id);
        let pages = if cache.is_complete(effective_pages).await {
            cache.load(effective_pages).await.context("CacheIOError: failed to load cached pages")?
        } else {
            cache.clear().await.context("CacheIOError: failed to clear stale cache")?;
            let pages = page_source::acquire_pages(tmp_pdf.path(), options.process_mode, options.limit_pages)
                .await
                .context("RendererError: failed to acquire pages")?;
            cache
                .store(&pages)
                .await
                .context("CacheIOError: failed to store acquired pages")?;
            pages
        };

        let mut processed_document = self
            .dispatch_pages(document_id, &pages, options, cancel, progress)
            .await?;
        processed_document.total_pages = downloaded.total_pages;

        if options.upload_pdf
            && processed_document.processed_pages == processed_document.total_pages
            && processed_document.total_pages > 0
        {
            if let Some(hocr_doc) = &processed_document.hocr {
                let pdf_bytes = crate::ocr::pdf_assemble::assemble(options.process_mode, &pages, hocr_doc)
                    .context("failed to assemble searchable PDF")?;
                processed_document.pdf = Some(pdf_bytes.clone());
                self.upload_and_maybe_replace(document_id, &document, options, pdf_bytes)
                    .await?;
            }
        }

        Ok(processed_document)
    }

    fn ocr_complete_tag_present(&self, document: &crate::model::Document) -> bool {
        document
            .tags
            .iter()
            .any(|t| t.eq_ignore_ascii_case(self.ocr_complete_tag))
    }

    /// Process every page sequentially, accumulating text and (if the
    /// backend is hOCR-capable) geometry.
    async fn dispatch_pages(
        &self,
        document_id: i64,
        pages: &[SourcePage],
        options: &OcrOptions,
        cancel: Option<&CancellationToken>,
        progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> Result<ProcessedDocument> {
        let hocr_capable = self.backend.is_hocr_capable();
        let mut texts = Vec::with_capacity(pages.len());
        let mut hocr_pages = Vec::with_capacity(pages.len());
        let store_per_page = matches!(options.process_mode, ProcessMode::Image);

        for (index, page) in pages.iter().enumerate() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(Cancelled {
                    partial: ProcessedDocument {
                        text: texts.join("\n\n"),
                        hocr: if hocr_capable && !hocr_pages.is_empty() {
                            Some(hocr::Document { pages: hocr_pages })
                        } else {
                            None
                        },
                        hocr_html: None,
                        pdf: None,
                        processed_pages: index,
                        total_pages: pages.len(),
                    },
                }
                .into());
            }

            let page_number = match options.process_mode {
                ProcessMode::WholePdf => 0,
                _ => index + 1,
            };
            let input = OcrPageInput {
                page_number,
                mime_type: page.mime_type.clone(),
                data: page.data.clone(),
            };
            let result = self
                .backend
                .process_image(input)
                .await
                .map_err(|source| CoreError::BackendError { page: page_number, source })?;

            if store_per_page {
                self.history
                    .store_page_result(&OcrPageResult {
                        document_id,
                        page_index: index,
                        text: result.text.clone(),
                        limit_hit: result.limit_hit,
                        generation_info: result.generation_info.clone(),
                    })
                    .await?;
            }

            texts.push(result.text);
            if let Some(hocr_page) = result.hocr_page {
                hocr_pages.push(hocr_page);
            }
            if let Some(progress) = progress {
                progress(index + 1, pages.len());
            }
        }

        let hocr_doc = if hocr_capable && !hocr_pages.is_empty() {
            Some(hocr::Document { pages: hocr_pages })
        } else {
            None
        };
        let hocr_html = hocr_doc.as_ref().map(hocr::Document::to_html);

        Ok(ProcessedDocument {
            text: texts.join("\n\n"),
            hocr: hocr_doc,
            hocr_html,
            pdf: None,
            processed_pages: pages.len(),
            total_pages: pages.len(),
        })
    }

    async fn upload_and_maybe_replace(
        &self,
        document_id: i64,
        original: &crate::model::Document,
        options: &OcrOptions,
        pdf_bytes: Vec<u8>,
    ) -> Result<()> {
        let mut tag_ids = Vec::new();
        if options.copy_metadata {
            let all_tags = self.dms.get_all_tags().await.map_err(CoreError::DmsError)?;
            for tag in &original.tags {
                if let Some(&id) = all_tags.get(tag) {
                    tag_ids.push(id);
                }
            }
        }
        let ocr_complete_id = self
            .dms
            .create_tag(self.ocr_complete_tag)
            .await
            .map_err(CoreError::DmsError)?;
        tag_ids.push(ocr_complete_id);

        let correspondent_id = if options.copy_metadata {
            match &original.correspondent {
                Some(name) => Some(
                    self.dms
                        .create_or_get_correspondent(&crate::dms::CorrespondentRecord { name: name.clone() })
                        .await
                        .map_err(CoreError::DmsError)?,
                ),
                None => None,
            }
        } else {
            None
        };

        let metadata = UploadMetadata {
            title: original.title.clone(),
            tag_ids,
            correspondent_id,
            created_date: if options.copy_metadata {
                original.created_date
            } else {
                None
            },
        };

        let filename = format!("{}.pdf", original.title);
        let task_id = self
            .dms
            .upload_document(&pdf_bytes, &filename, &metadata)
            .await
            .map_err(CoreError::DmsError)?;

        if !options.replace_original {
            return Ok(());
        }

        for _ in 0..REPLACE_POLL_ATTEMPTS {
            match self.dms.get_task_status(&task_id).await.map_err(CoreError::DmsError)? {
                crate::dms::TaskStatus::Success => {
                    self.dms
                        .delete_document(document_id)
                        .await
                        .map_err(CoreError::DmsError)?;
                    return Ok(());
                }
                crate::dms::TaskStatus::Failure => {
                    return Err(CoreError::DeletionBlocked { task_id }.into());
                }
                crate::dms::TaskStatus::Pending => {
                    tokio::time::sleep(REPLACE_POLL_INTERVAL).await;
                }
            }
        }
        Err(CoreError::DeletionBlocked { task_id }.into())
    }
}

/// §4.1's skip-rule check: does `bytes` already contain a text layer? A PDF
/// page's content stream showing text via `Tj`/`TJ` counts as "has text".
fn pdf_has_existing_text_layer(bytes: &[u8]) -> bool {
    let Ok(document) = PdfDocument::load_mem(bytes) else {
        return false;
    };
    for (_, page_id) in document.get_pages() {
        let Ok(page_dict) = document.get_dictionary(page_id) else {
            continue;
        };
        for content_id in crate::ocr::pdf_assemble::content_stream_ids(page_dict) {
            let Ok(stream) = document.get_object(content_id).and_then(Object::as_stream) else {
                continue;
            };
            let bytes = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            let Ok(content) = lopdf::content::Content::decode(&bytes) else {
                continue;
            };
            if content
                .operations
                .iter()
                .any(|op| op.operator == "Tj" || op.operator == "TJ")
            {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dms::memory::InMemoryDmsClient;
    use crate::model::Document;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
        hocr_capable: bool,
    }

    #[async_trait]
    impl OcrBackend for CountingBackend {
        async fn process_image(&self, input: OcrPageInput) -> Result<crate::model::OcrResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(crate::model::OcrResult {
                text: format!("page {}", input.page_number),
                hocr_page: if self.hocr_capable {
                    Some(hocr::Page {
                        width: 100,
                        height: 100,
                        dpi: 300,
                        lines: Vec::new(),
                    })
                } else {
                    None
                },
                limit_hit: false,
                generation_info: json!({}),
            })
        }

        fn is_hocr_capable(&self) -> bool {
            self.hocr_capable
        }
    }

    fn blank_single_page_pdf() -> Vec<u8> {
        let mut doc = PdfDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(lopdf::Stream::new(
            lopdf::dictionary! {},
            lopdf::content::Content { operations: vec![] }.encode().unwrap(),
        ));
        let page_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            lopdf::Object::Dictionary(lopdf::dictionary! {
                "Type" => "Pages",
                "Kids" => vec![lopdf::Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(lopdf::dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn sample_document(id: i64) -> Document {
        Document {
            id,
            title: "Invoice".to_string(),
            content: "already extracted".to_string(),
            tags: Vec::new(),
            correspondent: None,
            document_type: None,
            created_date: None,
            original_file_name: "invoice.pdf".to_string(),
            custom_fields: Vec::new(),
        }
    }

    #[test]
    fn validate_rejects_replace_without_upload() {
        let opts = OcrOptions {
            upload_pdf: false,
            replace_original: true,
            copy_metadata: false,
            limit_pages: 0,
            process_mode: ProcessMode::Image,
            pdf_skip_existing_ocr: false,
        };
        let err = opts.validate().unwrap_err();
        assert!(err.downcast_ref::<CoreError>().is_some());
    }

    #[test]
    fn blank_pdf_has_no_text_layer() {
        assert!(!pdf_has_existing_text_layer(&blank_single_page_pdf()));
    }

    #[tokio::test]
    async fn short_circuits_when_ocr_complete_tag_present() {
        let dms = InMemoryDmsClient::new();
        let mut document = sample_document(1);
        document.tags.push("OCR-complete".to_string());
        dms.insert_document(document).await;
        let history = HistoryStore::connect_in_memory().await.unwrap();
        let backend = CountingBackend {
            calls: AtomicUsize::new(0),
            hocr_capable: false,
        };
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = Pipeline {
            dms: &dms,
            backend: &backend,
            history: &history,
            cache_root: tmp.path(),
            ocr_complete_tag: "OCR-complete",
        };
        let options = OcrOptions {
            upload_pdf: false,
            replace_original: false,
            copy_metadata: false,
            limit_pages: 0,
            process_mode: ProcessMode::WholePdf,
            pdf_skip_existing_ocr: false,
        };
        let result = pipeline.run(1, &options, None, None).await.unwrap();
        assert_eq!(result.text, "already extracted");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
