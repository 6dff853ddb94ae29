//! Flags and helpers shared by the `ocr`, `enrich`, and `history` subcommands.
//!
//! There is no production DMS client (`SPEC_FULL.md` §6.3.1 explicitly scopes
//! that out), so every subcommand here describes the one document it's
//! acting on directly on the command line, seeds a fresh
//! `dms::memory::InMemoryDmsClient` with it, and runs the core against that.
//! This mirrors the teacher's own `cmd/chat.rs`: a single-shot CLI that reads
//! its input, runs the core, and prints the result, rather than standing up
//! a long-lived service.

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use docscribe_core::dms::memory::InMemoryDmsClient;
use docscribe_core::llm::openai::{ModelInfo, OpenAiBackend};
use docscribe_core::llm::rate_limited::RateLimitedLlm;
use docscribe_core::llm::{fake::FakeLlmBackend, LlmBackend};
use docscribe_core::model::Document;
use docscribe_core::ocr::backend::OcrBackendKind;
use docscribe_core::ocr::backends::{textract::TextractBackend, vision_llm::VisionLlmBackend};
use docscribe_core::prelude::*;
use docscribe_core::prompt::ChatPrompt;
use docscribe_core::rate_limit::{RateLimit, RateLimitPeriod};

/// Flags describing the one document a one-shot subcommand operates on.
#[derive(Debug, Args)]
pub struct DocumentOpts {
    /// Document id to report in output. Has no effect on lookup, since the
    /// document is always freshly seeded for this invocation.
    #[clap(long, default_value_t = 1)]
    pub document_id: i64,

    /// The document's title.
    #[clap(long, default_value = "Untitled")]
    pub title: String,

    /// The document's text content. Mutually exclusive with `--content-file`.
    #[clap(long)]
    pub content: Option<String>,

    /// Read the document's text content from a file instead of `--content`.
    #[clap(long)]
    pub content_file: Option<PathBuf>,

    /// Tags already on the document. May be repeated.
    #[clap(long = "tag")]
    pub tags: Vec<String>,

    /// The document's current correspondent, if any.
    #[clap(long)]
    pub correspondent: Option<String>,

    /// The document's current document type, if any.
    #[clap(long)]
    pub document_type: Option<String>,

    /// The document's current created date (`YYYY-MM-DD`), if any.
    #[clap(long)]
    pub created_date: Option<NaiveDate>,

    /// The document's original filename, as the DMS would report it.
    #[clap(long, default_value = "document.pdf")]
    pub original_file_name: String,
}

impl DocumentOpts {
    pub async fn build(&self) -> Result<Document> {
        let content = match (&self.content, &self.content_file) {
            (Some(content), None) => content.clone(),
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {:?}", path.display()))?,
            (None, None) => String::new(),
            (Some(_), Some(_)) => {
                return Err(anyhow!("pass only one of --content or --content-file"));
            }
        };
        Ok(Document {
            id: self.document_id,
            title: self.title.clone(),
            content,
            tags: self.tags.clone(),
            correspondent: self.correspondent.clone(),
            document_type: self.document_type.clone(),
            created_date: self.created_date,
            original_file_name: self.original_file_name.clone(),
            custom_fields: Vec::new(),
        })
    }
}

/// Seed a fresh in-memory DMS with exactly one document, and register every
/// tag and correspondent it references so later lookups (`getAllTags`,
/// `getAllCorrespondents`, ...) see it.
pub async fn seed_dms(document: &Document) -> Result<InMemoryDmsClient> {
    use docscribe_core::dms::DmsClient;

    let dms = InMemoryDmsClient::new();
    for tag in &document.tags {
        dms.create_tag(tag).await?;
    }
    if let Some(correspondent) = &document.correspondent {
        dms.create_or_get_correspondent(&docscribe_core::dms::CorrespondentRecord {
            name: correspondent.clone(),
        })
        .await?;
    }
    if let Some(document_type) = &document.document_type {
        dms.insert_document_type(document_type).await;
    }
    dms.insert_document(document.clone()).await;
    Ok(dms)
}

/// Which LLM provider to talk to. `Fake` is the default so every subcommand
/// works out of the box without credentials; grounded on
/// `elevatelaw-prompt-scaler/src/drivers/mod.rs`'s own `--driver` choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LlmBackendChoice {
    Fake,
    OpenAi,
}

/// Which OCR backend to run pages through. `Fake` drives the same
/// vision-prompt path as `VisionLlm`, just against the echoing
/// [`FakeLlmBackend`], so `ocr`/`enrich` demos never require a model or AWS
/// credentials unless asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OcrBackendChoice {
    Fake,
    VisionLlm,
    Textract,
}

/// Flags selecting and configuring the LLM and OCR backends, shared by every
/// subcommand that runs the suggestion engine or the OCR pipeline.
#[derive(Debug, Args)]
pub struct BackendOpts {
    /// Which LLM provider to use for suggestions (and, if `--ocr-backend
    /// vision-llm`, for OCR transcription too).
    #[clap(long, value_enum, default_value_t = LlmBackendChoice::Fake)]
    pub llm_backend: LlmBackendChoice,

    /// Model name to request from the OpenAI-compatible endpoint.
    #[clap(long, default_value = "gpt-4o")]
    pub model: String,

    /// Set when `--model` is routed to Anthropic through a LiteLLM gateway,
    /// so the `store: false` workaround is suppressed.
    #[clap(long)]
    pub anthropic_via_litellm: bool,

    /// Cap LLM calls to `N/s` or `N/m` (e.g. `60/m`). Unset means unlimited.
    #[clap(long)]
    pub llm_rate_limit: Option<RateLimit>,

    /// Which backend to OCR pages with.
    #[clap(long, value_enum, default_value_t = OcrBackendChoice::Fake)]
    pub ocr_backend: OcrBackendChoice,

    /// Textract concurrency limit, also used as its default per-second rate
    /// limit when `--llm-rate-limit` isn't set.
    #[clap(long, default_value_t = 4)]
    pub textract_concurrency: usize,
}

impl BackendOpts {
    /// Build the LLM backend these flags describe, wrapped in
    /// [`RateLimitedLlm`] when `--llm-rate-limit` is set.
    pub fn build_llm(&self) -> Arc<dyn LlmBackend> {
        match self.llm_backend {
            LlmBackendChoice::Fake => Arc::new(FakeLlmBackend::new()),
            LlmBackendChoice::OpenAi => {
                let backend = OpenAiBackend::new(ModelInfo {
                    model: self.model.clone(),
                    is_anthropic: self.anthropic_via_litellm,
                });
                match &self.llm_rate_limit {
                    Some(rate_limit) => Arc::new(RateLimitedLlm::new(backend, rate_limit)),
                    None => Arc::new(backend),
                }
            }
        }
    }

    /// Build the OCR backend these flags describe. `ocr_prompt` is the
    /// rendered `ocr.toml` template, needed only by the vision-LLM path.
    pub async fn build_ocr(&self, ocr_prompt: ChatPrompt) -> Result<OcrBackendKind> {
        match self.ocr_backend {
            OcrBackendChoice::Fake => Ok(OcrBackendKind::VisionLlm(VisionLlmBackend::new(
                Arc::new(FakeLlmBackend::new()),
                ocr_prompt,
            ))),
            OcrBackendChoice::VisionLlm => Ok(OcrBackendKind::VisionLlm(VisionLlmBackend::new(
                self.build_llm(),
                ocr_prompt,
            ))),
            OcrBackendChoice::Textract => {
                let rate_limit = self
                    .llm_rate_limit
                    .clone()
                    .or_else(|| Some(RateLimit::new(self.textract_concurrency, RateLimitPeriod::Second)));
                let backend = TextractBackend::new(self.textract_concurrency, rate_limit).await?;
                Ok(OcrBackendKind::Textract(backend))
            }
        }
    }
}
