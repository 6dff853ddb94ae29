//! The `ocr` subcommand: run the OCR pipeline against a single document
//! described on the command line.
//!
//! Since there's no production DMS client, this seeds an in-memory one from
//! `--document-*` flags before running `ocr::pipeline::Pipeline`. Because
//! `InMemoryDmsClient::download_as_pdf` never holds real page bytes, the
//! only way to see a non-trivial result out of this subcommand is to pass
//! `--tag` equal to `--ocr-complete-tag` along with `--content`, which
//! exercises the pipeline's short-circuit path; an actual page-by-page OCR
//! run needs a real DMS backing the pipeline.

use clap::Args;

use docscribe_core::history::HistoryStore;
use docscribe_core::ocr::pipeline::{OcrOptions, Pipeline};
use docscribe_core::ocr::ProcessMode;
use docscribe_core::prelude::*;
use docscribe_core::ui::{ProgressConfig, Ui};

use super::common::{BackendOpts, DocumentOpts};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ProcessModeArg {
    Image,
    Pdf,
    WholePdf,
}

impl From<ProcessModeArg> for ProcessMode {
    fn from(value: ProcessModeArg) -> Self {
        match value {
            ProcessModeArg::Image => ProcessMode::Image,
            ProcessModeArg::Pdf => ProcessMode::Pdf,
            ProcessModeArg::WholePdf => ProcessMode::WholePdf,
        }
    }
}

#[derive(Debug, Args)]
pub struct OcrOpts {
    #[clap(flatten)]
    pub document: DocumentOpts,

    #[clap(flatten)]
    pub backend: BackendOpts,

    /// Directory prompt templates are loaded from (and seeded into, if
    /// missing).
    #[clap(long, default_value = "prompts")]
    pub prompts_dir: PathBuf,

    /// Scratch directory for the page cache.
    #[clap(long, default_value = "cache")]
    pub cache_dir: PathBuf,

    /// The tag that marks a document as already fully OCRed.
    #[clap(long, default_value = "OCR-complete")]
    pub ocr_complete_tag: String,

    #[clap(long, value_enum, default_value = "whole-pdf")]
    pub process_mode: ProcessModeArg,

    /// Upload a reconstructed searchable PDF back to the DMS when OCR
    /// completes.
    #[clap(long)]
    pub upload_pdf: bool,

    /// Delete the original document once the uploaded replacement is
    /// confirmed. Requires `--upload-pdf`.
    #[clap(long)]
    pub replace_original: bool,

    /// Copy the original document's tags and correspondent onto the
    /// uploaded replacement.
    #[clap(long)]
    pub copy_metadata: bool,

    /// Stop after this many pages. `0` means no limit.
    #[clap(long, default_value_t = 0)]
    pub limit_pages: usize,

    /// Skip OCR entirely if the source PDF already carries a text layer.
    #[clap(long)]
    pub pdf_skip_existing_ocr: bool,
}

#[instrument(level = "debug", skip_all)]
pub async fn cmd_ocr(opts: &OcrOpts, ui: &Ui) -> Result<()> {
    let document = opts.document.build().await?;
    let dms = super::common::seed_dms(&document).await?;

    let templates = docscribe_core::config::load_templates(&opts.prompts_dir).await?;
    let ocr_prompt = templates
        .get("ocr")
        .cloned()
        .ok_or_else(|| anyhow!("no `ocr` prompt template loaded"))?;
    let backend = opts.backend.build_ocr(ocr_prompt).await?;

    let history = HistoryStore::connect_in_memory().await?;

    let pipeline = Pipeline {
        dms: &dms,
        backend: &backend,
        history: &history,
        cache_root: &opts.cache_dir,
        ocr_complete_tag: &opts.ocr_complete_tag,
    };

    let options = OcrOptions {
        upload_pdf: opts.upload_pdf,
        replace_original: opts.replace_original,
        copy_metadata: opts.copy_metadata,
        limit_pages: opts.limit_pages,
        process_mode: opts.process_mode.into(),
        pdf_skip_existing_ocr: opts.pdf_skip_existing_ocr,
    };

    let pb = ui.new_spinner(&ProgressConfig {
        emoji: "📄",
        msg: "OCR",
        done_msg: "OCR done",
    });
    let progress = |done: usize, total: usize| pb.set_message(format!("page {done}/{total}"));

    let result = pipeline.run(document.id, &options, None, Some(&progress)).await?;
    pb.finish();
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
