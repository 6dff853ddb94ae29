//! The `serve` subcommand: run the tag-driven background loop until
//! interrupted.
//!
//! There is no production DMS client (`SPEC_FULL.md` §6.3.1), so this seeds
//! the in-memory one with a single document from `--document-*` flags,
//! tagged `auto-OCR`/`auto-enrich` so the loop has something to do, and then
//! runs `background::run` against it until `Ctrl-C`. A real deployment would
//! construct `BackgroundContext` the same way against a real `DmsClient`.

use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;

use docscribe_core::background::{self, BackgroundContext};
use docscribe_core::dms::DmsClient;
use docscribe_core::history::HistoryStore;
use docscribe_core::model::markers;
use docscribe_core::ocr::pipeline::OcrOptions;
use docscribe_core::prelude::*;

use super::common::{BackendOpts, DocumentOpts};
use super::ocr::ProcessModeArg;

#[derive(Debug, Args)]
pub struct ServeOpts {
    #[clap(flatten)]
    pub document: DocumentOpts,

    #[clap(flatten)]
    pub backend: BackendOpts,

    #[clap(long, default_value = "prompts")]
    pub prompts_dir: PathBuf,

    #[clap(long, default_value = "cache")]
    pub cache_dir: PathBuf,

    #[clap(long, default_value = "history.db")]
    pub history_db: PathBuf,

    #[clap(long, default_value = "settings.json")]
    pub settings_path: PathBuf,

    #[clap(long, default_value = "OCR-complete")]
    pub ocr_complete_tag: String,

    /// Tag appended to a document's `addTags` once auto-enrichment completes.
    #[clap(long)]
    pub enrich_completion_marker: Option<String>,

    #[clap(long, value_enum, default_value = "whole-pdf")]
    pub process_mode: ProcessModeArg,

    /// Disable the auto-OCR step, running auto-enrich only.
    #[clap(long)]
    pub no_ocr: bool,
}

#[instrument(level = "debug", skip_all)]
pub async fn cmd_serve(opts: &ServeOpts) -> Result<()> {
    let mut document = opts.document.build().await?;
    document.tags.push(markers::AUTO_OCR.to_string());
    document.tags.push(markers::AUTO_ENRICH.to_string());

    let dms: Arc<dyn DmsClient> = Arc::new(super::common::seed_dms(&document).await?);

    let templates = docscribe_core::config::load_templates(&opts.prompts_dir).await?;
    let ocr_prompt = templates
        .get("ocr")
        .cloned()
        .ok_or_else(|| anyhow!("no `ocr` prompt template loaded"))?;
    let backend = Arc::new(opts.backend.build_ocr(ocr_prompt).await?);
    let llm = opts.backend.build_llm();

    let history = HistoryStore::connect(&opts.history_db).await?;
    let settings = docscribe_core::config::load_settings(&opts.settings_path).await;

    let ctx = BackgroundContext {
        dms,
        backend,
        history,
        cache_root: Arc::from(opts.cache_dir.as_path()),
        llm,
        templates,
        token_budget: 0,
        settings,
        ocr_enabled: !opts.no_ocr,
        ocr_complete_tag: Arc::from(opts.ocr_complete_tag.as_str()),
        ocr_options: OcrOptions {
            upload_pdf: false,
            replace_original: false,
            copy_metadata: false,
            limit_pages: 0,
            process_mode: opts.process_mode.into(),
            pdf_skip_existing_ocr: false,
        },
        enrich_completion_marker: opts.enrich_completion_marker.clone(),
    };

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    info!("background loop started, press Ctrl-C to stop");
    tokio::select! {
        _ = background::run(ctx, loop_cancel) => {}
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            info!("shutdown requested, stopping");
        }
    }
    Ok(())
}
