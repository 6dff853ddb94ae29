//! The `jobs` subcommand: submit a document to the asynchronous OCR job
//! queue and wait for it to finish.
//!
//! `jobs::JobQueue` is an in-process table (`SPEC_FULL.md` §4.3): nothing is
//! persisted across invocations, so there is no standalone `jobs list` /
//! `jobs status` / `jobs cancel` here — each of those needs a queue that
//! outlives the command that created it, which only `serve` provides. This
//! subcommand submits one job against a freshly built queue and polls it to
//! completion within the same process, which is the only scenario a one-shot
//! CLI invocation can meaningfully drive.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use docscribe_core::history::HistoryStore;
use docscribe_core::jobs::JobQueue;
use docscribe_core::ocr::pipeline::OcrOptions;
use docscribe_core::prelude::*;

use super::common::{BackendOpts, DocumentOpts};
use super::ocr::ProcessModeArg;

#[derive(Debug, Args)]
pub struct JobsOpts {
    #[clap(flatten)]
    pub document: DocumentOpts,

    #[clap(flatten)]
    pub backend: BackendOpts,

    #[clap(long, default_value = "prompts")]
    pub prompts_dir: PathBuf,

    #[clap(long, default_value = "cache")]
    pub cache_dir: PathBuf,

    #[clap(long, default_value = "OCR-complete")]
    pub ocr_complete_tag: String,

    #[clap(long, value_enum, default_value = "whole-pdf")]
    pub process_mode: ProcessModeArg,

    /// How long to wait for the job to reach a terminal state before giving
    /// up and printing whatever status is current.
    #[clap(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[instrument(level = "debug", skip_all)]
pub async fn cmd_jobs(opts: &JobsOpts) -> Result<()> {
    let document = opts.document.build().await?;
    let dms = Arc::new(super::common::seed_dms(&document).await?);

    let templates = docscribe_core::config::load_templates(&opts.prompts_dir).await?;
    let ocr_prompt = templates
        .get("ocr")
        .cloned()
        .ok_or_else(|| anyhow!("no `ocr` prompt template loaded"))?;
    let backend = Arc::new(opts.backend.build_ocr(ocr_prompt).await?);

    let history = HistoryStore::connect_in_memory().await?;

    let queue = JobQueue::new(
        1,
        dms,
        backend,
        history,
        Arc::from(opts.cache_dir.as_path()),
        Arc::from(opts.ocr_complete_tag.as_str()),
        OcrOptions {
            upload_pdf: false,
            replace_original: false,
            copy_metadata: false,
            limit_pages: 0,
            process_mode: opts.process_mode.into(),
            pdf_skip_existing_ocr: false,
        },
    );

    let job_id = queue.submit(document.id).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(opts.timeout_secs);
    let mut job = queue
        .status(job_id)
        .await
        .ok_or_else(|| anyhow!("job {job_id} vanished immediately after submission"))?;
    while !job.status.is_terminal() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
        job = queue.status(job_id).await.unwrap_or(job);
    }

    if !job.status.is_terminal() {
        warn!(%job_id, "job did not reach a terminal state within the timeout");
    }
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}
