use std::str::FromStr;

use clap::{Parser, Subcommand};
use docscribe_core::prelude::*;
use docscribe_core::ui::Ui;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

mod cmd;

/// AI-driven OCR and metadata enrichment for documents held by an external
/// document management system.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OPENAI_API_BASE (optional): Override the server URL.
  - OPENAI_API_KEY: The OpenAI key to use.

  Standard AWS environment variables and credential files
  are used for AWS-based tools like Textract.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Run the tag-driven background loop until interrupted.
    Serve(cmd::serve::ServeOpts),
    /// Run the OCR pipeline against a single document.
    Ocr(cmd::ocr::OcrOpts),
    /// Generate (and optionally apply) AI suggestions for a single document.
    Enrich(cmd::enrich::EnrichOpts),
    /// Submit a document to the asynchronous OCR job queue and wait for it.
    Jobs(cmd::jobs::JobsOpts),
    /// List or undo modification history rows.
    History(cmd::history::HistoryOpts),
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive = Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Serve(opts) => cmd::serve::cmd_serve(opts).await,
        Cmd::Ocr(opts) => cmd::ocr::cmd_ocr(opts, &ui).await,
        Cmd::Enrich(opts) => cmd::enrich::cmd_enrich(opts).await,
        Cmd::Jobs(opts) => cmd::jobs::cmd_jobs(opts).await,
        Cmd::History(opts) => cmd::history::cmd_history(opts).await,
    }
}
