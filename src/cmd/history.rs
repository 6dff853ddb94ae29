//! The `history` subcommand: list modification history rows, and undo one.
//!
//! Unlike `ocr`/`enrich`, this subcommand talks to a real, persistent SQLite
//! file by default (`--history-db`), so rows genuinely survive across
//! invocations — there is no equivalent persistence for documents themselves
//! (`SPEC_FULL.md` §6.3.1), so `history undo` asks the caller to re-supply
//! the document's current field values via `--document-*` flags rather than
//! fetching them from a DMS that doesn't exist here.

use clap::{Args, Subcommand};

use docscribe_core::history::HistoryStore;
use docscribe_core::prelude::*;

use super::common::DocumentOpts;

#[derive(Debug, Args)]
pub struct HistoryOpts {
    /// Path to the history SQLite database.
    #[clap(long, default_value = "history.db")]
    pub history_db: PathBuf,

    #[clap(subcommand)]
    pub subcmd: HistoryCmd,
}

#[derive(Debug, Subcommand)]
pub enum HistoryCmd {
    /// List modification history rows, newest first.
    List {
        #[clap(long, default_value_t = 1)]
        page: u32,
        #[clap(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Undo a single history row.
    Undo {
        /// The history row id to undo.
        id: i64,

        #[clap(flatten)]
        document: DocumentOpts,
    },
}

#[instrument(level = "debug", skip_all)]
pub async fn cmd_history(opts: &HistoryOpts) -> Result<()> {
    let history = HistoryStore::connect(&opts.history_db).await?;

    match &opts.subcmd {
        HistoryCmd::List { page, page_size } => {
            let rows = history.get_paginated(*page, *page_size).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        HistoryCmd::Undo { id, document } => {
            let row = history
                .get(*id)
                .await?
                .ok_or_else(|| anyhow!("no history row {id}"))?;
            let document = document.build().await?;
            let dms = super::common::seed_dms(&document).await?;
            docscribe_core::update::undo_history_row(&dms, &history, &document, &row).await?;

            let updated = {
                use docscribe_core::dms::DmsClient;
                dms.get_document(document.id).await?
            };
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
    }
    Ok(())
}
