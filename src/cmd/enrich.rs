//! The `enrich` subcommand: generate (and optionally apply) AI suggestions
//! for a single document described on the command line.

use chrono::NaiveDate;
use clap::Args;

use docscribe_core::history::HistoryStore;
use docscribe_core::model::AspectFlags;
use docscribe_core::prelude::*;
use docscribe_core::suggest::aspects::AspectContext;
use docscribe_core::suggest::engine::generate_batch;

use super::common::{BackendOpts, DocumentOpts};

#[derive(Debug, Args)]
pub struct EnrichOpts {
    #[clap(flatten)]
    pub document: DocumentOpts,

    #[clap(flatten)]
    pub backend: BackendOpts,

    /// Directory prompt templates are loaded from (and seeded into, if
    /// missing).
    #[clap(long, default_value = "prompts")]
    pub prompts_dir: PathBuf,

    /// Suggest a title. Suggests every aspect by default if no `--generate-*`
    /// flag is passed.
    #[clap(long)]
    pub generate_title: bool,
    #[clap(long)]
    pub generate_tags: bool,
    #[clap(long)]
    pub generate_correspondent: bool,
    #[clap(long)]
    pub generate_document_type: bool,
    #[clap(long)]
    pub generate_created_date: bool,
    #[clap(long)]
    pub generate_custom_fields: bool,

    /// Tags available for the engine to choose from (besides the document's
    /// own tags). May be repeated.
    #[clap(long = "available-tag")]
    pub available_tags: Vec<String>,

    /// Correspondents available for the engine to choose from. May be
    /// repeated.
    #[clap(long = "available-correspondent")]
    pub available_correspondents: Vec<String>,

    /// Document types available for the engine to choose from. May be
    /// repeated.
    #[clap(long = "available-document-type")]
    pub available_document_types: Vec<String>,

    /// The document's language, for the prompt context.
    #[clap(long, default_value = "English")]
    pub language: String,

    /// Token budget passed to the suggestion engine's content-truncation
    /// logic. `0` means unlimited.
    #[clap(long, default_value_t = 0)]
    pub token_budget: usize,

    /// Apply the suggestion to the (freshly seeded) document and print the
    /// result instead of just the raw suggestion.
    #[clap(long)]
    pub apply: bool,
}

impl EnrichOpts {
    fn flags(&self) -> AspectFlags {
        let any_explicit = self.generate_title
            || self.generate_tags
            || self.generate_correspondent
            || self.generate_document_type
            || self.generate_created_date
            || self.generate_custom_fields;
        if any_explicit {
            AspectFlags {
                generate_title: self.generate_title,
                generate_tags: self.generate_tags,
                generate_correspondent: self.generate_correspondent,
                generate_document_type: self.generate_document_type,
                generate_created_date: self.generate_created_date,
                generate_custom_fields: self.generate_custom_fields,
                is_auto_processing: false,
            }
        } else {
            AspectFlags {
                generate_title: true,
                generate_tags: true,
                generate_correspondent: true,
                generate_document_type: true,
                generate_created_date: true,
                generate_custom_fields: true,
                is_auto_processing: false,
            }
        }
    }
}

#[instrument(level = "debug", skip_all)]
pub async fn cmd_enrich(opts: &EnrichOpts) -> Result<()> {
    let document = opts.document.build().await?;
    let dms = super::common::seed_dms(&document).await?;

    let templates = docscribe_core::config::load_templates(&opts.prompts_dir).await?;
    let llm = opts.backend.build_llm();

    let today: NaiveDate = chrono::Utc::now().date_naive();
    let context = AspectContext {
        language: opts.language.clone(),
        title: document.title.clone(),
        original_tags: document.tags.clone(),
        available_tags: opts.available_tags.clone(),
        available_correspondents: opts.available_correspondents.clone(),
        available_document_types: opts.available_document_types.clone(),
        today,
        created_date: document.created_date,
        document_type: document.document_type.clone(),
        custom_fields: Vec::new(),
    };

    let documents = vec![(document.id, context, document.content.clone())];
    let suggestions = generate_batch(&documents, opts.flags(), &templates, opts.token_budget, llm.as_ref()).await?;
    let suggestion = suggestions
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("suggestion engine returned no result"))?;

    if !opts.apply {
        println!("{}", serde_json::to_string_pretty(&suggestion)?);
        return Ok(());
    }

    let history = HistoryStore::connect_in_memory().await?;
    docscribe_core::update::apply_suggestion(&dms, &history, &document, &suggestion, false).await?;

    let updated = {
        use docscribe_core::dms::DmsClient;
        dms.get_document(document.id).await?
    };
    println!("{}", serde_json::to_string_pretty(&updated)?);
    Ok(())
}
