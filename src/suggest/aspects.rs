//! One aspect = one enrichment target (title, tags, correspondent, document
//! type, created-date, custom fields). Each aspect owns its prompt template,
//! its structured-output schema, and its reconciliation rule, per
//! `SPEC_FULL.md` §4.2.

use chrono::NaiveDate;
use schemars::JsonSchema;

use crate::error::CoreError;
use crate::llm::{LlmBackend, LlmOpts};
use crate::model::{CustomField, CustomFieldValue};
use crate::prelude::*;
use crate::prompt::{ChatPrompt, JsonObject};
use crate::schema::schema_for;

use super::tokens;

/// Everything an aspect's template may reference, beyond `Content`.
#[derive(Debug, Clone)]
pub struct AspectContext {
    pub language: String,
    pub title: String,
    pub original_tags: Vec<String>,
    pub available_tags: Vec<String>,
    pub available_correspondents: Vec<String>,
    pub available_document_types: Vec<String>,
    pub today: NaiveDate,
    pub created_date: Option<NaiveDate>,
    pub document_type: Option<String>,
    pub custom_fields: Vec<CustomField>,
}

impl Default for AspectContext {
    fn default() -> Self {
        Self {
            language: String::new(),
            title: String::new(),
            original_tags: Vec::new(),
            available_tags: Vec::new(),
            available_correspondents: Vec::new(),
            available_document_types: Vec::new(),
            today: NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid date"),
            created_date: None,
            document_type: None,
            custom_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aspect {
    Title,
    Tags,
    Correspondent,
    DocumentType,
    CreatedDate,
    CustomFields,
}

impl Aspect {
    /// The fixed processing order from §4.2: title, then tags, then
    /// correspondent, then document type, then created-date, then custom
    /// fields, so later aspects can reference the freshly suggested title.
    pub const ORDER: [Aspect; 6] = [
        Aspect::Title,
        Aspect::Tags,
        Aspect::Correspondent,
        Aspect::DocumentType,
        Aspect::CreatedDate,
        Aspect::CustomFields,
    ];

    pub fn template_name(self) -> &'static str {
        match self {
            Aspect::Title => "title",
            Aspect::Tags => "tag",
            Aspect::Correspondent => "correspondent",
            Aspect::DocumentType => "document_type",
            Aspect::CreatedDate => "created_date",
            Aspect::CustomFields => "custom_fields",
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct TitleResponse {
    title: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct TagsResponse {
    tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct CorrespondentResponse {
    correspondent: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct DocumentTypeResponse {
    document_type: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct CreatedDateResponse {
    created_date: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct CustomFieldEntry {
    field: String,
    value: Value,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct CustomFieldsResponse {
    fields: Vec<CustomFieldEntry>,
}

/// Reconciled output of one aspect call.
#[derive(Debug, Clone)]
pub enum AspectOutput {
    Title(String),
    Tags(Vec<String>),
    Correspondent(String),
    DocumentType(String),
    CreatedDate(Option<NaiveDate>),
    CustomFields(Vec<CustomFieldValue>),
}

/// Render `aspect`'s template against `ctx` and `content`, enforcing the
/// §4.2 token budget, call the LLM, and reconcile the response.
pub async fn run_aspect(
    aspect: Aspect,
    prompt: &ChatPrompt,
    ctx: &AspectContext,
    content: &str,
    token_budget: usize,
    llm: &dyn LlmBackend,
) -> Result<AspectOutput> {
    let mut bindings = base_bindings(ctx);

    let schema = match aspect {
        Aspect::Title => schema_for::<TitleResponse>(),
        Aspect::Tags => {
            bindings.insert(
                "AvailableTags".to_string(),
                json!(ctx.available_tags.join(", ")),
            );
            bindings.insert(
                "OriginalTags".to_string(),
                json!(ctx.original_tags.join(", ")),
            );
            schema_for::<TagsResponse>()
        }
        Aspect::Correspondent => {
            bindings.insert(
                "AvailableCorrespondents".to_string(),
                json!(ctx.available_correspondents.join(", ")),
            );
            bindings.insert(
                "BlackList".to_string(),
                json!(crate::model::markers::MANUAL_REVIEW),
            );
            schema_for::<CorrespondentResponse>()
        }
        Aspect::DocumentType => {
            bindings.insert(
                "AvailableDocumentTypes".to_string(),
                json!(ctx.available_document_types.join(", ")),
            );
            schema_for::<DocumentTypeResponse>()
        }
        Aspect::CreatedDate => {
            bindings.insert("Today".to_string(), json!(ctx.today.to_string()));
            schema_for::<CreatedDateResponse>()
        }
        Aspect::CustomFields => {
            bindings.insert(
                "CreatedDate".to_string(),
                json!(ctx.created_date.map(|d| d.to_string())),
            );
            bindings.insert(
                "DocumentType".to_string(),
                json!(ctx.document_type.clone()),
            );
            bindings.insert(
                "CustomFieldsXML".to_string(),
                json!(custom_fields_xml(&ctx.custom_fields)),
            );
            schema_for::<CustomFieldsResponse>()
        }
    };

    let content = budget_content(prompt, &bindings, content, token_budget)?;
    bindings.insert("Content".to_string(), json!(content));

    let response = llm
        .generate(prompt, &bindings, schema, &LlmOpts::default())
        .await
        .map_err(CoreError::LlmError)?;
    reconcile(aspect, response.content, ctx)
}

fn base_bindings(ctx: &AspectContext) -> JsonObject {
    let mut bindings = JsonObject::new();
    bindings.insert("Language".to_string(), json!(ctx.language));
    bindings.insert("Title".to_string(), json!(ctx.title));
    bindings.insert("Content".to_string(), json!(""));
    bindings
}

/// Apply §4.2's token budget: render with empty content to measure header
/// overhead, fail if the header alone exceeds the budget, else head-truncate
/// `content` to whatever's left. `token_budget == 0` disables budgeting.
fn budget_content<'a>(
    prompt: &ChatPrompt,
    bindings: &JsonObject,
    content: &'a str,
    token_budget: usize,
) -> Result<&'a str> {
    if token_budget == 0 {
        return Ok(content);
    }
    let rendered = prompt.render(bindings)?;
    let header_text: String = rendered
        .messages
        .iter()
        .filter_map(|m| m.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");
    let header_tokens = tokens::estimate(&header_text);
    if header_tokens >= token_budget {
        return Err(CoreError::PromptTooLarge {
            header_tokens,
            budget: token_budget,
        }
        .into());
    }
    let available = token_budget - header_tokens;
    Ok(tokens::head_truncate(content, available))
}

fn custom_fields_xml(fields: &[CustomField]) -> String {
    let mut xml = String::from("<customFields>\n");
    for field in fields {
        xml.push_str(&format!(
            "  <field name=\"{}\" type=\"{:?}\"/>\n",
            field.name, field.data_type
        ));
    }
    xml.push_str("</customFields>");
    xml
}

fn reconcile(aspect: Aspect, content: Value, ctx: &AspectContext) -> Result<AspectOutput> {
    match aspect {
        Aspect::Title => {
            let response: TitleResponse = serde_json::from_value(content)
                .context("failed to parse title response")?;
            let title = response.title.trim().trim_matches('"').to_string();
            let title: String = title.chars().take(128).collect();
            Ok(AspectOutput::Title(title))
        }
        Aspect::Tags => {
            let response: TagsResponse =
                serde_json::from_value(content).context("failed to parse tags response")?;
            let mut seen = std::collections::HashSet::new();
            let mut tags = Vec::new();
            for raw_tag in response
                .tags
                .iter()
                .flat_map(|t| t.split(','))
                .chain(ctx.original_tags.iter().map(String::as_str))
            {
                let trimmed = raw_tag.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let canonical = ctx
                    .available_tags
                    .iter()
                    .find(|available| available.eq_ignore_ascii_case(trimmed));
                let Some(canonical) = canonical else {
                    continue;
                };
                if !seen.insert(canonical.to_lowercase()) {
                    continue;
                }
                tags.push(canonical.clone());
            }
            tags.retain(|t| {
                !t.eq_ignore_ascii_case(crate::model::markers::MANUAL_REVIEW)
                    && !t.eq_ignore_ascii_case(crate::model::markers::AUTO_ENRICH)
            });
            Ok(AspectOutput::Tags(tags))
        }
        Aspect::Correspondent => {
            let response: CorrespondentResponse = serde_json::from_value(content)
                .context("failed to parse correspondent response")?;
            Ok(AspectOutput::Correspondent(
                response.correspondent.trim().to_string(),
            ))
        }
        Aspect::DocumentType => {
            let response: DocumentTypeResponse = serde_json::from_value(content)
                .context("failed to parse document type response")?;
            let trimmed = response.document_type.trim();
            let canonical = ctx
                .available_document_types
                .iter()
                .find(|available| available.eq_ignore_ascii_case(trimmed))
                .cloned()
                .unwrap_or_default();
            Ok(AspectOutput::DocumentType(canonical))
        }
        Aspect::CreatedDate => {
            let response: CreatedDateResponse = serde_json::from_value(content)
                .context("failed to parse created date response")?;
            let date = NaiveDate::parse_from_str(response.created_date.trim(), "%Y-%m-%d").ok();
            Ok(AspectOutput::CreatedDate(date))
        }
        Aspect::CustomFields => {
            let response: CustomFieldsResponse = serde_json::from_value(content)
                .context("failed to parse custom fields response")?;
            let mut values = Vec::new();
            for entry in response.fields {
                let Some(field) = ctx
                    .custom_fields
                    .iter()
                    .find(|f| f.name.eq_ignore_ascii_case(&entry.field))
                else {
                    warn!(field = %entry.field, "unknown custom field name in LLM response, dropping");
                    continue;
                };
                values.push(CustomFieldValue {
                    field_id: field.id,
                    value: entry.value,
                });
            }
            Ok(AspectOutput::CustomFields(values))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_reconciliation_filters_to_available_and_strips_markers() {
        let ctx = AspectContext {
            available_tags: vec!["Invoice".to_string(), "Receipt".to_string()],
            original_tags: vec!["manual-review".to_string()],
            ..Default::default()
        };
        let content = json!({ "tags": ["invoice", "unknown-tag"] });
        let AspectOutput::Tags(tags) =
            reconcile(Aspect::Tags, content, &ctx).unwrap()
        else {
            panic!("expected tags")
        };
        assert_eq!(tags, vec!["Invoice".to_string()]);
    }

    #[test]
    fn document_type_reconciliation_rejects_unknown_type() {
        let ctx = AspectContext {
            available_document_types: vec!["Contract".to_string()],
            ..Default::default()
        };
        let content = json!({ "document_type": "Unknown Type" });
        let AspectOutput::DocumentType(document_type) =
            reconcile(Aspect::DocumentType, content, &ctx).unwrap()
        else {
            panic!("expected document type")
        };
        assert_eq!(document_type, "");
    }
}
