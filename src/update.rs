//! DMS update orchestration: diffing a `DocumentSuggestion` against the
//! current document, writing history rows only for fields that actually
//! changed, the tag-emptying call-ordering rule, and undo reconstruction
//! (`SPEC_FULL.md` §4.6, §6.3).
//!
//! `dms::DmsClient::patch_document` only performs the single PATCH it's
//! given; splitting a suggestion into one or two calls in the right order is
//! this module's job.

use crate::dms::{DmsClient, DocumentUpdate};
use crate::error::CoreError;
use crate::history::HistoryStore;
use crate::model::{markers, Document, DocumentSuggestion, HistoryField, ModificationHistory};
use crate::prelude::*;

const MAX_TITLE_LEN: usize = 128;

/// Apply `suggestion` to `document`: diff against current values, issue one
/// or two PATCH calls per §6.3's tag-emptying rule, and write a history row
/// for each field that actually changed, only after its PATCH succeeds.
pub async fn apply_suggestion(
    dms: &dyn DmsClient,
    history: &HistoryStore,
    document: &Document,
    suggestion: &DocumentSuggestion,
    is_undo: bool,
) -> Result<()> {
    let final_tags = compute_final_tags(document, suggestion, is_undo);
    let tags_changed = sorted(&final_tags) != sorted(&document.tags);

    let title = suggestion
        .title
        .clone()
        .filter(|t| *t != document.title)
        .map(|t| t.chars().take(MAX_TITLE_LEN).collect::<String>());
    let correspondent = suggestion
        .correspondent
        .clone()
        .filter(|c| Some(c) != document.correspondent.as_ref());
    let document_type = suggestion
        .document_type
        .clone()
        .filter(|d| Some(d) != document.document_type.as_ref());
    let created_date = suggestion
        .created_date
        .filter(|d| Some(*d) != document.created_date);
    let custom_fields = suggestion
        .custom_fields
        .clone()
        .filter(|fields| *fields != document.custom_fields);
    let content = suggestion.content.clone().filter(|c| *c != document.content);

    let other_changes = DocumentUpdate {
        document_id: document.id,
        title: title.clone(),
        tags: None,
        correspondent: correspondent.clone(),
        document_type: document_type.clone(),
        created_date,
        custom_fields: custom_fields.clone(),
        content: content.clone(),
    };
    let has_other_changes = other_changes.title.is_some()
        || other_changes.correspondent.is_some()
        || other_changes.document_type.is_some()
        || other_changes.created_date.is_some()
        || other_changes.custom_fields.is_some()
        || other_changes.content.is_some();

    if !tags_changed && !has_other_changes {
        return Ok(());
    }

    if tags_changed && final_tags.is_empty() {
        if has_other_changes {
            dms.patch_document(&other_changes).await.map_err(CoreError::DmsError)?;
            write_other_history(
                history,
                document,
                &title,
                &correspondent,
                &document_type,
                created_date,
                &custom_fields,
                &content,
            )
            .await?;
        }
        let empty_tags = DocumentUpdate {
            document_id: document.id,
            tags: Some(Vec::new()),
            ..Default::default()
        };
        dms.patch_document(&empty_tags).await.map_err(CoreError::DmsError)?;
        write_tags_history(history, document, &final_tags).await?;
        return Ok(());
    }

    let mut combined = other_changes;
    if tags_changed {
        combined.tags = Some(final_tags.clone());
    }
    dms.patch_document(&combined).await.map_err(CoreError::DmsError)?;
    write_other_history(
        history,
        document,
        &title,
        &correspondent,
        &document_type,
        created_date,
        &custom_fields,
        &content,
    )
    .await?;
    if tags_changed {
        write_tags_history(history, document, &final_tags).await?;
    }
    Ok(())
}

/// Reconstruct a synthetic `DocumentSuggestion` from a single history row's
/// previous value and re-apply it with `isUndo = true`, per §4.6.
pub async fn undo_history_row(
    dms: &dyn DmsClient,
    history: &HistoryStore,
    document: &Document,
    row: &ModificationHistory,
) -> Result<()> {
    let mut suggestion = DocumentSuggestion {
        document_id: document.id,
        ..Default::default()
    };
    match row.field {
        HistoryField::Title => suggestion.title = Some(row.previous_value.clone()),
        HistoryField::Tags => {
            let tags: Vec<String> = serde_json::from_str(&row.previous_value)
                .context("malformed stored tags JSON in history row")?;
            suggestion.tags = Some(tags);
        }
        HistoryField::CreatedDate => {
            let date = chrono::NaiveDate::parse_from_str(&row.previous_value, "%Y-%m-%d")
                .context("malformed stored created_date in history row")?;
            suggestion.created_date = Some(date);
        }
        HistoryField::Correspondent => suggestion.correspondent = Some(row.previous_value.clone()),
        HistoryField::DocumentType => suggestion.document_type = Some(row.previous_value.clone()),
        HistoryField::Content => suggestion.content = Some(row.previous_value.clone()),
    }
    apply_suggestion(dms, history, document, &suggestion, true).await?;
    history.mark_undone(row.id).await?;
    Ok(())
}

/// Remove `remove_tags`, add `add_tags` (skipping *manual-review* unless
/// `is_undo`), starting from the suggestion's tag list if present or the
/// document's current tags otherwise.
fn compute_final_tags(document: &Document, suggestion: &DocumentSuggestion, is_undo: bool) -> Vec<String> {
    let mut tags = suggestion.tags.clone().unwrap_or_else(|| document.tags.clone());
    tags.retain(|t| !suggestion.remove_tags.iter().any(|r| r.eq_ignore_ascii_case(t)));
    for add in &suggestion.add_tags {
        if add.eq_ignore_ascii_case(markers::MANUAL_REVIEW) && !is_undo {
            continue;
        }
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(add)) {
            tags.push(add.clone());
        }
    }
    tags
}

fn sorted(tags: &[String]) -> Vec<String> {
    let mut lower: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
    lower.sort();
    lower
}

#[allow(clippy::too_many_arguments)]
async fn write_other_history(
    history: &HistoryStore,
    document: &Document,
    title: &Option<String>,
    correspondent: &Option<String>,
    document_type: &Option<String>,
    created_date: Option<chrono::NaiveDate>,
    custom_fields: &Option<Vec<crate::model::CustomFieldValue>>,
    content: &Option<String>,
) -> Result<()> {
    if let Some(new_content) = content {
        history
            .insert(document.id, HistoryField::Content, &document.content, new_content)
            .await?;
    }
    if let Some(new_title) = title {
        history
            .insert(document.id, HistoryField::Title, &document.title, new_title)
            .await?;
    }
    if let Some(new_correspondent) = correspondent {
        history
            .insert(
                document.id,
                HistoryField::Correspondent,
                document.correspondent.as_deref().unwrap_or(""),
                new_correspondent,
            )
            .await?;
    }
    if let Some(new_document_type) = document_type {
        history
            .insert(
                document.id,
                HistoryField::DocumentType,
                document.document_type.as_deref().unwrap_or(""),
                new_document_type,
            )
            .await?;
    }
    if let Some(new_date) = created_date {
        history
            .insert(
                document.id,
                HistoryField::CreatedDate,
                &document
                    .created_date
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                &new_date.to_string(),
            )
            .await?;
    }
    // `HistoryField` has no custom-fields variant: the model doesn't track
    // custom-field changes in the undo history, only in the DMS itself.
    let _ = custom_fields;
    Ok(())
}

async fn write_tags_history(history: &HistoryStore, document: &Document, final_tags: &[String]) -> Result<()> {
    let previous = serde_json::to_string(&document.tags)?;
    let new = serde_json::to_string(final_tags)?;
    history.insert(document.id, HistoryField::Tags, &previous, &new).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dms::memory::InMemoryDmsClient;

    fn sample_document(tags: Vec<&str>) -> Document {
        Document {
            id: 1,
            title: "Old Title".to_string(),
            content: "body".to_string(),
            tags: tags.into_iter().map(str::to_string).collect(),
            correspondent: None,
            document_type: None,
            created_date: None,
            original_file_name: "f.pdf".to_string(),
            custom_fields: Vec::new(),
        }
    }

    #[tokio::test]
    async fn tag_only_emptying_issues_single_patch() {
        let dms = InMemoryDmsClient::new();
        let document = sample_document(vec!["manual-review"]);
        dms.insert_document(document.clone()).await;
        let history = HistoryStore::connect_in_memory().await.unwrap();

        let suggestion = DocumentSuggestion {
            document_id: 1,
            remove_tags: vec![markers::MANUAL_REVIEW.to_string(), markers::AUTO_ENRICH.to_string()],
            ..Default::default()
        };
        apply_suggestion(&dms, &history, &document, &suggestion, false)
            .await
            .unwrap();

        let updated = dms.get_document(1).await.unwrap();
        assert!(updated.tags.is_empty());
        let rows = history.get_paginated(1, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field, HistoryField::Tags);
    }

    #[tokio::test]
    async fn tag_emptying_with_title_change_issues_two_patches_in_order() {
        let dms = InMemoryDmsClient::new();
        let document = sample_document(vec!["manual-review"]);
        dms.insert_document(document.clone()).await;
        let history = HistoryStore::connect_in_memory().await.unwrap();

        let suggestion = DocumentSuggestion {
            document_id: 1,
            title: Some("New Title".to_string()),
            remove_tags: vec![markers::MANUAL_REVIEW.to_string(), markers::AUTO_ENRICH.to_string()],
            ..Default::default()
        };
        apply_suggestion(&dms, &history, &document, &suggestion, false)
            .await
            .unwrap();

        let updated = dms.get_document(1).await.unwrap();
        assert_eq!(updated.title, "New Title");
        assert!(updated.tags.is_empty());
        let rows = history.get_paginated(1, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn undo_restores_previous_title_and_marks_undone() {
        let dms = InMemoryDmsClient::new();
        let document = sample_document(vec![]);
        dms.insert_document(document.clone()).await;
        let history = HistoryStore::connect_in_memory().await.unwrap();

        let suggestion = DocumentSuggestion {
            document_id: 1,
            title: Some("New".to_string()),
            ..Default::default()
        };
        apply_suggestion(&dms, &history, &document, &suggestion, false)
            .await
            .unwrap();
        let row = &history.get_paginated(1, 10).await.unwrap()[0];
        assert_eq!(row.new_value, "New");

        let updated_document = dms.get_document(1).await.unwrap();
        undo_history_row(&dms, &history, &updated_document, row).await.unwrap();

        let restored = dms.get_document(1).await.unwrap();
        assert_eq!(restored.title, "Old Title");
        let undone_row = history.get(row.id).await.unwrap().unwrap();
        assert!(undone_row.undone);

        let err = history.mark_undone(row.id).await.unwrap_err();
        assert!(err.downcast_ref::<CoreError>().is_some());
    }

    #[tokio::test]
    async fn undo_restores_previous_content() {
        let dms = InMemoryDmsClient::new();
        let document = sample_document(vec![]);
        dms.insert_document(document.clone()).await;
        let history = HistoryStore::connect_in_memory().await.unwrap();

        let suggestion = DocumentSuggestion {
            document_id: 1,
            content: Some("ocred text".to_string()),
            ..Default::default()
        };
        apply_suggestion(&dms, &history, &document, &suggestion, false)
            .await
            .unwrap();
        let row = &history.get_paginated(1, 10).await.unwrap()[0];
        assert_eq!(row.field, HistoryField::Content);
        assert_eq!(row.new_value, "ocred text");

        let updated_document = dms.get_document(1).await.unwrap();
        undo_history_row(&dms, &history, &updated_document, row).await.unwrap();

        let restored = dms.get_document(1).await.unwrap();
        assert_eq!(restored.content, "body");
    }
}
