//! The local, append-only modification history store and the per-page OCR
//! results table (`SPEC_FULL.md` §4.6, §6.2).
//!
//! Grounded on `other_examples/manifests/yonasBSD-readur`'s `ocr_queue.rs`:
//! a `sqlx` connection pool, `FromRow` row structs, and plain
//! `query`/`bind`/`fetch_*` calls rather than a query builder. Unlike that
//! Postgres-backed queue this store is local-only, so it runs against
//! SQLite with embedded migrations applied once at startup.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::CoreError;
use crate::model::{HistoryField, ModificationHistory, OcrPageResult};
use crate::prelude::*;

/// Default page size cap for `get_paginated`, per §4.6's `pageSize ≤ 100`.
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// Connect to (creating if absent) the SQLite database at `path` and run
    /// embedded migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .with_context(|| format!("failed to open history database at {:?}", path.display()))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run history database migrations")?;
        Ok(Self { pool })
    }

    /// In-memory store, for tests and the CLI's local-demo mode.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .context("failed to open in-memory history database")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run history database migrations")?;
        Ok(Self { pool })
    }

    /// Append a history row. The caller is responsible for only calling this
    /// when the field actually changed (§4.6).
    pub async fn insert(
        &self,
        document_id: i64,
        field: HistoryField,
        previous_value: &str,
        new_value: &str,
    ) -> Result<ModificationHistory> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO modification_history \
             (document_id, field, previous_value, new_value, undone, created_at) \
             VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(document_id)
        .bind(field.as_str())
        .bind(previous_value)
        .bind(new_value)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to insert history row")?
        .last_insert_rowid();

        Ok(ModificationHistory {
            id,
            document_id,
            field,
            previous_value: previous_value.to_string(),
            new_value: new_value.to_string(),
            undone: false,
            created_at: now,
        })
    }

    /// Rows sorted by id descending, for `page` (1-based) of `page_size`.
    pub async fn get_paginated(&self, page: u32, page_size: u32) -> Result<Vec<ModificationHistory>> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * page_size;

        let rows = sqlx::query(
            "SELECT id, document_id, field, previous_value, new_value, undone, created_at \
             FROM modification_history ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("failed to load history page")?;

        rows.iter().map(row_to_history).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<ModificationHistory>> {
        let row = sqlx::query(
            "SELECT id, document_id, field, previous_value, new_value, undone, created_at \
             FROM modification_history WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load history row")?;

        row.as_ref().map(row_to_history).transpose()
    }

    /// Flag a row `undone`. Fails with [`CoreError::AlreadyUndone`] if it
    /// already is.
    pub async fn mark_undone(&self, id: i64) -> Result<()> {
        let row = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("history row {id} not found"))?;
        if row.undone {
            return Err(CoreError::AlreadyUndone { history_id: id }.into());
        }
        sqlx::query("UPDATE modification_history SET undone = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to mark history row undone")?;
        Ok(())
    }

    /// Persist (overwriting any prior result for the same page) one page's
    /// OCR output.
    pub async fn store_page_result(&self, result: &OcrPageResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO ocr_page_results (document_id, page_index, text, limit_hit, generation_info) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(document_id, page_index) DO UPDATE SET \
             text = excluded.text, limit_hit = excluded.limit_hit, generation_info = excluded.generation_info",
        )
        .bind(result.document_id)
        .bind(result.page_index as i64)
        .bind(&result.text)
        .bind(result.limit_hit)
        .bind(result.generation_info.to_string())
        .execute(&self.pool)
        .await
        .context("failed to store OCR page result")?;
        Ok(())
    }

    pub async fn get_page_results(&self, document_id: i64) -> Result<Vec<OcrPageResult>> {
        let rows = sqlx::query(
            "SELECT document_id, page_index, text, limit_hit, generation_info \
             FROM ocr_page_results WHERE document_id = ? ORDER BY page_index ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load OCR page results")?;

        rows.iter()
            .map(|row| {
                let generation_info: String = row.try_get("generation_info")?;
                Ok(OcrPageResult {
                    document_id: row.try_get("document_id")?,
                    page_index: row.try_get::<i64, _>("page_index")? as usize,
                    text: row.try_get("text")?,
                    limit_hit: row.try_get("limit_hit")?,
                    generation_info: serde_json::from_str(&generation_info)
                        .context("malformed stored generation_info JSON")?,
                })
            })
            .collect()
    }
}

fn row_to_history(row: &sqlx::sqlite::SqliteRow) -> Result<ModificationHistory> {
    let field: String = row.try_get("field")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(ModificationHistory {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        field: parse_field(&field)?,
        previous_value: row.try_get("previous_value")?,
        new_value: row.try_get("new_value")?,
        undone: row.try_get("undone")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .context("malformed stored timestamp")?
            .with_timezone(&Utc),
    })
}

fn parse_field(s: &str) -> Result<HistoryField> {
    match s {
        "title" => Ok(HistoryField::Title),
        "tags" => Ok(HistoryField::Tags),
        "content" => Ok(HistoryField::Content),
        "created_date" => Ok(HistoryField::CreatedDate),
        "correspondent" => Ok(HistoryField::Correspondent),
        "document_type" => Ok(HistoryField::DocumentType),
        other => Err(anyhow!("unknown history field {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_paginate_round_trips() {
        let store = HistoryStore::connect_in_memory().await.unwrap();
        store
            .insert(1, HistoryField::Title, "Old", "New")
            .await
            .unwrap();
        let page = store.get_paginated(1, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].previous_value, "Old");
        assert!(!page[0].undone);
    }

    #[tokio::test]
    async fn mark_undone_is_idempotent_check() {
        let store = HistoryStore::connect_in_memory().await.unwrap();
        let row = store
            .insert(1, HistoryField::Tags, "[]", "[\"a\"]")
            .await
            .unwrap();
        store.mark_undone(row.id).await.unwrap();
        let err = store.mark_undone(row.id).await.unwrap_err();
        assert!(err.downcast_ref::<CoreError>().is_some());
    }

    #[tokio::test]
    async fn page_results_upsert_overwrites() {
        let store = HistoryStore::connect_in_memory().await.unwrap();
        let mut result = OcrPageResult {
            document_id: 1,
            page_index: 0,
            text: "first".to_string(),
            limit_hit: false,
            generation_info: json!({}),
        };
        store.store_page_result(&result).await.unwrap();
        result.text = "second".to_string();
        store.store_page_result(&result).await.unwrap();

        let results = store.get_page_results(1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "second");
    }
}
