use anyhow::{bail, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use patty_core::provenance::PageExtractionCreation;
use patty_core::{PageExtractionResponse, RawConversation};

use super::{from_json, json_column, model_column, now, optional_model_column, required_id, to_json};
use crate::llm::LlmModel;
use crate::models::PageExtraction;

/// What a new page extraction will run with.
#[derive(Debug, Clone)]
pub struct NewPageExtraction<'a> {
    pub created: &'a PageExtractionCreation,
    pub pdf_file_range_id: i64,
    pub pdf_page_number: i64,
    pub settings_id: i64,
    pub model: &'a LlmModel,
    pub run_classification: bool,
    pub model_for_adaptation: Option<&'a LlmModel>,
}

pub async fn insert_page_extraction(
    conn: &mut SqliteConnection,
    new: &NewPageExtraction<'_>,
) -> Result<i64> {
    let (sandbox_batch_id, textbook_batch_id, removed) = match new.created {
        PageExtractionCreation::BySandboxBatch { batch } => (Some(*batch), None, false),
        PageExtractionCreation::ByTextbook {
            textbook_batch,
            removed,
        } => (None, Some(*textbook_batch), *removed),
    };

    let id = sqlx::query(
        r#"
        INSERT INTO page_extractions
            (created_kind, sandbox_batch_id, textbook_batch_id, removed_from_textbook,
             pdf_file_range_id, pdf_page_number, settings_id, model, run_classification,
             model_for_adaptation, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.created.kind())
    .bind(sandbox_batch_id)
    .bind(textbook_batch_id)
    .bind(removed)
    .bind(new.pdf_file_range_id)
    .bind(new.pdf_page_number)
    .bind(new.settings_id)
    .bind(model_column(new.model)?)
    .bind(new.run_classification)
    .bind(optional_model_column(new.model_for_adaptation)?)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

const PAGE_EXTRACTION_COLUMNS: &str = "id, created_kind, sandbox_batch_id, textbook_batch_id, removed_from_textbook, \
     pdf_file_range_id, pdf_page_number, settings_id, model, run_classification, \
     model_for_adaptation, assistant_response";

fn page_extraction_from_row(row: &SqliteRow) -> Result<PageExtraction> {
    let kind: String = row.try_get("created_kind")?;
    let created = match kind.as_str() {
        "by_sandbox_batch" => PageExtractionCreation::BySandboxBatch {
            batch: required_id(row, "sandbox_batch_id")?,
        },
        "by_textbook" => PageExtractionCreation::ByTextbook {
            textbook_batch: required_id(row, "textbook_batch_id")?,
            removed: row.try_get("removed_from_textbook")?,
        },
        other => bail!("Unknown page extraction creation kind '{}'", other),
    };
    let model: String = row.try_get("model")?;

    Ok(PageExtraction {
        id: row.try_get("id")?,
        created,
        pdf_file_range_id: row.try_get("pdf_file_range_id")?,
        pdf_page_number: row.try_get("pdf_page_number")?,
        settings_id: row.try_get("settings_id")?,
        model: from_json(&model, "page_extractions.model")?,
        run_classification: row.try_get("run_classification")?,
        model_for_adaptation: json_column(row, "model_for_adaptation")?,
        assistant_response: json_column(row, "assistant_response")?,
    })
}

pub async fn get_page_extraction(conn: &mut SqliteConnection, id: i64) -> Result<PageExtraction> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM page_extractions WHERE id = ?",
        PAGE_EXTRACTION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .with_context(|| format!("Page extraction {} not found", id))?;
    page_extraction_from_row(&row)
}

/// Oldest page extractions without a response.
pub async fn pending_page_extractions(
    conn: &mut SqliteConnection,
    limit: usize,
) -> Result<Vec<PageExtraction>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM page_extractions WHERE assistant_response IS NULL ORDER BY id LIMIT ?",
        PAGE_EXTRACTION_COLUMNS
    ))
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(page_extraction_from_row).collect()
}

pub async fn count_pending_page_extractions(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM page_extractions WHERE assistant_response IS NULL")
            .fetch_one(&mut *conn)
            .await?,
    )
}

pub async fn page_extraction_ids_of_sandbox_batch(
    conn: &mut SqliteConnection,
    batch_id: i64,
) -> Result<Vec<i64>> {
    Ok(
        sqlx::query_scalar("SELECT id FROM page_extractions WHERE sandbox_batch_id = ? ORDER BY id")
            .bind(batch_id)
            .fetch_all(&mut *conn)
            .await?,
    )
}

pub async fn page_extraction_ids_of_textbook_batch(
    conn: &mut SqliteConnection,
    batch_id: i64,
) -> Result<Vec<i64>> {
    Ok(
        sqlx::query_scalar("SELECT id FROM page_extractions WHERE textbook_batch_id = ? ORDER BY id")
            .bind(batch_id)
            .fetch_all(&mut *conn)
            .await?,
    )
}

/// Record the outcome of a page extraction. `transcript` is absent when the
/// LLM was never reached.
pub async fn set_page_extraction_response(
    conn: &mut SqliteConnection,
    id: i64,
    response: &PageExtractionResponse,
    transcript: Option<&RawConversation>,
) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE page_extractions SET assistant_response = ?, raw_llm_conversation = ? WHERE id = ? AND assistant_response IS NULL",
    )
    .bind(to_json(response)?)
    .bind(transcript.map(to_json).transpose()?)
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated != 1 {
        bail!("Page extraction {} already has a response", id);
    }
    Ok(())
}

pub async fn insert_exercise_image(
    conn: &mut SqliteConnection,
    page_extraction_id: i64,
    local_identifier: &str,
    blob_key: &str,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO exercise_images (page_extraction_id, local_identifier, blob_key, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(page_extraction_id)
    .bind(local_identifier)
    .bind(blob_key)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// `(local_identifier, blob_key)` for every image cropped from a page.
pub async fn exercise_images_of_page_extraction(
    conn: &mut SqliteConnection,
    page_extraction_id: i64,
) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        "SELECT local_identifier, blob_key FROM exercise_images WHERE page_extraction_id = ? ORDER BY id",
    )
    .bind(page_extraction_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| Ok((row.try_get("local_identifier")?, row.try_get("blob_key")?)))
        .collect()
}
