use anyhow::{bail, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use patty_core::provenance::AdaptationCreation;
use patty_core::{AdaptationResponse, AdaptedExercise, Adjustment, RawConversation};

use super::{from_json, json_column, model_column, now, required_id, required_text, to_json};
use crate::llm::LlmModel;
use crate::models::Adaptation;

pub async fn insert_sandbox_adaptation_batch(
    conn: &mut SqliteConnection,
    created_by: &str,
    settings_id: i64,
    model: &LlmModel,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO sandbox_adaptation_batches (created_by, settings_id, model, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(created_by)
    .bind(settings_id)
    .bind(model_column(model)?)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Schedule a pending adaptation.
pub async fn insert_adaptation(
    conn: &mut SqliteConnection,
    exercise_id: i64,
    settings_id: i64,
    model: &LlmModel,
    created: &AdaptationCreation,
) -> Result<i64> {
    let (username, chunk_id, batch_id) = match created {
        AdaptationCreation::ByUser { username } => (Some(username.as_str()), None, None),
        AdaptationCreation::ByChunk { chunk } => (None, Some(*chunk), None),
        AdaptationCreation::BySandboxBatch { batch } => (None, None, Some(*batch)),
    };
    let id = sqlx::query(
        r#"
        INSERT INTO adaptations
            (exercise_id, settings_id, model, created_kind, created_by_username,
             created_by_chunk_id, created_by_sandbox_batch_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(exercise_id)
    .bind(settings_id)
    .bind(model_column(model)?)
    .bind(created.kind())
    .bind(username)
    .bind(chunk_id)
    .bind(batch_id)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

const ADAPTATION_COLUMNS: &str = "id, exercise_id, settings_id, model, created_kind, \
     created_by_username, created_by_chunk_id, created_by_sandbox_batch_id, \
     raw_llm_conversations, initial_assistant_response, adjustments, manual_edit, \
     approved_by, approved_at";

fn adaptation_from_row(row: &SqliteRow) -> Result<Adaptation> {
    let kind: String = row.try_get("created_kind")?;
    let created = match kind.as_str() {
        "by_user" => AdaptationCreation::ByUser {
            username: required_text(row, "created_by_username")?,
        },
        "by_chunk" => AdaptationCreation::ByChunk {
            chunk: required_id(row, "created_by_chunk_id")?,
        },
        "by_sandbox_batch" => AdaptationCreation::BySandboxBatch {
            batch: required_id(row, "created_by_sandbox_batch_id")?,
        },
        other => bail!("Unknown adaptation creation kind '{}'", other),
    };
    let model: String = row.try_get("model")?;
    let raw: String = row.try_get("raw_llm_conversations")?;
    let adjustments: String = row.try_get("adjustments")?;

    Ok(Adaptation {
        id: row.try_get("id")?,
        exercise_id: row.try_get("exercise_id")?,
        settings_id: row.try_get("settings_id")?,
        model: from_json(&model, "adaptations.model")?,
        created,
        raw_llm_conversations: from_json(&raw, "adaptations.raw_llm_conversations")?,
        initial_assistant_response: json_column(row, "initial_assistant_response")?,
        adjustments: from_json(&adjustments, "adaptations.adjustments")?,
        manual_edit: json_column(row, "manual_edit")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
    })
}

pub async fn get_adaptation(conn: &mut SqliteConnection, id: i64) -> Result<Adaptation> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM adaptations WHERE id = ?",
        ADAPTATION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .with_context(|| format!("Adaptation {} not found", id))?;
    adaptation_from_row(&row)
}

/// Oldest adaptations without an initial response.
pub async fn pending_adaptations(
    conn: &mut SqliteConnection,
    limit: usize,
) -> Result<Vec<Adaptation>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM adaptations WHERE initial_assistant_response IS NULL ORDER BY id LIMIT ?",
        ADAPTATION_COLUMNS
    ))
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(adaptation_from_row).collect()
}

pub async fn count_pending_adaptations(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(sqlx::query_scalar(
        "SELECT COUNT(*) FROM adaptations WHERE initial_assistant_response IS NULL",
    )
    .fetch_one(&mut *conn)
    .await?)
}

pub async fn adaptation_ids_of_sandbox_batch(
    conn: &mut SqliteConnection,
    batch_id: i64,
) -> Result<Vec<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT id FROM adaptations WHERE created_by_sandbox_batch_id = ? ORDER BY id",
    )
    .bind(batch_id)
    .fetch_all(&mut *conn)
    .await?)
}

pub async fn adaptation_ids_of_chunk(
    conn: &mut SqliteConnection,
    chunk_id: i64,
) -> Result<Vec<i64>> {
    Ok(
        sqlx::query_scalar("SELECT id FROM adaptations WHERE created_by_chunk_id = ? ORDER BY id")
            .bind(chunk_id)
            .fetch_all(&mut *conn)
            .await?,
    )
}

pub async fn approved_adaptation_ids(conn: &mut SqliteConnection) -> Result<Vec<i64>> {
    Ok(
        sqlx::query_scalar("SELECT id FROM adaptations WHERE approved_at IS NOT NULL ORDER BY id")
            .fetch_all(&mut *conn)
            .await?,
    )
}

/// Record the first LLM call of an adaptation: its transcript becomes
/// entry 0 of `raw_llm_conversations`.
pub async fn set_initial_response(
    conn: &mut SqliteConnection,
    id: i64,
    response: &AdaptationResponse,
    transcript: &RawConversation,
) -> Result<()> {
    let updated = sqlx::query(
        r#"
        UPDATE adaptations
        SET initial_assistant_response = ?, raw_llm_conversations = ?
        WHERE id = ? AND initial_assistant_response IS NULL
        "#,
    )
    .bind(to_json(response)?)
    .bind(to_json(&[transcript])?)
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated != 1 {
        bail!("Adaptation {} already has an initial response", id);
    }
    Ok(())
}

/// Append one adjustment and its transcript, keeping them index-aligned.
/// Both arrays grow in a single statement so concurrent adjustments of the
/// same adaptation all land.
pub async fn append_adjustment(
    conn: &mut SqliteConnection,
    id: i64,
    adjustment: &Adjustment,
    transcript: &RawConversation,
) -> Result<Adaptation> {
    let updated = sqlx::query(
        r#"
        UPDATE adaptations
        SET adjustments = json_insert(adjustments, '$[#]', json(?)),
            raw_llm_conversations = json_insert(raw_llm_conversations, '$[#]', json(?))
        WHERE id = ?
        "#,
    )
    .bind(to_json(adjustment)?)
    .bind(to_json(transcript)?)
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated != 1 {
        bail!("Adaptation {} not found", id);
    }
    get_adaptation(conn, id).await
}

pub async fn set_manual_edit(
    conn: &mut SqliteConnection,
    id: i64,
    exercise: Option<&AdaptedExercise>,
) -> Result<()> {
    sqlx::query("UPDATE adaptations SET manual_edit = ? WHERE id = ?")
        .bind(exercise.map(to_json).transpose()?)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn set_approval(
    conn: &mut SqliteConnection,
    id: i64,
    approved_by: Option<&str>,
) -> Result<()> {
    let approved_at = approved_by.map(|_| now());
    sqlx::query("UPDATE adaptations SET approved_by = ?, approved_at = ? WHERE id = ?")
        .bind(approved_by)
        .bind(approved_at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
