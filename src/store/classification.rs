use anyhow::{bail, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use patty_core::provenance::{
    ClassificationChunkCreation, ClassificationCreation, ExerciseClassCreation,
};
use patty_core::ResponseSpecification;

use super::{from_json, json_column, now, optional_model_column, required_id, required_text, to_json};
use crate::llm::LlmModel;
use crate::models::{AdaptationSettings, Classification, ClassificationChunk, ExerciseClass};

// ---------- exercise classes ----------

fn class_from_row(row: &SqliteRow) -> Result<ExerciseClass> {
    let kind: String = row.try_get("created_kind")?;
    let created = match kind.as_str() {
        "by_user" => ExerciseClassCreation::ByUser {
            username: required_text(row, "created_by_username")?,
        },
        "by_chunk" => ExerciseClassCreation::ByChunk {
            chunk: required_id(row, "created_by_chunk_id")?,
        },
        other => bail!("Unknown exercise class creation kind '{}'", other),
    };
    Ok(ExerciseClass {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created,
        latest_strategy_settings_id: row.try_get("latest_strategy_settings_id")?,
    })
}

const CLASS_COLUMNS: &str =
    "id, name, created_kind, created_by_username, created_by_chunk_id, latest_strategy_settings_id";

pub async fn find_class_by_name(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Option<ExerciseClass>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM exercise_classes WHERE name = ?",
        CLASS_COLUMNS
    ))
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(class_from_row).transpose()
}

pub async fn get_class(conn: &mut SqliteConnection, id: i64) -> Result<ExerciseClass> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM exercise_classes WHERE id = ?",
        CLASS_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .with_context(|| format!("Exercise class {} not found", id))?;
    class_from_row(&row)
}

pub async fn list_classes(conn: &mut SqliteConnection) -> Result<Vec<ExerciseClass>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM exercise_classes ORDER BY name",
        CLASS_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(class_from_row).collect()
}

pub async fn insert_class(
    conn: &mut SqliteConnection,
    name: &str,
    created: &ExerciseClassCreation,
) -> Result<ExerciseClass> {
    let (username, chunk_id) = match created {
        ExerciseClassCreation::ByUser { username } => (Some(username.as_str()), None),
        ExerciseClassCreation::ByChunk { chunk } => (None, Some(*chunk)),
    };
    let id = sqlx::query(
        r#"
        INSERT INTO exercise_classes (name, created_kind, created_by_username, created_by_chunk_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(created.kind())
    .bind(username)
    .bind(chunk_id)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(ExerciseClass {
        id,
        name: name.to_string(),
        created: created.clone(),
        latest_strategy_settings_id: None,
    })
}

/// Advance a class's settings head.
pub async fn set_latest_strategy_settings(
    conn: &mut SqliteConnection,
    class_id: i64,
    settings_id: i64,
) -> Result<()> {
    sqlx::query("UPDATE exercise_classes SET latest_strategy_settings_id = ? WHERE id = ?")
        .bind(settings_id)
        .bind(class_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ---------- adaptation settings ----------

pub async fn insert_adaptation_settings(
    conn: &mut SqliteConnection,
    created_by: &str,
    exercise_class_id: Option<i64>,
    parent_id: Option<i64>,
    system_prompt: &str,
    response_specification: &ResponseSpecification,
) -> Result<AdaptationSettings> {
    let id = sqlx::query(
        r#"
        INSERT INTO adaptation_settings
            (exercise_class_id, parent_id, system_prompt, response_specification, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(exercise_class_id)
    .bind(parent_id)
    .bind(system_prompt)
    .bind(to_json(response_specification)?)
    .bind(created_by)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(AdaptationSettings {
        id,
        exercise_class_id,
        parent_id,
        system_prompt: system_prompt.to_string(),
        response_specification: response_specification.clone(),
    })
}

pub async fn get_adaptation_settings(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<AdaptationSettings> {
    let row = sqlx::query(
        "SELECT id, exercise_class_id, parent_id, system_prompt, response_specification FROM adaptation_settings WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .with_context(|| format!("Adaptation settings {} not found", id))?;

    let specification: String = row.try_get("response_specification")?;
    Ok(AdaptationSettings {
        id: row.try_get("id")?,
        exercise_class_id: row.try_get("exercise_class_id")?,
        parent_id: row.try_get("parent_id")?,
        system_prompt: row.try_get("system_prompt")?,
        response_specification: from_json(&specification, "adaptation_settings.response_specification")?,
    })
}

// ---------- chunks and classifications ----------

pub async fn insert_sandbox_classification_batch(
    conn: &mut SqliteConnection,
    created_by: &str,
    model_for_adaptation: Option<&LlmModel>,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO sandbox_classification_batches (created_by, model_for_adaptation, created_at) VALUES (?, ?, ?)",
    )
    .bind(created_by)
    .bind(optional_model_column(model_for_adaptation)?)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn insert_chunk(
    conn: &mut SqliteConnection,
    created: &ClassificationChunkCreation,
    model_for_adaptation: Option<&LlmModel>,
) -> Result<i64> {
    let (batch_id, page_extraction_id) = match created {
        ClassificationChunkCreation::BySandboxBatch { batch } => (Some(*batch), None),
        ClassificationChunkCreation::ByPageExtraction { page_extraction } => {
            (None, Some(*page_extraction))
        }
    };
    let id = sqlx::query(
        r#"
        INSERT INTO classification_chunks
            (created_kind, sandbox_batch_id, page_extraction_id, model_for_adaptation, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(created.kind())
    .bind(batch_id)
    .bind(page_extraction_id)
    .bind(optional_model_column(model_for_adaptation)?)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn get_chunk(conn: &mut SqliteConnection, id: i64) -> Result<ClassificationChunk> {
    let row = sqlx::query(
        "SELECT id, created_kind, sandbox_batch_id, page_extraction_id, model_for_adaptation FROM classification_chunks WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .with_context(|| format!("Classification chunk {} not found", id))?;

    let kind: String = row.try_get("created_kind")?;
    let created = match kind.as_str() {
        "by_sandbox_batch" => ClassificationChunkCreation::BySandboxBatch {
            batch: required_id(&row, "sandbox_batch_id")?,
        },
        "by_page_extraction" => ClassificationChunkCreation::ByPageExtraction {
            page_extraction: required_id(&row, "page_extraction_id")?,
        },
        other => bail!("Unknown classification chunk creation kind '{}'", other),
    };
    let model_for_adaptation: Option<LlmModel> = json_column(&row, "model_for_adaptation")?;

    Ok(ClassificationChunk {
        id: row.try_get("id")?,
        created,
        model_for_adaptation,
    })
}

pub async fn insert_classification(
    conn: &mut SqliteConnection,
    exercise_id: i64,
    created: &ClassificationCreation,
) -> Result<i64> {
    let (username, chunk_id) = match created {
        ClassificationCreation::ByUser { username } => (Some(username.as_str()), None),
        ClassificationCreation::ByChunk { chunk } => (None, Some(*chunk)),
    };
    let id = sqlx::query(
        r#"
        INSERT INTO classifications (exercise_id, created_kind, created_by_username, created_by_chunk_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(exercise_id)
    .bind(created.kind())
    .bind(username)
    .bind(chunk_id)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

fn classification_from_row(row: &SqliteRow) -> Result<Classification> {
    let kind: String = row.try_get("created_kind")?;
    let created = match kind.as_str() {
        "by_user" => ClassificationCreation::ByUser {
            username: required_text(row, "created_by_username")?,
        },
        "by_chunk" => ClassificationCreation::ByChunk {
            chunk: required_id(row, "created_by_chunk_id")?,
        },
        other => bail!("Unknown classification creation kind '{}'", other),
    };
    Ok(Classification {
        id: row.try_get("id")?,
        exercise_id: row.try_get("exercise_id")?,
        created,
        exercise_class_id: row.try_get("exercise_class_id")?,
        classified_at: row.try_get("classified_at")?,
    })
}

const CLASSIFICATION_COLUMNS: &str = "id, exercise_id, created_kind, created_by_username, \
     created_by_chunk_id, exercise_class_id, classified_at";

/// Oldest chunk that still has an unclassified row.
pub async fn oldest_pending_chunk(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT MIN(created_by_chunk_id) FROM classifications WHERE exercise_class_id IS NULL AND created_by_chunk_id IS NOT NULL",
    )
    .fetch_one(&mut *conn)
    .await?)
}

/// Unclassified rows of a chunk, in insertion order.
pub async fn pending_classifications_of_chunk(
    conn: &mut SqliteConnection,
    chunk_id: i64,
    limit: usize,
) -> Result<Vec<Classification>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM classifications WHERE created_by_chunk_id = ? AND exercise_class_id IS NULL ORDER BY id LIMIT ?",
        CLASSIFICATION_COLUMNS
    ))
    .bind(chunk_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(classification_from_row).collect()
}

pub async fn classifications_of_chunk(
    conn: &mut SqliteConnection,
    chunk_id: i64,
) -> Result<Vec<Classification>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM classifications WHERE created_by_chunk_id = ? ORDER BY id",
        CLASSIFICATION_COLUMNS
    ))
    .bind(chunk_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(classification_from_row).collect()
}

pub async fn count_pending_classifications(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) FROM classifications WHERE exercise_class_id IS NULL")
            .fetch_one(&mut *conn)
            .await?,
    )
}

pub async fn set_classification_class(
    conn: &mut SqliteConnection,
    classification_id: i64,
    exercise_class_id: i64,
    classified_at: i64,
) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE classifications SET exercise_class_id = ?, classified_at = ? WHERE id = ? AND exercise_class_id IS NULL",
    )
    .bind(exercise_class_id)
    .bind(classified_at)
    .bind(classification_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if updated != 1 {
        bail!("Classification {} is already classified", classification_id);
    }
    Ok(())
}

/// Chunk owned by a sandbox classification batch.
pub async fn chunk_of_sandbox_batch(conn: &mut SqliteConnection, batch_id: i64) -> Result<i64> {
    sqlx::query_scalar("SELECT id FROM classification_chunks WHERE sandbox_batch_id = ?")
        .bind(batch_id)
        .fetch_optional(&mut *conn)
        .await?
        .with_context(|| format!("Sandbox classification batch {} has no chunk", batch_id))
}
