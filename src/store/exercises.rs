use anyhow::{bail, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use patty_core::provenance::{ExerciseCreation, ExerciseLocation};

use super::{now, required_id, required_text};
use crate::models::{Exercise, ExerciseContent};

pub async fn insert_exercise(
    conn: &mut SqliteConnection,
    content: &ExerciseContent,
    created: &ExerciseCreation,
    location: &ExerciseLocation,
) -> Result<i64> {
    let (kind, full_text, instruction, statement, original_file_name) = match content {
        ExerciseContent::Adaptable {
            full_text,
            instruction_hint_example_text,
            statement_text,
        } => (
            "adaptable",
            Some(full_text.as_str()),
            instruction_hint_example_text.as_deref(),
            statement_text.as_deref(),
            None,
        ),
        ExerciseContent::External { original_file_name } => {
            ("external", None, None, None, Some(original_file_name.as_str()))
        }
    };

    let (username, page_extraction_id) = match created {
        ExerciseCreation::ByUser { username } => (Some(username.as_str()), None),
        ExerciseCreation::ByPageExtraction { page_extraction } => (None, Some(*page_extraction)),
    };

    let (page, number, textbook_id, removed) = match location {
        ExerciseLocation::MaybePageAndNumber { page, number } => {
            (*page, number.as_deref(), None, false)
        }
        ExerciseLocation::InTextbook {
            textbook,
            page,
            number,
            removed_from_textbook,
        } => (
            Some(*page),
            Some(number.as_str()),
            Some(*textbook),
            *removed_from_textbook,
        ),
    };

    let id = sqlx::query(
        r#"
        INSERT INTO exercises
            (kind, full_text, instruction_hint_example_text, statement_text, original_file_name,
             created_kind, created_by_username, created_by_page_extraction_id,
             location_kind, page_number, exercise_number, textbook_id, removed_from_textbook,
             created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(kind)
    .bind(full_text)
    .bind(instruction)
    .bind(statement)
    .bind(original_file_name)
    .bind(created.kind())
    .bind(username)
    .bind(page_extraction_id)
    .bind(location.kind())
    .bind(page)
    .bind(number)
    .bind(textbook_id)
    .bind(removed)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

fn exercise_from_row(row: &SqliteRow) -> Result<Exercise> {
    let kind: String = row.try_get("kind")?;
    let content = match kind.as_str() {
        "adaptable" => ExerciseContent::Adaptable {
            full_text: required_text(row, "full_text")?,
            instruction_hint_example_text: row.try_get("instruction_hint_example_text")?,
            statement_text: row.try_get("statement_text")?,
        },
        "external" => ExerciseContent::External {
            original_file_name: required_text(row, "original_file_name")?,
        },
        other => bail!("Unknown exercise kind '{}'", other),
    };

    let created_kind: String = row.try_get("created_kind")?;
    let created = match created_kind.as_str() {
        "by_user" => ExerciseCreation::ByUser {
            username: required_text(row, "created_by_username")?,
        },
        "by_page_extraction" => ExerciseCreation::ByPageExtraction {
            page_extraction: required_id(row, "created_by_page_extraction_id")?,
        },
        other => bail!("Unknown exercise creation kind '{}'", other),
    };

    let location_kind: String = row.try_get("location_kind")?;
    let location = match location_kind.as_str() {
        "maybe_page_and_number" => ExerciseLocation::MaybePageAndNumber {
            page: row.try_get("page_number")?,
            number: row.try_get("exercise_number")?,
        },
        "textbook" => ExerciseLocation::InTextbook {
            textbook: required_id(row, "textbook_id")?,
            page: required_id(row, "page_number")?,
            number: required_text(row, "exercise_number")?,
            removed_from_textbook: row.try_get("removed_from_textbook")?,
        },
        other => bail!("Unknown exercise location kind '{}'", other),
    };

    Ok(Exercise {
        id: row.try_get("id")?,
        content,
        created,
        location,
    })
}

const EXERCISE_COLUMNS: &str = "id, kind, full_text, instruction_hint_example_text, statement_text, \
     original_file_name, created_kind, created_by_username, created_by_page_extraction_id, \
     location_kind, page_number, exercise_number, textbook_id, removed_from_textbook";

pub async fn get_exercise(conn: &mut SqliteConnection, id: i64) -> Result<Exercise> {
    let row = sqlx::query(&format!("SELECT {} FROM exercises WHERE id = ?", EXERCISE_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .with_context(|| format!("Exercise {} not found", id))?;
    exercise_from_row(&row)
}

pub async fn exercises_of_page_extraction(
    conn: &mut SqliteConnection,
    page_extraction_id: i64,
) -> Result<Vec<Exercise>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM exercises WHERE created_by_page_extraction_id = ? ORDER BY id",
        EXERCISE_COLUMNS
    ))
    .bind(page_extraction_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(exercise_from_row).collect()
}
