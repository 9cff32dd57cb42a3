//! Repository functions over SQLite.
//!
//! Every function takes `&mut SqliteConnection` so callers decide the
//! transaction boundary: the daemon runs a whole tick in one transaction,
//! user operations open their own.
//!
//! | Module | Tables |
//! |--------|--------|
//! | [`pdfs`] | `pdf_files`, `pdf_file_ranges`, `textbooks`, `extraction_settings`, extraction batches |
//! | [`extraction`] | `page_extractions`, `exercise_images` |
//! | [`exercises`] | `exercises` |
//! | [`classification`] | `exercise_classes`, `adaptation_settings`, chunks, classifications |
//! | [`adaptation`] | `sandbox_adaptation_batches`, `adaptations` |

pub mod adaptation;
pub mod classification;
pub mod exercises;
pub mod extraction;
pub mod pdfs;

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::llm::LlmModel;

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(text: &str, column: &str) -> Result<T> {
    serde_json::from_str(text).with_context(|| format!("Malformed JSON in column {}", column))
}

/// Decode a nullable JSON column.
pub(crate) fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| from_json(&t, column)).transpose()
}

/// A foreign key that the row's discriminator says must be set.
pub(crate) fn required_id(row: &SqliteRow, column: &str) -> Result<i64> {
    let value: Option<i64> = row.try_get(column)?;
    value.ok_or_else(|| anyhow!("Column {} is NULL but its discriminator requires it", column))
}

pub(crate) fn required_text(row: &SqliteRow, column: &str) -> Result<String> {
    let value: Option<String> = row.try_get(column)?;
    value.ok_or_else(|| anyhow!("Column {} is NULL but its discriminator requires it", column))
}

pub(crate) fn model_column(model: &LlmModel) -> Result<String> {
    to_json(model)
}

pub(crate) fn optional_model_column(model: Option<&LlmModel>) -> Result<Option<String>> {
    model.map(to_json).transpose()
}
