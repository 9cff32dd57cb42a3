use anyhow::{Context, Result};
use sqlx::{Row, SqliteConnection};

use super::{from_json, model_column, now, optional_model_column, to_json};
use crate::llm::LlmModel;
use crate::models::{ExtractionSettings, PdfFile, PdfFileRange, Textbook, TextbookExtractionBatch};

/// Insert a PDF, or add `file_name` to the names it is known by.
pub async fn upsert_pdf_file(
    conn: &mut SqliteConnection,
    sha256: &str,
    bytes_count: i64,
    pages_count: i64,
    file_name: &str,
) -> Result<PdfFile> {
    let mut pdf = match get_pdf_file(conn, sha256).await? {
        Some(existing) => existing,
        None => {
            sqlx::query(
                "INSERT INTO pdf_files (sha256, bytes_count, pages_count, known_file_names, created_at) VALUES (?, ?, ?, '[]', ?)",
            )
            .bind(sha256)
            .bind(bytes_count)
            .bind(pages_count)
            .bind(now())
            .execute(&mut *conn)
            .await?;
            PdfFile {
                sha256: sha256.to_string(),
                bytes_count,
                pages_count,
                known_file_names: Vec::new(),
            }
        }
    };

    if !pdf.known_file_names.iter().any(|n| n == file_name) {
        pdf.known_file_names.push(file_name.to_string());
        pdf.known_file_names.sort();
        sqlx::query("UPDATE pdf_files SET known_file_names = ? WHERE sha256 = ?")
            .bind(to_json(&pdf.known_file_names)?)
            .bind(sha256)
            .execute(&mut *conn)
            .await?;
    }

    Ok(pdf)
}

pub async fn get_pdf_file(conn: &mut SqliteConnection, sha256: &str) -> Result<Option<PdfFile>> {
    let row = sqlx::query(
        "SELECT sha256, bytes_count, pages_count, known_file_names FROM pdf_files WHERE sha256 = ?",
    )
    .bind(sha256)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| {
        let names: String = row.try_get("known_file_names")?;
        Ok(PdfFile {
            sha256: row.try_get("sha256")?,
            bytes_count: row.try_get("bytes_count")?,
            pages_count: row.try_get("pages_count")?,
            known_file_names: from_json(&names, "pdf_files.known_file_names")?,
        })
    })
    .transpose()
}

pub async fn insert_range(
    conn: &mut SqliteConnection,
    pdf_file_sha256: &str,
    first_page_number: i64,
    pages_count: i64,
) -> Result<PdfFileRange> {
    let id = sqlx::query(
        "INSERT INTO pdf_file_ranges (pdf_file_sha256, first_page_number, pages_count, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(pdf_file_sha256)
    .bind(first_page_number)
    .bind(pages_count)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(PdfFileRange {
        id,
        pdf_file_sha256: pdf_file_sha256.to_string(),
        first_page_number,
        pages_count,
    })
}

pub async fn get_range(conn: &mut SqliteConnection, id: i64) -> Result<PdfFileRange> {
    let row = sqlx::query(
        "SELECT id, pdf_file_sha256, first_page_number, pages_count FROM pdf_file_ranges WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .with_context(|| format!("PDF file range {} not found", id))?;

    Ok(PdfFileRange {
        id: row.try_get("id")?,
        pdf_file_sha256: row.try_get("pdf_file_sha256")?,
        first_page_number: row.try_get("first_page_number")?,
        pages_count: row.try_get("pages_count")?,
    })
}

pub async fn insert_textbook(
    conn: &mut SqliteConnection,
    created_by: &str,
    title: &str,
    publisher: Option<&str>,
    year: Option<i64>,
    isbn: Option<&str>,
) -> Result<Textbook> {
    let id = sqlx::query(
        "INSERT INTO textbooks (title, publisher, year, isbn, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(title)
    .bind(publisher)
    .bind(year)
    .bind(isbn)
    .bind(created_by)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Textbook {
        id,
        title: title.to_string(),
        publisher: publisher.map(String::from),
        year,
        isbn: isbn.map(String::from),
    })
}

pub async fn find_textbook_by_title(
    conn: &mut SqliteConnection,
    title: &str,
) -> Result<Option<Textbook>> {
    let row = sqlx::query(
        "SELECT id, title, publisher, year, isbn FROM textbooks WHERE title = ? ORDER BY id LIMIT 1",
    )
    .bind(title)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| {
        Ok(Textbook {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            publisher: row.try_get("publisher")?,
            year: row.try_get("year")?,
            isbn: row.try_get("isbn")?,
        })
    })
    .transpose()
}

pub async fn insert_extraction_settings(
    conn: &mut SqliteConnection,
    created_by: &str,
    prompt: &str,
) -> Result<ExtractionSettings> {
    let id = sqlx::query(
        "INSERT INTO extraction_settings (prompt, created_by, created_at) VALUES (?, ?, ?)",
    )
    .bind(prompt)
    .bind(created_by)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(ExtractionSettings {
        id,
        prompt: prompt.to_string(),
    })
}

pub async fn get_extraction_settings(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<ExtractionSettings> {
    let prompt: String = sqlx::query_scalar("SELECT prompt FROM extraction_settings WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .with_context(|| format!("Extraction settings {} not found", id))?;
    Ok(ExtractionSettings { id, prompt })
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_sandbox_extraction_batch(
    conn: &mut SqliteConnection,
    created_by: &str,
    pdf_file_range_id: i64,
    settings_id: i64,
    model: &LlmModel,
    run_classification: bool,
    model_for_adaptation: Option<&LlmModel>,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO sandbox_extraction_batches
            (created_by, pdf_file_range_id, settings_id, model, run_classification, model_for_adaptation, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(created_by)
    .bind(pdf_file_range_id)
    .bind(settings_id)
    .bind(model_column(model)?)
    .bind(run_classification)
    .bind(optional_model_column(model_for_adaptation)?)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_textbook_extraction_batch(
    conn: &mut SqliteConnection,
    created_by: &str,
    textbook_id: i64,
    pdf_file_range_id: i64,
    first_textbook_page_number: i64,
    settings_id: i64,
    model: &LlmModel,
    model_for_adaptation: Option<&LlmModel>,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO textbook_extraction_batches
            (created_by, textbook_id, pdf_file_range_id, first_textbook_page_number, settings_id, model, model_for_adaptation, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(created_by)
    .bind(textbook_id)
    .bind(pdf_file_range_id)
    .bind(first_textbook_page_number)
    .bind(settings_id)
    .bind(model_column(model)?)
    .bind(optional_model_column(model_for_adaptation)?)
    .bind(now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn get_textbook_extraction_batch(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<TextbookExtractionBatch> {
    let row = sqlx::query(
        "SELECT id, textbook_id, pdf_file_range_id, first_textbook_page_number FROM textbook_extraction_batches WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .with_context(|| format!("Textbook extraction batch {} not found", id))?;

    Ok(TextbookExtractionBatch {
        id: row.try_get("id")?,
        textbook_id: row.try_get("textbook_id")?,
        pdf_file_range_id: row.try_get("pdf_file_range_id")?,
        first_textbook_page_number: row.try_get("first_textbook_page_number")?,
    })
}
