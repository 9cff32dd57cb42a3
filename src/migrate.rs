use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Schema statements, in dependency order. All idempotent.
///
/// Creation and location sums are stored as a `*_kind` discriminator plus
/// nullable foreign keys; the `CHECK` constraints pin which columns each
/// variant uses. JSON documents are stored as TEXT.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS pdf_files (
        sha256 TEXT PRIMARY KEY,
        bytes_count INTEGER NOT NULL,
        pages_count INTEGER NOT NULL,
        known_file_names TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pdf_file_ranges (
        id INTEGER PRIMARY KEY,
        pdf_file_sha256 TEXT NOT NULL REFERENCES pdf_files(sha256),
        first_page_number INTEGER NOT NULL CHECK (first_page_number >= 1),
        pages_count INTEGER NOT NULL CHECK (pages_count >= 1),
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS textbooks (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        publisher TEXT,
        year INTEGER,
        isbn TEXT,
        created_by TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS extraction_settings (
        id INTEGER PRIMARY KEY,
        prompt TEXT NOT NULL,
        created_by TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sandbox_extraction_batches (
        id INTEGER PRIMARY KEY,
        created_by TEXT NOT NULL,
        pdf_file_range_id INTEGER NOT NULL REFERENCES pdf_file_ranges(id),
        settings_id INTEGER NOT NULL REFERENCES extraction_settings(id),
        model TEXT NOT NULL,
        run_classification INTEGER NOT NULL,
        model_for_adaptation TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS textbook_extraction_batches (
        id INTEGER PRIMARY KEY,
        created_by TEXT NOT NULL,
        textbook_id INTEGER NOT NULL REFERENCES textbooks(id),
        pdf_file_range_id INTEGER NOT NULL REFERENCES pdf_file_ranges(id),
        first_textbook_page_number INTEGER NOT NULL,
        settings_id INTEGER NOT NULL REFERENCES extraction_settings(id),
        model TEXT NOT NULL,
        model_for_adaptation TEXT,
        removed_from_textbook INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS page_extractions (
        id INTEGER PRIMARY KEY,
        created_kind TEXT NOT NULL,
        sandbox_batch_id INTEGER REFERENCES sandbox_extraction_batches(id),
        textbook_batch_id INTEGER REFERENCES textbook_extraction_batches(id),
        removed_from_textbook INTEGER NOT NULL DEFAULT 0,
        pdf_file_range_id INTEGER NOT NULL REFERENCES pdf_file_ranges(id),
        pdf_page_number INTEGER NOT NULL CHECK (pdf_page_number >= 1),
        settings_id INTEGER NOT NULL REFERENCES extraction_settings(id),
        model TEXT NOT NULL,
        run_classification INTEGER NOT NULL,
        model_for_adaptation TEXT,
        assistant_response TEXT,
        raw_llm_conversation TEXT,
        created_at INTEGER NOT NULL,
        CHECK (
            (created_kind = 'by_sandbox_batch' AND sandbox_batch_id IS NOT NULL AND textbook_batch_id IS NULL)
            OR (created_kind = 'by_textbook' AND textbook_batch_id IS NOT NULL AND sandbox_batch_id IS NULL)
        )
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exercise_images (
        id INTEGER PRIMARY KEY,
        page_extraction_id INTEGER NOT NULL REFERENCES page_extractions(id),
        local_identifier TEXT NOT NULL,
        blob_key TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(page_extraction_id, local_identifier)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exercises (
        id INTEGER PRIMARY KEY,
        kind TEXT NOT NULL CHECK (kind IN ('adaptable', 'external')),
        full_text TEXT,
        instruction_hint_example_text TEXT,
        statement_text TEXT,
        original_file_name TEXT,
        created_kind TEXT NOT NULL,
        created_by_username TEXT,
        created_by_page_extraction_id INTEGER REFERENCES page_extractions(id),
        location_kind TEXT NOT NULL,
        page_number INTEGER,
        exercise_number TEXT,
        textbook_id INTEGER REFERENCES textbooks(id),
        removed_from_textbook INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        CHECK (
            (kind = 'adaptable' AND full_text IS NOT NULL AND original_file_name IS NULL)
            OR (kind = 'external' AND original_file_name IS NOT NULL AND full_text IS NULL)
        ),
        CHECK (
            (created_kind = 'by_user' AND created_by_username IS NOT NULL AND created_by_page_extraction_id IS NULL)
            OR (created_kind = 'by_page_extraction' AND created_by_page_extraction_id IS NOT NULL AND created_by_username IS NULL)
        ),
        CHECK (
            (location_kind = 'maybe_page_and_number' AND textbook_id IS NULL)
            OR (location_kind = 'textbook' AND textbook_id IS NOT NULL AND page_number IS NOT NULL AND exercise_number IS NOT NULL)
        )
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sandbox_classification_batches (
        id INTEGER PRIMARY KEY,
        created_by TEXT NOT NULL,
        model_for_adaptation TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS classification_chunks (
        id INTEGER PRIMARY KEY,
        created_kind TEXT NOT NULL,
        sandbox_batch_id INTEGER REFERENCES sandbox_classification_batches(id),
        page_extraction_id INTEGER REFERENCES page_extractions(id),
        model_for_adaptation TEXT,
        created_at INTEGER NOT NULL,
        CHECK (
            (created_kind = 'by_sandbox_batch' AND sandbox_batch_id IS NOT NULL AND page_extraction_id IS NULL)
            OR (created_kind = 'by_page_extraction' AND page_extraction_id IS NOT NULL AND sandbox_batch_id IS NULL)
        )
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS exercise_classes (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        created_kind TEXT NOT NULL,
        created_by_username TEXT,
        created_by_chunk_id INTEGER REFERENCES classification_chunks(id),
        latest_strategy_settings_id INTEGER,
        created_at INTEGER NOT NULL,
        CHECK (
            (created_kind = 'by_user' AND created_by_username IS NOT NULL AND created_by_chunk_id IS NULL)
            OR (created_kind = 'by_chunk' AND created_by_chunk_id IS NOT NULL AND created_by_username IS NULL)
        )
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS adaptation_settings (
        id INTEGER PRIMARY KEY,
        exercise_class_id INTEGER REFERENCES exercise_classes(id),
        parent_id INTEGER REFERENCES adaptation_settings(id),
        system_prompt TEXT NOT NULL,
        response_specification TEXT NOT NULL,
        created_by TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS classifications (
        id INTEGER PRIMARY KEY,
        exercise_id INTEGER NOT NULL REFERENCES exercises(id),
        created_kind TEXT NOT NULL,
        created_by_username TEXT,
        created_by_chunk_id INTEGER REFERENCES classification_chunks(id),
        exercise_class_id INTEGER REFERENCES exercise_classes(id),
        classified_at INTEGER,
        created_at INTEGER NOT NULL,
        CHECK (
            (created_kind = 'by_user' AND created_by_username IS NOT NULL AND created_by_chunk_id IS NULL)
            OR (created_kind = 'by_chunk' AND created_by_chunk_id IS NOT NULL AND created_by_username IS NULL)
        )
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sandbox_adaptation_batches (
        id INTEGER PRIMARY KEY,
        created_by TEXT NOT NULL,
        settings_id INTEGER NOT NULL REFERENCES adaptation_settings(id),
        model TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS adaptations (
        id INTEGER PRIMARY KEY,
        exercise_id INTEGER NOT NULL REFERENCES exercises(id),
        settings_id INTEGER NOT NULL REFERENCES adaptation_settings(id),
        model TEXT NOT NULL,
        created_kind TEXT NOT NULL,
        created_by_username TEXT,
        created_by_chunk_id INTEGER REFERENCES classification_chunks(id),
        created_by_sandbox_batch_id INTEGER REFERENCES sandbox_adaptation_batches(id),
        raw_llm_conversations TEXT NOT NULL DEFAULT '[]',
        initial_assistant_response TEXT,
        adjustments TEXT NOT NULL DEFAULT '[]',
        manual_edit TEXT,
        approved_by TEXT,
        approved_at INTEGER,
        created_at INTEGER NOT NULL,
        CHECK (
            (created_kind = 'by_user' AND created_by_username IS NOT NULL
                AND created_by_chunk_id IS NULL AND created_by_sandbox_batch_id IS NULL)
            OR (created_kind = 'by_chunk' AND created_by_chunk_id IS NOT NULL
                AND created_by_username IS NULL AND created_by_sandbox_batch_id IS NULL)
            OR (created_kind = 'by_sandbox_batch' AND created_by_sandbox_batch_id IS NOT NULL
                AND created_by_username IS NULL AND created_by_chunk_id IS NULL)
        )
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_page_extractions_pending ON page_extractions(id) WHERE assistant_response IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_classifications_chunk ON classifications(created_by_chunk_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_adaptations_pending ON adaptations(id) WHERE initial_assistant_response IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_exercises_page_extraction ON exercises(created_by_page_extraction_id)",
    "CREATE INDEX IF NOT EXISTS idx_adaptation_settings_parent ON adaptation_settings(parent_id)",
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
