//! Walk creation records back to the person or batch that started them.

use anyhow::Result;
use sqlx::SqliteConnection;

use patty_core::provenance::{
    AdaptationCreation, ClassificationChunkCreation, ExerciseClassCreation, ExerciseCreation,
    Origin, PageExtractionCreation,
};

use crate::store;

pub async fn page_extraction_origin(conn: &mut SqliteConnection, id: i64) -> Result<Origin> {
    let page_extraction = store::extraction::get_page_extraction(conn, id).await?;
    Ok(match page_extraction.created {
        PageExtractionCreation::BySandboxBatch { batch } => Origin::SandboxExtractionBatch { batch },
        PageExtractionCreation::ByTextbook { textbook_batch, .. } => {
            let batch = store::pdfs::get_textbook_extraction_batch(conn, textbook_batch).await?;
            Origin::TextbookExtractionBatch {
                batch: batch.id,
                textbook: batch.textbook_id,
            }
        }
    })
}

pub async fn chunk_origin(conn: &mut SqliteConnection, id: i64) -> Result<Origin> {
    let chunk = store::classification::get_chunk(conn, id).await?;
    match chunk.created {
        ClassificationChunkCreation::BySandboxBatch { batch } => {
            Ok(Origin::SandboxClassificationBatch { batch })
        }
        ClassificationChunkCreation::ByPageExtraction { page_extraction } => {
            page_extraction_origin(conn, page_extraction).await
        }
    }
}

pub async fn exercise_origin(conn: &mut SqliteConnection, id: i64) -> Result<Origin> {
    let exercise = store::exercises::get_exercise(conn, id).await?;
    match exercise.created {
        ExerciseCreation::ByUser { username } => Ok(Origin::User { username }),
        ExerciseCreation::ByPageExtraction { page_extraction } => {
            page_extraction_origin(conn, page_extraction).await
        }
    }
}

/// Origin of the adaptation itself, which may differ from its exercise's.
pub async fn adaptation_origin(conn: &mut SqliteConnection, id: i64) -> Result<Origin> {
    let adaptation = store::adaptation::get_adaptation(conn, id).await?;
    match adaptation.created {
        AdaptationCreation::ByUser { username } => Ok(Origin::User { username }),
        AdaptationCreation::ByChunk { chunk } => chunk_origin(conn, chunk).await,
        AdaptationCreation::BySandboxBatch { batch } => {
            Ok(Origin::SandboxAdaptationBatch { batch })
        }
    }
}

pub async fn exercise_class_origin(conn: &mut SqliteConnection, id: i64) -> Result<Origin> {
    let class = store::classification::get_class(conn, id).await?;
    match class.created {
        ExerciseClassCreation::ByUser { username } => Ok(Origin::User { username }),
        ExerciseClassCreation::ByChunk { chunk } => chunk_origin(conn, chunk).await,
    }
}
