//! Extraction stage: one LLM + vision pass per pending page extraction.
//!
//! For each page: fetch the PDF, rasterize the page, detect and crop images,
//! ask the model for the page's exercises, then create one adaptable
//! exercise per extracted exercise that has a number. Every page ends with
//! a persisted response, successful or not, so it is never resubmitted.

use anyhow::Result;
use futures::future::join_all;
use sqlx::SqliteConnection;
use tracing::{debug, error, info, warn};

use patty_core::extracted::ExtractedExercise;
use patty_core::provenance::{
    textbook_page, ClassificationChunkCreation, ClassificationCreation, ExerciseCreation,
    ExerciseLocation, PageExtractionCreation,
};
use patty_core::responses::{ExtractionError, ExtractionSuccess};
use patty_core::{FormatKind, PageExtractionResponse};

use crate::blobs::exercise_image_key;
use crate::llm::{ExtractedExercisesShape, LlmError, Message};
use crate::models::{ExerciseContent, PageExtraction, PdfFileRange};
use crate::services::Services;
use crate::store;
use crate::vision::{annotate, crop_regions, PageImage};

/// A page ready to be sent to the model.
struct PreparedPage {
    prompt: String,
    annotated_png: Vec<u8>,
    images: Vec<PageImage>,
}

/// Submit up to `parallelism` pending page extractions. Returns their ids.
pub async fn submit_extractions(
    conn: &mut SqliteConnection,
    services: &mut Services,
    parallelism: usize,
) -> Result<Vec<i64>> {
    let pending = store::extraction::pending_page_extractions(conn, parallelism).await?;
    let ids: Vec<i64> = pending.iter().map(|p| p.id).collect();
    if pending.is_empty() {
        return Ok(ids);
    }

    let mut ready = Vec::new();
    for page_extraction in pending {
        let range = store::pdfs::get_range(conn, page_extraction.pdf_file_range_id).await?;
        let settings =
            store::pdfs::get_extraction_settings(conn, page_extraction.settings_id).await?;

        match prepare_page(services, &page_extraction, &range, settings.prompt).await {
            Ok(page) => {
                for image in &page.images {
                    store::extraction::insert_exercise_image(
                        conn,
                        page_extraction.id,
                        &image.local_identifier,
                        &exercise_image_key(page_extraction.id, &image.local_identifier),
                    )
                    .await?;
                }
                ready.push((page_extraction, range, page));
            }
            Err(e) => {
                error!(
                    page_extraction = page_extraction.id,
                    "Failed to prepare page: {:?}", e
                );
                store::extraction::set_page_extraction_response(
                    conn,
                    page_extraction.id,
                    &PageExtractionResponse::Error(ExtractionError::Unknown {}),
                    None,
                )
                .await?;
            }
        }
    }

    let llm = &services.llm;
    let calls = ready.iter().map(|(page_extraction, _, page)| async move {
        let messages = vec![Message::UserWithImage {
            content: page.prompt.clone(),
            image_png: page.annotated_png.clone(),
        }];
        llm.complete(
            &page_extraction.model,
            &messages,
            FormatKind::Text,
            &ExtractedExercisesShape,
        )
        .await
    });
    let results = join_all(calls).await;

    for ((page_extraction, range, page), result) in ready.into_iter().zip(results) {
        let known: Vec<String> = page
            .images
            .iter()
            .map(|i| i.local_identifier.clone())
            .collect();

        let (response, transcript) = match result {
            Ok(completion) => {
                let exercises = completion.validated;
                let created =
                    create_exercises(conn, &page_extraction, &range, exercises, &known).await?;
                (created, completion.transcript)
            }
            Err(LlmError::NotJson { text, transcript }) => {
                warn!(page_extraction = page_extraction.id, "Extraction reply is not JSON");
                (
                    PageExtractionResponse::Error(ExtractionError::NotJson { text }),
                    transcript,
                )
            }
            Err(LlmError::InvalidJson {
                parsed,
                reason,
                transcript,
            }) => {
                warn!(
                    page_extraction = page_extraction.id,
                    reason = %reason,
                    "Extraction reply has an invalid shape"
                );
                (
                    PageExtractionResponse::Error(ExtractionError::InvalidJson { parsed }),
                    transcript,
                )
            }
            Err(LlmError::Unknown { error, transcript }) => {
                error!(
                    page_extraction = page_extraction.id,
                    "Extraction call failed: {}", error
                );
                (
                    PageExtractionResponse::Error(ExtractionError::Unknown {}),
                    transcript,
                )
            }
        };

        store::extraction::set_page_extraction_response(
            conn,
            page_extraction.id,
            &response,
            Some(&transcript),
        )
        .await?;
    }

    Ok(ids)
}

/// Fetch, rasterize, detect, crop and annotate. Crops are written to the
/// blob store; the caller records their rows.
async fn prepare_page(
    services: &mut Services,
    page_extraction: &PageExtraction,
    range: &PdfFileRange,
    prompt: String,
) -> Result<PreparedPage> {
    let pdf = services
        .pdf_cache
        .get_or_load(&range.pdf_file_sha256, services.blobs.as_ref())
        .await?;
    let page_png = services
        .rasterizer
        .rasterize(&pdf, page_extraction.pdf_page_number, services.dpi)
        .await?;

    let regions = services.detector.detect(&page_png).await?;
    let images = crop_regions(&page_png, page_extraction.pdf_page_number, &regions)?;
    for image in &images {
        services
            .blobs
            .put(
                &exercise_image_key(page_extraction.id, &image.local_identifier),
                &image.png,
            )
            .await?;
    }
    debug!(
        page_extraction = page_extraction.id,
        images = images.len(),
        "Page rasterized"
    );

    Ok(PreparedPage {
        prompt,
        annotated_png: annotate(&page_png, &images)?,
        images,
    })
}

/// Create the exercises (and their pending classifications) of a
/// successful extraction, returning the response to persist.
async fn create_exercises(
    conn: &mut SqliteConnection,
    page_extraction: &PageExtraction,
    range: &PdfFileRange,
    mut exercises: Vec<ExtractedExercise>,
    known_images: &[String],
) -> Result<PageExtractionResponse> {
    for exercise in &mut exercises {
        exercise.strip_unknown_images(known_images);
    }

    let textbook = match &page_extraction.created {
        PageExtractionCreation::BySandboxBatch { .. } => None,
        PageExtractionCreation::ByTextbook {
            textbook_batch,
            removed,
        } => {
            let batch = store::pdfs::get_textbook_extraction_batch(conn, *textbook_batch).await?;
            Some((batch, *removed))
        }
    };

    let mut chunk: Option<i64> = None;
    let mut created = 0;
    for exercise in &exercises {
        let Some(number) = exercise.numero.clone() else {
            continue;
        };
        let full_text = exercise.full_text();
        if full_text.is_empty() {
            continue;
        }

        let location = match &textbook {
            None => ExerciseLocation::MaybePageAndNumber {
                page: Some(page_extraction.pdf_page_number),
                number: Some(number),
            },
            Some((batch, removed)) => ExerciseLocation::InTextbook {
                textbook: batch.textbook_id,
                page: textbook_page(
                    batch.first_textbook_page_number,
                    page_extraction.pdf_page_number,
                    range.first_page_number,
                ),
                number,
                removed_from_textbook: *removed,
            },
        };
        let content = ExerciseContent::Adaptable {
            full_text,
            instruction_hint_example_text: exercise.instruction_hint_example_text(),
            statement_text: exercise.statement_text(),
        };
        let exercise_id = store::exercises::insert_exercise(
            conn,
            &content,
            &ExerciseCreation::ByPageExtraction {
                page_extraction: page_extraction.id,
            },
            &location,
        )
        .await?;
        created += 1;

        if page_extraction.run_classification {
            let chunk_id = match chunk {
                Some(id) => id,
                None => {
                    let id = store::classification::insert_chunk(
                        conn,
                        &ClassificationChunkCreation::ByPageExtraction {
                            page_extraction: page_extraction.id,
                        },
                        page_extraction.model_for_adaptation.as_ref(),
                    )
                    .await?;
                    chunk = Some(id);
                    id
                }
            };
            store::classification::insert_classification(
                conn,
                exercise_id,
                &ClassificationCreation::ByChunk { chunk: chunk_id },
            )
            .await?;
        }
    }

    info!(
        page_extraction = page_extraction.id,
        extracted = exercises.len(),
        created,
        "Page extracted"
    );
    Ok(PageExtractionResponse::Success(ExtractionSuccess::V2 {
        exercises,
    }))
}
