//! User operations that create work for the daemon.
//!
//! Each function writes rows only; nothing here calls a model. The daemon
//! picks the new records up on its next ticks.
//!
//! Adaptation settings are versioned per exercise class: a batch naming a
//! class with `version: "current"` reuses the class's head settings when the
//! prompt and response specification are unchanged, and otherwise creates a
//! child of the head and moves the head to it.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::info;

use patty_core::provenance::{
    AdaptationCreation, ClassificationChunkCreation, ClassificationCreation, ExerciseClassCreation,
    ExerciseCreation, ExerciseLocation, PageExtractionCreation,
};
use patty_core::ResponseSpecification;

use crate::llm::LlmModel;
use crate::models::{AdaptationSettings, ExerciseContent};
use crate::store;
use crate::store::extraction::NewPageExtraction;

/// An exercise typed in by a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputExercise {
    #[serde(default)]
    pub page_number: Option<i64>,
    #[serde(default)]
    pub exercise_number: Option<String>,
    #[serde(default)]
    pub instruction_hint_example_text: Option<String>,
    #[serde(default)]
    pub statement_text: Option<String>,
    /// Whole text, when it is not split into instruction and statement.
    #[serde(default)]
    pub text: Option<String>,
}

fn non_empty(text: &Option<String>) -> Option<String> {
    text.as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

impl InputExercise {
    pub fn content(&self) -> Result<ExerciseContent> {
        let instruction = non_empty(&self.instruction_hint_example_text);
        let statement = non_empty(&self.statement_text);
        let full_text = match non_empty(&self.text) {
            Some(text) => text,
            None => [instruction.as_deref(), statement.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if full_text.is_empty() {
            bail!("Input exercise has no text");
        }
        Ok(ExerciseContent::Adaptable {
            full_text,
            instruction_hint_example_text: instruction,
            statement_text: statement,
        })
    }

    fn location(&self) -> ExerciseLocation {
        ExerciseLocation::MaybePageAndNumber {
            page: self.page_number,
            number: self.exercise_number.clone(),
        }
    }
}

/// Which class's settings history a batch belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsIdentity {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsInput {
    #[serde(default)]
    pub identity: Option<SettingsIdentity>,
    pub system_prompt: String,
    pub response_specification: ResponseSpecification,
}

/// Settings for a new adaptation batch, following the class's history.
pub async fn resolve_adaptation_settings(
    conn: &mut SqliteConnection,
    created_by: &str,
    input: &SettingsInput,
) -> Result<AdaptationSettings> {
    let Some(identity) = &input.identity else {
        return store::classification::insert_adaptation_settings(
            conn,
            created_by,
            None,
            None,
            &input.system_prompt,
            &input.response_specification,
        )
        .await;
    };
    if identity.version != "current" {
        bail!(
            "Unsupported settings version '{}' for '{}': only 'current' can be extended",
            identity.version,
            identity.name
        );
    }

    let class = match store::classification::find_class_by_name(conn, &identity.name).await? {
        Some(class) => class,
        None => {
            store::classification::insert_class(
                conn,
                &identity.name,
                &ExerciseClassCreation::ByUser {
                    username: created_by.to_string(),
                },
            )
            .await?
        }
    };

    let head = match class.latest_strategy_settings_id {
        Some(id) => Some(store::classification::get_adaptation_settings(conn, id).await?),
        None => None,
    };
    if let Some(head) = &head {
        if head.system_prompt == input.system_prompt
            && head.response_specification == input.response_specification
        {
            return Ok(head.clone());
        }
    }

    let settings = store::classification::insert_adaptation_settings(
        conn,
        created_by,
        Some(class.id),
        head.as_ref().map(|h| h.id),
        &input.system_prompt,
        &input.response_specification,
    )
    .await?;
    store::classification::set_latest_strategy_settings(conn, class.id, settings.id).await?;
    info!(
        class = %class.name,
        settings = settings.id,
        parent = ?settings.parent_id,
        "Adaptation settings head advanced"
    );
    Ok(settings)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationBatchCreated {
    pub batch_id: i64,
    pub settings_id: i64,
    pub exercise_ids: Vec<i64>,
    pub adaptation_ids: Vec<i64>,
}

/// One user-typed exercise and one pending adaptation per input.
pub async fn create_adaptation_batch(
    conn: &mut SqliteConnection,
    created_by: &str,
    settings: &SettingsInput,
    model: &LlmModel,
    inputs: &[InputExercise],
) -> Result<AdaptationBatchCreated> {
    if inputs.is_empty() {
        bail!("Adaptation batch has no exercises");
    }
    let settings = resolve_adaptation_settings(conn, created_by, settings).await?;
    let batch_id =
        store::adaptation::insert_sandbox_adaptation_batch(conn, created_by, settings.id, model)
            .await?;

    let mut exercise_ids = Vec::with_capacity(inputs.len());
    let mut adaptation_ids = Vec::with_capacity(inputs.len());
    for input in inputs {
        let exercise_id = store::exercises::insert_exercise(
            conn,
            &input.content()?,
            &ExerciseCreation::ByUser {
                username: created_by.to_string(),
            },
            &input.location(),
        )
        .await?;
        let adaptation_id = store::adaptation::insert_adaptation(
            conn,
            exercise_id,
            settings.id,
            model,
            &AdaptationCreation::BySandboxBatch { batch: batch_id },
        )
        .await?;
        exercise_ids.push(exercise_id);
        adaptation_ids.push(adaptation_id);
    }

    Ok(AdaptationBatchCreated {
        batch_id,
        settings_id: settings.id,
        exercise_ids,
        adaptation_ids,
    })
}

/// One more adaptation of an existing exercise, requested by a user.
pub async fn create_user_adaptation(
    conn: &mut SqliteConnection,
    created_by: &str,
    exercise_id: i64,
    settings_id: i64,
    model: &LlmModel,
) -> Result<i64> {
    store::exercises::get_exercise(conn, exercise_id)
        .await?
        .full_text()
        .with_context(|| format!("Exercise {} cannot be adapted", exercise_id))?;
    store::classification::get_adaptation_settings(conn, settings_id).await?;
    store::adaptation::insert_adaptation(
        conn,
        exercise_id,
        settings_id,
        model,
        &AdaptationCreation::ByUser {
            username: created_by.to_string(),
        },
    )
    .await
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationBatchCreated {
    pub batch_id: i64,
    pub chunk_id: i64,
    pub exercise_ids: Vec<i64>,
    pub classification_ids: Vec<i64>,
}

/// User-typed exercises queued for classification in one chunk.
pub async fn create_classification_batch(
    conn: &mut SqliteConnection,
    created_by: &str,
    model_for_adaptation: Option<&LlmModel>,
    inputs: &[InputExercise],
) -> Result<ClassificationBatchCreated> {
    if inputs.is_empty() {
        bail!("Classification batch has no exercises");
    }
    let batch_id = store::classification::insert_sandbox_classification_batch(
        conn,
        created_by,
        model_for_adaptation,
    )
    .await?;
    let chunk_id = store::classification::insert_chunk(
        conn,
        &ClassificationChunkCreation::BySandboxBatch { batch: batch_id },
        model_for_adaptation,
    )
    .await?;

    let mut exercise_ids = Vec::with_capacity(inputs.len());
    let mut classification_ids = Vec::with_capacity(inputs.len());
    for input in inputs {
        let exercise_id = store::exercises::insert_exercise(
            conn,
            &input.content()?,
            &ExerciseCreation::ByUser {
                username: created_by.to_string(),
            },
            &input.location(),
        )
        .await?;
        let classification_id = store::classification::insert_classification(
            conn,
            exercise_id,
            &ClassificationCreation::ByChunk { chunk: chunk_id },
        )
        .await?;
        exercise_ids.push(exercise_id);
        classification_ids.push(classification_id);
    }

    Ok(ClassificationBatchCreated {
        batch_id,
        chunk_id,
        exercise_ids,
        classification_ids,
    })
}

/// Textbook page numbering for a textbook extraction batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextbookTarget {
    pub textbook_id: i64,
    pub first_textbook_page_number: i64,
}

#[derive(Debug, Clone)]
pub struct ExtractionBatchRequest<'a> {
    pub created_by: &'a str,
    pub pdf_sha256: &'a str,
    pub first_page_number: i64,
    /// Up to the end of the PDF when absent.
    pub pages_count: Option<i64>,
    pub prompt: &'a str,
    pub model: &'a LlmModel,
    /// Always on for textbook batches.
    pub run_classification: bool,
    pub model_for_adaptation: Option<&'a LlmModel>,
    pub textbook: Option<TextbookTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionBatchCreated {
    pub batch_id: i64,
    pub textbook: bool,
    pub page_extraction_ids: Vec<i64>,
}

/// One pending page extraction per page of the requested range.
pub async fn create_extraction_batch(
    conn: &mut SqliteConnection,
    request: &ExtractionBatchRequest<'_>,
) -> Result<ExtractionBatchCreated> {
    let pdf = store::pdfs::get_pdf_file(conn, request.pdf_sha256)
        .await?
        .with_context(|| format!("Unknown PDF {}", request.pdf_sha256))?;

    let first = request.first_page_number;
    if first < 1 || first > pdf.pages_count {
        bail!(
            "First page {} is outside the PDF's {} pages",
            first,
            pdf.pages_count
        );
    }
    let pages_count = request
        .pages_count
        .unwrap_or(pdf.pages_count - first + 1);
    let in_range = pages_count >= 1
        && first
            .checked_add(pages_count - 1)
            .is_some_and(|last| last <= pdf.pages_count);
    if !in_range {
        bail!(
            "{} pages from page {} are outside the PDF's {} pages",
            pages_count,
            first,
            pdf.pages_count
        );
    }

    let range = store::pdfs::insert_range(conn, &pdf.sha256, first, pages_count).await?;
    let settings =
        store::pdfs::insert_extraction_settings(conn, request.created_by, request.prompt).await?;

    let (batch_id, created, run_classification) = match request.textbook {
        None => {
            let batch_id = store::pdfs::insert_sandbox_extraction_batch(
                conn,
                request.created_by,
                range.id,
                settings.id,
                request.model,
                request.run_classification,
                request.model_for_adaptation,
            )
            .await?;
            (
                batch_id,
                PageExtractionCreation::BySandboxBatch { batch: batch_id },
                request.run_classification,
            )
        }
        Some(target) => {
            let batch_id = store::pdfs::insert_textbook_extraction_batch(
                conn,
                request.created_by,
                target.textbook_id,
                range.id,
                target.first_textbook_page_number,
                settings.id,
                request.model,
                request.model_for_adaptation,
            )
            .await?;
            (
                batch_id,
                PageExtractionCreation::ByTextbook {
                    textbook_batch: batch_id,
                    removed: false,
                },
                true,
            )
        }
    };

    let mut page_extraction_ids = Vec::with_capacity(pages_count as usize);
    for page in range.pages() {
        let id = store::extraction::insert_page_extraction(
            conn,
            &NewPageExtraction {
                created: &created,
                pdf_file_range_id: range.id,
                pdf_page_number: page,
                settings_id: settings.id,
                model: request.model,
                run_classification,
                model_for_adaptation: request.model_for_adaptation,
            },
        )
        .await?;
        page_extraction_ids.push(id);
    }

    Ok(ExtractionBatchCreated {
        batch_id,
        textbook: request.textbook.is_some(),
        page_extraction_ids,
    })
}
