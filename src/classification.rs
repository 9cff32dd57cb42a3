use anyhow::{bail, Result};
use sqlx::SqliteConnection;
use tracing::info;

use patty_core::provenance::{AdaptationCreation, ExerciseClassCreation};

use crate::models::ExerciseContent;
use crate::services::Services;
use crate::store;

/// Classify the oldest chunk's pending rows, at most `parallelism` of them,
/// in insertion order. Returns the ids of the classifications labelled.
///
/// Rows whose class has adaptation settings are chained into a pending
/// adaptation when the chunk carries a model for adaptation.
pub async fn submit_classifications(
    conn: &mut SqliteConnection,
    services: &mut Services,
    parallelism: usize,
) -> Result<Vec<i64>> {
    let Some(chunk_id) = store::classification::oldest_pending_chunk(conn).await? else {
        return Ok(Vec::new());
    };
    let chunk = store::classification::get_chunk(conn, chunk_id).await?;
    let pending =
        store::classification::pending_classifications_of_chunk(conn, chunk_id, parallelism)
            .await?;

    let mut rows = Vec::with_capacity(pending.len());
    for classification in &pending {
        let exercise = store::exercises::get_exercise(conn, classification.exercise_id).await?;
        match exercise.content {
            ExerciseContent::Adaptable {
                instruction_hint_example_text,
                statement_text,
                ..
            } => rows.push((
                instruction_hint_example_text.unwrap_or_default(),
                statement_text.unwrap_or_default(),
            )),
            ExerciseContent::External { .. } => bail!(
                "Classification {} targets external exercise {}",
                classification.id,
                exercise.id
            ),
        }
    }

    let labels = services.classifier.classify(&rows).await?;
    if labels.len() != pending.len() {
        bail!(
            "Classifier returned {} labels for {} exercises",
            labels.len(),
            pending.len()
        );
    }

    let classified_at = store::now();
    let mut adaptations = 0;
    for (classification, label) in pending.iter().zip(&labels) {
        let class = match store::classification::find_class_by_name(conn, label).await? {
            Some(class) => class,
            None => {
                store::classification::insert_class(
                    conn,
                    label,
                    &ExerciseClassCreation::ByChunk { chunk: chunk_id },
                )
                .await?
            }
        };
        store::classification::set_classification_class(
            conn,
            classification.id,
            class.id,
            classified_at,
        )
        .await?;

        if let (Some(model), Some(settings_id)) =
            (&chunk.model_for_adaptation, class.latest_strategy_settings_id)
        {
            store::adaptation::insert_adaptation(
                conn,
                classification.exercise_id,
                settings_id,
                model,
                &AdaptationCreation::ByChunk { chunk: chunk_id },
            )
            .await?;
            adaptations += 1;
        }
    }

    info!(
        chunk = chunk_id,
        classified = pending.len(),
        adaptations,
        "Classification chunk processed"
    );
    Ok(pending.iter().map(|c| c.id).collect())
}
