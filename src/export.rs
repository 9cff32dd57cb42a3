//! Export approved adaptations as JSON.
//!
//! One entry per approved adaptation, carrying the published exercise
//! (manual edit, else the latest successful response) with its location
//! and origin. Rendering is left to downstream tooling.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqliteConnection;
use std::path::Path;

use patty_core::provenance::{ExerciseLocation, Origin};
use patty_core::AdaptedExercise;

use crate::config::Config;
use crate::db;
use crate::lineage;
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct ExportedAdaptation {
    pub adaptation_id: i64,
    pub exercise_id: i64,
    pub location: ExerciseLocation,
    pub origin: Origin,
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
    pub exercise: AdaptedExercise,
}

/// Approved adaptations, optionally only those located in `textbook`.
pub async fn collect_approved(
    conn: &mut SqliteConnection,
    textbook: Option<i64>,
) -> Result<Vec<ExportedAdaptation>> {
    let mut exported = Vec::new();
    for id in store::adaptation::approved_adaptation_ids(conn).await? {
        let adaptation = store::adaptation::get_adaptation(conn, id).await?;
        let exercise = store::exercises::get_exercise(conn, adaptation.exercise_id).await?;

        if let Some(wanted) = textbook {
            match &exercise.location {
                ExerciseLocation::InTextbook { textbook, .. } if *textbook == wanted => {}
                _ => continue,
            }
        }

        let published = adaptation
            .final_exercise()
            .cloned()
            .with_context(|| format!("Approved adaptation {} has no exercise", id))?;
        exported.push(ExportedAdaptation {
            adaptation_id: adaptation.id,
            exercise_id: exercise.id,
            location: exercise.location,
            origin: lineage::adaptation_origin(conn, id).await?,
            approved_by: adaptation.approved_by,
            approved_at: adaptation.approved_at,
            exercise: published,
        });
    }
    Ok(exported)
}

/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, textbook: Option<i64>, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let exported = collect_approved(&mut conn, textbook).await?;
    drop(conn);

    let json = serde_json::to_string_pretty(&exported)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} adaptations to {}",
                exported.len(),
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    pool.close().await;
    Ok(())
}
