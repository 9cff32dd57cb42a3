//! `run_*` entry points of the CLI subcommands other than `init`, `stats`,
//! `export` and the daemon. Each opens the database, does its work and
//! prints a short report.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

use patty_core::{make_exercise_type, ExerciseCapabilities, Recursion, SchemaOptions};

use crate::adaptation;
use crate::blobs::LocalBlobStore;
use crate::config::Config;
use crate::db;
use crate::lineage;
use crate::llm::{LlmClient, LlmModel};
use crate::pdf;
use crate::sandbox::{
    self, ExtractionBatchRequest, InputExercise, SettingsInput, TextbookTarget,
};
use crate::store;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_ids(label: &str, ids: &[i64]) {
    let listed = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    println!("  {:<22} {}", label, listed);
}

pub async fn run_upload_pdf(config: &Config, path: &Path) -> Result<()> {
    let pool = db::connect(config).await?;
    let blobs = LocalBlobStore::new(&config.storage.root);
    let mut conn = pool.acquire().await?;
    let file = pdf::upload_pdf(&mut conn, &blobs, path).await?;
    drop(conn);

    println!("Uploaded {}", path.display());
    println!("  sha256:  {}", file.sha256);
    println!("  pages:   {}", file.pages_count);
    println!("  bytes:   {}", file.bytes_count);
    println!("  names:   {}", file.known_file_names.join(", "));

    pool.close().await;
    Ok(())
}

pub async fn run_create_textbook(
    config: &Config,
    created_by: &str,
    title: &str,
    publisher: Option<&str>,
    year: Option<i64>,
    isbn: Option<&str>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    if store::pdfs::find_textbook_by_title(&mut conn, title)
        .await?
        .is_some()
    {
        bail!("A textbook titled '{}' already exists", title);
    }
    let textbook =
        store::pdfs::insert_textbook(&mut conn, created_by, title, publisher, year, isbn).await?;
    drop(conn);

    println!("Created textbook {}: {}", textbook.id, textbook.title);
    pool.close().await;
    Ok(())
}

/// Arguments of `patty extract`.
#[derive(Debug, Clone)]
pub struct ExtractCommand {
    pub created_by: String,
    pub pdf_sha256: String,
    pub first_page: i64,
    pub pages: Option<i64>,
    pub prompt_file: std::path::PathBuf,
    pub model: String,
    pub run_classification: bool,
    pub model_for_adaptation: Option<String>,
    pub textbook: Option<i64>,
    pub first_textbook_page: Option<i64>,
}

pub async fn run_extract(config: &Config, command: &ExtractCommand) -> Result<()> {
    let prompt = std::fs::read_to_string(&command.prompt_file)
        .with_context(|| format!("Failed to read {}", command.prompt_file.display()))?;
    let model: LlmModel = command.model.parse()?;
    let model_for_adaptation: Option<LlmModel> = command
        .model_for_adaptation
        .as_deref()
        .map(str::parse)
        .transpose()?;
    let textbook = match (command.textbook, command.first_textbook_page) {
        (Some(textbook_id), first) => Some(TextbookTarget {
            textbook_id,
            first_textbook_page_number: first.unwrap_or(command.first_page),
        }),
        (None, Some(_)) => bail!("--first-textbook-page requires --textbook"),
        (None, None) => None,
    };

    let pool = db::connect(config).await?;
    let mut tx = pool.begin().await?;
    let created = sandbox::create_extraction_batch(
        &mut tx,
        &ExtractionBatchRequest {
            created_by: &command.created_by,
            pdf_sha256: &command.pdf_sha256,
            first_page_number: command.first_page,
            pages_count: command.pages,
            prompt: &prompt,
            model: &model,
            run_classification: command.run_classification,
            model_for_adaptation: model_for_adaptation.as_ref(),
            textbook,
        },
    )
    .await?;
    tx.commit().await?;

    println!(
        "Created {} extraction batch {}",
        if created.textbook { "textbook" } else { "sandbox" },
        created.batch_id
    );
    print_ids("page extractions:", &created.page_extraction_ids);
    pool.close().await;
    Ok(())
}

pub async fn run_classify(
    config: &Config,
    created_by: &str,
    input: &Path,
    model_for_adaptation: Option<&str>,
) -> Result<()> {
    let inputs: Vec<InputExercise> = read_json(input)?;
    let model_for_adaptation: Option<LlmModel> =
        model_for_adaptation.map(str::parse).transpose()?;

    let pool = db::connect(config).await?;
    let mut tx = pool.begin().await?;
    let created = sandbox::create_classification_batch(
        &mut tx,
        created_by,
        model_for_adaptation.as_ref(),
        &inputs,
    )
    .await?;
    tx.commit().await?;

    println!(
        "Created classification batch {} (chunk {})",
        created.batch_id, created.chunk_id
    );
    print_ids("exercises:", &created.exercise_ids);
    print_ids("classifications:", &created.classification_ids);
    pool.close().await;
    Ok(())
}

pub async fn run_adapt(
    config: &Config,
    created_by: &str,
    input: &Path,
    settings: &Path,
    model: &str,
) -> Result<()> {
    let inputs: Vec<InputExercise> = read_json(input)?;
    let settings: SettingsInput = read_json(settings)?;
    let model: LlmModel = model.parse()?;

    let pool = db::connect(config).await?;
    let mut tx = pool.begin().await?;
    let created =
        sandbox::create_adaptation_batch(&mut tx, created_by, &settings, &model, &inputs).await?;
    tx.commit().await?;

    println!(
        "Created adaptation batch {} (settings {})",
        created.batch_id, created.settings_id
    );
    print_ids("exercises:", &created.exercise_ids);
    print_ids("adaptations:", &created.adaptation_ids);
    pool.close().await;
    Ok(())
}

pub async fn run_adjust(config: &Config, adaptation_id: i64, prompt: &str) -> Result<()> {
    let llm = LlmClient::from_config(&config.llm)?;
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let adaptation = adaptation::adjust(&mut conn, &llm, adaptation_id, prompt).await?;
    drop(conn);

    let kind = adaptation
        .latest_response()
        .map(|r| r.kind())
        .unwrap_or("none");
    println!(
        "Adaptation {}: adjustment {} recorded ({})",
        adaptation.id,
        adaptation.adjustments.len(),
        kind
    );
    if let Some(exercise) = adaptation.final_exercise() {
        println!("{}", serde_json::to_string_pretty(exercise)?);
    }
    pool.close().await;
    Ok(())
}

/// Set the manual edit from a JSON file, or clear it when `edit` is `None`.
pub async fn run_edit(config: &Config, adaptation_id: i64, edit: Option<&Path>) -> Result<()> {
    let value: Option<Value> = edit.map(read_json).transpose()?;

    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let stored = adaptation::set_manual_edit(&mut conn, adaptation_id, value.as_ref()).await?;
    drop(conn);

    match stored {
        Some(_) => println!("Adaptation {}: manual edit saved", adaptation_id),
        None => println!("Adaptation {}: manual edit cleared", adaptation_id),
    }
    pool.close().await;
    Ok(())
}

pub async fn run_approve(config: &Config, adaptation_id: i64, username: Option<&str>) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    adaptation::set_approval(&mut conn, adaptation_id, username).await?;
    drop(conn);

    match username {
        Some(username) => println!("Adaptation {} approved by {}", adaptation_id, username),
        None => println!("Adaptation {}: approval withdrawn", adaptation_id),
    }
    pool.close().await;
    Ok(())
}

pub async fn run_lineage(config: &Config, entity: &str, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let origin = match entity {
        "adaptation" => lineage::adaptation_origin(&mut conn, id).await?,
        "exercise" => lineage::exercise_origin(&mut conn, id).await?,
        "chunk" => lineage::chunk_origin(&mut conn, id).await?,
        "page-extraction" => lineage::page_extraction_origin(&mut conn, id).await?,
        "class" => lineage::exercise_class_origin(&mut conn, id).await?,
        other => bail!(
            "Unknown entity: '{}'. Must be adaptation, exercise, chunk, page-extraction or class.",
            other
        ),
    };
    drop(conn);

    println!("{}", serde_json::to_string_pretty(&origin)?);
    pool.close().await;
    Ok(())
}

/// Print the JSON schema of an exercise type. No database needed.
pub fn run_schema(capabilities: Option<&Path>, unfold: Option<usize>) -> Result<()> {
    let capabilities: ExerciseCapabilities = match capabilities {
        Some(path) => read_json(path)?,
        None => ExerciseCapabilities::uniform(patty_core::ComponentFlags::all()),
    };
    let options = SchemaOptions {
        recursion: match unfold {
            Some(depth) => Recursion::Unfold { depth },
            None => Recursion::Refs,
        },
    };
    let schema = make_exercise_type(capabilities).schema(&options);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
