//! End-to-end pipeline tests: a file-backed SQLite database, the dummy LLM
//! provider, a blank-page rasterizer and the keyword classifier.

use std::fs;
use std::io::Cursor;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::json;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use tempfile::TempDir;

use patty::adaptation::{adjust, adjustment_messages, set_approval, set_manual_edit};
use patty::blobs::pdf_key;
use patty::config::{load_config, DummyConfig, LlmConfig};
use patty::daemon::{tick, DaemonOptions, TickOutcome};
use patty::db;
use patty::export::collect_approved;
use patty::lineage;
use patty::llm::{LlmClient, LlmModel, Message};
use patty::migrate;
use patty::models::ExerciseContent;
use patty::pdf::{sha256_hex, PageRasterizer};
use patty::sandbox::{
    create_adaptation_batch, create_classification_batch, create_extraction_batch,
    resolve_adaptation_settings, ExtractionBatchRequest, InputExercise, SettingsIdentity,
    SettingsInput, TextbookTarget,
};
use patty::services::Services;
use patty::stats::collect_stats;
use patty::store;
use patty::vision::{DetectedRegion, ImageDetector};
use patty_core::provenance::{ExerciseLocation, Origin};
use patty_core::responses::{ExtractionError, PageExtractionResponse};
use patty_core::{
    AdaptationResponse, ComponentFlags, ComponentKind, ExerciseCapabilities, FormatKind,
    RawConversation, ResponseSpecification,
};

struct BlankPage;

#[async_trait]
impl PageRasterizer for BlankPage {
    async fn rasterize(&self, _pdf: &[u8], _page_number: i64, _dpi: u32) -> Result<Vec<u8>> {
        let page = RgbaImage::from_pixel(120, 160, Rgba([255, 255, 255, 255]));
        let mut png = Cursor::new(Vec::new());
        page.write_to(&mut png, ImageFormat::Png)?;
        Ok(png.into_inner())
    }
}

struct BrokenRenderer;

#[async_trait]
impl PageRasterizer for BrokenRenderer {
    async fn rasterize(&self, _pdf: &[u8], _page_number: i64, _dpi: u32) -> Result<Vec<u8>> {
        bail!("renderer crashed")
    }
}

struct OneImage;

#[async_trait]
impl ImageDetector for OneImage {
    async fn detect(&self, _page_png: &[u8]) -> Result<Vec<DetectedRegion>> {
        Ok(vec![DetectedRegion {
            x: 10,
            y: 20,
            width: 40,
            height: 30,
        }])
    }
}

struct Env {
    _tmp: TempDir,
    pool: SqlitePool,
    services: Services,
}

impl Env {
    async fn conn(&self) -> PoolConnection<Sqlite> {
        self.pool.acquire().await.unwrap()
    }

    async fn tick(&mut self, options: &DaemonOptions) -> TickOutcome {
        tick(&self.pool, &mut self.services, options).await.unwrap()
    }
}

async fn setup() -> Env {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let config_path = root.join("patty.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/data/patty.sqlite\"\n\n[storage]\nroot = \"{}/blobs\"\n",
            root.display(),
            root.display()
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let mut services = Services::from_config(&config).unwrap();
    services.rasterizer = Box::new(BlankPage);

    Env {
        _tmp: tmp,
        pool,
        services,
    }
}

fn options() -> DaemonOptions {
    DaemonOptions {
        extraction_parallelism: 1,
        classification_parallelism: 20,
        adaptation_parallelism: 1,
        pause: Duration::ZERO,
        pulse_url: None,
    }
}

fn dummy() -> LlmModel {
    LlmModel::dummy("dummy-1")
}

fn specification() -> ResponseSpecification {
    ResponseSpecification {
        format: FormatKind::JsonSchema,
        capabilities: ExerciseCapabilities::uniform(
            ComponentFlags::default()
                .with(ComponentKind::Text)
                .with(ComponentKind::Whitespace)
                .with(ComponentKind::MultipleChoicesInput),
        ),
    }
}

fn settings(identity: Option<&str>, system_prompt: &str) -> SettingsInput {
    SettingsInput {
        identity: identity.map(|name| SettingsIdentity {
            name: name.to_string(),
            version: "current".to_string(),
        }),
        system_prompt: system_prompt.to_string(),
        response_specification: specification(),
    }
}

fn text(text: &str) -> InputExercise {
    InputExercise {
        text: Some(text.to_string()),
        ..Default::default()
    }
}

/// Register a PDF without parsing it; the blank-page rasterizer ignores the bytes.
async fn fake_pdf(env: &Env, pages_count: i64) -> String {
    let bytes = format!("%PDF-1.4 fake {} pages", pages_count).into_bytes();
    let sha256 = sha256_hex(&bytes);
    env.services
        .blobs
        .put(&pdf_key(&sha256), &bytes)
        .await
        .unwrap();
    let mut conn = env.conn().await;
    store::pdfs::upsert_pdf_file(&mut conn, &sha256, bytes.len() as i64, pages_count, "fake.pdf")
        .await
        .unwrap();
    sha256
}

async fn sandbox_extraction(env: &Env, sha256: &str, first: i64, pages: i64, prompt: &str) -> Vec<i64> {
    let mut conn = env.conn().await;
    let model = dummy();
    create_extraction_batch(
        &mut conn,
        &ExtractionBatchRequest {
            created_by: "alice",
            pdf_sha256: sha256,
            first_page_number: first,
            pages_count: Some(pages),
            prompt,
            model: &model,
            run_classification: false,
            model_for_adaptation: None,
            textbook: None,
        },
    )
    .await
    .unwrap()
    .page_extraction_ids
}

async fn chunk_of_page_extraction(env: &Env, page_extraction_id: i64) -> i64 {
    let mut conn = env.conn().await;
    sqlx::query_scalar("SELECT id FROM classification_chunks WHERE page_extraction_id = ?")
        .bind(page_extraction_id)
        .fetch_one(&mut *conn)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sandbox_adaptation_happy_path() {
    let mut env = setup().await;
    let created = {
        let mut conn = env.conn().await;
        create_adaptation_batch(
            &mut conn,
            "alice",
            &settings(None, "Blah."),
            &dummy(),
            &[text("Complète avec …")],
        )
        .await
        .unwrap()
    };

    let outcome = env.tick(&options()).await;
    assert_eq!(outcome, TickOutcome::Adaptation(created.adaptation_ids.clone()));

    let mut conn = env.conn().await;
    let adaptation = store::adaptation::get_adaptation(&mut conn, created.adaptation_ids[0])
        .await
        .unwrap();
    assert_eq!(
        adaptation.initial_assistant_response.as_ref().map(|r| r.kind()),
        Some("success")
    );
    assert_eq!(adaptation.raw_llm_conversations.len(), 1);
    assert!(adaptation.adjustments.is_empty());
    drop(conn);

    assert_eq!(env.tick(&options()).await, TickOutcome::Idle);
}

#[tokio::test]
async fn test_adjustment_after_not_json() {
    let env = setup().await;
    let mut conn = env.conn().await;
    let created = create_adaptation_batch(
        &mut conn,
        "alice",
        &settings(None, "Blah."),
        &dummy(),
        &[text("Complète avec le bon mot.")],
    )
    .await
    .unwrap();
    let id = created.adaptation_ids[0];

    store::adaptation::set_initial_response(
        &mut conn,
        id,
        &AdaptationResponse::NotJsonError { text: "Hi!".into() },
        &RawConversation {
            method: "dummy.complete".into(),
            params: json!({}),
            response: json!({"content": "Hi!"}),
        },
    )
    .await
    .unwrap();

    let adaptation = store::adaptation::get_adaptation(&mut conn, id).await.unwrap();
    let settings = store::classification::get_adaptation_settings(&mut conn, created.settings_id)
        .await
        .unwrap();
    let messages = adjustment_messages(&mut conn, &adaptation, &settings, "Please return JSON")
        .await
        .unwrap();
    assert_eq!(
        messages,
        vec![
            Message::system("Blah."),
            Message::user("Complète avec le bon mot."),
            Message::AssistantNotJson {
                content: "Hi!".into()
            },
            Message::user("Please return JSON"),
        ]
    );

    let adjusted = adjust(&mut conn, &env.services.llm, id, "Please return JSON")
        .await
        .unwrap();
    assert_eq!(adjusted.adjustments.len(), 1);
    assert_eq!(adjusted.adjustments[0].user_prompt, "Please return JSON");
    assert_eq!(adjusted.adjustments[0].assistant_response.kind(), "success");
    assert_eq!(adjusted.raw_llm_conversations.len(), 2);

    let reloaded = store::adaptation::get_adaptation(&mut conn, id).await.unwrap();
    assert_eq!(reloaded, adjusted);
}

#[tokio::test]
async fn test_adjustment_chain_replays_every_turn() {
    let mut env = setup().await;
    let created = {
        let mut conn = env.conn().await;
        create_adaptation_batch(
            &mut conn,
            "alice",
            &settings(None, "Blah."),
            &dummy(),
            &[text("Complète avec le bon mot.")],
        )
        .await
        .unwrap()
    };
    let id = created.adaptation_ids[0];
    env.tick(&options()).await;

    let mut conn = env.conn().await;
    for prompt in ["Merci", "Unknown error", "Encore"] {
        adjust(&mut conn, &env.services.llm, id, prompt).await.unwrap();
    }

    let adaptation = store::adaptation::get_adaptation(&mut conn, id).await.unwrap();
    let kinds: Vec<_> = adaptation
        .adjustments
        .iter()
        .map(|a| (a.user_prompt.as_str(), a.assistant_response.kind()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("Merci", "success"),
            ("Unknown error", "unknown-error"),
            ("Encore", "success"),
        ]
    );
    assert_eq!(
        adaptation.raw_llm_conversations.len(),
        1 + adaptation.adjustments.len()
    );

    let settings = store::classification::get_adaptation_settings(&mut conn, created.settings_id)
        .await
        .unwrap();
    let messages = adjustment_messages(&mut conn, &adaptation, &settings, "Fin")
        .await
        .unwrap();
    assert_eq!(messages.len(), 9, "{:#?}", messages);
    assert_eq!(messages[0], Message::system("Blah."));
    assert_eq!(messages[1], Message::user("Complète avec le bon mot."));
    assert!(matches!(messages[2], Message::Assistant { .. }));
    assert_eq!(messages[3], Message::user("Merci"));
    assert!(matches!(messages[4], Message::Assistant { .. }));
    // The failed turn leaves only its prompt.
    assert_eq!(messages[5], Message::user("Unknown error"));
    assert_eq!(messages[6], Message::user("Encore"));
    assert!(matches!(messages[7], Message::Assistant { .. }));
    assert_eq!(messages[8], Message::user("Fin"));
}

#[tokio::test]
async fn test_concurrent_adjustments_are_all_kept() {
    let mut env = setup().await;
    let created = {
        let mut conn = env.conn().await;
        create_adaptation_batch(
            &mut conn,
            "alice",
            &settings(None, "Blah."),
            &dummy(),
            &[text("Complète avec le bon mot.")],
        )
        .await
        .unwrap()
    };
    let id = created.adaptation_ids[0];
    env.tick(&options()).await;

    let slow = LlmClient::from_config(&LlmConfig {
        dummy: DummyConfig {
            sleep_ms: 50,
            ..Default::default()
        },
        ..Default::default()
    })
    .unwrap();
    let mut first = env.conn().await;
    let mut second = env.conn().await;
    let (a, b) = tokio::join!(
        adjust(&mut first, &slow, id, "Encore"),
        adjust(&mut second, &slow, id, "Plus court"),
    );
    a.unwrap();
    b.unwrap();

    let adaptation = store::adaptation::get_adaptation(&mut first, id).await.unwrap();
    assert_eq!(adaptation.adjustments.len(), 2);
    assert_eq!(adaptation.raw_llm_conversations.len(), 3);
    let mut prompts: Vec<_> = adaptation
        .adjustments
        .iter()
        .map(|a| a.user_prompt.as_str())
        .collect();
    prompts.sort();
    assert_eq!(prompts, vec!["Encore", "Plus court"]);
}

#[tokio::test]
async fn test_adaptation_faults_are_persisted() {
    let mut env = setup().await;
    let created = {
        let mut conn = env.conn().await;
        create_adaptation_batch(
            &mut conn,
            "alice",
            &settings(None, "Blah."),
            &dummy(),
            &[text("Not JSON"), text("Invalid JSON"), text("Unknown error")],
        )
        .await
        .unwrap()
    };

    let options = DaemonOptions {
        adaptation_parallelism: 3,
        ..options()
    };
    assert_eq!(
        env.tick(&options).await,
        TickOutcome::Adaptation(created.adaptation_ids.clone())
    );

    let mut conn = env.conn().await;
    let mut responses = Vec::new();
    for id in &created.adaptation_ids {
        let adaptation = store::adaptation::get_adaptation(&mut conn, *id).await.unwrap();
        assert_eq!(adaptation.raw_llm_conversations.len(), 1);
        responses.push(adaptation.initial_assistant_response.unwrap());
    }
    assert_eq!(
        responses,
        vec![
            AdaptationResponse::NotJsonError {
                text: "This is not JSON.".into()
            },
            AdaptationResponse::InvalidJsonError { parsed: json!({}) },
            AdaptationResponse::UnknownError {},
        ]
    );
    drop(conn);

    // Faults are terminal: nothing is resubmitted.
    assert_eq!(env.tick(&options).await, TickOutcome::Idle);
}

#[tokio::test]
async fn test_textbook_extraction_classification_adaptation_chain() {
    let mut env = setup().await;
    let sha256 = fake_pdf(&env, 20).await;

    let (textbook, batch) = {
        let mut conn = env.conn().await;
        let textbook =
            store::pdfs::insert_textbook(&mut conn, "alice", "Grammaire CE2", None, Some(2021), None)
                .await
                .unwrap();
        for class in ["CompleteMots", "Souligne"] {
            resolve_adaptation_settings(&mut conn, "alice", &settings(Some(class), "Blah."))
                .await
                .unwrap();
        }
        let model = dummy();
        let batch = create_extraction_batch(
            &mut conn,
            &ExtractionBatchRequest {
                created_by: "alice",
                pdf_sha256: &sha256,
                first_page_number: 10,
                pages_count: Some(3),
                prompt: "Extract the exercises.",
                model: &model,
                run_classification: false,
                model_for_adaptation: Some(&model),
                textbook: Some(TextbookTarget {
                    textbook_id: textbook.id,
                    first_textbook_page_number: 40,
                }),
            },
        )
        .await
        .unwrap();
        (textbook, batch)
    };
    assert!(batch.textbook);
    assert_eq!(batch.page_extraction_ids.len(), 3);

    for id in &batch.page_extraction_ids {
        assert_eq!(env.tick(&options()).await, TickOutcome::Extraction(vec![*id]));
    }

    let mut conn = env.conn().await;
    for (offset, id) in batch.page_extraction_ids.iter().enumerate() {
        let page_extraction = store::extraction::get_page_extraction(&mut conn, *id)
            .await
            .unwrap();
        assert_eq!(page_extraction.pdf_page_number, 10 + offset as i64);
        assert!(page_extraction
            .assistant_response
            .as_ref()
            .is_some_and(|r| r.is_success()));

        let exercises = store::exercises::exercises_of_page_extraction(&mut conn, *id)
            .await
            .unwrap();
        assert_eq!(exercises.len(), 2);
        for exercise in &exercises {
            match &exercise.location {
                ExerciseLocation::InTextbook {
                    textbook: t,
                    page,
                    removed_from_textbook,
                    ..
                } => {
                    assert_eq!(*t, textbook.id);
                    assert_eq!(*page, 40 + offset as i64);
                    assert!(!removed_from_textbook);
                }
                other => panic!("unexpected location {:?}", other),
            }
            let full_text = exercise.full_text().unwrap();
            assert!(!full_text.is_empty());
            assert!(!full_text.contains("{p"));
        }
    }
    drop(conn);

    // Pdf page 12 of a range starting at 10 is textbook page 42.
    let mut conn = env.conn().await;
    let last = store::exercises::exercises_of_page_extraction(&mut conn, batch.page_extraction_ids[2])
        .await
        .unwrap();
    assert_eq!(last[0].location.page(), Some(42));
    drop(conn);

    for id in &batch.page_extraction_ids {
        let chunk = chunk_of_page_extraction(&env, *id).await;
        match env.tick(&options()).await {
            TickOutcome::Classification(ids) => assert_eq!(ids.len(), 2),
            other => panic!("expected classification, got {:?}", other),
        }

        let mut conn = env.conn().await;
        let classifications = store::classification::classifications_of_chunk(&mut conn, chunk)
            .await
            .unwrap();
        let mut names = Vec::new();
        for classification in &classifications {
            let class_id = classification.exercise_class_id.unwrap();
            assert!(classification.classified_at.is_some());
            names.push(store::classification::get_class(&mut conn, class_id).await.unwrap().name);
        }
        assert_eq!(names, vec!["CompleteMots", "Souligne"]);
        assert_eq!(
            store::adaptation::adaptation_ids_of_chunk(&mut conn, chunk)
                .await
                .unwrap()
                .len(),
            2
        );
    }
    let mut conn = env.conn().await;
    assert_eq!(store::classification::oldest_pending_chunk(&mut conn).await.unwrap(), None);
    assert_eq!(store::adaptation::count_pending_adaptations(&mut conn).await.unwrap(), 6);
    drop(conn);

    let options = DaemonOptions {
        adaptation_parallelism: 3,
        ..options()
    };
    for _ in 0..2 {
        match env.tick(&options).await {
            TickOutcome::Adaptation(ids) => assert_eq!(ids.len(), 3),
            other => panic!("expected adaptation, got {:?}", other),
        }
    }
    assert_eq!(env.tick(&options).await, TickOutcome::Idle);

    let mut conn = env.conn().await;
    for page_extraction_id in &batch.page_extraction_ids {
        let chunk = chunk_of_page_extraction(&env, *page_extraction_id).await;
        for id in store::adaptation::adaptation_ids_of_chunk(&mut conn, chunk)
            .await
            .unwrap()
        {
            let adaptation = store::adaptation::get_adaptation(&mut conn, id).await.unwrap();
            assert_eq!(
                adaptation.initial_assistant_response.as_ref().map(|r| r.kind()),
                Some("success")
            );
            assert_eq!(adaptation.model, dummy());

            let settings =
                store::classification::get_adaptation_settings(&mut conn, adaptation.settings_id)
                    .await
                    .unwrap();
            let class = store::classification::get_class(&mut conn, settings.exercise_class_id.unwrap())
                .await
                .unwrap();
            assert_eq!(class.latest_strategy_settings_id, Some(settings.id));

            assert_eq!(
                lineage::adaptation_origin(&mut conn, id).await.unwrap(),
                Origin::TextbookExtractionBatch {
                    batch: batch.batch_id,
                    textbook: textbook.id,
                }
            );
        }
    }

    let stats = collect_stats(&mut conn).await.unwrap();
    assert_eq!(stats.exercises, 6);
    assert_eq!(stats.adaptations, 6);
    assert_eq!(stats.pending_extractions, 0);
    assert_eq!(stats.pending_classifications, 0);
    assert_eq!(stats.pending_adaptations, 0);
}

#[tokio::test]
async fn test_extraction_has_priority_over_adaptation() {
    let mut env = setup().await;
    let sha256 = fake_pdf(&env, 1).await;
    let inputs: Vec<InputExercise> = (1..=50).map(|i| text(&format!("Exercice {}", i))).collect();
    {
        let mut conn = env.conn().await;
        create_adaptation_batch(&mut conn, "alice", &settings(None, "Blah."), &dummy(), &inputs)
            .await
            .unwrap();
    }
    let page_extractions = sandbox_extraction(&env, &sha256, 1, 1, "Extract.").await;

    let options = DaemonOptions {
        adaptation_parallelism: 50,
        ..options()
    };
    assert_eq!(
        env.tick(&options).await,
        TickOutcome::Extraction(page_extractions)
    );

    let mut conn = env.conn().await;
    assert_eq!(store::adaptation::count_pending_adaptations(&mut conn).await.unwrap(), 50);
    drop(conn);

    match env.tick(&options).await {
        TickOutcome::Adaptation(ids) => assert_eq!(ids.len(), 50),
        other => panic!("expected adaptation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sandbox_extraction_locations_and_images() {
    let mut env = setup().await;
    env.services.detector = Box::new(OneImage);
    let sha256 = fake_pdf(&env, 10).await;
    let ids = sandbox_extraction(&env, &sha256, 7, 1, "Extract.").await;

    assert_eq!(env.tick(&options()).await, TickOutcome::Extraction(ids.clone()));

    let mut conn = env.conn().await;
    let images = store::extraction::exercise_images_of_page_extraction(&mut conn, ids[0])
        .await
        .unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].0, "p7c1");
    assert!(env.services.blobs.exists(&images[0].1).await.unwrap());

    let exercises = store::exercises::exercises_of_page_extraction(&mut conn, ids[0])
        .await
        .unwrap();
    let numbers: Vec<_> = exercises
        .iter()
        .map(|e| e.location.clone())
        .collect();
    assert_eq!(
        numbers,
        vec![
            ExerciseLocation::MaybePageAndNumber {
                page: Some(7),
                number: Some("1".into())
            },
            ExerciseLocation::MaybePageAndNumber {
                page: Some(7),
                number: Some("2".into())
            },
        ]
    );
    match &exercises[1].content {
        ExerciseContent::Adaptable {
            instruction_hint_example_text,
            statement_text,
            ..
        } => {
            assert_eq!(
                instruction_hint_example_text.as_deref(),
                Some("Souligne les verbes.\nUn verbe se conjugue.")
            );
            assert_eq!(statement_text.as_deref(), Some("Les enfants jouent dans la cour."));
        }
        other => panic!("unexpected content {:?}", other),
    }

    // Without run_classification no chunk is created.
    assert_eq!(store::classification::oldest_pending_chunk(&mut conn).await.unwrap(), None);
}

#[tokio::test]
async fn test_extraction_failures_are_terminal() {
    let mut env = setup().await;
    let sha256 = fake_pdf(&env, 2).await;
    let not_json = sandbox_extraction(&env, &sha256, 1, 1, "Not JSON").await;
    assert_eq!(env.tick(&options()).await, TickOutcome::Extraction(not_json.clone()));

    env.services.rasterizer = Box::new(BrokenRenderer);
    let broken = sandbox_extraction(&env, &sha256, 2, 1, "Extract.").await;
    assert_eq!(env.tick(&options()).await, TickOutcome::Extraction(broken.clone()));

    let mut conn = env.conn().await;
    let first = store::extraction::get_page_extraction(&mut conn, not_json[0]).await.unwrap();
    assert_eq!(
        first.assistant_response,
        Some(PageExtractionResponse::Error(ExtractionError::NotJson {
            text: "This is not JSON.".into()
        }))
    );
    let second = store::extraction::get_page_extraction(&mut conn, broken[0]).await.unwrap();
    assert_eq!(
        second.assistant_response,
        Some(PageExtractionResponse::Error(ExtractionError::Unknown {}))
    );
    drop(conn);

    assert_eq!(env.tick(&options()).await, TickOutcome::Idle);
}

#[tokio::test]
async fn test_sandbox_classification_chains_adaptation() {
    let mut env = setup().await;
    let created = {
        let mut conn = env.conn().await;
        resolve_adaptation_settings(&mut conn, "alice", &settings(Some("VraiFaux"), "Blah."))
            .await
            .unwrap();
        let model = dummy();
        create_classification_batch(
            &mut conn,
            "alice",
            Some(&model),
            &[
                InputExercise {
                    instruction_hint_example_text: Some("Vrai ou faux ?".into()),
                    statement_text: Some("Le chat aboie.".into()),
                    ..Default::default()
                },
                // Classified from an empty instruction; the label set still applies.
                InputExercise {
                    statement_text: Some("Écris une phrase.".into()),
                    ..Default::default()
                },
            ],
        )
        .await
        .unwrap()
    };

    assert_eq!(
        env.tick(&options()).await,
        TickOutcome::Classification(created.classification_ids.clone())
    );

    let mut conn = env.conn().await;
    let classifications =
        store::classification::classifications_of_chunk(&mut conn, created.chunk_id)
            .await
            .unwrap();
    let vrai_faux = store::classification::find_class_by_name(&mut conn, "VraiFaux")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(classifications[0].exercise_class_id, Some(vrai_faux.id));
    let other = store::classification::get_class(
        &mut conn,
        classifications[1].exercise_class_id.unwrap(),
    )
    .await
    .unwrap();
    assert!(patty::classifier::KNOWN_CLASSES.contains(&other.name.as_str()));
    assert_eq!(
        lineage::exercise_class_origin(&mut conn, other.id).await.unwrap(),
        Origin::SandboxClassificationBatch {
            batch: created.batch_id
        }
    );

    // Only the class with settings gets an adaptation.
    let adaptations = store::adaptation::adaptation_ids_of_chunk(&mut conn, created.chunk_id)
        .await
        .unwrap();
    assert_eq!(adaptations.len(), 1);
    let adaptation = store::adaptation::get_adaptation(&mut conn, adaptations[0])
        .await
        .unwrap();
    assert_eq!(adaptation.exercise_id, created.exercise_ids[0]);
    drop(conn);

    // A fully classified chunk is never selected again.
    assert_eq!(
        env.tick(&options()).await,
        TickOutcome::Adaptation(adaptations)
    );
}

#[tokio::test]
async fn test_settings_history() {
    let env = setup().await;
    let mut conn = env.conn().await;

    let first = resolve_adaptation_settings(&mut conn, "alice", &settings(Some("X"), "Blah."))
        .await
        .unwrap();
    assert_eq!(first.parent_id, None);

    let same = resolve_adaptation_settings(&mut conn, "bob", &settings(Some("X"), "Blah."))
        .await
        .unwrap();
    assert_eq!(same.id, first.id);

    let edited = resolve_adaptation_settings(&mut conn, "alice", &settings(Some("X"), "Blah blah."))
        .await
        .unwrap();
    assert_ne!(edited.id, first.id);
    assert_eq!(edited.parent_id, Some(first.id));

    let class = store::classification::find_class_by_name(&mut conn, "X")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(class.latest_strategy_settings_id, Some(edited.id));
    let previous = store::classification::get_adaptation_settings(&mut conn, edited.parent_id.unwrap())
        .await
        .unwrap();
    assert_eq!(previous.system_prompt, "Blah.");

    let mut old_version = settings(Some("X"), "Blah.");
    if let Some(identity) = old_version.identity.as_mut() {
        identity.version = "3".into();
    }
    assert!(resolve_adaptation_settings(&mut conn, "alice", &old_version)
        .await
        .is_err());
}

#[tokio::test]
async fn test_manual_edit_approval_and_export() {
    let mut env = setup().await;
    let created = {
        let mut conn = env.conn().await;
        create_adaptation_batch(
            &mut conn,
            "alice",
            &settings(None, "Blah."),
            &dummy(),
            &[text("Complète avec le bon mot.")],
        )
        .await
        .unwrap()
    };
    let id = created.adaptation_ids[0];

    let mut conn = env.conn().await;
    assert!(set_approval(&mut conn, id, Some("alice")).await.is_err());
    drop(conn);

    env.tick(&options()).await;

    let mut conn = env.conn().await;
    let invalid = json!({"format": "v1"});
    assert!(set_manual_edit(&mut conn, id, Some(&invalid)).await.is_err());

    let edit = json!({
        "format": "v1",
        "instruction": {"pages": [{"lines": [{"contents": [{"kind": "text", "text": "Relis."}]}]}]},
        "example": null,
        "hint": null,
        "statement": {"pages": []},
        "reference": null
    });
    let stored = set_manual_edit(&mut conn, id, Some(&edit)).await.unwrap();
    assert!(stored.is_some());

    set_approval(&mut conn, id, Some("alice")).await.unwrap();
    let exported = collect_approved(&mut conn, None).await.unwrap();
    assert_eq!(exported.len(), 1);
    assert_eq!(Some(&exported[0].exercise), stored.as_ref());
    assert_eq!(exported[0].approved_by.as_deref(), Some("alice"));
    assert_eq!(
        exported[0].origin,
        Origin::SandboxAdaptationBatch {
            batch: created.batch_id
        }
    );
    assert!(collect_approved(&mut conn, Some(1)).await.unwrap().is_empty());

    set_approval(&mut conn, id, None).await.unwrap();
    assert!(collect_approved(&mut conn, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_range_outside_pdf_is_rejected() {
    let env = setup().await;
    let sha256 = fake_pdf(&env, 3).await;
    let mut conn = env.conn().await;
    let model = dummy();
    let request = ExtractionBatchRequest {
        created_by: "alice",
        pdf_sha256: &sha256,
        first_page_number: 2,
        pages_count: Some(5),
        prompt: "Extract.",
        model: &model,
        run_classification: false,
        model_for_adaptation: None,
        textbook: None,
    };
    assert!(create_extraction_batch(&mut conn, &request).await.is_err());

    let huge = ExtractionBatchRequest {
        pages_count: Some(i64::MAX),
        ..request.clone()
    };
    let error = create_extraction_batch(&mut conn, &huge).await.unwrap_err();
    assert!(error.to_string().contains("outside the PDF"), "{}", error);

    let whole = create_extraction_batch(
        &mut conn,
        &ExtractionBatchRequest {
            pages_count: None,
            ..request
        },
    )
    .await
    .unwrap();
    assert_eq!(whole.page_extraction_ids.len(), 2);
}
