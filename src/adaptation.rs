//! Adaptation stage and the interactive operations on an adaptation.
//!
//! `raw_llm_conversations[0]` is the initial call and
//! `raw_llm_conversations[i]` the call of `adjustments[i - 1]`.

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::{error, info, warn};

use patty_core::{
    make_exercise_type, AdaptationResponse, AdaptedExercise, Adjustment, RawConversation,
};

use crate::llm::{AdaptedExerciseShape, Completion, LlmClient, LlmError, Message};
use crate::models::{Adaptation, AdaptationSettings};
use crate::store;

fn shape_of(settings: &AdaptationSettings) -> AdaptedExerciseShape {
    AdaptedExerciseShape(make_exercise_type(
        settings.response_specification.capabilities,
    ))
}

/// Map an LLM outcome to the response recorded for it.
fn record(
    adaptation_id: i64,
    result: std::result::Result<Completion<AdaptedExercise>, LlmError>,
) -> (AdaptationResponse, RawConversation) {
    match result {
        Ok(completion) => (
            AdaptationResponse::Success {
                exercise: completion.validated,
            },
            completion.transcript,
        ),
        Err(LlmError::InvalidJson {
            parsed,
            reason,
            transcript,
        }) => {
            warn!(adaptation = adaptation_id, reason = %reason, "Adaptation reply has an invalid shape");
            (AdaptationResponse::InvalidJsonError { parsed }, transcript)
        }
        Err(LlmError::NotJson { text, transcript }) => {
            warn!(adaptation = adaptation_id, "Adaptation reply is not JSON");
            (AdaptationResponse::NotJsonError { text }, transcript)
        }
        Err(LlmError::Unknown { error, transcript }) => {
            error!(adaptation = adaptation_id, "Adaptation call failed: {}", error);
            (AdaptationResponse::UnknownError {}, transcript)
        }
    }
}

/// `[system(prompt), user(exercise text)]`.
async fn initial_messages(
    conn: &mut SqliteConnection,
    adaptation: &Adaptation,
    settings: &AdaptationSettings,
) -> Result<Vec<Message>> {
    let exercise = store::exercises::get_exercise(conn, adaptation.exercise_id).await?;
    let full_text = exercise.full_text().with_context(|| {
        format!(
            "Adaptation {} targets external exercise {}",
            adaptation.id, exercise.id
        )
    })?;
    Ok(vec![
        Message::system(settings.system_prompt.clone()),
        Message::user(full_text),
    ])
}

/// Submit up to `parallelism` pending adaptations in parallel. Returns their ids.
pub async fn submit_adaptations(
    conn: &mut SqliteConnection,
    llm: &LlmClient,
    parallelism: usize,
) -> Result<Vec<i64>> {
    let pending = store::adaptation::pending_adaptations(conn, parallelism).await?;

    let mut requests = Vec::with_capacity(pending.len());
    for adaptation in &pending {
        let settings =
            store::classification::get_adaptation_settings(conn, adaptation.settings_id).await?;
        let messages = initial_messages(conn, adaptation, &settings).await?;
        requests.push((adaptation, settings, messages));
    }

    let calls = requests.iter().map(|(adaptation, settings, messages)| async move {
        let result = llm
            .complete(
                &adaptation.model,
                messages,
                settings.response_specification.format,
                &shape_of(settings),
            )
            .await;
        record(adaptation.id, result)
    });
    let outcomes = join_all(calls).await;

    for (adaptation, (response, transcript)) in pending.iter().zip(outcomes) {
        store::adaptation::set_initial_response(conn, adaptation.id, &response, &transcript)
            .await?;
    }

    Ok(pending.iter().map(|a| a.id).collect())
}

/// Replay a previous reply as an assistant turn. Failed calls leave no turn.
fn assistant_message(response: &AdaptationResponse) -> Result<Option<Message>> {
    Ok(match response {
        AdaptationResponse::Success { exercise } => Some(Message::Assistant {
            content: serde_json::to_value(exercise)?,
        }),
        AdaptationResponse::InvalidJsonError { parsed } => Some(Message::AssistantInvalidJson {
            content: parsed.clone(),
        }),
        AdaptationResponse::NotJsonError { text } => Some(Message::AssistantNotJson {
            content: text.clone(),
        }),
        AdaptationResponse::UnknownError {} => None,
    })
}

/// The full conversation of an adaptation so far, ending with `user_prompt`.
pub async fn adjustment_messages(
    conn: &mut SqliteConnection,
    adaptation: &Adaptation,
    settings: &AdaptationSettings,
    user_prompt: &str,
) -> Result<Vec<Message>> {
    let Some(initial) = &adaptation.initial_assistant_response else {
        bail!("Adaptation {} has not been submitted yet", adaptation.id);
    };

    let mut messages = initial_messages(conn, adaptation, settings).await?;
    messages.extend(assistant_message(initial)?);
    for adjustment in &adaptation.adjustments {
        messages.push(Message::user(adjustment.user_prompt.clone()));
        messages.extend(assistant_message(&adjustment.assistant_response)?);
    }
    messages.push(Message::user(user_prompt));
    Ok(messages)
}

/// Ask the model to revise an adaptation, recording the new turn.
pub async fn adjust(
    conn: &mut SqliteConnection,
    llm: &LlmClient,
    adaptation_id: i64,
    user_prompt: &str,
) -> Result<Adaptation> {
    let adaptation = store::adaptation::get_adaptation(conn, adaptation_id).await?;
    let settings =
        store::classification::get_adaptation_settings(conn, adaptation.settings_id).await?;
    let messages = adjustment_messages(conn, &adaptation, &settings, user_prompt).await?;

    let result = llm
        .complete(
            &adaptation.model,
            &messages,
            settings.response_specification.format,
            &shape_of(&settings),
        )
        .await;
    let (assistant_response, transcript) = record(adaptation.id, result);
    info!(
        adaptation = adaptation.id,
        kind = assistant_response.kind(),
        "Adjustment recorded"
    );

    let adjustment = Adjustment {
        user_prompt: user_prompt.to_string(),
        assistant_response,
    };
    store::adaptation::append_adjustment(conn, adaptation.id, &adjustment, &transcript).await
}

/// Replace the published exercise with a hand-edited one, or clear the
/// edit with `None`. The edit must fit the settings' exercise type.
pub async fn set_manual_edit(
    conn: &mut SqliteConnection,
    adaptation_id: i64,
    edit: Option<&Value>,
) -> Result<Option<AdaptedExercise>> {
    let adaptation = store::adaptation::get_adaptation(conn, adaptation_id).await?;
    let exercise = match edit {
        Some(value) => {
            let settings =
                store::classification::get_adaptation_settings(conn, adaptation.settings_id)
                    .await?;
            let exercise = shape_of(&settings)
                .0
                .validate(value)
                .with_context(|| format!("Manual edit of adaptation {} rejected", adaptation_id))?;
            Some(exercise)
        }
        None => None,
    };
    store::adaptation::set_manual_edit(conn, adaptation.id, exercise.as_ref()).await?;
    Ok(exercise)
}

/// Mark an adaptation as approved by `username`, or withdraw approval.
pub async fn set_approval(
    conn: &mut SqliteConnection,
    adaptation_id: i64,
    username: Option<&str>,
) -> Result<()> {
    let adaptation = store::adaptation::get_adaptation(conn, adaptation_id).await?;
    if username.is_some() && adaptation.final_exercise().is_none() {
        bail!(
            "Adaptation {} has no successful response to approve",
            adaptation_id
        );
    }
    store::adaptation::set_approval(conn, adaptation.id, username).await
}
