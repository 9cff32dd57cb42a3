//! Deterministic provider for tests and demos.
//!
//! The reply is chosen from the last user message, then from the requested
//! shape:
//!
//! | Last user message | Reply |
//! |-------------------|-------|
//! | `Not JSON` | `This is not JSON.` |
//! | `Invalid JSON` | `{}` |
//! | `Unknown error` | provider error |
//! | anything else | a canned exercise (or exercise list) for the shape |
//!
//! `dummy-2` wraps replies in a ```` ```json ```` fence and `dummy-3` in a
//! bare ```` ``` ```` fence, which exercises fence stripping.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

use patty_core::RawConversation;

use super::{LlmProvider, ProviderKind, ProviderReply, ProviderRequest};
use crate::config::DummyConfig;

pub struct DummyProvider {
    sleep: Duration,
    jitter_ms: u64,
    rng: Mutex<StdRng>,
}

impl DummyProvider {
    pub fn new(config: &DummyConfig) -> Self {
        Self {
            sleep: Duration::from_millis(config.sleep_ms),
            jitter_ms: config.jitter_ms,
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
        }
    }

    fn delay(&self) -> Duration {
        if self.jitter_ms == 0 {
            return self.sleep;
        }
        let jitter = self
            .rng
            .lock()
            .map(|mut rng| rng.gen_range(0..=self.jitter_ms))
            .unwrap_or(0);
        self.sleep + Duration::from_millis(jitter)
    }
}

/// Reply for a canned request, or the error the provider raises.
fn canned_reply(last_user_message: Option<&str>, shape_name: &str) -> Result<String, String> {
    match last_user_message.map(str::trim) {
        Some("Not JSON") => Ok("This is not JSON.".to_string()),
        Some("Invalid JSON") => Ok("{}".to_string()),
        Some("Unknown error") => Err("Unknown error from dummy provider".to_string()),
        _ => Ok(match shape_name {
            "extracted_exercises" => canned_extracted_exercises().to_string(),
            _ => canned_adapted_exercise().to_string(),
        }),
    }
}

fn words(text: &str) -> Vec<Value> {
    let mut contents = Vec::new();
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            contents.push(json!({"kind": "whitespace"}));
        }
        contents.push(json!({"kind": "text", "text": word}));
    }
    contents
}

/// Text and whitespace everywhere, plus one multiple-choices input.
fn canned_adapted_exercise() -> Value {
    let mut statement = words("Le chat");
    statement.push(json!({"kind": "whitespace"}));
    statement.push(json!({
        "kind": "multipleChoicesInput",
        "choices": [
            {"contents": [{"kind": "text", "text": "dort"}]},
            {"contents": [{"kind": "text", "text": "dors"}]}
        ],
        "showChoicesByDefault": false
    }));
    statement.push(json!({"kind": "text", "text": "."}));

    json!({
        "format": "v1",
        "instruction": {"pages": [{"lines": [{"contents": words("Complète avec le bon mot.")}]}]},
        "example": null,
        "hint": null,
        "statement": {"pages": [{"lines": [{"contents": statement}]}]},
        "reference": null
    })
}

fn canned_extracted_exercises() -> Value {
    json!([
        {
            "id": "p1ex1",
            "numero": "1",
            "consignes": ["Complète avec le bon mot."],
            "conseil": null,
            "exemple": null,
            "enonce": "Le chat ... sur le mur.",
            "references": null,
            "autre": null,
            "images": false,
            "type_images": null
        },
        {
            "id": "p1ex2",
            "numero": "2",
            "consignes": ["Souligne les verbes."],
            "conseil": "Un verbe se conjugue.",
            "exemple": null,
            "enonce": "Les enfants jouent dans la cour.",
            "references": null,
            "autre": null,
            "images": false,
            "type_images": null
        }
    ])
}

#[async_trait]
impl LlmProvider for DummyProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Dummy
    }

    async fn call(&self, request: &ProviderRequest<'_>) -> ProviderReply {
        let last_user_message = request
            .messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .and_then(|m| m.text());

        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let content = canned_reply(last_user_message, request.shape_name).map(|reply| {
            match request.model {
                "dummy-2" => format!("```json\n{}\n```", reply),
                "dummy-3" => format!("```\n{}\n```", reply),
                _ => reply,
            }
        });

        let transcript = RawConversation {
            method: "dummy.complete".to_string(),
            params: json!({
                "model": request.model,
                "messages": request
                    .messages
                    .iter()
                    .map(|m| m.text().map(String::from).unwrap_or_else(|| "<assistant>".to_string()))
                    .collect::<Vec<_>>(),
                "response_format": request.format.as_str(),
                "shape": request.shape_name,
            }),
            response: match &content {
                Ok(text) => json!({"content": text}),
                Err(error) => json!({"error": error}),
            },
        };

        ProviderReply {
            transcript,
            content,
        }
    }
}
