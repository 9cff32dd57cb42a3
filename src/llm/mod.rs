//! Provider-agnostic LLM client.
//!
//! [`LlmClient::complete`] sends one conversation to one model and returns
//! either a validated reply or an [`LlmError`]. The raw transcript of the
//! call (`{method, params, response}`) is returned on every path:
//!
//! ```text
//! messages ──▶ provider wire format ──▶ call ──▶ strip ``` fences
//!                                          │            │
//!                                       unknown      parse JSON ──▶ not-json
//!                                                       │
//!                                                   validate ──▶ invalid-json
//!                                                       │
//!                                                    success
//! ```
//!
//! Providers:
//! - **[`dummy::DummyProvider`]**: canned replies for tests and demos.
//! - **[`openai::OpenAiProvider`]**: `/chat/completions`, strict JSON schema.
//! - **[`mistral::MistralProvider`]**: `/v1/chat/completions`, recursive
//!   definitions unfolded by default.
//!
//! Failed calls are never retried here. The pipeline stages persist every
//! outcome, and a user retries through an adjustment or a new record.

pub mod dummy;
pub mod mistral;
pub mod openai;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use patty_core::extracted::ExtractedExercise;
use patty_core::{
    make_schema, AdaptedExercise, ExerciseType, FormatKind, RawConversation, SchemaOptions,
};

use crate::config::LlmConfig;

/// Which backend serves a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Dummy,
    #[serde(rename = "openai")]
    OpenAi,
    Mistral,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Dummy => "dummy",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mistral => "mistral",
        }
    }
}

/// A model, as stored in `*.model` columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LlmModel {
    pub provider: ProviderKind,
    pub name: String,
}

pub const DUMMY_MODELS: [&str; 3] = ["dummy-1", "dummy-2", "dummy-3"];

impl LlmModel {
    pub fn dummy(name: &str) -> Self {
        LlmModel {
            provider: ProviderKind::Dummy,
            name: name.to_string(),
        }
    }
}

/// `dummy-1`, `openai:gpt-4o-2024-08-06`, `mistral:mistral-large-2411`.
impl FromStr for LlmModel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (provider, name) = match s.split_once(':') {
            Some(("dummy", name)) => (ProviderKind::Dummy, name),
            Some(("openai", name)) => (ProviderKind::OpenAi, name),
            Some(("mistral", name)) => (ProviderKind::Mistral, name),
            Some((other, _)) => bail!("Unknown LLM provider: '{}'", other),
            None => (ProviderKind::Dummy, s),
        };
        if name.is_empty() {
            bail!("Empty model name in '{}'", s);
        }
        if provider == ProviderKind::Dummy && !DUMMY_MODELS.contains(&name) {
            bail!(
                "Unknown dummy model: '{}'. Must be one of {}.",
                name,
                DUMMY_MODELS.join(", ")
            );
        }
        Ok(LlmModel {
            provider,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for LlmModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.provider {
            ProviderKind::Dummy => write!(f, "{}", self.name),
            other => write!(f, "{}:{}", other.as_str(), self.name),
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System { content: String },
    User { content: String },
    /// A user turn carrying a PNG image (page extraction).
    UserWithImage { content: String, image_png: Vec<u8> },
    Assistant { content: Value },
    /// A previous reply that parsed but did not validate, replayed verbatim.
    AssistantInvalidJson { content: Value },
    /// A previous reply that was not JSON, replayed verbatim.
    AssistantNotJson { content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Message::System { content }
            | Message::User { content }
            | Message::UserWithImage { content, .. }
            | Message::AssistantNotJson { content } => Some(content),
            Message::Assistant { .. } | Message::AssistantInvalidJson { .. } => None,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. } | Message::UserWithImage { .. })
    }
}

/// How image parts are written in a user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageUrlStyle {
    /// `{"image_url": {"url": "data:..."}}`
    Object,
    /// `{"image_url": "data:..."}`
    String,
}

/// Render messages in the chat-completions wire shape.
pub(crate) fn wire_messages(messages: &[Message], style: ImageUrlStyle) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            Message::System { content } => json!({"role": "system", "content": content}),
            Message::User { content } => json!({"role": "user", "content": content}),
            Message::UserWithImage { content, image_png } => {
                let url = format!(
                    "data:image/png;base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(image_png)
                );
                let image_url = match style {
                    ImageUrlStyle::Object => json!({"url": url}),
                    ImageUrlStyle::String => json!(url),
                };
                json!({
                    "role": "user",
                    "content": [
                        {"type": "text", "text": content},
                        {"type": "image_url", "image_url": image_url},
                    ]
                })
            }
            Message::Assistant { content } | Message::AssistantInvalidJson { content } => {
                json!({"role": "assistant", "content": content.to_string()})
            }
            Message::AssistantNotJson { content } => {
                json!({"role": "assistant", "content": content})
            }
        })
        .collect()
}

/// The declared reply shape: its name, JSON Schema and validator.
pub trait ResponseShape: Send + Sync {
    type Output: Send;

    fn name(&self) -> &str;
    fn schema(&self, options: &SchemaOptions) -> Value;
    fn validate(&self, value: &Value) -> std::result::Result<Self::Output, String>;
}

/// An adapted exercise narrowed by an [`ExerciseType`].
pub struct AdaptedExerciseShape(pub ExerciseType);

impl ResponseShape for AdaptedExerciseShape {
    type Output = AdaptedExercise;

    fn name(&self) -> &str {
        "adapted_exercise"
    }

    fn schema(&self, options: &SchemaOptions) -> Value {
        make_schema(&self.0, options)
    }

    fn validate(&self, value: &Value) -> std::result::Result<AdaptedExercise, String> {
        self.0.validate(value).map_err(|e| e.to_string())
    }
}

/// The list of exercises found on a page.
pub struct ExtractedExercisesShape;

impl ResponseShape for ExtractedExercisesShape {
    type Output = Vec<ExtractedExercise>;

    fn name(&self) -> &str {
        "extracted_exercises"
    }

    fn schema(&self, _options: &SchemaOptions) -> Value {
        let text = json!({"type": "string"});
        let nullable_text = json!({"anyOf": [{"type": "string"}, {"type": "null"}]});
        json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "id": nullable_text,
                    "numero": nullable_text,
                    "consignes": {"type": "array", "items": text},
                    "conseil": nullable_text,
                    "exemple": nullable_text,
                    "enonce": nullable_text,
                    "references": nullable_text,
                    "autre": nullable_text,
                    "images": {"type": "boolean"},
                    "type_images": nullable_text,
                },
                "required": ["id", "numero", "consignes", "conseil", "exemple", "enonce",
                             "references", "autre", "images", "type_images"],
                "additionalProperties": false,
            }
        })
    }

    fn validate(&self, value: &Value) -> std::result::Result<Vec<ExtractedExercise>, String> {
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())
    }
}

/// What a provider is asked to do for one call.
pub struct ProviderRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub format: FormatKind,
    pub shape_name: &'a str,
    /// Present iff `format` is [`FormatKind::JsonSchema`].
    pub schema: Option<Value>,
}

/// A provider's answer: the transcript, and the reply text or an error.
pub struct ProviderReply {
    pub transcript: RawConversation,
    pub content: std::result::Result<String, String>,
}

/// Backend adapter. Implementations build the wire request, perform the call
/// and always return a transcript.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// How this provider wants recursive definitions.
    fn schema_options(&self) -> SchemaOptions {
        SchemaOptions::default()
    }

    async fn call(&self, request: &ProviderRequest<'_>) -> ProviderReply;
}

/// Fault taxonomy of [`LlmClient::complete`]. Every variant keeps the transcript.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("reply is not JSON")]
    NotJson {
        text: String,
        transcript: RawConversation,
    },
    #[error("reply does not match the expected shape: {reason}")]
    InvalidJson {
        parsed: Value,
        reason: String,
        transcript: RawConversation,
    },
    #[error("provider call failed: {error}")]
    Unknown {
        error: String,
        transcript: RawConversation,
    },
}

impl LlmError {
    pub fn transcript(&self) -> &RawConversation {
        match self {
            LlmError::NotJson { transcript, .. }
            | LlmError::InvalidJson { transcript, .. }
            | LlmError::Unknown { transcript, .. } => transcript,
        }
    }
}

/// A validated reply.
#[derive(Debug, Clone)]
pub struct Completion<T> {
    pub transcript: RawConversation,
    pub validated: T,
}

/// Dispatches calls to the provider serving each model.
#[derive(Clone)]
pub struct LlmClient {
    providers: HashMap<ProviderKind, Arc<dyn LlmProvider>>,
}

impl LlmClient {
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// The dummy provider always; OpenAI and Mistral when configured.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut client =
            Self::empty().with_provider(Arc::new(dummy::DummyProvider::new(&config.dummy)));
        if let Some(openai) = &config.openai {
            client = client.with_provider(Arc::new(openai::OpenAiProvider::new(openai)?));
        }
        if let Some(mistral) = &config.mistral {
            client = client.with_provider(Arc::new(mistral::MistralProvider::new(mistral)?));
        }
        Ok(client)
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub async fn complete<S: ResponseShape>(
        &self,
        model: &LlmModel,
        messages: &[Message],
        format: FormatKind,
        shape: &S,
    ) -> std::result::Result<Completion<S::Output>, LlmError> {
        let Some(provider) = self.providers.get(&model.provider) else {
            let error = format!("LLM provider '{}' is not configured", model.provider.as_str());
            return Err(LlmError::Unknown {
                transcript: RawConversation {
                    method: format!("{}.unconfigured", model.provider.as_str()),
                    params: json!({"model": model.name}),
                    response: json!({"error": error}),
                },
                error,
            });
        };

        let schema = match format {
            FormatKind::JsonSchema => Some(shape.schema(&provider.schema_options())),
            FormatKind::Text | FormatKind::JsonObject => None,
        };
        let request = ProviderRequest {
            model: &model.name,
            messages,
            format,
            shape_name: shape.name(),
            schema,
        };

        let reply = provider.call(&request).await;
        let transcript = reply.transcript;
        let text = match reply.content {
            Ok(text) => text,
            Err(error) => return Err(LlmError::Unknown { error, transcript }),
        };

        let parsed: Value = match serde_json::from_str(strip_code_fences(&text)) {
            Ok(parsed) => parsed,
            Err(_) => return Err(LlmError::NotJson { text, transcript }),
        };

        match shape.validate(&parsed) {
            Ok(validated) => Ok(Completion {
                transcript,
                validated,
            }),
            Err(reason) => Err(LlmError::InvalidJson {
                parsed,
                reason,
                transcript,
            }),
        }
    }
}

/// Remove an optional surrounding Markdown code fence (```json or ```).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`), whether or not a newline follows it.
    let info_len = body
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(body.len());
    match body[info_len..].chars().next() {
        Some(c) if info_len > 0 && c.is_whitespace() => body[info_len..].trim(),
        _ => body.trim(),
    }
}

/// POST a chat request and return the decoded JSON body.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &Value,
) -> Result<Value> {
    let response = client
        .post(url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("API error {}: {}", status, body_text);
    }
    Ok(response.json().await?)
}

/// `choices[0].message.content` of a chat-completions response.
pub(crate) fn first_choice_content(response: &Value) -> Result<String> {
    let message = response
        .pointer("/choices/0/message")
        .ok_or_else(|| anyhow::anyhow!("Invalid response: missing choices[0].message"))?;
    if let Some(refusal) = message.get("refusal").and_then(|r| r.as_str()) {
        bail!("Model refused: {}", refusal);
    }
    message
        .get("content")
        .and_then(|c| c.as_str())
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("Invalid response: missing message content"))
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}
