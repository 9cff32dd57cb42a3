//! OpenAI chat-completions adapter.
//!
//! `json-schema` requests use `response_format = {type: json_schema, strict: true}`
//! and are recorded as `chat.completions.parse`; other formats are recorded
//! as `chat.completions.create`. Requires `OPENAI_API_KEY`.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use patty_core::{FormatKind, RawConversation, Recursion, SchemaOptions};

use super::{
    first_choice_content, http_client, post_json, wire_messages, ImageUrlStyle, LlmProvider,
    ProviderKind, ProviderReply, ProviderRequest,
};
use crate::config::{ProviderConfig, RecursionMode};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    schema_options: SchemaOptions,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let recursion = match config.recursion.unwrap_or(RecursionMode::Refs) {
            RecursionMode::Refs => Recursion::Refs,
            RecursionMode::Unfold => Recursion::Unfold {
                depth: config.unfold_depth,
            },
        };
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            schema_options: SchemaOptions { recursion },
        })
    }
}

/// Request body and recorded method name.
fn build_request(request: &ProviderRequest<'_>) -> (&'static str, Value) {
    let mut body = json!({
        "model": request.model,
        "messages": wire_messages(request.messages, ImageUrlStyle::Object),
    });
    let method = match (&request.format, &request.schema) {
        (FormatKind::JsonSchema, Some(schema)) => {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": request.shape_name,
                    "strict": true,
                    "schema": schema,
                }
            });
            "chat.completions.parse"
        }
        (FormatKind::JsonObject, _) => {
            body["response_format"] = json!({"type": "json_object"});
            "chat.completions.create"
        }
        _ => "chat.completions.create",
    };
    (method, body)
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn schema_options(&self) -> SchemaOptions {
        self.schema_options
    }

    async fn call(&self, request: &ProviderRequest<'_>) -> ProviderReply {
        let (method, params) = build_request(request);

        let response = match std::env::var("OPENAI_API_KEY") {
            Ok(api_key) => {
                let url = format!("{}/chat/completions", self.base_url);
                post_json(&self.client, &url, &api_key, &params).await
            }
            Err(_) => Err(anyhow::anyhow!("OPENAI_API_KEY environment variable not set")),
        };

        let (response, content) = match response {
            Ok(value) => {
                let content = first_choice_content(&value).map_err(|e| e.to_string());
                (value, content)
            }
            Err(e) => (json!({"error": e.to_string()}), Err(e.to_string())),
        };

        ProviderReply {
            transcript: RawConversation {
                method: method.to_string(),
                params,
                response,
            },
            content,
        }
    }
}
