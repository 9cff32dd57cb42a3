//! Mistral chat adapter.
//!
//! Same request shape as OpenAI with two differences: image parts carry a
//! bare data-URL string, and recursive `$ref`s are unfolded unless the
//! configuration asks for `refs`. Recorded methods are `chat.parse` and
//! `chat.complete`. Requires `MISTRAL_API_KEY`.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use patty_core::{FormatKind, RawConversation, Recursion, SchemaOptions};

use super::{
    first_choice_content, http_client, post_json, wire_messages, ImageUrlStyle, LlmProvider,
    ProviderKind, ProviderReply, ProviderRequest,
};
use crate::config::{ProviderConfig, RecursionMode};

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai";

pub struct MistralProvider {
    client: reqwest::Client,
    base_url: String,
    schema_options: SchemaOptions,
}

impl MistralProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let recursion = match config.recursion.unwrap_or(RecursionMode::Unfold) {
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

fn build_request(request: &ProviderRequest<'_>) -> (&'static str, Value) {
    let mut body = json!({
        "model": request.model,
        "messages": wire_messages(request.messages, ImageUrlStyle::String),
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
            "chat.parse"
        }
        (FormatKind::JsonObject, _) => {
            body["response_format"] = json!({"type": "json_object"});
            "chat.complete"
        }
        _ => "chat.complete",
    };
    (method, body)
}

#[async_trait]
impl LlmProvider for MistralProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
    }

    fn schema_options(&self) -> SchemaOptions {
        self.schema_options
    }

    async fn call(&self, request: &ProviderRequest<'_>) -> ProviderReply {
        let (method, params) = build_request(request);

        let response = match std::env::var("MISTRAL_API_KEY") {
            Ok(api_key) => {
                let url = format!("{}/v1/chat/completions", self.base_url);
                post_json(&self.client, &url, &api_key, &params).await
            }
            Err(_) => Err(anyhow::anyhow!("MISTRAL_API_KEY environment variable not set")),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    #[test]
    fn unfolds_by_default() {
        let provider = MistralProvider::new(&ProviderConfig::default()).unwrap();
        assert_eq!(
            provider.schema_options().recursion,
            Recursion::Unfold { depth: 3 }
        );
    }

    #[test]
    fn method_names() {
        let messages = [Message::user("Complète")];
        let mut request = ProviderRequest {
            model: "mistral-large-2411",
            messages: &messages,
            format: FormatKind::JsonSchema,
            shape_name: "adapted_exercise",
            schema: Some(json!({"type": "object"})),
        };
        assert_eq!(build_request(&request).0, "chat.parse");
        request.format = FormatKind::JsonObject;
        request.schema = None;
        let (method, body) = build_request(&request);
        assert_eq!(method, "chat.complete");
        assert_eq!(body["response_format"]["type"], "json_object");
    }
}
