//! Persisted assistant-response envelopes.
//!
//! These are the JSON documents stored in `page_extractions.assistant_response`
//! and `adaptations.initial_assistant_response` / `adaptations.adjustments`.
//! New success versions are added as new variants; existing field names are
//! never renamed so older rows keep deserializing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapted::AdaptedExercise;
use crate::capabilities::ExerciseCapabilities;
use crate::extracted::{ExtractedExercise, ExtractedExerciseV1};

/// `{kind: success, version, exercises}` or `{kind: error, error, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PageExtractionResponse {
    Success(ExtractionSuccess),
    Error(ExtractionError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "lowercase")]
pub enum ExtractionSuccess {
    V1 { exercises: Vec<ExtractedExerciseV1> },
    V2 { exercises: Vec<ExtractedExercise> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "kebab-case")]
pub enum ExtractionError {
    InvalidJson { parsed: Value },
    NotJson { text: String },
    Unknown {},
}

impl PageExtractionResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, PageExtractionResponse::Success(_))
    }

    /// Extracted exercises upgraded to the current version; empty on error.
    pub fn exercises(&self) -> Vec<ExtractedExercise> {
        match self {
            PageExtractionResponse::Success(ExtractionSuccess::V1 { exercises }) => {
                exercises.iter().cloned().map(ExtractedExercise::from).collect()
            }
            PageExtractionResponse::Success(ExtractionSuccess::V2 { exercises }) => {
                exercises.clone()
            }
            PageExtractionResponse::Error(_) => Vec::new(),
        }
    }
}

/// Outcome of one adaptation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AdaptationResponse {
    Success { exercise: AdaptedExercise },
    InvalidJsonError { parsed: Value },
    NotJsonError { text: String },
    UnknownError {},
}

impl AdaptationResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            AdaptationResponse::Success { .. } => "success",
            AdaptationResponse::InvalidJsonError { .. } => "invalid-json-error",
            AdaptationResponse::NotJsonError { .. } => "not-json-error",
            AdaptationResponse::UnknownError {} => "unknown-error",
        }
    }

    pub fn exercise(&self) -> Option<&AdaptedExercise> {
        match self {
            AdaptationResponse::Success { exercise } => Some(exercise),
            _ => None,
        }
    }
}

/// A user follow-up prompt and the response it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub user_prompt: String,
    pub assistant_response: AdaptationResponse,
}

/// Verbatim record of one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawConversation {
    pub method: String,
    pub params: Value,
    pub response: Value,
}

/// How the model is asked to shape its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatKind {
    /// Plain text expected to contain JSON.
    Text,
    JsonObject,
    JsonSchema,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Text => "text",
            FormatKind::JsonObject => "json-object",
            FormatKind::JsonSchema => "json-schema",
        }
    }
}

/// Response format plus the capability subset of the expected exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseSpecification {
    pub format: FormatKind,
    pub capabilities: ExerciseCapabilities,
}
