//! Persisted entities, as loaded from SQLite.
//!
//! Creation and location records are the tagged sums of
//! [`patty_core::provenance`]; JSON columns are decoded into the
//! [`patty_core::responses`] envelopes.

use patty_core::provenance::{
    AdaptationCreation, ClassificationChunkCreation, ClassificationCreation, ExerciseClassCreation,
    ExerciseCreation, ExerciseLocation, PageExtractionCreation,
};
use patty_core::{
    AdaptationResponse, AdaptedExercise, Adjustment, PageExtractionResponse, RawConversation,
    ResponseSpecification,
};
use serde::{Deserialize, Serialize};

use crate::llm::LlmModel;

/// A content-addressed PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfFile {
    pub sha256: String,
    pub bytes_count: i64,
    pub pages_count: i64,
    pub known_file_names: Vec<String>,
}

/// Pages `[first_page_number, first_page_number + pages_count)` of a PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfFileRange {
    pub id: i64,
    pub pdf_file_sha256: String,
    pub first_page_number: i64,
    pub pages_count: i64,
}

impl PdfFileRange {
    pub fn pages(&self) -> std::ops::Range<i64> {
        self.first_page_number..self.first_page_number + self.pages_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Textbook {
    pub id: i64,
    pub title: String,
    pub publisher: Option<String>,
    pub year: Option<i64>,
    pub isbn: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub id: i64,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextbookExtractionBatch {
    pub id: i64,
    pub textbook_id: i64,
    pub pdf_file_range_id: i64,
    pub first_textbook_page_number: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageExtraction {
    pub id: i64,
    pub created: PageExtractionCreation,
    pub pdf_file_range_id: i64,
    pub pdf_page_number: i64,
    pub settings_id: i64,
    pub model: LlmModel,
    pub run_classification: bool,
    pub model_for_adaptation: Option<LlmModel>,
    pub assistant_response: Option<PageExtractionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExerciseContent {
    Adaptable {
        full_text: String,
        instruction_hint_example_text: Option<String>,
        statement_text: Option<String>,
    },
    External {
        original_file_name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exercise {
    pub id: i64,
    pub content: ExerciseContent,
    pub created: ExerciseCreation,
    pub location: ExerciseLocation,
}

impl Exercise {
    pub fn full_text(&self) -> Option<&str> {
        match &self.content {
            ExerciseContent::Adaptable { full_text, .. } => Some(full_text),
            ExerciseContent::External { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseClass {
    pub id: i64,
    pub name: String,
    pub created: ExerciseClassCreation,
    /// Head of the class's settings history.
    pub latest_strategy_settings_id: Option<i64>,
}

/// Immutable adaptation strategy settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationSettings {
    pub id: i64,
    pub exercise_class_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub system_prompt: String,
    pub response_specification: ResponseSpecification,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationChunk {
    pub id: i64,
    pub created: ClassificationChunkCreation,
    pub model_for_adaptation: Option<LlmModel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub id: i64,
    pub exercise_id: i64,
    pub created: ClassificationCreation,
    pub exercise_class_id: Option<i64>,
    pub classified_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Adaptation {
    pub id: i64,
    pub exercise_id: i64,
    pub settings_id: i64,
    pub model: LlmModel,
    pub created: AdaptationCreation,
    /// One entry per LLM call: index 0 is the initial call, then one per adjustment.
    pub raw_llm_conversations: Vec<RawConversation>,
    pub initial_assistant_response: Option<AdaptationResponse>,
    pub adjustments: Vec<Adjustment>,
    pub manual_edit: Option<AdaptedExercise>,
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
}

impl Adaptation {
    /// Most recent assistant response: last adjustment, else the initial one.
    pub fn latest_response(&self) -> Option<&AdaptationResponse> {
        self.adjustments
            .last()
            .map(|a| &a.assistant_response)
            .or(self.initial_assistant_response.as_ref())
    }

    /// Exercise to publish: manual edit, else latest successful response.
    pub fn final_exercise(&self) -> Option<&AdaptedExercise> {
        if let Some(edit) = &self.manual_edit {
            return Some(edit);
        }
        self.adjustments
            .iter()
            .rev()
            .map(|a| &a.assistant_response)
            .chain(self.initial_assistant_response.iter())
            .find_map(|r| r.exercise())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patty_core::{Line, Pages};

    fn exercise(word: &str) -> AdaptedExercise {
        AdaptedExercise {
            format: patty_core::ExerciseFormat::V1,
            instruction: Pages::single(vec![Line::from_words(word)]),
            example: None,
            hint: None,
            statement: Pages::default(),
            reference: None,
        }
    }

    fn adaptation() -> Adaptation {
        Adaptation {
            id: 1,
            exercise_id: 1,
            settings_id: 1,
            model: LlmModel::dummy("dummy-1"),
            created: AdaptationCreation::ByUser {
                username: "alice".into(),
            },
            raw_llm_conversations: vec![],
            initial_assistant_response: None,
            adjustments: vec![],
            manual_edit: None,
            approved_by: None,
            approved_at: None,
        }
    }

    #[test]
    fn final_exercise_prefers_manual_edit_then_latest_success() {
        let mut a = adaptation();
        assert!(a.final_exercise().is_none());

        a.initial_assistant_response = Some(AdaptationResponse::Success {
            exercise: exercise("initial"),
        });
        a.adjustments.push(Adjustment {
            user_prompt: "Again".into(),
            assistant_response: AdaptationResponse::Success {
                exercise: exercise("adjusted"),
            },
        });
        a.adjustments.push(Adjustment {
            user_prompt: "Once more".into(),
            assistant_response: AdaptationResponse::NotJsonError { text: "Hi!".into() },
        });
        assert_eq!(a.final_exercise(), Some(&exercise("adjusted")));
        assert_eq!(a.latest_response().map(|r| r.kind()), Some("not-json-error"));

        a.manual_edit = Some(exercise("edited"));
        assert_eq!(a.final_exercise(), Some(&exercise("edited")));
    }

    #[test]
    fn range_pages() {
        let range = PdfFileRange {
            id: 1,
            pdf_file_sha256: "x".into(),
            first_page_number: 10,
            pages_count: 3,
        };
        assert_eq!(range.pages().collect::<Vec<_>>(), vec![10, 11, 12]);
    }
}
