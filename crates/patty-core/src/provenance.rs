//! Tagged creation records.
//!
//! Every derivable entity carries one of these sums saying how it came to
//! exist. They are stored as a `*_kind` discriminator column next to
//! nullable foreign keys; [`kind`](ExerciseCreation::kind) returns the
//! discriminator value. Dispatch is a plain exhaustive `match`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExerciseCreation {
    ByUser { username: String },
    ByPageExtraction { page_extraction: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExerciseLocation {
    MaybePageAndNumber {
        page: Option<i64>,
        number: Option<String>,
    },
    InTextbook {
        textbook: i64,
        page: i64,
        number: String,
        removed_from_textbook: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PageExtractionCreation {
    BySandboxBatch { batch: i64 },
    ByTextbook { textbook_batch: i64, removed: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClassificationChunkCreation {
    BySandboxBatch { batch: i64 },
    ByPageExtraction { page_extraction: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AdaptationCreation {
    ByUser { username: String },
    ByChunk { chunk: i64 },
    BySandboxBatch { batch: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExerciseClassCreation {
    ByUser { username: String },
    ByChunk { chunk: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClassificationCreation {
    ByUser { username: String },
    ByChunk { chunk: i64 },
}

/// Where a chain of creation records ends: a person or a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Origin {
    User { username: String },
    SandboxExtractionBatch { batch: i64 },
    SandboxClassificationBatch { batch: i64 },
    SandboxAdaptationBatch { batch: i64 },
    TextbookExtractionBatch { batch: i64, textbook: i64 },
}

impl ExerciseCreation {
    pub fn kind(&self) -> &'static str {
        match self {
            ExerciseCreation::ByUser { .. } => "by_user",
            ExerciseCreation::ByPageExtraction { .. } => "by_page_extraction",
        }
    }
}

impl ExerciseLocation {
    pub fn kind(&self) -> &'static str {
        match self {
            ExerciseLocation::MaybePageAndNumber { .. } => "maybe_page_and_number",
            ExerciseLocation::InTextbook { .. } => "textbook",
        }
    }

    pub fn page(&self) -> Option<i64> {
        match self {
            ExerciseLocation::MaybePageAndNumber { page, .. } => *page,
            ExerciseLocation::InTextbook { page, .. } => Some(*page),
        }
    }

    pub fn number(&self) -> Option<&str> {
        match self {
            ExerciseLocation::MaybePageAndNumber { number, .. } => number.as_deref(),
            ExerciseLocation::InTextbook { number, .. } => Some(number),
        }
    }
}

impl PageExtractionCreation {
    pub fn kind(&self) -> &'static str {
        match self {
            PageExtractionCreation::BySandboxBatch { .. } => "by_sandbox_batch",
            PageExtractionCreation::ByTextbook { .. } => "by_textbook",
        }
    }
}

impl ClassificationChunkCreation {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassificationChunkCreation::BySandboxBatch { .. } => "by_sandbox_batch",
            ClassificationChunkCreation::ByPageExtraction { .. } => "by_page_extraction",
        }
    }
}

impl AdaptationCreation {
    pub fn kind(&self) -> &'static str {
        match self {
            AdaptationCreation::ByUser { .. } => "by_user",
            AdaptationCreation::ByChunk { .. } => "by_chunk",
            AdaptationCreation::BySandboxBatch { .. } => "by_sandbox_batch",
        }
    }
}

impl ExerciseClassCreation {
    pub fn kind(&self) -> &'static str {
        match self {
            ExerciseClassCreation::ByUser { .. } => "by_user",
            ExerciseClassCreation::ByChunk { .. } => "by_chunk",
        }
    }
}

impl ClassificationCreation {
    pub fn kind(&self) -> &'static str {
        match self {
            ClassificationCreation::ByUser { .. } => "by_user",
            ClassificationCreation::ByChunk { .. } => "by_chunk",
        }
    }
}

/// Page of an exercise found on `pdf_page` of a textbook batch whose
/// range starts at `range_first_page` and maps to `first_textbook_page`.
pub fn textbook_page(first_textbook_page: i64, pdf_page: i64, range_first_page: i64) -> i64 {
    first_textbook_page + pdf_page - range_first_page
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discriminators_match_storage_values() {
        assert_eq!(
            ExerciseCreation::ByPageExtraction { page_extraction: 1 }.kind(),
            "by_page_extraction"
        );
        assert_eq!(
            AdaptationCreation::BySandboxBatch { batch: 2 }.kind(),
            "by_sandbox_batch"
        );
        assert_eq!(
            ExerciseLocation::InTextbook {
                textbook: 1,
                page: 42,
                number: "3".into(),
                removed_from_textbook: false
            }
            .kind(),
            "textbook"
        );
    }

    #[test]
    fn origin_serializes_tagged() {
        let origin = Origin::TextbookExtractionBatch {
            batch: 4,
            textbook: 9,
        };
        assert_eq!(
            serde_json::to_value(&origin).unwrap(),
            json!({"kind": "textbook-extraction-batch", "batch": 4, "textbook": 9})
        );
    }

    #[test]
    fn textbook_page_offsets_from_range_start() {
        assert_eq!(textbook_page(40, 12, 10), 42);
        assert_eq!(textbook_page(40, 10, 10), 40);
    }

    #[test]
    fn location_accessors() {
        let sandbox = ExerciseLocation::MaybePageAndNumber {
            page: Some(3),
            number: None,
        };
        assert_eq!(sandbox.page(), Some(3));
        assert_eq!(sandbox.number(), None);
    }
}
