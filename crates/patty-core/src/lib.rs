//! # Patty Core
//!
//! Pure, I/O-free building blocks shared by the Patty pipeline:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`capabilities`] | Per-role component flags that narrow an exercise type |
//! | [`adapted`] | The adapted-exercise data format and its capability-aware validator |
//! | [`schema`] | JSON Schema emission for LLM response-format negotiation |
//! | [`extracted`] | Exercises as returned by the page-extraction prompt |
//! | [`responses`] | Persisted assistant-response envelopes |
//! | [`provenance`] | Tagged creation records ("who made this?") |
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem code.

pub mod adapted;
pub mod capabilities;
pub mod extracted;
pub mod provenance;
pub mod responses;
pub mod schema;

pub use adapted::{
    AdaptedExercise, Component, ExerciseFormat, ExerciseType, Line, Page, Pages, ValidationError,
};
pub use capabilities::{ComponentFlags, ComponentKind, ExerciseCapabilities, Role};
pub use extracted::ExtractedExercise;
pub use responses::{
    AdaptationResponse, Adjustment, FormatKind, PageExtractionResponse, RawConversation,
    ResponseSpecification,
};
pub use schema::{make_exercise_type, make_schema, Recursion, SchemaOptions};
