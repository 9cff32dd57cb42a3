//! Text classifier for exercises.
//!
//! Input rows are `(instruction_hint_example_text, statement_text)` pairs with
//! missing parts already replaced by the empty string. Every returned label
//! is one of [`KNOWN_CLASSES`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::config::ClassificationConfig;
use crate::subprocess::{run_piped, shell};

pub const KNOWN_CLASSES: &[&str] = &[
    "CocheIntrus",
    "CocheMot",
    "CochePhrase",
    "Colorie",
    "CompleteLettres",
    "CompleteMots",
    "EditPhrase",
    "ExpressionEcrite",
    "OrdreAlphabetique",
    "RelieParUnTrait",
    "Souligne",
    "TransformeMot",
    "TransformePhrase",
    "VraiFaux",
];

const FALLBACK_CLASS: &str = "ExpressionEcrite";

#[async_trait]
pub trait ExerciseClassifier: Send + Sync {
    async fn classify(&self, rows: &[(String, String)]) -> Result<Vec<String>>;
}

/// Rule-based classifier over the instruction wording.
pub struct KeywordClassifier;

/// First matching rule wins; each rule lists words that must all occur.
const RULES: &[(&[&str], &str)] = &[
    (&["intrus"], "CocheIntrus"),
    (&["vrai", "faux"], "VraiFaux"),
    (&["relie"], "RelieParUnTrait"),
    (&["ordre alphab"], "OrdreAlphabetique"),
    (&["souligne"], "Souligne"),
    (&["entoure"], "Souligne"),
    (&["colorie"], "Colorie"),
    (&["coche", "phrase"], "CochePhrase"),
    (&["coche"], "CocheMot"),
    (&["complète", "lettre"], "CompleteLettres"),
    (&["complete", "lettre"], "CompleteLettres"),
    (&["complète"], "CompleteMots"),
    (&["complete"], "CompleteMots"),
    (&["transforme", "phrase"], "TransformePhrase"),
    (&["transforme"], "TransformeMot"),
    (&["mets au pluriel"], "TransformeMot"),
    (&["recopie"], "EditPhrase"),
    (&["corrige"], "EditPhrase"),
];

impl KeywordClassifier {
    pub fn classify_one(instruction: &str, statement: &str) -> &'static str {
        let instruction = instruction.to_lowercase();
        let statement = statement.to_lowercase();
        for text in [&instruction, &statement] {
            for (words, class) in RULES {
                if words.iter().all(|w| text.contains(*w)) {
                    return *class;
                }
            }
        }
        FALLBACK_CLASS
    }
}

#[async_trait]
impl ExerciseClassifier for KeywordClassifier {
    async fn classify(&self, rows: &[(String, String)]) -> Result<Vec<String>> {
        Ok(rows
            .iter()
            .map(|(instruction, statement)| Self::classify_one(instruction, statement).to_string())
            .collect())
    }
}

/// External model: JSON rows on stdin, a JSON array of labels on stdout.
pub struct CommandClassifier {
    command_line: String,
}

#[derive(Serialize)]
struct CommandRow<'a> {
    instruction_hint_example_text: &'a str,
    statement_text: &'a str,
}

impl CommandClassifier {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
        }
    }
}

#[async_trait]
impl ExerciseClassifier for CommandClassifier {
    async fn classify(&self, rows: &[(String, String)]) -> Result<Vec<String>> {
        let input: Vec<CommandRow> = rows
            .iter()
            .map(|(instruction, statement)| CommandRow {
                instruction_hint_example_text: instruction,
                statement_text: statement,
            })
            .collect();
        let stdout = run_piped(
            shell(&self.command_line),
            serde_json::to_vec(&input)?,
            "classifier",
        )
        .await?;
        let labels: Vec<String> =
            serde_json::from_slice(&stdout).context("Classifier did not print a JSON label list")?;

        if labels.len() != rows.len() {
            bail!(
                "Classifier returned {} labels for {} rows",
                labels.len(),
                rows.len()
            );
        }
        if let Some(unknown) = labels.iter().find(|l| !KNOWN_CLASSES.contains(&l.as_str())) {
            bail!("Classifier returned unknown label '{}'", unknown);
        }
        Ok(labels)
    }
}

/// Builds the configured classifier on first use and keeps it for the
/// life of the process.
pub struct LazyClassifier {
    config: ClassificationConfig,
    loaded: Option<Box<dyn ExerciseClassifier>>,
}

impl LazyClassifier {
    pub fn new(config: ClassificationConfig) -> Self {
        Self {
            config,
            loaded: None,
        }
    }

    /// Wrap an already-built classifier.
    pub fn preloaded(classifier: Box<dyn ExerciseClassifier>) -> Self {
        Self {
            config: ClassificationConfig::default(),
            loaded: Some(classifier),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn build(config: &ClassificationConfig) -> Result<Box<dyn ExerciseClassifier>> {
        match config.classifier.as_str() {
            "keyword" => Ok(Box::new(KeywordClassifier)),
            "command" => {
                let command = config
                    .command
                    .as_deref()
                    .context("classification.command is not set")?;
                Ok(Box::new(CommandClassifier::new(command)))
            }
            other => bail!("Unknown classifier: '{}'", other),
        }
    }

    pub async fn classify(&mut self, rows: &[(String, String)]) -> Result<Vec<String>> {
        if self.loaded.is_none() {
            info!(classifier = %self.config.classifier, "Loading classifier");
            self.loaded = Some(Self::build(&self.config)?);
        }
        match &self.loaded {
            Some(classifier) => classifier.classify(rows).await,
            None => bail!("Classifier failed to load"),
        }
    }
}
