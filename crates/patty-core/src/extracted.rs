//! Exercises as returned by the page-extraction prompt.
//!
//! The prompt asks the model for a JSON list of exercises with French
//! field names. Two versions are persisted: `v1` (text only) and `v2`
//! (adds the `images`/`type_images` hints). Both stay readable.
//!
//! Images detected on a page are referenced from the text with
//! `{p<page>c<index>}` placeholders.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// An extracted exercise, current (`v2`) version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedExercise {
    #[serde(default)]
    pub id: Option<String>,
    /// Free-form label: a digit, a letter or a title.
    #[serde(default, deserialize_with = "string_or_number")]
    pub numero: Option<String>,
    #[serde(default)]
    pub consignes: Vec<String>,
    #[serde(default)]
    pub conseil: Option<String>,
    #[serde(default)]
    pub exemple: Option<String>,
    #[serde(default)]
    pub enonce: Option<String>,
    #[serde(default)]
    pub references: Option<String>,
    #[serde(default)]
    pub autre: Option<String>,
    #[serde(default)]
    pub images: bool,
    #[serde(default)]
    pub type_images: Option<String>,
}

/// The `v1` shape, before image hints were introduced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedExerciseV1 {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub numero: Option<String>,
    #[serde(default)]
    pub consignes: Vec<String>,
    #[serde(default)]
    pub conseil: Option<String>,
    #[serde(default)]
    pub exemple: Option<String>,
    #[serde(default)]
    pub enonce: Option<String>,
    #[serde(default)]
    pub references: Option<String>,
    #[serde(default)]
    pub autre: Option<String>,
}

impl From<ExtractedExerciseV1> for ExtractedExercise {
    fn from(v1: ExtractedExerciseV1) -> Self {
        ExtractedExercise {
            id: v1.id,
            numero: v1.numero,
            consignes: v1.consignes,
            conseil: v1.conseil,
            exemple: v1.exemple,
            enonce: v1.enonce,
            references: v1.references,
            autre: v1.autre,
            images: false,
            type_images: None,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or a number for numero, got {}",
            other
        ))),
    }
}

fn join_non_empty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl ExtractedExercise {
    /// `consignes`, then `conseil`, then `exemple`, one per line.
    pub fn instruction_hint_example_text(&self) -> Option<String> {
        let text = join_non_empty(
            self.consignes
                .iter()
                .map(String::as_str)
                .chain(self.conseil.as_deref())
                .chain(self.exemple.as_deref()),
        );
        (!text.is_empty()).then_some(text)
    }

    pub fn statement_text(&self) -> Option<String> {
        self.enonce
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    /// Every text part in prompt order.
    pub fn full_text(&self) -> String {
        join_non_empty(
            self.consignes
                .iter()
                .map(String::as_str)
                .chain(self.conseil.as_deref())
                .chain(self.exemple.as_deref())
                .chain(self.enonce.as_deref())
                .chain(self.references.as_deref())
                .chain(self.autre.as_deref()),
        )
    }

    /// Remove `{pXcY}` placeholders whose identifier is not in `known`.
    pub fn strip_unknown_images(&mut self, known: &[String]) {
        for consigne in &mut self.consignes {
            *consigne = strip_placeholders(consigne, known);
        }
        for field in [
            &mut self.conseil,
            &mut self.exemple,
            &mut self.enonce,
            &mut self.references,
            &mut self.autre,
        ] {
            if let Some(text) = field.as_mut() {
                *text = strip_placeholders(text, known);
            }
        }
    }
}

/// Image identifier for the `index`-th region detected on `page` (both 1-based).
pub fn image_identifier(page: i64, index: usize) -> String {
    format!("p{}c{}", page, index)
}

/// Parse `p<digits>c<digits>`.
fn is_image_identifier(candidate: &str) -> bool {
    let Some(rest) = candidate.strip_prefix('p') else {
        return false;
    };
    let Some((page, index)) = rest.split_once('c') else {
        return false;
    };
    !page.is_empty()
        && !index.is_empty()
        && page.bytes().all(|b| b.is_ascii_digit())
        && index.bytes().all(|b| b.is_ascii_digit())
}

/// Drop `{pXcY}` placeholders naming images absent from `known`.
pub fn strip_placeholders(text: &str, known: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_image_identifier(&after[..close]) => {
                let identifier = &after[..close];
                if known.iter().any(|k| k == identifier) {
                    out.push_str(&rest[open..open + close + 2]);
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Whether `text` still contains any `{pXcY}` placeholder.
pub fn has_placeholder(text: &str) -> bool {
    strip_placeholders(text, &[]) != text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numero_accepts_numbers_and_strings() {
        let from_number: ExtractedExercise = serde_json::from_value(json!({"numero": 4})).unwrap();
        assert_eq!(from_number.numero.as_deref(), Some("4"));
        let from_string: ExtractedExercise =
            serde_json::from_value(json!({"numero": "Bilan"})).unwrap();
        assert_eq!(from_string.numero.as_deref(), Some("Bilan"));
        let missing: ExtractedExercise = serde_json::from_value(json!({"numero": null})).unwrap();
        assert!(missing.numero.is_none());
        assert!(serde_json::from_value::<ExtractedExercise>(json!({"numero": [1]})).is_err());
    }

    #[test]
    fn texts_join_in_order() {
        let exercise = ExtractedExercise {
            numero: Some("3".into()),
            consignes: vec!["Complète avec le bon mot.".into(), "Recopie.".into()],
            conseil: Some("Attention aux accords.".into()),
            exemple: None,
            enonce: Some("Le chat ... sur le mur.".into()),
            references: Some("Livre p. 12".into()),
            ..Default::default()
        };
        assert_eq!(
            exercise.instruction_hint_example_text().as_deref(),
            Some("Complète avec le bon mot.\nRecopie.\nAttention aux accords.")
        );
        assert_eq!(exercise.statement_text().as_deref(), Some("Le chat ... sur le mur."));
        assert_eq!(
            exercise.full_text(),
            "Complète avec le bon mot.\nRecopie.\nAttention aux accords.\nLe chat ... sur le mur.\nLivre p. 12"
        );
    }

    #[test]
    fn empty_parts_yield_none() {
        let exercise = ExtractedExercise {
            enonce: Some("   ".into()),
            ..Default::default()
        };
        assert!(exercise.instruction_hint_example_text().is_none());
        assert!(exercise.statement_text().is_none());
        assert_eq!(exercise.full_text(), "");
    }

    #[test]
    fn placeholders_for_unknown_images_are_removed() {
        let known = vec!["p1c1".to_string()];
        assert_eq!(
            strip_placeholders("Regarde {p1c1} puis {p1c2}.", &known),
            "Regarde {p1c1} puis ."
        );
        assert_eq!(strip_placeholders("{a} {p1c} {p12c3}", &[]), "{a} {p1c} ");
        assert!(has_placeholder("voir {p3c4}"));
        assert!(!has_placeholder("{not one}"));
    }

    #[test]
    fn strip_unknown_images_touches_every_field() {
        let mut exercise = ExtractedExercise {
            consignes: vec!["Observe {p2c1}.".into()],
            enonce: Some("{p2c2} Colorie.".into()),
            autre: Some("{p2c3}".into()),
            ..Default::default()
        };
        exercise.strip_unknown_images(&[]);
        assert!(!has_placeholder(&exercise.full_text()));
        assert_eq!(exercise.consignes[0], "Observe .");
    }

    #[test]
    fn v1_upgrades_without_images() {
        let v1: ExtractedExerciseV1 =
            serde_json::from_value(json!({"numero": "a", "consignes": ["Lis."]})).unwrap();
        let v2 = ExtractedExercise::from(v1);
        assert!(!v2.images);
        assert_eq!(v2.consignes, vec!["Lis."]);
    }

    #[test]
    fn image_identifier_format() {
        assert_eq!(image_identifier(12, 3), "p12c3");
    }
}
