//! The adapted-exercise data format.
//!
//! One canonical Rust type ([`AdaptedExercise`]) describes every adapted
//! exercise. What a given adaptation strategy is *allowed* to produce is
//! narrowed by an [`ExerciseType`], which validates a parsed value against
//! its [`ExerciseCapabilities`]: a component kind that is switched off for
//! the region it appears in is rejected, with the JSON path of the offending
//! component in the error.
//!
//! ```text
//! AdaptedExercise
//! ├── instruction: Pages ─┐
//! ├── example?:    Pages  │  Pages { pages: [Page] }
//! ├── hint?:       Pages  ├─ Page  { lines: [Line] }
//! ├── statement:   Pages ─┘  Line  { contents: [Component] }
//! └── reference?:  Line
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::capabilities::{ComponentKind, ExerciseCapabilities, Role};

/// Version marker of the adapted-exercise format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExerciseFormat {
    #[serde(rename = "v1")]
    V1,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptedExercise {
    pub format: ExerciseFormat,
    pub instruction: Pages,
    pub example: Option<Pages>,
    pub hint: Option<Pages>,
    pub statement: Pages,
    pub reference: Option<Line>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pages {
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Page {
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Line {
    pub contents: Vec<Component>,
}

/// A node of an exercise line, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", deny_unknown_fields)]
pub enum Component {
    Text {
        text: String,
    },
    Whitespace {},
    Arrow {},
    Formatted {
        contents: Vec<Component>,
        bold: bool,
        italic: bool,
        underlined: bool,
        highlighted: Option<String>,
        boxed: bool,
        superscript: bool,
        subscript: bool,
    },
    Choice {
        contents: Vec<Component>,
    },
    FreeTextInput {},
    #[serde(rename_all = "camelCase")]
    MultipleChoicesInput {
        choices: Vec<Line>,
        show_choices_by_default: bool,
    },
    SelectableInput {
        contents: Vec<Component>,
        colors: Vec<String>,
        boxed: bool,
    },
    SwappableInput {
        contents: Vec<Component>,
    },
    #[serde(rename_all = "camelCase")]
    EditableTextInput {
        show_original_text: bool,
        contents: Vec<Component>,
        increase_horizontal_space: bool,
    },
}

impl Component {
    pub fn text(text: impl Into<String>) -> Self {
        Component::Text { text: text.into() }
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Text { .. } => ComponentKind::Text,
            Component::Whitespace {} => ComponentKind::Whitespace,
            Component::Arrow {} => ComponentKind::Arrow,
            Component::Formatted { .. } => ComponentKind::Formatted,
            Component::Choice { .. } => ComponentKind::Choice,
            Component::FreeTextInput {} => ComponentKind::FreeTextInput,
            Component::MultipleChoicesInput { .. } => ComponentKind::MultipleChoicesInput,
            Component::SelectableInput { .. } => ComponentKind::SelectableInput,
            Component::SwappableInput { .. } => ComponentKind::SwappableInput,
            Component::EditableTextInput { .. } => ComponentKind::EditableTextInput,
        }
    }
}

impl Line {
    /// A line of words separated by whitespace components.
    pub fn from_words(text: &str) -> Self {
        let mut contents = Vec::new();
        for (i, word) in text.split_whitespace().enumerate() {
            if i > 0 {
                contents.push(Component::Whitespace {});
            }
            contents.push(Component::text(word));
        }
        Line { contents }
    }
}

impl Pages {
    /// A single page holding the given lines.
    pub fn single(lines: Vec<Line>) -> Self {
        Pages {
            pages: vec![Page { lines }],
        }
    }
}

/// A component sum: the set of kinds allowed at one position of the tree.
///
/// Every list of components in an exercise is typed by one of these sums;
/// the schema builder emits one definition per sum, the validator checks
/// each component against the sum of the list it sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Sum {
    /// Everything the role admits.
    Region(Role),
    /// `text | whitespace | arrow | formatted`.
    Passive(Role),
    /// `text | whitespace | formatted`, used inside instruction choices.
    FormattedText(Role),
    /// Statement passive components plus nested selectable inputs.
    Selectable,
    /// `text | whitespace`, used inside editable text inputs.
    PlainText(Role),
}

impl Sum {
    pub(crate) fn role(&self) -> Role {
        match self {
            Sum::Region(role)
            | Sum::Passive(role)
            | Sum::FormattedText(role)
            | Sum::PlainText(role) => *role,
            Sum::Selectable => Role::Statement,
        }
    }

    fn candidates(&self) -> &'static [ComponentKind] {
        use ComponentKind::*;
        match self {
            Sum::Region(role) => role.admissible_kinds(),
            Sum::Passive(_) => &[Text, Whitespace, Arrow, Formatted],
            Sum::FormattedText(_) => &[Text, Whitespace, Formatted],
            Sum::Selectable => &[Text, Whitespace, Arrow, Formatted, SelectableInput],
            Sum::PlainText(_) => &[Text, Whitespace],
        }
    }

    /// Kinds admitted by this sum under `caps`, in a stable order.
    pub(crate) fn variants(&self, caps: &ExerciseCapabilities) -> Vec<ComponentKind> {
        let role = self.role();
        self.candidates()
            .iter()
            .copied()
            .filter(|kind| caps.admits(role, *kind))
            .collect()
    }

    /// The sum typing the children of a `kind` component placed in this sum.
    pub(crate) fn nested(&self, kind: ComponentKind) -> Option<Sum> {
        match kind {
            ComponentKind::Formatted => Some(*self),
            ComponentKind::Choice => Some(Sum::FormattedText(self.role())),
            ComponentKind::MultipleChoicesInput | ComponentKind::SwappableInput => {
                Some(Sum::Passive(Role::Statement))
            }
            ComponentKind::SelectableInput => Some(Sum::Selectable),
            ComponentKind::EditableTextInput => Some(Sum::PlainText(Role::Statement)),
            ComponentKind::Text
            | ComponentKind::Whitespace
            | ComponentKind::Arrow
            | ComponentKind::FreeTextInput => None,
        }
    }

    pub(crate) fn def_name(&self) -> String {
        match self {
            Sum::Region(role) => format!("{}Component", role.def_prefix()),
            Sum::Passive(role) => format!("{}PassiveComponent", role.def_prefix()),
            Sum::FormattedText(role) => format!("{}FormattedTextComponent", role.def_prefix()),
            Sum::Selectable => "StatementSelectableComponent".to_string(),
            Sum::PlainText(role) => format!("{}PlainTextComponent", role.def_prefix()),
        }
    }
}

/// Why a value is not an acceptable adapted exercise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at {path})")]
pub struct ValidationError {
    /// JSON path of the offending node, e.g. `statement.pages[0].lines[1].contents[2]`.
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// An adapted-exercise type: the canonical structure narrowed by a
/// capability subset. Built with [`crate::schema::make_exercise_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExerciseType {
    pub(crate) capabilities: ExerciseCapabilities,
}

impl ExerciseType {
    pub fn capabilities(&self) -> &ExerciseCapabilities {
        &self.capabilities
    }

    /// Parse and validate a JSON value as an exercise of this type.
    pub fn validate(&self, value: &Value) -> Result<AdaptedExercise, ValidationError> {
        let exercise: AdaptedExercise = serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::new("$", e.to_string()))?;
        self.check(&exercise)?;
        Ok(exercise)
    }

    /// Check an already-typed exercise against the capability subset.
    pub fn check(&self, exercise: &AdaptedExercise) -> Result<(), ValidationError> {
        let caps = &self.capabilities;
        check_pages(&exercise.instruction, Role::Instruction, caps, "instruction")?;
        if let Some(example) = &exercise.example {
            check_pages(example, Role::Example, caps, "example")?;
        }
        if let Some(hint) = &exercise.hint {
            check_pages(hint, Role::Hint, caps, "hint")?;
        }
        check_pages(&exercise.statement, Role::Statement, caps, "statement")?;
        if let Some(reference) = &exercise.reference {
            check_line(reference, Sum::Region(Role::Reference), caps, "reference")?;
        }
        Ok(())
    }
}

fn check_pages(
    pages: &Pages,
    role: Role,
    caps: &ExerciseCapabilities,
    path: &str,
) -> Result<(), ValidationError> {
    for (p, page) in pages.pages.iter().enumerate() {
        for (l, line) in page.lines.iter().enumerate() {
            let line_path = format!("{}.pages[{}].lines[{}]", path, p, l);
            check_line(line, Sum::Region(role), caps, &line_path)?;
        }
    }
    Ok(())
}

fn check_line(
    line: &Line,
    sum: Sum,
    caps: &ExerciseCapabilities,
    path: &str,
) -> Result<(), ValidationError> {
    check_contents(&line.contents, sum, caps, &format!("{}.contents", path))
}

fn check_contents(
    contents: &[Component],
    sum: Sum,
    caps: &ExerciseCapabilities,
    path: &str,
) -> Result<(), ValidationError> {
    for (i, component) in contents.iter().enumerate() {
        check_component(component, sum, caps, &format!("{}[{}]", path, i))?;
    }
    Ok(())
}

fn check_component(
    component: &Component,
    sum: Sum,
    caps: &ExerciseCapabilities,
    path: &str,
) -> Result<(), ValidationError> {
    let kind = component.kind();
    if !sum.variants(caps).contains(&kind) {
        return Err(ValidationError::new(
            path,
            format!(
                "component kind '{}' is not permitted in {}",
                kind.tag(),
                sum.role().as_str()
            ),
        ));
    }

    let Some(child_sum) = sum.nested(kind) else {
        return Ok(());
    };

    match component {
        Component::Formatted { contents, .. }
        | Component::Choice { contents }
        | Component::SelectableInput { contents, .. }
        | Component::SwappableInput { contents }
        | Component::EditableTextInput { contents, .. } => {
            check_contents(contents, child_sum, caps, &format!("{}.contents", path))
        }
        Component::MultipleChoicesInput { choices, .. } => {
            for (c, choice) in choices.iter().enumerate() {
                check_line(choice, child_sum, caps, &format!("{}.choices[{}]", path, c))?;
            }
            Ok(())
        }
        Component::Text { .. }
        | Component::Whitespace {}
        | Component::Arrow {}
        | Component::FreeTextInput {} => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ComponentFlags;
    use crate::schema::make_exercise_type;
    use serde_json::json;

    fn text_and_whitespace() -> ExerciseCapabilities {
        ExerciseCapabilities::uniform(
            ComponentFlags::default()
                .with(ComponentKind::Text)
                .with(ComponentKind::Whitespace),
        )
    }

    fn sample() -> Value {
        json!({
            "format": "v1",
            "instruction": {"pages": [{"lines": [{"contents": [
                {"kind": "text", "text": "Complète"},
                {"kind": "whitespace"},
                {"kind": "text", "text": "avec"}
            ]}]}]},
            "example": null,
            "hint": null,
            "statement": {"pages": [{"lines": [{"contents": [
                {"kind": "text", "text": "Le"},
                {"kind": "whitespace"},
                {"kind": "multipleChoicesInput", "choices": [
                    {"contents": [{"kind": "text", "text": "chat"}]},
                    {"contents": [{"kind": "text", "text": "chien"}]}
                ], "showChoicesByDefault": false}
            ]}]}]},
            "reference": null
        })
    }

    #[test]
    fn accepts_enabled_components() {
        let mut caps = text_and_whitespace();
        caps.statement.multiple_choices_input = true;
        let ty = make_exercise_type(caps);
        let exercise = ty.validate(&sample()).unwrap();
        assert_eq!(exercise.format, ExerciseFormat::V1);
        assert_eq!(exercise.statement.pages[0].lines[0].contents.len(), 3);
    }

    #[test]
    fn rejects_disabled_component_with_path() {
        let ty = make_exercise_type(text_and_whitespace());
        let err = ty.validate(&sample()).unwrap_err();
        assert_eq!(err.path, "statement.pages[0].lines[0].contents[2]");
        assert!(err.message.contains("multipleChoicesInput"));
    }

    #[test]
    fn rejects_missing_format() {
        let ty = make_exercise_type(text_and_whitespace());
        let err = ty.validate(&json!({})).unwrap_err();
        assert!(err.message.contains("format"), "{}", err.message);
    }

    #[test]
    fn rejects_unknown_fields() {
        let ty = make_exercise_type(ExerciseCapabilities::uniform(ComponentFlags::all()));
        let value = json!({
            "format": "v1",
            "instruction": {"pages": []},
            "example": null, "hint": null,
            "statement": {"pages": [{"lines": [{"contents": [
                {"kind": "text", "text": "x", "color": "red"}
            ]}]}]},
            "reference": null
        });
        assert!(ty.validate(&value).is_err());
    }

    #[test]
    fn nested_formatted_inherits_region_sum() {
        let mut caps = text_and_whitespace();
        caps.statement.formatted = true;
        let ty = make_exercise_type(caps);
        let value = json!({
            "format": "v1",
            "instruction": {"pages": []},
            "example": null, "hint": null,
            "statement": {"pages": [{"lines": [{"contents": [{
                "kind": "formatted",
                "contents": [{"kind": "arrow"}],
                "bold": true, "italic": false, "underlined": false,
                "highlighted": null, "boxed": false,
                "superscript": false, "subscript": false
            }]}]}]},
            "reference": null
        });
        let err = ty.validate(&value).unwrap_err();
        assert_eq!(err.path, "statement.pages[0].lines[0].contents[0].contents[0]");
    }

    #[test]
    fn choice_only_in_instruction() {
        let ty = make_exercise_type(ExerciseCapabilities::uniform(ComponentFlags::all()));
        let choice = json!({"kind": "choice", "contents": [{"kind": "text", "text": "a"}]});
        let in_instruction = json!({
            "format": "v1",
            "instruction": {"pages": [{"lines": [{"contents": [choice.clone()]}]}]},
            "example": null, "hint": null,
            "statement": {"pages": []},
            "reference": null
        });
        assert!(ty.validate(&in_instruction).is_ok());

        let in_statement = json!({
            "format": "v1",
            "instruction": {"pages": []},
            "example": null, "hint": null,
            "statement": {"pages": [{"lines": [{"contents": [choice]}]}]},
            "reference": null
        });
        assert!(ty.validate(&in_statement).is_err());
    }

    #[test]
    fn editable_text_contents_are_plain_text() {
        let ty = make_exercise_type(ExerciseCapabilities::uniform(ComponentFlags::all()));
        let value = json!({
            "format": "v1",
            "instruction": {"pages": []},
            "example": null, "hint": null,
            "statement": {"pages": [{"lines": [{"contents": [{
                "kind": "editableTextInput",
                "showOriginalText": true,
                "contents": [{"kind": "arrow"}],
                "increaseHorizontalSpace": false
            }]}]}]},
            "reference": null
        });
        let err = ty.validate(&value).unwrap_err();
        assert!(err.path.ends_with(".contents[0]"));
    }

    #[test]
    fn serialization_round_trips() {
        let mut caps = text_and_whitespace();
        caps.statement.multiple_choices_input = true;
        let ty = make_exercise_type(caps);
        let exercise = ty.validate(&sample()).unwrap();
        let dumped = serde_json::to_value(&exercise).unwrap();
        assert_eq!(ty.validate(&dumped).unwrap(), exercise);
    }

    #[test]
    fn line_from_words_interleaves_whitespace() {
        let line = Line::from_words("a  b c");
        let kinds: Vec<_> = line.contents.iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ComponentKind::Text,
                ComponentKind::Whitespace,
                ComponentKind::Text,
                ComponentKind::Whitespace,
                ComponentKind::Text
            ]
        );
    }
}
