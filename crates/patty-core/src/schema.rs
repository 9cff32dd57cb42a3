//! JSON Schema emission for adapted exercises.
//!
//! [`make_schema`] turns an [`ExerciseType`] into the schema sent to LLM
//! providers as the response format. The emitted schema follows the
//! strict dialect accepted by schema-enforcing completion endpoints:
//!
//! - every object has `additionalProperties: false`;
//! - every property is listed in `required` (optional values are
//!   `anyOf [T, null]`);
//! - components are discriminated by a single-element `kind` enum;
//! - recursive sums are emitted once under `$defs` and referenced with `$ref`.
//!
//! Some providers reject recursive references. For those,
//! [`Recursion::Unfold`] inlines every definition and unrolls the
//! recursive variants (`formatted`, `selectableInput`) `depth` times; the
//! innermost level simply omits them.
//!
//! Disabled capabilities only remove variants from a sum. The tree of
//! pages, lines and contents is identical for every capability subset.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::adapted::{ExerciseType, Sum};
use crate::capabilities::{ComponentKind, ExerciseCapabilities, Role};

/// How recursive component sums are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recursion {
    /// `$defs` + `$ref`, recursion allowed.
    Refs,
    /// Inline everything, unrolling recursive variants `depth` levels deep.
    Unfold { depth: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaOptions {
    pub recursion: Recursion,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            recursion: Recursion::Refs,
        }
    }
}

/// Build the exercise type for a capability subset.
pub fn make_exercise_type(capabilities: ExerciseCapabilities) -> ExerciseType {
    ExerciseType { capabilities }
}

/// Emit the JSON Schema of an exercise type.
pub fn make_schema(exercise_type: &ExerciseType, options: &SchemaOptions) -> Value {
    let mut builder = SchemaBuilder {
        caps: &exercise_type.capabilities,
        recursion: options.recursion,
        defs: BTreeMap::new(),
    };

    let root_depth = match options.recursion {
        Recursion::Refs => 0,
        Recursion::Unfold { depth } => depth,
    };

    let instruction = builder.pages(Sum::Region(Role::Instruction), root_depth);
    let example = nullable(builder.pages(Sum::Region(Role::Example), root_depth));
    let hint = nullable(builder.pages(Sum::Region(Role::Hint), root_depth));
    let statement = builder.pages(Sum::Region(Role::Statement), root_depth);
    let reference = nullable(builder.line(Sum::Region(Role::Reference), root_depth));

    let mut schema = object(vec![
        ("format", json!({"type": "string", "enum": ["v1"]})),
        ("instruction", instruction),
        ("example", example),
        ("hint", hint),
        ("statement", statement),
        ("reference", reference),
    ]);

    if !builder.defs.is_empty() {
        let defs: Map<String, Value> = builder.defs.into_iter().collect();
        if let Value::Object(map) = &mut schema {
            map.insert("$defs".to_string(), Value::Object(defs));
        }
    }

    schema
}

impl ExerciseType {
    /// Shorthand for [`make_schema`].
    pub fn schema(&self, options: &SchemaOptions) -> Value {
        make_schema(self, options)
    }
}

struct SchemaBuilder<'a> {
    caps: &'a ExerciseCapabilities,
    recursion: Recursion,
    defs: BTreeMap<String, Value>,
}

impl SchemaBuilder<'_> {
    fn pages(&mut self, sum: Sum, depth: usize) -> Value {
        let line = self.line(sum, depth);
        let page = object(vec![("lines", array_of(line))]);
        object(vec![("pages", array_of(page))])
    }

    fn line(&mut self, sum: Sum, depth: usize) -> Value {
        let component = self.component(sum, depth);
        object(vec![("contents", array_of(component))])
    }

    /// Schema (or reference) for one component of `sum`.
    fn component(&mut self, sum: Sum, depth: usize) -> Value {
        match self.recursion {
            Recursion::Refs => {
                let name = sum.def_name();
                if !self.defs.contains_key(&name) {
                    // Placeholder first so that self-references terminate.
                    self.defs.insert(name.clone(), Value::Null);
                    let schema = self.sum_schema(sum, 0);
                    self.defs.insert(name.clone(), schema);
                }
                json!({ "$ref": format!("#/$defs/{}", name) })
            }
            Recursion::Unfold { .. } => self.sum_schema(sum, depth),
        }
    }

    fn sum_schema(&mut self, sum: Sum, depth: usize) -> Value {
        let unfolding = matches!(self.recursion, Recursion::Unfold { .. });
        let mut variants = Vec::new();
        for kind in sum.variants(self.caps) {
            if unfolding && depth == 0 && kind.is_recursive() {
                continue;
            }
            variants.push(self.variant(sum, kind, depth));
        }

        match variants.len() {
            0 => no_component(),
            1 => variants.remove(0),
            _ => json!({ "anyOf": variants }),
        }
    }

    fn variant(&mut self, sum: Sum, kind: ComponentKind, depth: usize) -> Value {
        let tag = ("kind", json!({"type": "string", "enum": [kind.tag()]}));
        let child_depth = if kind.is_recursive() {
            depth.saturating_sub(1)
        } else {
            depth
        };
        let children = |builder: &mut Self| -> Value {
            match sum.nested(kind) {
                Some(child) => array_of(builder.component(child, child_depth)),
                None => array_of(no_component()),
            }
        };

        match kind {
            ComponentKind::Text => object(vec![tag, ("text", json!({"type": "string"}))]),
            ComponentKind::Whitespace | ComponentKind::Arrow | ComponentKind::FreeTextInput => {
                object(vec![tag])
            }
            ComponentKind::Formatted => {
                let contents = children(self);
                object(vec![
                    tag,
                    ("contents", contents),
                    ("bold", boolean()),
                    ("italic", boolean()),
                    ("underlined", boolean()),
                    ("highlighted", nullable(json!({"type": "string"}))),
                    ("boxed", boolean()),
                    ("superscript", boolean()),
                    ("subscript", boolean()),
                ])
            }
            ComponentKind::Choice | ComponentKind::SwappableInput => {
                let contents = children(self);
                object(vec![tag, ("contents", contents)])
            }
            ComponentKind::MultipleChoicesInput => {
                let choice_line = match sum.nested(kind) {
                    Some(child) => self.line(child, child_depth),
                    None => object(vec![]),
                };
                object(vec![
                    tag,
                    ("choices", array_of(choice_line)),
                    ("showChoicesByDefault", boolean()),
                ])
            }
            ComponentKind::SelectableInput => {
                let contents = children(self);
                object(vec![
                    tag,
                    ("contents", contents),
                    ("colors", array_of(json!({"type": "string"}))),
                    ("boxed", boolean()),
                ])
            }
            ComponentKind::EditableTextInput => {
                let contents = children(self);
                object(vec![
                    tag,
                    ("showOriginalText", boolean()),
                    ("contents", contents),
                    ("increaseHorizontalSpace", boolean()),
                ])
            }
        }
    }
}

fn object(properties: Vec<(&str, Value)>) -> Value {
    let required: Vec<Value> = properties
        .iter()
        .map(|(name, _)| Value::String(name.to_string()))
        .collect();
    let props: Map<String, Value> = properties
        .into_iter()
        .map(|(name, schema)| (name.to_string(), schema))
        .collect();
    json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false,
    })
}

/// Items of an empty sum: only `null`, which no component deserializes
/// from. Strict structured outputs do not accept `not`.
fn no_component() -> Value {
    json!({ "type": "null" })
}

fn array_of(items: Value) -> Value {
    json!({ "type": "array", "items": items })
}

fn boolean() -> Value {
    json!({ "type": "boolean" })
}

fn nullable(schema: Value) -> Value {
    json!({ "anyOf": [schema, {"type": "null"}] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ComponentFlags;
    use std::collections::BTreeSet;

    fn all_caps() -> ExerciseCapabilities {
        ExerciseCapabilities::uniform(ComponentFlags::all())
    }

    /// Every object is closed and requires all of its properties.
    fn assert_strict(value: &Value) {
        match value {
            Value::Object(map) => {
                if map.get("type") == Some(&json!("object")) {
                    assert_eq!(map.get("additionalProperties"), Some(&json!(false)));
                    let props = map["properties"].as_object().unwrap();
                    let required: BTreeSet<&str> = map["required"]
                        .as_array()
                        .unwrap()
                        .iter()
                        .map(|v| v.as_str().unwrap())
                        .collect();
                    let keys: BTreeSet<&str> = props.keys().map(|k| k.as_str()).collect();
                    assert_eq!(required, keys);
                }
                for child in map.values() {
                    assert_strict(child);
                }
            }
            Value::Array(items) => items.iter().for_each(assert_strict),
            _ => {}
        }
    }

    fn collect_refs(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(r)) = map.get("$ref") {
                    out.push(r.clone());
                }
                map.values().for_each(|v| collect_refs(v, out));
            }
            Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
            _ => {}
        }
    }

    /// Kind tags reachable in each `$defs` entry.
    fn kinds_by_def(schema: &Value) -> BTreeMap<String, BTreeSet<String>> {
        let mut out = BTreeMap::new();
        if let Some(defs) = schema.get("$defs").and_then(|d| d.as_object()) {
            for (name, def) in defs {
                let variants: Vec<&Value> = match def.get("anyOf") {
                    Some(Value::Array(items)) => items.iter().collect(),
                    _ => vec![def],
                };
                let kinds = variants
                    .iter()
                    .filter_map(|v| v.pointer("/properties/kind/enum/0"))
                    .filter_map(|k| k.as_str().map(String::from))
                    .collect();
                out.insert(name.clone(), kinds);
            }
        }
        out
    }

    #[test]
    fn schema_is_strict() {
        let schema = make_schema(&make_exercise_type(all_caps()), &SchemaOptions::default());
        assert_strict(&schema);
    }

    #[test]
    fn refs_all_resolve() {
        let schema = make_schema(&make_exercise_type(all_caps()), &SchemaOptions::default());
        let defs = schema["$defs"].as_object().unwrap();
        let mut refs = Vec::new();
        collect_refs(&schema, &mut refs);
        assert!(!refs.is_empty());
        for r in refs {
            let name = r.strip_prefix("#/$defs/").unwrap();
            assert!(defs.contains_key(name), "dangling ref {}", r);
            assert_ne!(defs[name], Value::Null);
        }
    }

    #[test]
    fn formatted_is_self_recursive_through_defs() {
        let schema = make_schema(&make_exercise_type(all_caps()), &SchemaOptions::default());
        let def = &schema["$defs"]["StatementComponent"];
        let formatted = def["anyOf"]
            .as_array()
            .unwrap()
            .iter()
            .find(|v| v.pointer("/properties/kind/enum/0") == Some(&json!("formatted")))
            .unwrap();
        assert_eq!(
            formatted.pointer("/properties/contents/items/$ref"),
            Some(&json!("#/$defs/StatementComponent"))
        );
    }

    #[test]
    fn unfold_has_no_refs_and_terminates() {
        let options = SchemaOptions {
            recursion: Recursion::Unfold { depth: 2 },
        };
        let schema = make_schema(&make_exercise_type(all_caps()), &options);
        let mut refs = Vec::new();
        collect_refs(&schema, &mut refs);
        assert!(refs.is_empty());
        assert!(schema.get("$defs").is_none());
        assert_strict(&schema);
    }

    #[test]
    fn unfold_depth_zero_drops_recursive_variants() {
        let options = SchemaOptions {
            recursion: Recursion::Unfold { depth: 0 },
        };
        let schema = make_schema(&make_exercise_type(all_caps()), &options);
        let text = schema.to_string();
        assert!(!text.contains("\"formatted\""));
        assert!(!text.contains("\"selectableInput\""));
        assert!(text.contains("\"multipleChoicesInput\""));
    }

    #[test]
    fn disabled_flags_remove_variants_only() {
        let mut caps = ExerciseCapabilities::uniform(
            ComponentFlags::default()
                .with(ComponentKind::Text)
                .with(ComponentKind::Whitespace),
        );
        caps.statement.multiple_choices_input = true;
        let schema = make_schema(&make_exercise_type(caps), &SchemaOptions::default());
        let kinds = kinds_by_def(&schema);
        let statement: Vec<_> = kinds["StatementComponent"].iter().cloned().collect();
        assert_eq!(statement, vec!["multipleChoicesInput", "text", "whitespace"]);
        assert!(kinds["InstructionComponent"].iter().all(|k| k != "choice"));
        assert_eq!(
            schema["required"],
            json!(["format", "instruction", "example", "hint", "statement", "reference"])
        );
    }

    #[test]
    fn enabling_a_flag_never_removes_a_variant() {
        let base = ExerciseCapabilities::uniform(ComponentFlags::default().with(ComponentKind::Text));
        let before = kinds_by_def(&make_schema(&make_exercise_type(base), &SchemaOptions::default()));
        for role in Role::ALL {
            for kind in ComponentKind::ALL {
                let mut extended = base;
                extended.for_role_mut(role).set(kind, true);
                let after = kinds_by_def(&make_schema(
                    &make_exercise_type(extended),
                    &SchemaOptions::default(),
                ));
                for (name, kinds) in &before {
                    let widened = after.get(name).expect("definition disappeared");
                    assert!(kinds.is_subset(widened), "{} lost variants", name);
                }
            }
        }
    }

    #[test]
    fn empty_sum_accepts_nothing() {
        let schema = make_schema(
            &make_exercise_type(ExerciseCapabilities::default()),
            &SchemaOptions::default(),
        );
        assert_eq!(schema["$defs"]["HintComponent"], json!({"type": "null"}));
        assert!(!schema.to_string().contains("\"not\""));
        assert_strict(&schema);

        let unfolded = make_schema(
            &make_exercise_type(ExerciseCapabilities::default()),
            &SchemaOptions {
                recursion: Recursion::Unfold { depth: 1 },
            },
        );
        assert!(!unfolded.to_string().contains("\"not\""));
    }

    #[test]
    fn disabled_role_only_validates_empty_lines() {
        let ty = make_exercise_type(ExerciseCapabilities::default());
        let empty_hint = json!({
            "format": "v1",
            "instruction": {"pages": []},
            "example": null,
            "hint": {"pages": [{"lines": [{"contents": []}]}]},
            "statement": {"pages": []},
            "reference": null
        });
        assert!(ty.validate(&empty_hint).is_ok());

        let mut with_text = empty_hint.clone();
        with_text["hint"]["pages"][0]["lines"][0]["contents"] =
            json!([{"kind": "text", "text": "Indice"}]);
        assert!(ty.validate(&with_text).is_err());
    }

    #[test]
    fn validator_is_monotone() {
        let exercise = json!({
            "format": "v1",
            "instruction": {"pages": [{"lines": [{"contents": [{"kind": "text", "text": "Lis"}]}]}]},
            "example": null,
            "hint": null,
            "statement": {"pages": [{"lines": [{"contents": [
                {"kind": "text", "text": "Le"},
                {"kind": "freeTextInput"}
            ]}]}]},
            "reference": null
        });
        let mut base = ExerciseCapabilities::uniform(ComponentFlags::default().with(ComponentKind::Text));
        base.statement.free_text_input = true;
        assert!(make_exercise_type(base).validate(&exercise).is_ok());
        for role in Role::ALL {
            for kind in ComponentKind::ALL {
                let mut extended = base;
                extended.for_role_mut(role).set(kind, true);
                assert!(make_exercise_type(extended).validate(&exercise).is_ok());
            }
        }
    }
}
