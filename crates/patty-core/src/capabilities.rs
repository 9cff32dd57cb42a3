//! Capability records for adapted exercises.
//!
//! An adapted exercise has five role-typed regions. Each role admits a
//! subset of the component kinds; the subset is chosen per adaptation
//! strategy through a [`ComponentFlags`] record. Flags that a role cannot
//! use (e.g. `free_text_input` on the instruction) are ignored for that role.
//!
//! Capabilities are monotone: turning a flag on only ever adds a variant
//! to the component sums, and two records compose by union.

use serde::{Deserialize, Serialize};

/// The five regions of an adapted exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Instruction,
    Example,
    Hint,
    Statement,
    Reference,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Instruction,
        Role::Example,
        Role::Hint,
        Role::Statement,
        Role::Reference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Instruction => "instruction",
            Role::Example => "example",
            Role::Hint => "hint",
            Role::Statement => "statement",
            Role::Reference => "reference",
        }
    }

    /// PascalCase prefix used for `$defs` names.
    pub fn def_prefix(&self) -> &'static str {
        match self {
            Role::Instruction => "Instruction",
            Role::Example => "Example",
            Role::Hint => "Hint",
            Role::Statement => "Statement",
            Role::Reference => "Reference",
        }
    }

    /// Component kinds a role can ever admit, regardless of flags.
    pub fn admissible_kinds(&self) -> &'static [ComponentKind] {
        use ComponentKind::*;
        match self {
            Role::Instruction => &[Text, Whitespace, Arrow, Formatted, Choice],
            Role::Statement => &[
                Text,
                Whitespace,
                Arrow,
                Formatted,
                FreeTextInput,
                MultipleChoicesInput,
                SelectableInput,
                SwappableInput,
                EditableTextInput,
            ],
            Role::Example | Role::Hint | Role::Reference => &[Text, Whitespace, Arrow, Formatted],
        }
    }
}

/// Discriminator of a component, as written in the `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Text,
    Whitespace,
    Arrow,
    Formatted,
    Choice,
    FreeTextInput,
    MultipleChoicesInput,
    SelectableInput,
    SwappableInput,
    EditableTextInput,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 10] = [
        ComponentKind::Text,
        ComponentKind::Whitespace,
        ComponentKind::Arrow,
        ComponentKind::Formatted,
        ComponentKind::Choice,
        ComponentKind::FreeTextInput,
        ComponentKind::MultipleChoicesInput,
        ComponentKind::SelectableInput,
        ComponentKind::SwappableInput,
        ComponentKind::EditableTextInput,
    ];

    /// The `kind` tag value.
    pub fn tag(&self) -> &'static str {
        match self {
            ComponentKind::Text => "text",
            ComponentKind::Whitespace => "whitespace",
            ComponentKind::Arrow => "arrow",
            ComponentKind::Formatted => "formatted",
            ComponentKind::Choice => "choice",
            ComponentKind::FreeTextInput => "freeTextInput",
            ComponentKind::MultipleChoicesInput => "multipleChoicesInput",
            ComponentKind::SelectableInput => "selectableInput",
            ComponentKind::SwappableInput => "swappableInput",
            ComponentKind::EditableTextInput => "editableTextInput",
        }
    }

    /// Whether this kind contains a list of components of its own sum.
    pub fn is_recursive(&self) -> bool {
        matches!(
            self,
            ComponentKind::Formatted | ComponentKind::SelectableInput
        )
    }
}

/// Boolean flags enumerating which component kinds are permitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComponentFlags {
    pub text: bool,
    pub whitespace: bool,
    pub arrow: bool,
    pub formatted: bool,
    pub choice: bool,
    pub free_text_input: bool,
    pub multiple_choices_input: bool,
    pub selectable_input: bool,
    pub swappable_input: bool,
    pub editable_text_input: bool,
}

impl ComponentFlags {
    /// Every flag on.
    pub fn all() -> Self {
        Self {
            text: true,
            whitespace: true,
            arrow: true,
            formatted: true,
            choice: true,
            free_text_input: true,
            multiple_choices_input: true,
            selectable_input: true,
            swappable_input: true,
            editable_text_input: true,
        }
    }

    pub fn get(&self, kind: ComponentKind) -> bool {
        match kind {
            ComponentKind::Text => self.text,
            ComponentKind::Whitespace => self.whitespace,
            ComponentKind::Arrow => self.arrow,
            ComponentKind::Formatted => self.formatted,
            ComponentKind::Choice => self.choice,
            ComponentKind::FreeTextInput => self.free_text_input,
            ComponentKind::MultipleChoicesInput => self.multiple_choices_input,
            ComponentKind::SelectableInput => self.selectable_input,
            ComponentKind::SwappableInput => self.swappable_input,
            ComponentKind::EditableTextInput => self.editable_text_input,
        }
    }

    pub fn set(&mut self, kind: ComponentKind, value: bool) {
        let slot = match kind {
            ComponentKind::Text => &mut self.text,
            ComponentKind::Whitespace => &mut self.whitespace,
            ComponentKind::Arrow => &mut self.arrow,
            ComponentKind::Formatted => &mut self.formatted,
            ComponentKind::Choice => &mut self.choice,
            ComponentKind::FreeTextInput => &mut self.free_text_input,
            ComponentKind::MultipleChoicesInput => &mut self.multiple_choices_input,
            ComponentKind::SelectableInput => &mut self.selectable_input,
            ComponentKind::SwappableInput => &mut self.swappable_input,
            ComponentKind::EditableTextInput => &mut self.editable_text_input,
        };
        *slot = value;
    }

    pub fn with(mut self, kind: ComponentKind) -> Self {
        self.set(kind, true);
        self
    }

    pub fn union(&self, other: &ComponentFlags) -> ComponentFlags {
        let mut out = *self;
        for kind in ComponentKind::ALL {
            if other.get(kind) {
                out.set(kind, true);
            }
        }
        out
    }

    /// Whether `role` admits `kind` under these flags.
    pub fn admits(&self, role: Role, kind: ComponentKind) -> bool {
        self.get(kind) && role.admissible_kinds().contains(&kind)
    }
}

/// The capability subset of an exercise type: one flag record per role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExerciseCapabilities {
    pub instruction: ComponentFlags,
    pub example: ComponentFlags,
    pub hint: ComponentFlags,
    pub statement: ComponentFlags,
    pub reference: ComponentFlags,
}

impl ExerciseCapabilities {
    /// The same flags for every role.
    pub fn uniform(flags: ComponentFlags) -> Self {
        Self {
            instruction: flags,
            example: flags,
            hint: flags,
            statement: flags,
            reference: flags,
        }
    }

    pub fn for_role(&self, role: Role) -> &ComponentFlags {
        match role {
            Role::Instruction => &self.instruction,
            Role::Example => &self.example,
            Role::Hint => &self.hint,
            Role::Statement => &self.statement,
            Role::Reference => &self.reference,
        }
    }

    pub fn for_role_mut(&mut self, role: Role) -> &mut ComponentFlags {
        match role {
            Role::Instruction => &mut self.instruction,
            Role::Example => &mut self.example,
            Role::Hint => &mut self.hint,
            Role::Statement => &mut self.statement,
            Role::Reference => &mut self.reference,
        }
    }

    pub fn union(&self, other: &ExerciseCapabilities) -> ExerciseCapabilities {
        let mut out = *self;
        for role in Role::ALL {
            *out.for_role_mut(role) = self.for_role(role).union(other.for_role(role));
        }
        out
    }

    pub fn admits(&self, role: Role, kind: ComponentKind) -> bool {
        self.for_role(role).admits(role, kind)
    }
}
