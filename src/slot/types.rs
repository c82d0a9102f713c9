//! Template Slot Types
//!
//! A reply template is an ordered list of literal spans and slot spans.
//! Slots are written `[[kind:params|hint:text]]` and never nest.
//!
//! # Kinds
//!
//! | Kind | Syntax | Matches |
//! |------|--------|---------|
//! | Words | `w:3`, `words:2-5` | whitespace-separated words |
//! | Options | `opt:a\|b\|c` | one literal option |
//! | Pattern | `re:<pattern>` | a user pattern |
//! | Free | `free` | any text, newlines included |
//! | Keep | `keep` | nothing (display marker) |
//! | Emotion | `emotion`, `mood` | an emotion word |
//! | Action | `action` | `*an action*` |
//! | Thought | `thought` | `(a thought)` |
//! | Lines | `line`, `lines:2-4` | newline-separated lines |
//! | Name | `name` | a known name |
//! | Number | `num`, `number:1-10` | an integer |

use serde::{Deserialize, Serialize};

/// The slot kinds a template may contain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotKind {
    /// Between `min` and `max` words
    Words { min: usize, max: usize },

    /// Exactly one of the listed options
    Options { options: Vec<String> },

    /// A user-supplied pattern, kept as written
    Pattern { raw: String },

    /// One or more characters of any kind, newlines included
    Free,

    /// Zero-width marker, only meaningful to the display layer
    Keep,

    /// An emotion word; an empty list selects the built-in vocabulary
    Emotion { words: Vec<String> },

    /// A starred roleplay action
    Action,

    /// A parenthesised thought
    Thought,

    /// Between `min` and `max` lines; `None` leaves the count open
    Lines { min: usize, max: Option<usize> },

    /// A proper name from the known-names set
    Name,

    /// An integer, optionally bounded
    Number { min: Option<i64>, max: Option<i64> },

    /// Anything the parser did not recognise
    Unknown { name: String },
}

impl SlotKind {
    /// Returns the canonical kind name
    pub fn name(&self) -> &'static str {
        match self {
            SlotKind::Words { .. } => "words",
            SlotKind::Options { .. } => "options",
            SlotKind::Pattern { .. } => "regex",
            SlotKind::Free => "free",
            SlotKind::Keep => "keep",
            SlotKind::Emotion { .. } => "emotion",
            SlotKind::Action => "action",
            SlotKind::Thought => "thought",
            SlotKind::Lines { .. } => "lines",
            SlotKind::Name => "name",
            SlotKind::Number { .. } => "number",
            SlotKind::Unknown { .. } => "unknown",
        }
    }

    /// Zero-width kinds produce no pattern text
    pub fn is_zero_width(&self) -> bool {
        matches!(self, SlotKind::Keep)
    }
}

/// A single placeholder parsed out of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// What the slot matches
    #[serde(flatten)]
    pub kind: SlotKind,
    /// Raw parameter text after the first `:`
    pub params: String,
    /// UI hint from a `|hint:` suffix; never compiled
    pub hint: Option<String>,
    /// The slot exactly as written, brackets included
    pub source: String,
}

impl Slot {
    pub fn new(kind: SlotKind, source: impl Into<String>) -> Self {
        Slot {
            kind,
            params: String::new(),
            hint: None,
            source: source.into(),
        }
    }

    pub fn with_params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// A template span: literal text or a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "span", rename_all = "snake_case")]
pub enum Span {
    Literal { text: String },
    Slot(Slot),
}

/// A parsed reply template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub spans: Vec<Span>,
}

impl Template {
    /// True if the template has no spans at all
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// True if at least one slot other than a keep marker is present
    pub fn has_slots(&self) -> bool {
        self.slots().any(|s| !s.kind.is_zero_width())
    }

    /// Iterate over the slots in order
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.spans.iter().filter_map(|span| match span {
            Span::Slot(slot) => Some(slot),
            Span::Literal { .. } => None,
        })
    }

    /// Literal text before the first slot
    pub fn literal_prefix(&self) -> String {
        let mut out = String::new();
        for span in &self.spans {
            match span {
                Span::Literal { text } => out.push_str(text),
                Span::Slot(_) => break,
            }
        }
        out
    }

    /// Spans before the first keep marker, or every span if there is none
    pub fn head(&self) -> &[Span] {
        let end = self
            .spans
            .iter()
            .position(|span| matches!(span, Span::Slot(s) if s.kind == SlotKind::Keep))
            .unwrap_or(self.spans.len());
        &self.spans[..end]
    }

    /// Number of keep markers
    pub fn keep_count(&self) -> usize {
        self.slots().filter(|s| s.kind == SlotKind::Keep).count()
    }

    /// `(slot source, hint)` pairs for UI surfacing
    pub fn hints(&self) -> Vec<(&str, &str)> {
        self.slots()
            .filter_map(|s| s.hint.as_deref().map(|h| (s.source.as_str(), h)))
            .collect()
    }

    /// The template with every slot removed and literals concatenated
    pub fn literal_text(&self) -> String {
        self.spans
            .iter()
            .filter_map(|span| match span {
                Span::Literal { text } => Some(text.as_str()),
                Span::Slot(_) => None,
            })
            .collect()
    }
}
