use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Serialize, Clone)]
pub struct TranslationUnit {
    pub id: String,

    pub source_text: String,

    pub target_text: String,

    pub state: UnitState,

    /// Format tokens found in `source_text`; all of them must survive translation.
    pub placeholders: BTreeSet<String>,

    /// Index of the owning `<file>` element.
    pub file_index: usize,

    pub note: Option<String>,

    /// Inline XML inside `<source>`. Such units pass through untouched.
    pub has_markup: bool,

    #[serde(skip)]
    pub(crate) span: UnitSpan,

    #[serde(skip)]
    pub(crate) modified: bool,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    #[default]
    NeedsTranslation,
    Translated,
    Final,
}

impl UnitState {
    /// Maps an XLIFF 1.2 `state` attribute to the three states the pipeline cares about.
    pub fn from_xliff(state: Option<&str>, target_text: &str) -> Self {
        match state.map(str::trim) {
            Some("final") | Some("signed-off") => UnitState::Final,
            Some("translated") => UnitState::Translated,
            Some(s) if s.starts_with("needs-review") => UnitState::Translated,
            Some(s) if !s.is_empty() => UnitState::NeedsTranslation,
            _ => {
                if target_text.trim().is_empty() {
                    UnitState::NeedsTranslation
                } else {
                    UnitState::Translated
                }
            }
        }
    }

    pub fn as_xliff(self) -> &'static str {
        match self {
            UnitState::NeedsTranslation => "needs-translation",
            UnitState::Translated => "translated",
            UnitState::Final => "final",
        }
    }
}

/// Byte ranges into the decoded document text, used to splice updates back in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct UnitSpan {
    /// Start of the `<source>` start tag.
    pub source_start: usize,
    /// First byte after `</source>` (or after `<source/>`).
    pub source_end: usize,
    pub target: TargetSpan,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum TargetSpan {
    #[default]
    Missing,
    /// `<target ...>content</target>`
    Open { tag: Range<usize>, content: Range<usize> },
    /// `<target ... />`
    Empty { tag: Range<usize> },
}

impl TranslationUnit {
    pub fn new(id: impl Into<String>, source_text: impl Into<String>) -> Self {
        let source_text = source_text.into();
        let placeholders = extract_placeholders(&source_text);

        TranslationUnit {
            id: id.into(),
            source_text,
            target_text: String::new(),
            state: UnitState::NeedsTranslation,
            placeholders,
            file_index: 0,
            note: None,
            has_markup: false,
            span: UnitSpan::default(),
            modified: false,
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn apply_translation(&mut self, text: String) {
        self.target_text = text;
        self.state = UnitState::Translated;
        self.modified = true;
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // printf / Foundation tokens (%@, %d, %1$@, %lld, %.2f, %%) and brace tokens ({name}, {0}).
        Regex::new(
            r"%(?:\d+\$)?[-+0#]*\d*(?:\.\d+)?(?:hh|h|ll|l|q|L|z|t|j)?[@dDiuUxXoOfFeEgGcCsSpaA%]|\{[^{}\s]+\}",
        )
        .expect("placeholder pattern is valid")
    })
}

/// Collects every format token in `text`. Pure and locale independent.
pub fn extract_placeholders(text: &str) -> BTreeSet<String> {
    placeholder_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}
