use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::model::config::PromptTemplates;
use crate::model::document::Document;

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// A group of units sent in one request. Sequence numbers are 1-based and are
/// the only link between a request line and a response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub number: usize,
    units: Vec<usize>,
}

impl Batch {
    pub fn new(number: usize, units: Vec<usize>) -> Self {
        Batch { number, units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Document position of the unit with 1-based sequence number `seq`.
    pub fn unit_at(&self, seq: usize) -> Option<usize> {
        seq.checked_sub(1).and_then(|i| self.units.get(i).copied())
    }

    /// `(sequence number, unit position)` pairs in order.
    pub fn sequence_map(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.units.iter().enumerate().map(|(i, &unit)| (i + 1, unit))
    }

    pub fn units(&self) -> &[usize] {
        &self.units
    }

    /// `1. text` per line. Line breaks inside a source are sent as `\n`.
    pub fn numbered_list(&self, document: &Document) -> String {
        let mut out = String::new();
        for (seq, unit) in self.sequence_map() {
            let text = document
                .unit(unit)
                .map(|u| escape_newlines(&u.source_text))
                .unwrap_or_default();
            out.push_str(&format!("{seq}. {text}\n"));
        }
        out
    }
}

/// Splits `units` into consecutive batches of at most `batch_size`.
pub fn make_batches(units: &[usize], batch_size: usize) -> Vec<Batch> {
    units
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(i, chunk)| Batch::new(i + 1, chunk.to_vec()))
        .collect()
}

pub fn escape_newlines(text: &str) -> String {
    text.replace("\r\n", "\\n").replace('\n', "\\n")
}

pub struct PromptVars<'a> {
    pub target_lang: &'a str,
    pub app_context: &'a str,
    pub num_texts: usize,
    pub numbered_texts: &'a str,
}

/// Substitutes the recognized `{variables}` in one pass. Anything else in
/// braces, including placeholders inside substituted values, is left as is.
pub fn render_template(template: &str, vars: &PromptVars) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("template pattern is valid"));

    re.replace_all(template, |caps: &Captures| match &caps[1] {
        "target_lang" => vars.target_lang.to_string(),
        "app_context" => vars.app_context.to_string(),
        "num_texts" => vars.num_texts.to_string(),
        "numbered_texts" => vars.numbered_texts.to_string(),
        _ => caps[0].to_string(),
    })
    .into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub fn build_prompt(
    batch: &Batch,
    document: &Document,
    templates: &PromptTemplates,
    target_lang: &str,
    app_context: &str,
) -> Prompt {
    let numbered = batch.numbered_list(document);
    let vars = PromptVars {
        target_lang,
        app_context,
        num_texts: batch.len(),
        numbered_texts: &numbered,
    };

    Prompt {
        system: render_template(&templates.system_prompt, &vars),
        user: render_template(&templates.translation_prompt, &vars),
    }
}
