use std::ops::Range;
use std::sync::OnceLock;

use quick_xml::escape::partial_escape;
use regex::Regex;

use crate::model::document::Document;
use crate::model::unit::{TargetSpan, TranslationUnit};

struct Edit {
    range: Range<usize>,
    replacement: String,
}

/// Serializes `document` by splicing modified targets into its original text.
/// Bytes outside the edited `<target>` elements are never touched.
pub fn rebuild(document: &Document) -> String {
    let text = document.original_text();

    let mut edits: Vec<Edit> = Vec::new();
    for unit in document.units().iter().filter(|u| u.is_modified()) {
        edits.extend(unit_edits(text, unit));
    }

    if edits.is_empty() {
        return text.to_string();
    }

    edits.sort_by_key(|e| e.range.start);

    let mut out = String::with_capacity(text.len() + edits.len() * 32);
    let mut cursor = 0usize;
    for edit in edits {
        out.push_str(&text[cursor..edit.range.start]);
        out.push_str(&edit.replacement);
        cursor = edit.range.end;
    }
    out.push_str(&text[cursor..]);

    out
}

fn unit_edits(text: &str, unit: &TranslationUnit) -> Vec<Edit> {
    let state = unit.state.as_xliff();
    let content = partial_escape(&unit.target_text).into_owned();

    match &unit.span.target {
        TargetSpan::Open { tag, content: range } => vec![
            Edit {
                range: tag.clone(),
                replacement: with_state(&text[tag.clone()], state),
            },
            Edit {
                range: range.clone(),
                replacement: content,
            },
        ],

        TargetSpan::Empty { tag } => {
            let raw = &text[tag.clone()];
            let name = element_name(raw);
            let open = format!("{}>", raw.trim_end_matches('>').trim_end_matches('/').trim_end());
            vec![Edit {
                range: tag.clone(),
                replacement: format!("{}{content}</{name}>", with_state(&open, state)),
            }]
        }

        TargetSpan::Missing => {
            let at = unit.span.source_end;
            let element = format!("<target state=\"{state}\">{content}</target>");
            vec![Edit {
                range: at..at,
                replacement: format!("{}{element}", line_break_before(text, unit.span.source_start)),
            }]
        }
    }
}

/// Sets or replaces the `state` attribute of a start tag.
fn with_state(tag: &str, state: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"(\sstate\s*=\s*)(?:"[^"]*"|'[^']*')"#).expect("state pattern is valid")
    });

    if re.is_match(tag) {
        return re
            .replace(tag, |caps: &regex::Captures| format!("{}\"{state}\"", &caps[1]))
            .into_owned();
    }

    let body = tag.trim_end_matches('>').trim_end();
    format!("{body} state=\"{state}\">")
}

/// `target` or `x:target`, taken from a raw start tag.
fn element_name(tag: &str) -> &str {
    let rest = tag.trim_start_matches('<');
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(rest.len());
    &rest[..end]
}

/// A new `<target>` goes on its own line, indented like `<source>`, when
/// `<source>` starts its line; otherwise it is appended inline.
fn line_break_before(text: &str, source_start: usize) -> String {
    let line_start = text[..source_start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let indent = &text[line_start..source_start];

    if line_start == 0 || !indent.chars().all(|c| c == ' ' || c == '\t') {
        return String::new();
    }

    let newline = if text[..line_start].ends_with("\r\n") {
        "\r\n"
    } else {
        "\n"
    };
    format!("{newline}{indent}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::unit::UnitState;

    fn translate(doc: &mut Document, index: usize, text: &str) {
        doc.unit_mut(index).unwrap().apply_translation(text.to_string());
    }

    #[test]
    fn unchanged_document_is_identical() {
        let text = "<?xml version='1.0'?>\r\n<xliff version=\"1.2\"><file source-language=\"en\"><body>\r\n  <trans-unit id=\"a\"><source>A &amp; B</source></trans-unit>\r\n</body></file></xliff>";
        let doc = Document::parse(text).unwrap();

        assert_eq!(rebuild(&doc), text);
    }

    #[test]
    fn replaces_existing_target_and_state() {
        let text = r#"<xliff version="1.2"><file source-language="en"><body>
<trans-unit id="a"><source>Save</source><target xml:lang="de" state='new'>Save</target></trans-unit>
</body></file></xliff>"#;
        let mut doc = Document::parse(text).unwrap();
        translate(&mut doc, 0, "Speichern & schließen");

        let out = rebuild(&doc);
        assert!(out.contains(
            r#"<target xml:lang="de" state="translated">Speichern &amp; schließen</target>"#
        ));
        assert_eq!(Document::parse(&out).unwrap().units()[0].state, UnitState::Translated);
    }

    #[test]
    fn adds_state_to_target_without_one() {
        let text = r#"<xliff version="1.2"><file source-language="en"><body>
<trans-unit id="a"><source>Save</source><target>Old</target></trans-unit>
</body></file></xliff>"#;
        let mut doc = Document::parse(text).unwrap();
        translate(&mut doc, 0, "Sichern");

        assert!(rebuild(&doc).contains(r#"<target state="translated">Sichern</target>"#));
    }

    #[test]
    fn expands_empty_target_element() {
        let text = r#"<xliff version="1.2"><file source-language="en"><body>
<trans-unit id="a"><source>Save</source><target state="new" /></trans-unit>
</body></file></xliff>"#;
        let mut doc = Document::parse(text).unwrap();
        translate(&mut doc, 0, "Sichern");

        assert!(rebuild(&doc).contains(r#"<target state="translated">Sichern</target></trans-unit>"#));
    }

    #[test]
    fn inserts_missing_target_after_source_with_matching_indent() {
        let text = "<xliff version=\"1.2\">\n  <file source-language=\"en\">\n    <body>\n      <trans-unit id=\"a\">\n        <source>Cancel</source>\n        <note>Button</note>\n      </trans-unit>\n    </body>\n  </file>\n</xliff>\n";
        let mut doc = Document::parse(text).unwrap();
        translate(&mut doc, 0, "Abbrechen");

        let expected = text.replace(
            "<source>Cancel</source>\n",
            "<source>Cancel</source>\n        <target state=\"translated\">Abbrechen</target>\n",
        );
        assert_eq!(rebuild(&doc), expected);
    }

    #[test]
    fn only_modified_units_change() {
        let text = r#"<xliff version="1.2"><file source-language="en"><body>
<trans-unit id="a"><source>One</source><target state="final">Eins</target></trans-unit>
<trans-unit id="b"><source>Two</source></trans-unit>
<trans-unit id="c"><source>Three</source><target state="new"></target></trans-unit>
</body></file></xliff>"#;
        let mut doc = Document::parse(text).unwrap();
        translate(&mut doc, 2, "Drei");

        let out = rebuild(&doc);
        assert_eq!(
            out,
            text.replace(
                r#"<target state="new"></target>"#,
                r#"<target state="translated">Drei</target>"#
            )
        );

        let reparsed = Document::parse(&out).unwrap();
        assert_eq!(reparsed.unit_ids(), doc.unit_ids());
    }
}
