use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::model::document::FileSection;
use crate::model::unit::{TargetSpan, TranslationUnit, UnitSpan, UnitState};

pub struct ParsedXliff {
    pub files: Vec<FileSection>,
    pub units: Vec<TranslationUnit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Source,
    Target,
    Note,
}

#[derive(Default)]
struct UnitBuilder {
    id: String,
    file_index: usize,
    source: Option<String>,
    target: String,
    target_state: Option<String>,
    note: Option<String>,
    has_markup: bool,
    span: UnitSpan,
}

/// Parses XLIFF 1.2 text. Byte positions of every `<source>`/`<target>` are
/// recorded against `text` so the writer can splice translations back in.
pub fn parse(text: &str) -> Result<ParsedXliff, String> {
    let mut reader = Reader::from_str(text);

    let mut stack: Vec<String> = Vec::new();
    let mut files: Vec<FileSection> = Vec::new();
    let mut units: Vec<TranslationUnit> = Vec::new();
    let mut seen_ids: HashSet<(usize, String)> = HashSet::new();

    let mut current: Option<UnitBuilder> = None;
    // Field being captured and the stack depth of its element.
    let mut capture: Option<(Field, usize)> = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| format!("malformed xml near byte {start}: {e}"))?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                let name = local_name(&e);

                if stack.is_empty() && name != "xliff" {
                    return Err(format!("root element is <{name}>, expected <xliff>"));
                }

                if let Some((field, _)) = capture {
                    if field != Field::Note {
                        mark_markup(&mut current);
                    }
                } else {
                    match name.as_str() {
                        "file" => files.push(file_section(&e)?),
                        "trans-unit" => {
                            current = Some(start_unit(&e, &files, current.is_some())?);
                        }
                        "source" | "target" | "note" => {
                            if let Some(unit) = current.as_mut() {
                                let field = match name.as_str() {
                                    "source" => {
                                        unit.span.source_start = start;
                                        unit.source.get_or_insert_with(String::new);
                                        Field::Source
                                    }
                                    "target" => {
                                        unit.target_state = attribute(&e, "state")?;
                                        unit.span.target = TargetSpan::Open {
                                            tag: start..end,
                                            content: end..end,
                                        };
                                        Field::Target
                                    }
                                    _ => {
                                        unit.note.get_or_insert_with(String::new);
                                        Field::Note
                                    }
                                };
                                capture = Some((field, stack.len() + 1));
                            }
                        }
                        _ => {}
                    }
                }

                stack.push(name);
            }

            Event::Empty(e) => {
                let name = local_name(&e);

                if stack.is_empty() {
                    return Err(format!("root element <{name}/> has no content"));
                }

                if let Some((field, _)) = capture {
                    if field != Field::Note {
                        mark_markup(&mut current);
                    }
                } else {
                    match name.as_str() {
                        "file" => files.push(file_section(&e)?),
                        "trans-unit" => {
                            let id = attribute(&e, "id")?.unwrap_or_default();
                            return Err(format!("trans-unit '{id}' has no <source>"));
                        }
                        "source" => {
                            if let Some(unit) = current.as_mut() {
                                unit.span.source_start = start;
                                unit.span.source_end = end;
                                unit.source.get_or_insert_with(String::new);
                            }
                        }
                        "target" => {
                            if let Some(unit) = current.as_mut() {
                                unit.target_state = attribute(&e, "state")?;
                                unit.span.target = TargetSpan::Empty { tag: start..end };
                            }
                        }
                        _ => {}
                    }
                }
            }

            Event::End(_) => {
                let name = stack.pop().unwrap_or_default();

                if let Some((field, depth)) = capture {
                    if depth == stack.len() + 1 {
                        capture = None;
                        if let Some(unit) = current.as_mut() {
                            match field {
                                Field::Source => unit.span.source_end = end,
                                Field::Target => {
                                    if let TargetSpan::Open { content, .. } = &mut unit.span.target
                                    {
                                        content.end = start;
                                    }
                                }
                                Field::Note => {}
                            }
                        }
                    }
                    continue;
                }

                if name == "trans-unit" {
                    if let Some(builder) = current.take() {
                        let unit = finish_unit(builder)?;
                        if !seen_ids.insert((unit.file_index, unit.id.clone())) {
                            return Err(format!("duplicate trans-unit id '{}'", unit.id));
                        }
                        units.push(unit);
                    }
                }
            }

            Event::Text(t) => {
                if let (Some((field, _)), Some(unit)) = (capture, current.as_mut()) {
                    let value = t
                        .unescape()
                        .map_err(|e| format!("bad text near byte {start}: {e}"))?;
                    push_text(unit, field, &value);
                }
            }

            Event::CData(c) => {
                if let (Some((field, _)), Some(unit)) = (capture, current.as_mut()) {
                    push_text(unit, field, &String::from_utf8_lossy(&c));
                }
            }

            Event::Eof => break,

            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("unexpected end of document inside <{open}>"));
    }
    if files.is_empty() {
        return Err("no <file> element found".into());
    }
    if units.is_empty() {
        return Err("no <trans-unit> elements found".into());
    }

    Ok(ParsedXliff { files, units })
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn attribute(e: &BytesStart, key: &str) -> Result<Option<String>, String> {
    let attr = e
        .try_get_attribute(key)
        .map_err(|err| format!("bad attribute '{key}': {err}"))?;

    match attr {
        Some(a) => a
            .unescape_value()
            .map(|v| Some(v.to_string()))
            .map_err(|err| format!("bad attribute '{key}': {err}")),
        None => Ok(None),
    }
}

fn file_section(e: &BytesStart) -> Result<FileSection, String> {
    Ok(FileSection {
        original: attribute(e, "original")?,
        source_language: attribute(e, "source-language")?,
        target_language: attribute(e, "target-language")?,
    })
}

fn start_unit(
    e: &BytesStart,
    files: &[FileSection],
    nested: bool,
) -> Result<UnitBuilder, String> {
    if nested {
        return Err("nested <trans-unit> elements".into());
    }
    if files.is_empty() {
        return Err("<trans-unit> outside of a <file> element".into());
    }

    let id = attribute(e, "id")?
        .filter(|id| !id.is_empty())
        .ok_or_else(|| "trans-unit without an id attribute".to_string())?;

    Ok(UnitBuilder {
        id,
        file_index: files.len() - 1,
        ..UnitBuilder::default()
    })
}

fn mark_markup(current: &mut Option<UnitBuilder>) {
    if let Some(unit) = current.as_mut() {
        unit.has_markup = true;
    }
}

fn push_text(unit: &mut UnitBuilder, field: Field, value: &str) {
    match field {
        Field::Source => unit.source.get_or_insert_with(String::new).push_str(value),
        Field::Target => unit.target.push_str(value),
        Field::Note => unit.note.get_or_insert_with(String::new).push_str(value),
    }
}

fn finish_unit(builder: UnitBuilder) -> Result<TranslationUnit, String> {
    let source = builder
        .source
        .ok_or_else(|| format!("trans-unit '{}' has no <source>", builder.id))?;

    let has_target = builder.span.target != TargetSpan::Missing;
    let state = if has_target {
        UnitState::from_xliff(builder.target_state.as_deref(), &builder.target)
    } else {
        UnitState::NeedsTranslation
    };

    let mut unit = TranslationUnit::new(builder.id, source);
    unit.target_text = builder.target;
    unit.state = state;
    unit.file_index = builder.file_index;
    unit.note = builder.note.map(|n| n.trim().to_string());
    unit.has_markup = builder.has_markup;
    unit.span = builder.span;

    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<xliff version="1.2">
  <file original="Main.storyboard" source-language="en" target-language="de">
    <body>
{body}
    </body>
  </file>
</xliff>
"#
        )
    }

    #[test]
    fn records_source_and_target_spans() {
        let text = wrap(
            r#"      <trans-unit id="a">
        <source>Tap &amp; hold</source>
        <target state="translated">Tippen &amp; halten</target>
      </trans-unit>"#,
        );
        let parsed = parse(&text).unwrap();
        let unit = &parsed.units[0];

        assert_eq!(unit.source_text, "Tap & hold");
        assert_eq!(unit.target_text, "Tippen & halten");
        assert_eq!(unit.state, UnitState::Translated);
        assert!(text[unit.span.source_start..].starts_with("<source>"));
        assert!(text[..unit.span.source_end].ends_with("</source>"));

        match &unit.span.target {
            TargetSpan::Open { tag, content } => {
                assert_eq!(&text[tag.clone()], r#"<target state="translated">"#);
                assert_eq!(&text[content.clone()], "Tippen &amp; halten");
            }
            other => panic!("unexpected target span {other:?}"),
        }
    }

    #[test]
    fn handles_missing_and_empty_targets() {
        let text = wrap(
            r#"      <trans-unit id="a"><source>One</source></trans-unit>
      <trans-unit id="b"><source>Two</source><target/></trans-unit>"#,
        );
        let parsed = parse(&text).unwrap();

        assert_eq!(parsed.units[0].span.target, TargetSpan::Missing);
        assert_eq!(parsed.units[0].state, UnitState::NeedsTranslation);
        assert!(matches!(parsed.units[1].span.target, TargetSpan::Empty { .. }));
        assert_eq!(parsed.units[1].target_text, "");
        assert_eq!(parsed.units[1].state, UnitState::NeedsTranslation);
    }

    #[test]
    fn flags_inline_markup_in_source() {
        let text = wrap(
            r#"      <trans-unit id="a"><source>Press <g id="1">OK</g> now</source></trans-unit>"#,
        );
        let parsed = parse(&text).unwrap();

        assert!(parsed.units[0].has_markup);
        assert_eq!(parsed.units[0].source_text, "Press OK now");
    }

    #[test]
    fn keeps_units_of_every_file() {
        let text = r#"<xliff version="1.2">
  <file original="A.strings" source-language="en"><body>
    <trans-unit id="x"><source>A</source></trans-unit>
  </body></file>
  <file original="B.strings" source-language="en"><body>
    <trans-unit id="x"><source>B</source></trans-unit>
  </body></file>
</xliff>"#;
        let parsed = parse(text).unwrap();

        assert_eq!(parsed.files.len(), 2);
        assert_eq!(parsed.units[0].file_index, 0);
        assert_eq!(parsed.units[1].file_index, 1);
    }

    #[test]
    fn rejects_structural_problems() {
        assert!(parse("<resources><string/></resources>").is_err());
        assert!(parse("<xliff version=\"1.2\"></xliff>").is_err());
        assert!(parse(&wrap("<trans-unit><source>x</source></trans-unit>")).is_err());
        assert!(parse(&wrap("<trans-unit id=\"a\"><target>x</target></trans-unit>")).is_err());
        assert!(parse(&wrap(
            "<trans-unit id=\"a\"><source>x</source></trans-unit><trans-unit id=\"a\"><source>y</source></trans-unit>"
        ))
        .is_err());
        assert!(parse("<xliff><file><body><trans-unit id=\"a\"><source>x</source>").is_err());
    }
}
