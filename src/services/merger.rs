use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::model::document::Document;
use crate::model::unit::extract_placeholders;
use crate::services::ai_types::{Alignment, MergeResult, UnitOutcome, UnitResult};
use crate::services::batcher::Batch;
use crate::services::qa;

pub const DEFAULT_MAX_REALIGN_DRIFT: usize = 1;

pub struct MergeContext<'a> {
    pub preserve_names: &'a [String],
    pub max_realign_drift: usize,
}

impl Default for MergeContext<'_> {
    fn default() -> Self {
        MergeContext {
            preserve_names: &[],
            max_realign_drift: DEFAULT_MAX_REALIGN_DRIFT,
        }
    }
}

/// One non-empty response line. `text` has a leading list marker removed,
/// `raw` keeps it for sources that start with such a marker themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub raw: String,
    pub text: String,
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(\d{1,4})\s*[.):]|[-*•])\s+").expect("marker pattern is valid")
    })
}

impl ResponseLine {
    fn at(raw: &str, position: usize) -> Self {
        ResponseLine {
            raw: raw.to_string(),
            text: strip_marker(raw, position).trim().to_string(),
        }
    }
}

/// Removes a bullet, or a leading number equal to `position` (1-based).
fn strip_marker(line: &str, position: usize) -> &str {
    let Some(caps) = marker_regex().captures(line) else {
        return line;
    };
    match caps.get(1).and_then(|n| n.as_str().parse::<usize>().ok()) {
        Some(n) if n != position => line,
        _ => &line[caps[0].len()..],
    }
}

/// Splits a raw response into non-empty lines. A leading number is only taken
/// as list numbering when it equals the line's own position.
pub fn parse_response(raw: &str) -> Vec<ResponseLine> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, line)| ResponseLine::at(line, i + 1))
        .collect()
}

/// The `len` lines starting at `offset`, with numbering read against their
/// position inside the window.
fn window(lines: &[ResponseLine], offset: usize, len: usize) -> Vec<ResponseLine> {
    lines[offset..offset + len]
        .iter()
        .enumerate()
        .map(|(i, line)| ResponseLine::at(&line.raw, i + 1))
        .collect()
}

/// Aligns `raw_response` with `batch` and writes every valid line into the document.
pub fn merge(
    document: &mut Document,
    batch: &Batch,
    raw_response: &str,
    ctx: &MergeContext,
) -> MergeResult {
    let lines = parse_response(raw_response);
    let expected = batch.len();
    let received = lines.len();

    let alignment = align(document, batch, &lines, ctx.max_realign_drift);
    let lines = match alignment {
        Alignment::Suffix => window(&lines, received - expected, expected),
        Alignment::Prefix => window(&lines, 0, expected),
        _ => lines,
    };

    if alignment == Alignment::Rejected {
        warn!(
            batch = batch.number,
            expected, received, "response line count mismatch, batch not merged"
        );
    } else if alignment != Alignment::Exact {
        warn!(
            batch = batch.number,
            expected,
            received,
            ?alignment,
            "response realigned around extra lines"
        );
    }

    let mut outcomes = Vec::with_capacity(expected);

    for (seq, unit_index) in batch.sequence_map() {
        let Some(unit) = document.unit_mut(unit_index) else {
            continue;
        };

        let outcome = if alignment == Alignment::Rejected {
            UnitOutcome::CountMismatch
        } else {
            let line = &lines[seq - 1];
            let candidate = clean_candidate(line, &unit.source_text);

            match qa::check_candidate(unit, &candidate, ctx.preserve_names) {
                Some(failure) => {
                    warn!(unit = %unit.id, reason = %failure.reason(), "translation rejected");
                    failure
                }
                None => {
                    unit.apply_translation(candidate);
                    UnitOutcome::Translated
                }
            }
        };

        outcomes.push(UnitResult {
            unit: unit_index,
            id: unit.id.clone(),
            outcome,
        });
    }

    let result = MergeResult {
        batch: batch.number,
        expected,
        received,
        alignment,
        outcomes,
    };

    debug!(
        batch = batch.number,
        translated = result.translated(),
        failed = result.failed(),
        "batch merged"
    );

    result
}

/// Records the same failure for every unit of a batch that got no usable response.
pub fn reject(document: &Document, batch: &Batch, outcome: UnitOutcome) -> MergeResult {
    let outcomes = batch
        .sequence_map()
        .filter_map(|(_, unit)| {
            document.unit(unit).map(|u| UnitResult {
                unit,
                id: u.id.clone(),
                outcome: outcome.clone(),
            })
        })
        .collect();

    MergeResult {
        batch: batch.number,
        expected: batch.len(),
        received: 0,
        alignment: Alignment::Rejected,
        outcomes,
    }
}

/// Shortfalls are never realigned: the dropped line could be anywhere. A
/// surplus within `max_drift` is realigned only when exactly one of the
/// prefix and suffix windows has matching placeholder signatures.
fn align(document: &Document, batch: &Batch, lines: &[ResponseLine], max_drift: usize) -> Alignment {
    let expected = batch.len();
    let received = lines.len();

    if received == expected {
        return Alignment::Exact;
    }
    if received < expected || received - expected > max_drift {
        return Alignment::Rejected;
    }

    let consistent = |offset: usize| {
        batch.sequence_map().all(|(seq, unit)| {
            document
                .unit(unit)
                .map(|u| {
                    let line = strip_marker(&lines[offset + seq - 1].raw, seq);
                    extract_placeholders(line) == u.placeholders
                })
                .unwrap_or(false)
        })
    };

    match (consistent(0), consistent(received - expected)) {
        (true, false) => Alignment::Prefix,
        (false, true) => Alignment::Suffix,
        _ => Alignment::Rejected,
    }
}

const QUOTE_PAIRS: [(char, char); 5] = [('"', '"'), ('\'', '\''), ('“', '”'), ('«', '»'), ('「', '」')];

/// Trims whitespace and one layer of wrapping quotes the source did not have,
/// and turns `\n` escapes back into the line breaks the source uses.
pub fn clean_candidate(line: &ResponseLine, source: &str) -> String {
    let source_trimmed = source.trim();
    let mut text = if marker_regex().is_match(source_trimmed) {
        line.raw.trim()
    } else {
        line.text.trim()
    };

    for (open, close) in QUOTE_PAIRS {
        let wrapped = text.chars().count() >= 2 && text.starts_with(open) && text.ends_with(close);
        let source_wrapped = source_trimmed.starts_with(open) && source_trimmed.ends_with(close);
        if wrapped && !source_wrapped {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
            break;
        }
    }

    if source.contains("\r\n") {
        text.replace("\\n", "\r\n")
    } else if source.contains('\n') {
        text.replace("\\n", "\n")
    } else {
        text.to_string()
    }
}
