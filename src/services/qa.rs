use serde::Serialize;

use crate::model::document::Document;
use crate::model::unit::{TranslationUnit, UnitState};
use crate::services::ai_types::UnitOutcome;

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct QaIssue {
    pub unit_id: String,
    pub code: String,
    pub message: String,
}

/// Placeholders of `unit` that do not occur verbatim in `candidate`.
pub fn missing_placeholders(unit: &TranslationUnit, candidate: &str) -> Vec<String> {
    unit.placeholders
        .iter()
        .filter(|p| !candidate.contains(p.as_str()))
        .cloned()
        .collect()
}

/// Preserved names present in the source but not verbatim in the candidate.
pub fn altered_names(source: &str, candidate: &str, preserve_names: &[String]) -> Vec<String> {
    preserve_names
        .iter()
        .filter(|n| !n.is_empty() && source.contains(n.as_str()) && !candidate.contains(n.as_str()))
        .cloned()
        .collect()
}

/// Checks a cleaned candidate translation. `None` means it may be merged.
pub fn check_candidate(
    unit: &TranslationUnit,
    candidate: &str,
    preserve_names: &[String],
) -> Option<UnitOutcome> {
    if candidate.trim().is_empty() {
        return Some(UnitOutcome::EmptyTranslation);
    }

    let missing = missing_placeholders(unit, candidate);
    if !missing.is_empty() {
        return Some(UnitOutcome::PlaceholderViolation { missing });
    }

    let names = altered_names(&unit.source_text, candidate, preserve_names);
    if !names.is_empty() {
        return Some(UnitOutcome::PreservedNameViolation { names });
    }

    None
}

/// Audits the translated units of a document after a run.
pub fn run(document: &Document) -> Vec<QaIssue> {
    let mut issues: Vec<QaIssue> = Vec::new();

    for u in document.units() {
        let source = u.source_text.trim();
        let target = u.target_text.trim();

        if target.is_empty() {
            if u.state == UnitState::Translated || u.state == UnitState::Final {
                issues.push(QaIssue {
                    unit_id: u.id.clone(),
                    code: "STATE_TRANSLATED_BUT_EMPTY".to_string(),
                    message: "state marks the unit translated but the target is empty".to_string(),
                });
            }
            continue;
        }

        let missing = missing_placeholders(u, target);
        if !missing.is_empty() {
            issues.push(QaIssue {
                unit_id: u.id.clone(),
                code: "MISSING_PLACEHOLDER".to_string(),
                message: format!("target lacks {}", missing.join(", ")),
            });
        }

        // Short strings like "OK" are legitimately identical across languages.
        if u.is_modified() && target == source && source.chars().count() > 3 {
            issues.push(QaIssue {
                unit_id: u.id.clone(),
                code: "SAME_AS_SOURCE".to_string(),
                message: "translation is identical to the source".to_string(),
            });
        }
    }

    issues
}
