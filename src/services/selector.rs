use crate::model::document::Document;
use crate::model::unit::{TranslationUnit, UnitState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Only untranslated or explicitly flagged units, never `final` ones.
    #[default]
    Default,
    /// Every unit with source text, regardless of state.
    TranslateAll,
}

/// Positions of the units to translate, in document order.
pub fn select(document: &Document, mode: SelectionMode) -> Vec<usize> {
    document
        .units()
        .iter()
        .enumerate()
        .filter_map(|(i, u)| if needs_translation(u, mode) { Some(i) } else { None })
        .collect()
}

pub fn needs_translation(unit: &TranslationUnit, mode: SelectionMode) -> bool {
    if unit.source_text.trim().is_empty() || unit.has_markup {
        return false;
    }

    match mode {
        SelectionMode::TranslateAll => true,
        SelectionMode::Default => {
            unit.state != UnitState::Final
                && (unit.target_text.trim().is_empty() || unit.state == UnitState::NeedsTranslation)
        }
    }
}
