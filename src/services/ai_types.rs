use std::path::PathBuf;

use serde::Serialize;

/// What happened to one unit of a batch.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitOutcome {
    Translated,
    /// The response line count did not allow a safe alignment.
    CountMismatch,
    PlaceholderViolation { missing: Vec<String> },
    PreservedNameViolation { names: Vec<String> },
    EmptyTranslation,
    CallFailed { error: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Translated)
    }

    pub fn reason(&self) -> String {
        match self {
            UnitOutcome::Translated => "translated".into(),
            UnitOutcome::CountMismatch => "response line count mismatch".into(),
            UnitOutcome::PlaceholderViolation { missing } => {
                format!("placeholders missing: {}", missing.join(", "))
            }
            UnitOutcome::PreservedNameViolation { names } => {
                format!("preserved names altered: {}", names.join(", "))
            }
            UnitOutcome::EmptyTranslation => "empty translation".into(),
            UnitOutcome::CallFailed { error } => format!("translation call failed: {error}"),
        }
    }
}

/// How response lines were matched to batch entries.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Exact,
    /// Extra trailing lines dropped.
    Prefix,
    /// Extra leading lines dropped.
    Suffix,
    Rejected,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct UnitResult {
    /// Position of the unit in its document.
    pub unit: usize,
    pub id: String,
    pub outcome: UnitOutcome,
}

#[derive(Debug, Serialize, Clone)]
pub struct MergeResult {
    pub batch: usize,
    pub expected: usize,
    pub received: usize,
    pub alignment: Alignment,
    pub outcomes: Vec<UnitResult>,
}

impl MergeResult {
    pub fn translated(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.translated()
    }

    pub fn is_count_mismatch(&self) -> bool {
        self.expected != self.received
    }

    pub fn units_with(&self, outcome: &UnitOutcome) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| &o.outcome == outcome)
            .map(|o| o.unit)
            .collect()
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

/// Per-file progress. `Failed` is absorbing.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Pending,
    Selected,
    Batched,
    Merged,
    Saved,
    Failed,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct RunResult {
    pub file: PathBuf,
    pub language: String,
    pub attempted: usize,
    pub translated: usize,
    pub status: RunStatus,
    pub stage: FileStage,
    pub failures: Vec<UnitFailure>,
    pub error: Option<String>,
}

impl RunResult {
    pub fn new(file: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        RunResult {
            file: file.into(),
            language: language.into(),
            attempted: 0,
            translated: 0,
            status: RunStatus::Success,
            stage: FileStage::Pending,
            failures: Vec::new(),
            error: None,
        }
    }

    pub fn fail(mut self, error: impl ToString) -> Self {
        self.status = RunStatus::Failed;
        self.stage = FileStage::Failed;
        self.error = Some(error.to_string());
        self
    }
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct RunSummary {
    pub results: Vec<RunResult>,
}

impl RunSummary {
    pub fn count(&self, status: RunStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn any_failed(&self) -> bool {
        self.count(RunStatus::Failed) > 0
    }

    pub fn total_translated(&self) -> usize {
        self.results.iter().map(|r| r.translated).sum()
    }
}
