use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::config::RunConfig;
use crate::model::document::Document;
use crate::services::ai::Translator;
use crate::services::ai_types::{
    Alignment, FileStage, MergeResult, RunResult, RunStatus, RunSummary, UnitFailure, UnitOutcome, UnitResult,
};
use crate::services::batcher::{self, escape_newlines, Batch};
use crate::services::merger::{self, MergeContext};
use crate::services::writer::FileWriter;
use crate::services::{export, qa, selector};

/// Drives select → batch → translate → merge → save, one file at a time.
pub struct Pipeline<'a> {
    config: &'a RunConfig,
    translator: &'a dyn Translator,
    writer: FileWriter,
}

/// Per-file state shared by the batches of one document.
struct FileJob<'p> {
    target_lang: &'p str,
    context: String,
    save_to: Option<&'p Path>,
    outcomes: Vec<UnitResult>,
    saved: bool,
    /// Some response did not have one line per unit, even if it was recovered.
    mismatched: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a RunConfig, translator: &'a dyn Translator) -> Self {
        Pipeline {
            config,
            translator,
            writer: FileWriter::new(),
        }
    }

    /// Translates one XLIFF file in place. Never fails: problems end up in the result.
    pub fn translate_file(&mut self, path: &Path, target_lang: &str) -> RunResult {
        info!(file = %path.display(), language = target_lang, "translating file");

        let result = match Document::load(path) {
            Ok(mut document) => self.translate_document(&mut document, target_lang, Some(path)),
            Err(e) => {
                error!(file = %path.display(), error = %e, "cannot load document");
                RunResult::new(path, target_lang).fail(e)
            }
        };

        log_result(&result);
        result
    }

    /// Translates `document`, checkpointing it to `save_to` after every batch
    /// that merged something.
    pub fn translate_document(
        &mut self,
        document: &mut Document,
        target_lang: &str,
        save_to: Option<&Path>,
    ) -> RunResult {
        let config = self.config;
        let options = &config.options;
        let mut result = RunResult::new(save_to.unwrap_or(document.path()), target_lang);

        let selected = selector::select(document, options.mode);
        result.attempted = selected.len();
        result.stage = FileStage::Selected;

        if selected.is_empty() {
            info!(language = target_lang, "nothing to translate");
            return result;
        }

        info!(
            units = selected.len(),
            total = document.units().len(),
            "selected units for translation"
        );

        let mut job = FileJob {
            target_lang,
            context: self.context_for(document, &selected),
            save_to,
            outcomes: Vec::with_capacity(selected.len()),
            saved: false,
            mismatched: false,
        };
        result.stage = FileStage::Batched;

        let run = self.translate_units(document, &selected, options.batch_size, &mut job);

        result.translated = job.outcomes.iter().filter(|o| o.outcome.is_success()).count();
        result.failures = job
            .outcomes
            .iter()
            .filter(|o| !o.outcome.is_success())
            .map(|o| UnitFailure {
                id: o.id.clone(),
                reason: o.outcome.reason(),
            })
            .collect();
        result.stage = if job.saved {
            FileStage::Saved
        } else {
            FileStage::Merged
        };

        if let Err(e) = run {
            error!(error = %e, "stopping file after write failure");
            return result.fail(e);
        }

        let all_calls_failed = job
            .outcomes
            .iter()
            .all(|o| matches!(o.outcome, UnitOutcome::CallFailed { .. }));

        result.status = if result.translated == result.attempted && !job.mismatched {
            RunStatus::Success
        } else if result.translated == 0 && all_calls_failed {
            result.stage = FileStage::Failed;
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };

        let issues = qa::run(document);
        if !issues.is_empty() {
            warn!(count = issues.len(), "quality issues in document");
            for issue in &issues {
                debug!(unit = %issue.unit_id, code = %issue.code, "{}", issue.message);
            }
        }

        result
    }

    /// Translates every `<lang>.xcloc` bundle of an export folder. One
    /// language failing never stops the others.
    pub fn translate_export(
        &mut self,
        export_dir: &Path,
        languages: Option<&[String]>,
    ) -> Result<RunSummary> {
        info!(folder = %export_dir.display(), "processing export folder");

        let bundles = export::discover(export_dir, languages)?;
        let mut summary = RunSummary::default();

        for bundle in bundles {
            if !bundle.xliff.exists() {
                error!(language = %bundle.language, file = %bundle.xliff.display(), "xliff file not found");
                let result = RunResult::new(&bundle.xliff, &bundle.language).fail("xliff file not found");
                log_result(&result);
                summary.results.push(result);
                continue;
            }

            summary
                .results
                .push(self.translate_file(&bundle.xliff, &bundle.language));
        }

        log_summary(&summary);
        Ok(summary)
    }

    fn translate_units(
        &mut self,
        document: &mut Document,
        units: &[usize],
        batch_size: usize,
        job: &mut FileJob,
    ) -> Result<()> {
        let batches = batcher::make_batches(units, batch_size);
        let count = batches.len();

        for batch in batches {
            info!(batch = batch.number, of = count, units = batch.len(), "translating batch");

            let merged = self.translate_batch(document, &batch, job);

            if merged.translated() > 0 {
                if let Some(path) = job.save_to {
                    self.writer.save(document, path)?;
                    job.saved = true;
                }
            }

            let mismatched = merged.units_with(&UnitOutcome::CountMismatch);
            if !mismatched.is_empty() || matches!(merged.alignment, Alignment::Prefix | Alignment::Suffix) {
                job.mismatched = true;
            }
            let split = self.config.options.split_on_mismatch && batch.len() > 1 && !mismatched.is_empty();

            job.outcomes.extend(
                merged
                    .outcomes
                    .into_iter()
                    .filter(|o| !(split && o.outcome == UnitOutcome::CountMismatch)),
            );

            if split {
                let smaller = (batch.len() / 2).max(1);
                warn!(
                    batch = batch.number,
                    units = mismatched.len(),
                    batch_size = smaller,
                    "retrying mismatched units in smaller batches"
                );
                self.translate_units(document, &mismatched, smaller, job)?;
            }
        }

        Ok(())
    }

    fn translate_batch(&self, document: &mut Document, batch: &Batch, job: &FileJob) -> MergeResult {
        let prompt = batcher::build_prompt(
            batch,
            document,
            &self.config.templates,
            job.target_lang,
            &job.context,
        );
        debug!(
            system_chars = prompt.system.len(),
            user_chars = prompt.user.len(),
            "prompt rendered"
        );

        match self.translator.translate(&prompt.system, &prompt.user) {
            Ok(raw) => {
                let ctx = MergeContext {
                    preserve_names: &self.config.context.preserve_names,
                    max_realign_drift: self.config.options.max_realign_drift,
                };
                merger::merge(document, batch, &raw, &ctx)
            }
            Err(e) => {
                warn!(batch = batch.number, error = %e, "batch failed");
                merger::reject(
                    document,
                    batch,
                    UnitOutcome::CallFailed {
                        error: e.to_string(),
                    },
                )
            }
        }
    }

    /// App context plus existing translations of the units that are not being
    /// translated, offered as read-only references.
    fn context_for(&self, document: &Document, selected: &[usize]) -> String {
        let config = self.config;
        let mut context = config.context_text().to_string();
        let options = &config.options;

        if !options.reference_translations {
            return context;
        }

        let selected: HashSet<usize> = selected.iter().copied().collect();
        let references: Vec<String> = document
            .units()
            .iter()
            .enumerate()
            .filter(|(i, u)| !selected.contains(i) && !u.target_text.trim().is_empty())
            .take(options.max_reference_entries)
            .map(|(_, u)| {
                format!(
                    "- {} => {}",
                    escape_newlines(u.source_text.trim()),
                    escape_newlines(u.target_text.trim())
                )
            })
            .collect();

        if !references.is_empty() {
            context.push_str(
                "\n\nReference translations (DO NOT modify these, they are for context only):\n",
            );
            context.push_str(&references.join("\n"));
            context.push('\n');
        }

        context
    }
}

fn log_result(result: &RunResult) {
    match result.status {
        RunStatus::Success => info!(
            language = %result.language,
            file = %result.file.display(),
            translated = result.translated,
            attempted = result.attempted,
            "SUCCESS"
        ),
        RunStatus::Partial => warn!(
            language = %result.language,
            file = %result.file.display(),
            translated = result.translated,
            attempted = result.attempted,
            failed = result.failures.len(),
            "PARTIAL"
        ),
        RunStatus::Failed => error!(
            language = %result.language,
            file = %result.file.display(),
            error = result.error.as_deref().unwrap_or("all batches failed"),
            "FAILED"
        ),
    }

    for failure in &result.failures {
        debug!(unit = %failure.id, reason = %failure.reason, "unit not translated");
    }
}

pub fn log_summary(summary: &RunSummary) {
    info!(
        files = summary.results.len(),
        succeeded = summary.count(RunStatus::Success),
        partial = summary.count(RunStatus::Partial),
        failed = summary.count(RunStatus::Failed),
        translated = summary.total_translated(),
        "translation summary"
    );
}
