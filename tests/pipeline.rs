use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use xliff_translate::model::unit::UnitState;
use xliff_translate::services::ai_types::FileStage;
use xliff_translate::services::writer::backup_path;
use xliff_translate::{
    AppContext, Document, Error, Pipeline, PromptTemplates, Result, RunConfig, RunStatus,
    TranslateOptions, Translator,
};

/// Plays back canned responses and remembers the prompts it was sent.
struct Scripted {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(responses: Vec<Result<String>>) -> Self {
        Scripted {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn ok(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Translator for Scripted {
    fn translate(&self, _system: &str, user: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(user.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::TranslationCall("script exhausted".into())))
    }
}

const XLIFF: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>
<xliff xmlns=\"urn:oasis:names:tc:xliff:document:1.2\" version=\"1.2\">
  <file original=\"App/Localizable.strings\" source-language=\"en\" target-language=\"es\" datatype=\"plaintext\">
    <header>
      <tool tool-id=\"com.apple.dt.xcode\" tool-name=\"Xcode\" tool-version=\"15.0\"/>
    </header>
    <body>
      <trans-unit id=\"greeting\" xml:space=\"preserve\">
        <source>Hello {name}</source>
        <note>Shown on the home screen</note>
      </trans-unit>
      <trans-unit id=\"cancel\" xml:space=\"preserve\">
        <source>Cancel</source>
        <target state=\"new\"></target>
      </trans-unit>
      <trans-unit id=\"retry\" xml:space=\"preserve\">
        <source>Retry later</source>
      </trans-unit>
      <trans-unit id=\"done\" xml:space=\"preserve\">
        <source>Done</source>
        <target state=\"final\">Hecho</target>
      </trans-unit>
    </body>
  </file>
</xliff>
";

fn config(options: TranslateOptions) -> RunConfig {
    let templates = PromptTemplates::from_yaml(
        "system_prompt: \"Translate {num_texts} texts into {target_lang}.\"\n\
         translation_prompt: \"{app_context}\\n\\n{numbered_texts}\"\n",
    )
    .unwrap();
    let context = AppContext::from_yaml(
        "app_description: A habit tracker\n\
         preserve_names: []\n\
         terminology: []\n\
         style_guide: {}\n",
    )
    .unwrap();
    RunConfig::new(templates, context, options).unwrap()
}

fn write_xliff(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

fn targets(path: &Path) -> Vec<(String, String, UnitState)> {
    Document::load(path)
        .unwrap()
        .units()
        .iter()
        .map(|u| (u.id.clone(), u.target_text.clone(), u.state))
        .collect()
}

#[test]
fn full_response_merges_saves_and_keeps_the_rest_of_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_xliff(dir.path(), "es.xliff", XLIFF);
    let cfg = config(TranslateOptions::default());
    let backend = Scripted::ok(&["1. Hola {name}\n2. Cancelar\n3. Reintentar más tarde\n"]);

    let result = Pipeline::new(&cfg, &backend).translate_file(&path, "es");

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.stage, FileStage::Saved);
    assert_eq!((result.attempted, result.translated), (3, 3));

    let written = fs::read_to_string(&path).unwrap();
    let expected = XLIFF
        .replace(
            "<source>Hello {name}</source>\n",
            "<source>Hello {name}</source>\n        <target state=\"translated\">Hola {name}</target>\n",
        )
        .replace(
            "<target state=\"new\"></target>",
            "<target state=\"translated\">Cancelar</target>",
        )
        .replace(
            "<source>Retry later</source>\n",
            "<source>Retry later</source>\n        <target state=\"translated\">Reintentar más tarde</target>\n",
        );
    assert_eq!(written, expected);

    assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), XLIFF);

    let prompt = &backend.prompts.lock().unwrap()[0];
    assert!(prompt.starts_with("A habit tracker"));
    assert!(prompt.contains("- Done => Hecho"));
    assert!(prompt.contains("1. Hello {name}\n2. Cancel\n3. Retry later\n"));
}

#[test]
fn placeholder_violation_rejects_only_that_unit() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_xliff(dir.path(), "es.xliff", XLIFF);
    let cfg = config(TranslateOptions::default());
    let backend = Scripted::ok(&["Hola\nCancelar\nReintentar más tarde"]);

    let result = Pipeline::new(&cfg, &backend).translate_file(&path, "es");

    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.translated, 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].id, "greeting");
    assert!(result.failures[0].reason.contains("{name}"));

    let units = targets(&path);
    assert_eq!(units[0].1, "");
    assert_eq!(units[1].1, "Cancelar");
    assert_eq!(units[2].1, "Reintentar más tarde");
}

#[test]
fn short_response_merges_nothing_and_leaves_the_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_xliff(dir.path(), "es.xliff", XLIFF);
    let cfg = config(TranslateOptions {
        split_on_mismatch: false,
        ..TranslateOptions::default()
    });
    let backend = Scripted::ok(&["Hola {name}\nCancelar"]);

    let result = Pipeline::new(&cfg, &backend).translate_file(&path, "es");

    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.translated, 0);
    assert_eq!(result.stage, FileStage::Merged);
    assert_eq!(fs::read_to_string(&path).unwrap(), XLIFF);
    assert!(!backup_path(&path).exists());
}

#[test]
fn split_retry_recovers_a_short_response() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_xliff(dir.path(), "es.xliff", XLIFF);
    let cfg = config(TranslateOptions::default());
    let backend = Scripted::ok(&[
        "Hola {name}\nCancelar",
        "Hola {name}",
        "Cancelar",
        "Reintentar más tarde",
    ]);

    let result = Pipeline::new(&cfg, &backend).translate_file(&path, "es");

    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.translated, 3);
    assert!(result.failures.is_empty());
    assert_eq!(backend.calls(), 4);
    assert!(targets(&path).iter().all(|(_, target, _)| !target.is_empty()));
}

#[test]
fn second_run_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_xliff(dir.path(), "es.xliff", XLIFF);
    let cfg = config(TranslateOptions::default());
    let backend = Scripted::ok(&["Hola {name}\nCancelar\nReintentar más tarde"]);

    Pipeline::new(&cfg, &backend).translate_file(&path, "es");
    let after_first = fs::read(&path).unwrap();

    let result = Pipeline::new(&cfg, &backend).translate_file(&path, "es");

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.attempted, 0);
    assert_eq!(backend.calls(), 1);
    assert_eq!(fs::read(&path).unwrap(), after_first);
}

#[test]
fn translate_all_retranslates_final_units() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_xliff(dir.path(), "es.xliff", XLIFF);
    let cfg = config(TranslateOptions {
        mode: xliff_translate::SelectionMode::TranslateAll,
        ..TranslateOptions::default()
    });
    let backend = Scripted::ok(&["Hola {name}\nCancelar\nReintentar más tarde\nListo"]);

    let result = Pipeline::new(&cfg, &backend).translate_file(&path, "es");

    assert_eq!(result.attempted, 4);
    assert_eq!(result.status, RunStatus::Success);
    let units = targets(&path);
    assert_eq!(units[3].1, "Listo");
    assert_eq!(units[3].2, UnitState::Translated);
}

#[test]
fn backend_failure_fails_the_file_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_xliff(dir.path(), "es.xliff", XLIFF);
    let cfg = config(TranslateOptions::default());
    let backend = Scripted::new(vec![Err(Error::TranslationCall("HTTP 529: overloaded".into()))]);

    let result = Pipeline::new(&cfg, &backend).translate_file(&path, "es");

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.translated, 0);
    assert_eq!(fs::read_to_string(&path).unwrap(), XLIFF);
    assert!(!backup_path(&path).exists());
}

#[test]
fn malformed_file_is_a_failed_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_xliff(dir.path(), "es.xliff", "<xliff><file><body><trans-unit id=\"a\">");
    let cfg = config(TranslateOptions::default());
    let backend = Scripted::ok(&[]);

    let result = Pipeline::new(&cfg, &backend).translate_file(&path, "es");

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.stage, FileStage::Failed);
    assert!(result.error.is_some());
    assert_eq!(backend.calls(), 0);
}

fn bundle(root: &Path, lang: &str, xliff: Option<&str>) -> PathBuf {
    let contents = root.join(format!("{lang}.xcloc")).join("Localized Contents");
    fs::create_dir_all(&contents).unwrap();
    let path = contents.join(format!("{lang}.xliff"));
    if let Some(text) = xliff {
        fs::write(&path, text).unwrap();
    }
    path
}

#[test]
fn export_folder_isolates_languages() {
    let dir = tempfile::tempdir().unwrap();
    let en = bundle(dir.path(), "en", Some(XLIFF));
    bundle(dir.path(), "de", None);
    let es = bundle(dir.path(), "es", Some(XLIFF));
    let french = XLIFF.replace("target-language=\"es\"", "target-language=\"fr\"");
    let fr = bundle(dir.path(), "fr", Some(&french));

    let cfg = config(TranslateOptions::default());
    let backend = Scripted::new(vec![
        Err(Error::TranslationCall("timeout".into())),
        Ok("Bonjour {name}\nAnnuler\nRéessayer plus tard".into()),
    ]);

    let summary = Pipeline::new(&cfg, &backend)
        .translate_export(dir.path(), None)
        .unwrap();

    let statuses: Vec<(&str, RunStatus)> = summary
        .results
        .iter()
        .map(|r| (r.language.as_str(), r.status))
        .collect();
    assert_eq!(
        statuses,
        [
            ("de", RunStatus::Failed),
            ("es", RunStatus::Failed),
            ("fr", RunStatus::Success),
        ]
    );
    assert!(summary.any_failed());
    assert_eq!(summary.total_translated(), 3);

    assert_eq!(fs::read_to_string(&en).unwrap(), XLIFF);
    assert_eq!(fs::read_to_string(&es).unwrap(), XLIFF);
    assert_eq!(targets(&fr)[1].1, "Annuler");

    let prompts = backend.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
}

#[test]
fn export_language_filter_skips_other_bundles() {
    let dir = tempfile::tempdir().unwrap();
    let es = bundle(dir.path(), "es", Some(XLIFF));
    let ja = bundle(dir.path(), "ja", Some(XLIFF));

    let cfg = config(TranslateOptions::default());
    let backend = Scripted::ok(&["ハロー {name}\nキャンセル\n後で再試行"]);
    let wanted = vec!["ja".to_string()];

    let summary = Pipeline::new(&cfg, &backend)
        .translate_export(dir.path(), Some(&wanted))
        .unwrap();

    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].language, "ja");
    assert_eq!(fs::read_to_string(&es).unwrap(), XLIFF);
    assert_eq!(targets(&ja)[1].1, "キャンセル");
}

#[test]
fn utf16_files_are_written_back_as_utf16() {
    let dir = tempfile::tempdir().unwrap();
    let text = XLIFF.replace("encoding=\"UTF-8\"", "encoding=\"UTF-16\"");
    let mut bytes = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let path = dir.path().join("es.xliff");
    fs::write(&path, &bytes).unwrap();

    let cfg = config(TranslateOptions::default());
    let backend = Scripted::ok(&["Hola {name}\nCancelar\nReintentar más tarde"]);

    let result = Pipeline::new(&cfg, &backend).translate_file(&path, "es");

    assert_eq!(result.status, RunStatus::Success);
    let written = fs::read(&path).unwrap();
    assert_eq!(&written[..2], &[0xFF, 0xFE]);
    assert_eq!(targets(&path)[2].1, "Reintentar más tarde");
}
