use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

pub const BUNDLE_EXTENSION: &str = "xcloc";
pub const SOURCE_LANGUAGE: &str = "en";
const CONTENTS_DIR: &str = "Localized Contents";

/// One `<lang>.xcloc` bundle of an export folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub language: String,
    pub dir: PathBuf,
    /// `Localized Contents/<lang>.xliff`; may not exist.
    pub xliff: PathBuf,
}

impl Bundle {
    pub fn from_dir(dir: &Path) -> Option<Self> {
        if dir.extension().and_then(|e| e.to_str()) != Some(BUNDLE_EXTENSION) {
            return None;
        }
        let language = dir.file_stem()?.to_str()?.to_string();
        let xliff = dir.join(CONTENTS_DIR).join(format!("{language}.xliff"));

        Some(Bundle {
            language,
            dir: dir.to_path_buf(),
            xliff,
        })
    }
}

/// Lists the bundles to translate, sorted by language. The source-language
/// bundle is skipped, and so is every language not in `languages` when given.
pub fn discover(export_dir: &Path, languages: Option<&[String]>) -> Result<Vec<Bundle>> {
    if !export_dir.is_dir() {
        return Err(Error::config(format!("not a directory: {}", export_dir.display())));
    }

    let mut bundles: Vec<Bundle> = fs::read_dir(export_dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| Bundle::from_dir(&p))
        .collect();

    if bundles.is_empty() {
        return Err(Error::config(format!(
            "no .{BUNDLE_EXTENSION} folders found in {}",
            export_dir.display()
        )));
    }

    bundles.sort_by(|a, b| a.language.cmp(&b.language));

    bundles.retain(|b| {
        if b.language.eq_ignore_ascii_case(SOURCE_LANGUAGE) {
            info!(bundle = %b.dir.display(), "skipping source language bundle");
            return false;
        }
        if let Some(wanted) = languages {
            if !wanted.iter().any(|l| l == &b.language) {
                debug!(language = %b.language, "skipping language not requested");
                return false;
            }
        }
        true
    });

    Ok(bundles)
}
