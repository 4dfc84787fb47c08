use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::unit::TranslationUnit;
use crate::parsers::xliff;
use crate::services::encoding::{self, TextEncoding};

/// One `<file>` element of the XLIFF document.
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct FileSection {
    pub original: Option<String>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
}

/// An XLIFF document kept next to its original text, so that writing it back
/// only touches the targets that were translated.
#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
    text: String,
    encoding: TextEncoding,
    files: Vec<FileSection>,
    units: Vec<TranslationUnit>,
}

impl Document {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let decoded = encoding::decode(&bytes);

        let mut document = Self::parse_with_path(decoded.text, path)?;
        document.encoding = decoded.encoding;

        debug!(
            path = %path.display(),
            units = document.units.len(),
            encoding = document.encoding.name(),
            "loaded xliff document"
        );

        Ok(document)
    }

    /// Parses an in-memory UTF-8 document.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_path(text.to_string(), Path::new("<memory>"))
    }

    fn parse_with_path(text: String, path: &Path) -> Result<Self> {
        let parsed = xliff::parse(&text).map_err(|message| Error::parse(path, message))?;

        Ok(Document {
            path: path.to_path_buf(),
            text,
            encoding: TextEncoding::default(),
            files: parsed.files,
            units: parsed.units,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decoded text as it was read, before any translation.
    pub fn original_text(&self) -> &str {
        &self.text
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn files(&self) -> &[FileSection] {
        &self.files
    }

    pub fn source_language(&self) -> Option<&str> {
        self.files.iter().find_map(|f| f.source_language.as_deref())
    }

    pub fn target_language(&self) -> Option<&str> {
        self.files.iter().find_map(|f| f.target_language.as_deref())
    }

    pub fn units(&self) -> &[TranslationUnit] {
        &self.units
    }

    pub fn unit(&self, index: usize) -> Option<&TranslationUnit> {
        self.units.get(index)
    }

    pub(crate) fn unit_mut(&mut self, index: usize) -> Option<&mut TranslationUnit> {
        self.units.get_mut(index)
    }

    pub fn unit_ids(&self) -> BTreeSet<(usize, &str)> {
        self.units
            .iter()
            .map(|u| (u.file_index, u.id.as_str()))
            .collect()
    }

    pub fn is_modified(&self) -> bool {
        self.units.iter().any(|u| u.modified)
    }

    pub fn modified_count(&self) -> usize {
        self.units.iter().filter(|u| u.modified).count()
    }
}
