use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::document::Document;
use crate::services::{encoding, rebuild};

pub const BACKUP_SUFFIX: &str = "bak";

/// Writes documents back in place. Each path is backed up once per writer,
/// so checkpoints later in the same run never overwrite the backup.
#[derive(Debug, Default)]
pub struct FileWriter {
    backed_up: HashSet<PathBuf>,
}

impl FileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, document: &Document, path: &Path) -> Result<()> {
        let text = rebuild::rebuild(document);
        let bytes = encoding::encode(&text, document.encoding());

        if !self.backed_up.contains(path) && path.exists() {
            let backup = backup_path(path);
            fs::copy(path, &backup)?;
            info!(backup = %backup.display(), "backup written");
            self.backed_up.insert(path.to_path_buf());
        }

        write_atomic(path, &bytes)?;

        debug!(
            path = %path.display(),
            bytes = bytes.len(),
            modified = document.modified_count(),
            "document saved"
        );
        Ok(())
    }

    pub fn has_backup(&self, path: &Path) -> bool {
        self.backed_up.contains(path)
    }
}

/// Backs up and writes `document` over `path` in one step.
pub fn save(document: &Document, path: &Path) -> Result<()> {
    FileWriter::new().save(document, path)
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file_name = match path.file_name().and_then(|s| s.to_str()) {
        Some(n) => n.to_string(),
        None => "document".to_string(),
    };
    p.set_file_name(format!("{file_name}.{BACKUP_SUFFIX}"));
    p
}

/// The temp file lives next to `path`; it is renamed over `path` on success
/// and deleted when dropped on any other path. It takes over the permissions
/// of the file it replaces.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
