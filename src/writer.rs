//! Persisting patched files.

use crate::edit::{atomic_write, EditError};
use crate::source::SourceCollection;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where patched text goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Overwrite the source file.
    InPlace,
    /// Write `<stem>_<suffix>.<ext>` next to the source file.
    Suffix(String),
}

impl OutputMode {
    pub fn destination(&self, source: &Path) -> PathBuf {
        match self {
            OutputMode::InPlace => source.to_path_buf(),
            OutputMode::Suffix(suffix) => {
                let stem = source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let name = match source.extension() {
                    Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
                    None => format!("{stem}_{suffix}"),
                };
                source.with_file_name(name)
            }
        }
    }
}

#[derive(Error, Debug)]
#[error("failed to write {path}: {source}")]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: EditError,
}

/// One file handled by [`Writer::flush`].
#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub original: String,
    pub contents: String,
    /// False in dry-run mode.
    pub written: bool,
}

#[derive(Debug, Clone)]
pub struct Writer {
    mode: OutputMode,
    dry_run: bool,
}

impl Writer {
    pub fn new(mode: OutputMode, dry_run: bool) -> Self {
        Self { mode, dry_run }
    }

    /// Write every modified file of `sources`. Unmodified files are left
    /// alone in every mode.
    pub fn flush(&self, sources: &SourceCollection) -> Result<Vec<WrittenFile>, WriteError> {
        let mut written = Vec::new();
        for file in sources.modified_files() {
            let destination = self.mode.destination(file.path());
            if self.dry_run {
                tracing::info!("would write {}", destination.display());
            } else {
                atomic_write(&destination, file.text().as_bytes()).map_err(|source| {
                    WriteError {
                        path: destination.clone(),
                        source,
                    }
                })?;
                tracing::info!("wrote {}", destination.display());
            }
            written.push(WrittenFile {
                source: file.path().to_path_buf(),
                destination,
                original: file.original().to_string(),
                contents: file.text().to_string(),
                written: !self.dry_run,
            });
        }
        Ok(written)
    }
}
