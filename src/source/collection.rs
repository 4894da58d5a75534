use crate::directive::{Directive, DirectiveKind};
use crate::source::{SourceError, SourceFile};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MANIFEST: &str = "Cargo.toml";

/// Location of the single `define` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionSite {
    pub path: PathBuf,
    pub line: usize,
}

/// Every source file of one run, keyed and iterated by path.
#[derive(Debug, Default)]
pub struct SourceCollection {
    files: BTreeMap<PathBuf, SourceFile>,
    definition: Option<DefinitionSite>,
    manifest: Option<PathBuf>,
    ignore_suffix: Option<String>,
}

impl SourceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip `<stem>_<suffix>.rs` files while walking directories; they are
    /// outputs of an earlier suffix-mode run.
    pub fn ignoring_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.ignore_suffix = Some(suffix.into());
        self
    }

    /// Load and scan one file. Adding the same file twice is a no-op.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<(), SourceError> {
        let path = canonical(path.as_ref());
        if self.files.contains_key(&path) {
            return Ok(());
        }
        let text = fs::read_to_string(&path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        self.insert(SourceFile::parse(path, text)?)
    }

    /// Add a file from memory.
    pub fn add_source(
        &mut self,
        path: impl Into<PathBuf>,
        text: impl Into<String>,
    ) -> Result<(), SourceError> {
        let file = SourceFile::parse(path, text)?;
        if self.files.contains_key(file.path()) {
            return Ok(());
        }
        self.insert(file)
    }

    /// Add the `.rs` files of `dir`, descending into subdirectories when
    /// `recursive` is set. `target/` and hidden directories are skipped. A
    /// `Cargo.toml` met on the way is remembered as the manifest.
    pub fn add_dir(&mut self, dir: impl AsRef<Path>, recursive: bool) -> Result<(), SourceError> {
        let dir = dir.as_ref();
        let walker = WalkDir::new(dir)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));

        let mut sources = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|source| SourceError::Walk {
                path: dir.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if path.file_name().is_some_and(|name| name == MANIFEST) {
                self.record_manifest(path)?;
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                if self.is_previous_output(path) {
                    tracing::debug!("ignoring generated file {}", path.display());
                    continue;
                }
                sources.push(path.to_path_buf());
            }
        }

        for path in sources {
            tracing::debug!("adding source file {}", path.display());
            self.add_file(&path)?;
        }
        Ok(())
    }

    fn insert(&mut self, file: SourceFile) -> Result<(), SourceError> {
        for define in file.defines() {
            if let Some(first) = &self.definition {
                return Err(SourceError::MultipleDefinitions {
                    first: first.path.clone(),
                    first_line: first.line,
                    second: file.path().to_path_buf(),
                    second_line: define.line,
                });
            }
            self.definition = Some(DefinitionSite {
                path: file.path().to_path_buf(),
                line: define.line,
            });
        }

        self.files.insert(file.path().to_path_buf(), file);
        Ok(())
    }

    fn record_manifest(&mut self, path: &Path) -> Result<(), SourceError> {
        let path = canonical(path);
        match &self.manifest {
            Some(first) if *first != path => Err(SourceError::MultipleManifests {
                first: first.clone(),
                second: path,
            }),
            _ => {
                tracing::debug!("found manifest {}", path.display());
                self.manifest = Some(path);
                Ok(())
            }
        }
    }

    /// Use `path` as the manifest when none was discovered while walking.
    pub fn set_manifest(&mut self, path: impl AsRef<Path>) -> Result<(), SourceError> {
        self.record_manifest(path.as_ref())
    }

    fn is_previous_output(&self, path: &Path) -> bool {
        let (Some(suffix), Some(stem)) = (
            self.ignore_suffix.as_deref(),
            path.file_stem().and_then(|s| s.to_str()),
        ) else {
            return false;
        };
        stem.strip_suffix(suffix)
            .is_some_and(|rest| rest.len() > 1 && rest.ends_with('_'))
    }

    pub fn has_definition(&self) -> bool {
        self.definition.is_some()
    }

    pub fn definition(&self) -> Option<&DefinitionSite> {
        self.definition.as_ref()
    }

    /// The `define` directive itself, with its parameters.
    pub fn definition_directive(&self) -> Option<&Directive> {
        let site = self.definition.as_ref()?;
        self.files
            .get(&site.path)?
            .directives()
            .iter()
            .find(|d| d.kind == DirectiveKind::Define)
    }

    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest.as_deref()
    }

    /// Directives of `path` in source order; empty for unknown files.
    pub fn directives(&self, path: impl AsRef<Path>) -> &[Directive] {
        self.files
            .get(path.as_ref())
            .map(SourceFile::directives)
            .unwrap_or(&[])
    }

    pub fn is_modified(&self, path: impl AsRef<Path>) -> bool {
        self.files
            .get(path.as_ref())
            .is_some_and(SourceFile::is_modified)
    }

    /// Files in path order.
    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.values()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<&SourceFile> {
        self.files.get(path.as_ref())
    }

    pub fn file_mut(&mut self, path: impl AsRef<Path>) -> Result<&mut SourceFile, SourceError> {
        let path = path.as_ref();
        self.files
            .get_mut(path)
            .ok_or_else(|| SourceError::UnknownFile {
                path: path.to_path_buf(),
            })
    }

    pub fn modified_files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.values().filter(|f| f.is_modified())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || name == "target")
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
