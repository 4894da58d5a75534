use crate::provider::ProviderKind;
use crate::writer::OutputMode;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Settings of one run, from `metrics-gen.toml` and the command line.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PatcherConfig {
    /// Directories whose `.rs` files are scanned, without descending.
    pub dirs: Vec<PathBuf>,
    /// Directories scanned recursively.
    pub recursive_dirs: Vec<PathBuf>,
    pub inplace: bool,
    pub suffix: Option<String>,
    pub provider: ProviderKind,
    pub metrics_prefix: Option<String>,
    pub dry_run: bool,
    pub verbose: bool,
    pub fetch_dependencies: bool,
    /// Manifest to update when none is found under the source roots.
    pub manifest: Option<PathBuf>,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            recursive_dirs: Vec::new(),
            inplace: false,
            suffix: None,
            provider: ProviderKind::default(),
            metrics_prefix: None,
            dry_run: false,
            verbose: false,
            fetch_dependencies: true,
            manifest: None,
        }
    }
}

impl PatcherConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        match (self.inplace, &self.suffix) {
            (true, Some(_)) => issues.push(ValidationIssue::ConflictingOutputModes),
            (false, None) => issues.push(ValidationIssue::MissingOutputMode),
            _ => {}
        }

        if let Some(suffix) = &self.suffix {
            if suffix.is_empty() || !suffix.chars().all(is_name_char) {
                issues.push(ValidationIssue::InvalidSuffix {
                    suffix: suffix.clone(),
                });
            }
        }

        if let Some(prefix) = &self.metrics_prefix {
            let valid = !prefix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !prefix.starts_with(|c: char| c.is_ascii_digit());
            if !valid {
                issues.push(ValidationIssue::InvalidPrefix {
                    prefix: prefix.clone(),
                });
            }
        }

        if self.dirs.is_empty() && self.recursive_dirs.is_empty() {
            issues.push(ValidationIssue::NoSourceRoots);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Output mode of a validated config.
    pub fn output_mode(&self) -> Option<OutputMode> {
        match (self.inplace, &self.suffix) {
            (true, None) => Some(OutputMode::InPlace),
            (false, Some(suffix)) => Some(OutputMode::Suffix(suffix.clone())),
            _ => None,
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn contains(&self, issue: &ValidationIssue) -> bool {
        self.issues.contains(issue)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    ConflictingOutputModes,
    MissingOutputMode,
    NoSourceRoots,
    InvalidSuffix { suffix: String },
    InvalidPrefix { prefix: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::ConflictingOutputModes => {
                write!(f, "in-place output and a suffix cannot be combined")
            }
            ValidationIssue::MissingOutputMode => {
                write!(f, "choose in-place output or a suffix for generated files")
            }
            ValidationIssue::NoSourceRoots => write!(f, "no source directories given"),
            ValidationIssue::InvalidSuffix { suffix } => write!(
                f,
                "suffix '{suffix}' must be non-empty and use only letters, digits, '_' or '-'"
            ),
            ValidationIssue::InvalidPrefix { prefix } => write!(
                f,
                "metrics prefix '{prefix}' is not a valid metric name component"
            ),
        }
    }
}
