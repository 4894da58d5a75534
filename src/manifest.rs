//! Adding the crates generated code depends on to the target manifest.
//!
//! The core only decides what is missing; fetching is behind
//! [`DependencyFetcher`] so tests and offline runs can replace `cargo add`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use toml_edit::DocumentMut;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub version: String,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// `name@version`, as understood by `cargo add`.
    pub fn spec(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml_edit::TomlError,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Fetch {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Dependencies of `deps` not yet listed under `[dependencies]`.
///
/// Hyphens and underscores in package names are treated alike.
pub fn missing_dependencies(
    manifest: &Path,
    deps: &[Dependency],
) -> Result<Vec<Dependency>, ManifestError> {
    let text = fs::read_to_string(manifest).map_err(|source| ManifestError::Io {
        path: manifest.to_path_buf(),
        source,
    })?;
    let document = text
        .parse::<DocumentMut>()
        .map_err(|source| ManifestError::Parse {
            path: manifest.to_path_buf(),
            source,
        })?;

    let table = document
        .get("dependencies")
        .and_then(|item| item.as_table_like());
    let present = |name: &str| {
        table.is_some_and(|table| {
            table.contains_key(name)
                || table.contains_key(&name.replace('-', "_"))
                || table.contains_key(&name.replace('_', "-"))
        })
    };

    Ok(deps
        .iter()
        .filter(|dep| !present(&dep.name))
        .cloned()
        .collect())
}

pub trait DependencyFetcher {
    fn fetch(&self, manifest: &Path, deps: &[Dependency]) -> Result<(), ManifestError>;
}

/// Runs `cargo add <name>@<version>... --manifest-path <manifest>`.
#[derive(Debug, Clone)]
pub struct CargoAddFetcher {
    cargo: PathBuf,
}

impl CargoAddFetcher {
    pub fn new() -> Self {
        let cargo = std::env::var_os("CARGO").map_or_else(|| PathBuf::from("cargo"), PathBuf::from);
        Self { cargo }
    }
}

impl Default for CargoAddFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyFetcher for CargoAddFetcher {
    fn fetch(&self, manifest: &Path, deps: &[Dependency]) -> Result<(), ManifestError> {
        let mut cmd = Command::new(&self.cargo);
        cmd.arg("add")
            .args(deps.iter().map(Dependency::spec))
            .arg("--manifest-path")
            .arg(manifest)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let command = format!(
            "cargo add {} --manifest-path {}",
            deps.iter().map(Dependency::spec).collect::<Vec<_>>().join(" "),
            manifest.display()
        );
        tracing::debug!("running {command}");

        let output = cmd.output().map_err(|source| ManifestError::Spawn {
            command: command.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(ManifestError::Fetch {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// What happened to the manifest after writing.
#[derive(Debug)]
pub enum DependencyOutcome {
    Skipped(&'static str),
    NoManifest,
    UpToDate,
    Fetched(Vec<Dependency>),
    /// A failed fetch does not fail the run; the user adds the crates by hand.
    Failed {
        missing: Vec<Dependency>,
        error: ManifestError,
    },
}

/// Add whatever of `deps` is missing from `manifest`. Failures are logged
/// and reported, never returned.
pub fn update_dependencies(
    manifest: Option<&Path>,
    deps: &[Dependency],
    fetcher: &dyn DependencyFetcher,
) -> DependencyOutcome {
    let Some(manifest) = manifest else {
        tracing::warn!("no Cargo.toml found under the source roots; add the dependencies by hand");
        return DependencyOutcome::NoManifest;
    };

    let missing = match missing_dependencies(manifest, deps) {
        Ok(missing) => missing,
        Err(error) => {
            tracing::warn!("{error}");
            return DependencyOutcome::Failed {
                missing: deps.to_vec(),
                error,
            };
        }
    };
    if missing.is_empty() {
        tracing::debug!("{} already lists every dependency", manifest.display());
        return DependencyOutcome::UpToDate;
    }

    match fetcher.fetch(manifest, &missing) {
        Ok(()) => {
            tracing::info!(
                "added {} to {}",
                missing
                    .iter()
                    .map(|d| d.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                manifest.display()
            );
            DependencyOutcome::Fetched(missing)
        }
        Err(error) => {
            tracing::warn!("dependency fetch failed: {error}");
            DependencyOutcome::Failed { missing, error }
        }
    }
}
