//! One invocation end to end: load, pre-patch, patch, post-patch.

use crate::config::{ConfigError, PatcherConfig, ValidationError, ValidationIssue};
use crate::context::RunContext;
use crate::directive::Directive;
use crate::manifest::{DependencyFetcher, DependencyOutcome};
use crate::provider::{
    create_provider, PatchSummary, ProviderError, ProviderSettings, TemplateProvider,
};
use crate::source::{SourceCollection, SourceError};
use crate::writer::WrittenFile;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug)]
pub struct RunReport {
    pub token: String,
    pub provider: &'static str,
    pub summary: PatchSummary,
    pub written: Vec<WrittenFile>,
    pub dependencies: DependencyOutcome,
}

/// Directives of one file, as reported by `scan`.
#[derive(Debug)]
pub struct FileDirectives {
    pub path: PathBuf,
    pub directives: Vec<Directive>,
}

/// Load every source root of `config`.
pub fn load_sources(config: &PatcherConfig) -> Result<SourceCollection, SourceError> {
    let mut sources = match &config.suffix {
        Some(suffix) => SourceCollection::new().ignoring_suffix(suffix.clone()),
        None => SourceCollection::new(),
    };
    for dir in &config.dirs {
        sources.add_dir(dir, false)?;
    }
    for dir in &config.recursive_dirs {
        sources.add_dir(dir, true)?;
    }
    if sources.manifest_path().is_none() {
        if let Some(manifest) = &config.manifest {
            sources.set_manifest(manifest)?;
        }
    }
    tracing::debug!("loaded {} source file(s)", sources.len());
    Ok(sources)
}

/// Run the generator. Nothing is written unless every directive of every
/// file was rendered and spliced.
pub fn generate(
    config: &PatcherConfig,
    ctx: &mut RunContext,
    fetcher: &dyn DependencyFetcher,
) -> Result<RunReport, RunError> {
    config.validate().map_err(|source| ConfigError::Validation {
        path: None,
        source,
    })?;
    let output = config.output_mode().ok_or_else(|| ConfigError::Validation {
        path: None,
        source: ValidationError {
            issues: vec![ValidationIssue::MissingOutputMode],
        },
    })?;

    let settings = ProviderSettings {
        output,
        dry_run: config.dry_run,
        metrics_prefix: config.metrics_prefix.clone(),
        fetch: config.fetch_dependencies,
    };
    let provider = create_provider(config.provider, settings);
    tracing::info!(
        "generating with the {} provider (run {})",
        provider.name(),
        ctx.token()
    );

    let mut sources = load_sources(config)?;
    run_phases(provider.as_ref(), &mut sources, ctx, fetcher)
}

/// The three provider phases over an already loaded collection.
pub fn run_phases(
    provider: &dyn TemplateProvider,
    sources: &mut SourceCollection,
    ctx: &mut RunContext,
    fetcher: &dyn DependencyFetcher,
) -> Result<RunReport, RunError> {
    provider.pre_patch(sources)?;
    let summary = provider.patch(sources, ctx)?;
    let report = provider.post_patch(sources, fetcher)?;

    Ok(RunReport {
        token: ctx.token().to_string(),
        provider: provider.name(),
        summary,
        written: report.written,
        dependencies: report.dependencies,
    })
}

/// Directives found under the source roots of `config`, per file.
pub fn scan(config: &PatcherConfig) -> Result<Vec<FileDirectives>, SourceError> {
    let sources = load_sources(config)?;
    Ok(sources
        .files()
        .filter(|file| !file.directives().is_empty())
        .map(|file| FileDirectives {
            path: file.path().to_path_buf(),
            directives: file.directives().to_vec(),
        })
        .collect())
}
