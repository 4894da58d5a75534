//! Template providers: turn directives into code fragments.
//!
//! A provider runs in three phases over the whole collection. `pre_patch`
//! checks global preconditions, `patch` renders and splices every directive,
//! `post_patch` writes the result and updates the manifest. The phases have
//! default implementations; a provider only supplies `render` and the list
//! of crates the generated code depends on.

pub mod errors;
pub mod metrics;
pub mod prometheus;
pub mod site;

pub use errors::ProviderError;
pub use site::DirectiveSite;

use crate::context::RunContext;
use crate::directive::DirectiveKind;
use crate::engine::{PatchEngine, PatchError};
use crate::fragment::CodeFragment;
use crate::manifest::{update_dependencies, Dependency, DependencyFetcher, DependencyOutcome};
use crate::source::SourceCollection;
use crate::writer::{OutputMode, WrittenFile, Writer};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Settings shared by every provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub output: OutputMode,
    pub dry_run: bool,
    pub metrics_prefix: Option<String>,
    pub fetch: bool,
}

impl ProviderSettings {
    pub fn new(output: OutputMode) -> Self {
        Self {
            output,
            dry_run: false,
            metrics_prefix: None,
            fetch: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub files: usize,
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct PostPatchReport {
    pub written: Vec<WrittenFile>,
    pub dependencies: DependencyOutcome,
}

pub trait TemplateProvider {
    fn name(&self) -> &'static str;

    fn settings(&self) -> &ProviderSettings;

    /// Fragment for one directive, or `None` when the directive asks for
    /// nothing to be generated.
    fn render(
        &self,
        site: &DirectiveSite<'_>,
        ctx: &mut RunContext,
    ) -> Result<Option<CodeFragment>, ProviderError>;

    /// Crates the generated code needs in the target manifest.
    fn dependencies(&self) -> Vec<Dependency>;

    fn pre_patch(&self, sources: &SourceCollection) -> Result<(), ProviderError> {
        match sources.definition() {
            Some(site) => {
                tracing::debug!("definition at {}:{}", site.path.display(), site.line);
                Ok(())
            }
            None => Err(ProviderError::NoDefinition),
        }
    }

    fn patch(
        &self,
        sources: &mut SourceCollection,
        ctx: &mut RunContext,
    ) -> Result<PatchSummary, ProviderError> {
        let mut summary = PatchSummary::default();
        let prefix = self.settings().metrics_prefix.clone();
        let define = sources.definition_directive().cloned();

        for path in sources.paths() {
            let file = sources.file_mut(&path)?;
            if file.directives().is_empty() {
                continue;
            }
            PatchEngine::ensure_unpatched(file)?;
            summary.files += 1;

            for index in 0..file.directives().len() {
                let directive = file.directives()[index].clone();
                match directive.kind {
                    DirectiveKind::Empty => {
                        tracing::debug!("{}:{}: empty directive", path.display(), directive.line);
                        continue;
                    }
                    DirectiveKind::RegionBegin | DirectiveKind::RegionEnd => {
                        return Err(PatchError::AlreadyGenerated {
                            path: path.clone(),
                            line: directive.line,
                            text: directive.text,
                        }
                        .into());
                    }
                    _ => {}
                }

                let site = DirectiveSite {
                    path: &path,
                    directive: &directive,
                    define: define.as_ref(),
                    metrics_prefix: prefix.as_deref(),
                };
                match self.render(&site, ctx)? {
                    Some(fragment) => {
                        PatchEngine::new(ctx).apply(file, index, fragment)?;
                        summary.applied += 1;
                        tracing::info!(
                            "{}:{}: generated code for `{}`",
                            path.display(),
                            directive.line,
                            directive.kind
                        );
                    }
                    None => {
                        summary.skipped += 1;
                        tracing::debug!(
                            "{}:{}: nothing to generate for `{}`",
                            path.display(),
                            directive.line,
                            directive.kind
                        );
                    }
                }
            }
        }

        Ok(summary)
    }

    fn post_patch(
        &self,
        sources: &SourceCollection,
        fetcher: &dyn DependencyFetcher,
    ) -> Result<PostPatchReport, ProviderError> {
        let settings = self.settings();
        let writer = Writer::new(settings.output.clone(), settings.dry_run);
        let written = writer.flush(sources)?;

        let dependencies = if settings.dry_run {
            DependencyOutcome::Skipped("dry run")
        } else if !settings.fetch {
            DependencyOutcome::Skipped("dependency fetch disabled")
        } else if written.is_empty() {
            DependencyOutcome::Skipped("no file was modified")
        } else {
            update_dependencies(sources.manifest_path(), &self.dependencies(), fetcher)
        };

        Ok(PostPatchReport {
            written,
            dependencies,
        })
    }
}

/// Which provider generates the code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Pull-based exporter serving the default registry over HTTP.
    #[default]
    Prometheus,
    /// `metrics` facade with an in-process recorder dumped periodically.
    Metrics,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prometheus" => Ok(ProviderKind::Prometheus),
            "metrics" => Ok(ProviderKind::Metrics),
            other => Err(format!(
                "unknown provider '{other}' (expected 'prometheus' or 'metrics')"
            )),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Prometheus => write!(f, "prometheus"),
            ProviderKind::Metrics => write!(f, "metrics"),
        }
    }
}

pub fn create_provider(kind: ProviderKind, settings: ProviderSettings) -> Box<dyn TemplateProvider> {
    match kind {
        ProviderKind::Prometheus => Box::new(prometheus::PrometheusProvider::new(settings)),
        ProviderKind::Metrics => Box::new(metrics::MetricsProvider::new(settings)),
    }
}

/// Nanoseconds of `duration` as a literal for generated code.
pub(crate) fn nanos_literal(duration: std::time::Duration) -> String {
    format!("{}u64", duration.as_nanos().min(u128::from(u64::MAX)))
}

/// Replace every `%KEY%` hole of `template` with its value. Inserted
/// values are not scanned for further holes.
pub(crate) fn fill(template: &str, holes: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let hole = after.find('%').and_then(|end| {
            holes
                .iter()
                .find(|(key, _)| *key == &after[..end])
                .map(|(_, value)| (end, *value))
        });
        match hole {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `text` with `$` doubled so fragment compilation keeps it literal.
pub(crate) fn escape(text: &str) -> String {
    text.replace('$', "$$")
}

/// `value` as a Rust string literal, escaped for fragment templates.
pub(crate) fn literal(value: &str) -> String {
    escape(&format!("{value:?}"))
}
