use crate::directive::DirectiveKind;
use crate::engine::PatchError;
use crate::fragment::FragmentError;
use crate::source::SourceError;
use crate::writer::WriteError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("no `+trace:define` directive found in any source file")]
    NoDefinition,

    #[error("{path}:{line}: the {provider} provider does not support `{kind}` directives")]
    Unsupported {
        path: PathBuf,
        line: usize,
        kind: DirectiveKind,
        provider: &'static str,
    },

    #[error("{path}:{line}: `{kind}` must be attached to {expected}")]
    Misplaced {
        path: PathBuf,
        line: usize,
        kind: DirectiveKind,
        expected: &'static str,
    },

    #[error("{path}:{line}: `{kind}` requires a function, found {found}")]
    NotAFunction {
        path: PathBuf,
        line: usize,
        kind: DirectiveKind,
        found: String,
    },

    #[error("{path}:{line}: invalid value `{value}` for `{key}`: {reason}")]
    InvalidParam {
        path: PathBuf,
        line: usize,
        key: String,
        value: String,
        reason: String,
    },

    #[error("{path}:{line}: `{kind}` requires parameter `{key}`")]
    MissingParam {
        path: PathBuf,
        line: usize,
        kind: DirectiveKind,
        key: &'static str,
    },

    #[error("{path}:{line}: cannot render template: {source}")]
    Template {
        path: PathBuf,
        line: usize,
        #[source]
        source: FragmentError,
    },

    #[error("{path}:{line}: metric `{name}` is already registered at {first_path}:{first_line}")]
    DuplicateMetric {
        path: PathBuf,
        line: usize,
        name: String,
        first_path: PathBuf,
        first_line: usize,
    },

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Write(#[from] WriteError),
}
