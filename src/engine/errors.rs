use crate::fragment::FragmentError;
use crate::source::SourceError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("{path}:{line}: file was already instrumented (`{text}`)")]
    AlreadyGenerated {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("{path}:{line}: insertion point for `{text}` not found")]
    DeclarationNotFound {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("{path}: cannot import `{package}` as `{alias}`, the name is already taken")]
    ImportConflict {
        path: PathBuf,
        alias: String,
        package: String,
    },

    #[error("{path}:{line}: {source}")]
    InvalidFragment {
        path: PathBuf,
        line: usize,
        #[source]
        source: FragmentError,
    },

    #[error("{path}:{line}: generated statements need a function body")]
    NoFunctionBody { path: PathBuf, line: usize },

    #[error("{path}: patching introduced syntax errors ({before} before, {after} after)")]
    SyntaxIntroduced {
        path: PathBuf,
        before: usize,
        after: usize,
    },

    #[error(transparent)]
    Source(#[from] SourceError),
}
