use crate::directive::DirectiveError;
use crate::edit::EditError;
use crate::ts::TreeSitterError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: TreeSitterError,
    },

    #[error("{path}:{line}: {source}")]
    Directive {
        path: PathBuf,
        line: usize,
        #[source]
        source: DirectiveError,
    },

    #[error("{path}:{line}: directive `{text}` is not followed by an item or statement")]
    Unattached {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("{path}:{line}: no code can be generated for `{text}` in {scope}")]
    Unreachable {
        path: PathBuf,
        line: usize,
        text: String,
        scope: &'static str,
    },

    #[error(
        "multiple define directives: {}:{first_line} and {}:{second_line}",
        first.display(),
        second.display()
    )]
    MultipleDefinitions {
        first: PathBuf,
        first_line: usize,
        second: PathBuf,
        second_line: usize,
    },

    #[error("multiple Cargo.toml manifests: {} and {}", first.display(), second.display())]
    MultipleManifests { first: PathBuf, second: PathBuf },

    #[error("{path} is not part of the collection")]
    UnknownFile { path: PathBuf },

    #[error("edit failed in {path}: {source}")]
    Edit {
        path: PathBuf,
        #[source]
        source: EditError,
    },
}
