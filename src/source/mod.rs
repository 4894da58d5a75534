//! In-memory model of the source tree being patched.
//!
//! Each file keeps its text, its tree-sitter tree and the directives found
//! in it. The collection owns every file for the duration of one run.

pub mod collection;
pub mod errors;
pub mod file;
pub mod imports;
mod scan;

pub use collection::{DefinitionSite, SourceCollection};
pub use errors::SourceError;
pub use file::SourceFile;
pub use imports::{ImportBinding, ImportCheck, ImportSet};
