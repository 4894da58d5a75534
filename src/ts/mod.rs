//! Tree-sitter integration for the Rust sources being patched.
//!
//! Trees are kept alongside the text they were parsed from and updated
//! incrementally after every splice, so comments and formatting survive
//! untouched.

pub mod errors;
pub mod parser;
pub mod query;

pub use errors::TreeSitterError;
pub use parser::{count_error_nodes, input_edit, RustParser};
pub use query::{QueryEngine, QueryMatch};
