//! Thread-local parser pooling.
//!
//! Every source file in a run is parsed and reparsed many times; the parser
//! is created on first use per thread and reused afterwards.

use crate::ts::{RustParser, TreeSitterError};
use std::cell::RefCell;

thread_local! {
    static RUST_PARSER: RefCell<Option<RustParser>> = const { RefCell::new(None) };
}

/// Execute function with pooled parser instance.
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use metrics_gen::pool::with_parser;
///
/// let tree = with_parser(|parser| parser.parse("fn main() {}", None))??;
/// assert_eq!(tree.root_node().kind(), "source_file");
/// # Ok(())
/// # }
/// ```
pub fn with_parser<F, R>(f: F) -> Result<R, TreeSitterError>
where
    F: FnOnce(&mut RustParser) -> R,
{
    RUST_PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let parser = match slot.take() {
            Some(parser) => parser,
            None => RustParser::new()?,
        };
        Ok(f(slot.insert(parser)))
    })
}
