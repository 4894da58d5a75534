use crate::ts::errors::TreeSitterError;
use ast_grep_language::{LanguageExt, SupportLang};
use std::collections::HashMap;
use tree_sitter::{Node, Query, QueryCursor, StreamingIterator};

/// A match from a tree-sitter query with captured nodes.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    /// The full match byte range
    pub byte_start: usize,
    pub byte_end: usize,
    /// Named captures: capture_name -> captured node
    pub captures: HashMap<String, CapturedNode>,
}

impl QueryMatch {
    pub fn text(&self, capture: &str) -> Option<&str> {
        self.captures.get(capture).map(|c| c.text.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CapturedNode {
    pub byte_start: usize,
    pub byte_end: usize,
    pub text: String,
    pub kind: String,
}

/// Engine for executing tree-sitter queries against a parsed Rust file.
pub struct QueryEngine {
    query: Query,
    capture_names: Vec<String>,
}

impl QueryEngine {
    /// Create a new query engine from a tree-sitter query string.
    ///
    /// Tree-sitter queries use S-expression syntax:
    /// ```text
    /// (source_file
    ///   (extern_crate_declaration
    ///     name: (identifier) @name))
    /// ```
    pub fn new(query_str: &str) -> Result<Self, TreeSitterError> {
        let language = SupportLang::Rust.get_ts_language();
        let query = Query::new(&language, query_str).map_err(|e| TreeSitterError::InvalidQuery {
            message: e.to_string(),
        })?;

        let capture_names = query.capture_names().iter().map(|s| s.to_string()).collect();

        Ok(Self {
            query,
            capture_names,
        })
    }

    /// Execute the query below `root` and return all matches in source order.
    pub fn find_all(&self, source: &str, root: Node<'_>) -> Vec<QueryMatch> {
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.query, root, source.as_bytes());

        let mut results = Vec::new();

        // tree-sitter 0.25+ uses StreamingIterator
        while let Some(m) = matches.next() {
            let mut captures = HashMap::new();
            let mut overall_start = usize::MAX;
            let mut overall_end = 0usize;

            for capture in m.captures {
                let node = capture.node;
                let name = &self.capture_names[capture.index as usize];

                overall_start = overall_start.min(node.start_byte());
                overall_end = overall_end.max(node.end_byte());

                captures.insert(
                    name.clone(),
                    CapturedNode {
                        byte_start: node.start_byte(),
                        byte_end: node.end_byte(),
                        text: source[node.byte_range()].to_string(),
                        kind: node.kind().to_string(),
                    },
                );
            }

            if overall_start != usize::MAX {
                results.push(QueryMatch {
                    byte_start: overall_start,
                    byte_end: overall_end,
                    captures,
                });
            }
        }

        results.sort_by_key(|m| m.byte_start);
        results
    }
}

/// Queries over the top level of a Rust file.
pub mod queries {
    /// `extern crate` items, with their optional rename.
    pub const EXTERN_CRATES: &str = r#"(source_file
        (extern_crate_declaration
            name: (identifier) @name
            alias: (identifier)? @alias) @item)"#;

    /// Items that bind a name in the type namespace and therefore shadow a
    /// `use` of the same name.
    pub const TYPE_NAMESPACE_ITEMS: &str = r#"(source_file
        [
            (mod_item name: (identifier) @name)
            (struct_item name: (type_identifier) @name)
            (enum_item name: (type_identifier) @name)
            (union_item name: (type_identifier) @name)
            (trait_item name: (type_identifier) @name)
            (type_item name: (type_identifier) @name)
        ] @item)"#;
}
