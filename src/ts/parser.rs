use crate::ts::errors::TreeSitterError;
use ast_grep_language::{LanguageExt, SupportLang};
use tree_sitter::{InputEdit, Node, Parser, Point, Tree};

/// Tree-sitter parser wrapper for Rust source code.
pub struct RustParser {
    parser: Parser,
}

impl RustParser {
    pub fn new() -> Result<Self, TreeSitterError> {
        let mut parser = Parser::new();
        // Get the tree-sitter Language from ast-grep-language
        let ts_lang = SupportLang::Rust.get_ts_language();
        parser
            .set_language(&ts_lang)
            .map_err(|_| TreeSitterError::LanguageSet)?;

        Ok(Self { parser })
    }

    /// Parse source code into a tree-sitter Tree.
    ///
    /// Passing the previous tree, already adjusted with [`Tree::edit`], lets
    /// tree-sitter reuse every subtree the splice did not touch.
    pub fn parse(&mut self, source: &str, old: Option<&Tree>) -> Result<Tree, TreeSitterError> {
        self.parser
            .parse(source, old)
            .ok_or(TreeSitterError::ParseFailed)
    }
}

/// Describe the replacement of `[start, old_end)` in `before` by `inserted`
/// in the form [`Tree::edit`] expects.
pub fn input_edit(before: &str, start: usize, old_end: usize, inserted: &str) -> InputEdit {
    let start_position = point_at(before, start);
    let old_end_position = point_at(before, old_end);
    let new_end_position = advance(start_position, inserted);

    InputEdit {
        start_byte: start,
        old_end_byte: old_end,
        new_end_byte: start + inserted.len(),
        start_position,
        old_end_position,
        new_end_position,
    }
}

fn point_at(text: &str, offset: usize) -> Point {
    advance(Point::new(0, 0), &text[..offset])
}

fn advance(from: Point, text: &str) -> Point {
    match text.rfind('\n') {
        Some(last) => Point::new(
            from.row + text.matches('\n').count(),
            text.len() - last - 1,
        ),
        None => Point::new(from.row, from.column + text.len()),
    }
}

/// Count ERROR and MISSING nodes below `node`.
pub fn count_error_nodes(node: Node<'_>) -> usize {
    let own = usize::from(node.is_error() || node.is_missing());
    if !node.has_error() {
        return own;
    }

    let mut cursor = node.walk();
    let children: usize = node
        .children(&mut cursor)
        .map(count_error_nodes)
        .sum();
    own + children
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_rust() {
        let mut parser = RustParser::new().unwrap();
        let tree = parser.parse("fn main() { println!(\"hello\"); }", None).unwrap();

        assert_eq!(tree.root_node().kind(), "source_file");
        assert_eq!(count_error_nodes(tree.root_node()), 0);
    }

    #[test]
    fn parse_invalid_rust() {
        let mut parser = RustParser::new().unwrap();
        let tree = parser.parse("fn main( { }", None).unwrap();

        assert!(count_error_nodes(tree.root_node()) > 0);
    }

    #[test]
    fn input_edit_points() {
        let before = "fn a() {}\nfn b() {}\n";
        let edit = input_edit(before, 10, 10, "// x\n");
        assert_eq!(edit.start_position, Point::new(1, 0));
        assert_eq!(edit.new_end_position, Point::new(2, 0));

        let edit = input_edit(before, 13, 13, "xyz");
        assert_eq!(edit.start_position, Point::new(1, 3));
        assert_eq!(edit.new_end_position, Point::new(1, 6));
    }

    #[test]
    fn incremental_reparse_matches_fresh_parse() {
        let mut parser = RustParser::new().unwrap();
        let before = "fn a() {\n    work();\n}\n";
        let mut tree = parser.parse(before, None).unwrap();

        let inserted = "\n    let t = 1;";
        let at = before.find('{').unwrap() + 1;
        let mut after = before.to_string();
        after.insert_str(at, inserted);

        tree.edit(&input_edit(before, at, at, inserted));
        let incremental = parser.parse(&after, Some(&tree)).unwrap();
        let fresh = parser.parse(&after, None).unwrap();

        assert_eq!(
            incremental.root_node().to_sexp(),
            fresh.root_node().to_sexp()
        );
    }
}
