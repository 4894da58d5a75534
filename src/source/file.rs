use crate::directive::{Directive, DirectiveKind, SpliceRecord};
use crate::edit::Edit;
use crate::engine::markers::begin_marker;
use crate::pool::with_parser;
use crate::source::imports::ImportSet;
use crate::source::scan::collect_directives;
use crate::source::SourceError;
use crate::ts::{count_error_nodes, input_edit};
use std::path::{Path, PathBuf};
use tree_sitter::Tree;

/// One parsed source file and the directives found in it.
///
/// The text and the tree are kept in sync after every splice; directive
/// anchors are shifted along with them.
pub struct SourceFile {
    path: PathBuf,
    original: String,
    text: String,
    tree: Tree,
    directives: Vec<Directive>,
    modified: bool,
    baseline_errors: usize,
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("path", &self.path)
            .field("directives", &self.directives.len())
            .field("modified", &self.modified)
            .finish()
    }
}

impl SourceFile {
    /// Parse `text` and scan it for directives.
    pub fn parse(path: impl Into<PathBuf>, text: impl Into<String>) -> Result<Self, SourceError> {
        let path = path.into();
        let text = text.into();

        let tree = parse_tree(&path, &text, None)?;
        let directives = collect_directives(&path, &text, tree.root_node())?;
        let baseline_errors = count_error_nodes(tree.root_node());
        if baseline_errors > 0 {
            tracing::warn!(
                "{} already contains {baseline_errors} syntax error(s)",
                path.display()
            );
        }

        Ok(Self {
            path,
            original: text.clone(),
            text,
            tree,
            directives,
            modified: false,
            baseline_errors,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current text, including every splice applied so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Text as loaded from disk.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn directive(&self, index: usize) -> Option<&Directive> {
        self.directives.get(index)
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    /// True once generated regions are present, i.e. a previous run
    /// already patched this file.
    pub fn has_region_markers(&self) -> bool {
        self.region_marker().is_some()
    }

    pub fn region_marker(&self) -> Option<&Directive> {
        self.directives.iter().find(|d| d.kind.is_region_marker())
    }

    pub fn defines(&self) -> impl Iterator<Item = &Directive> {
        self.directives
            .iter()
            .filter(|d| d.kind == DirectiveKind::Define)
    }

    /// Bindings currently visible at the top level.
    pub fn imports(&self) -> ImportSet {
        ImportSet::from_tree(&self.text, self.tree.root_node())
    }

    pub fn error_count(&self) -> usize {
        count_error_nodes(self.tree.root_node())
    }

    pub fn baseline_errors(&self) -> usize {
        self.baseline_errors
    }

    /// Where new `use` lines go: before the first top-level `use` that is
    /// not preceded by an attribute, else before the first node that is not
    /// an inner attribute or inner doc comment, else at the end.
    pub fn import_anchor(&self) -> usize {
        let root = self.tree.root_node();
        let mut cursor = root.walk();
        let children: Vec<_> = root.named_children(&mut cursor).collect();

        let first_use = children.iter().enumerate().find(|(idx, node)| {
            node.kind() == "use_declaration"
                && (*idx == 0 || children[idx - 1].kind() != "attribute_item")
        });
        if let Some((mut idx, node)) = first_use {
            // Step over generated blocks so they are not nested.
            let begin = begin_marker("");
            let mut start = node.start_byte();
            while idx > 0
                && children[idx - 1].kind() == "line_comment"
                && self.text[children[idx - 1].byte_range()].starts_with(&begin)
            {
                idx -= 1;
                start = children[idx].start_byte();
            }
            return start;
        }

        children
            .iter()
            .find(|node| !self.is_inner_header(node))
            .map_or(self.text.len(), |node| node.start_byte())
    }

    fn is_inner_header(&self, node: &tree_sitter::Node<'_>) -> bool {
        let text = &self.text[node.byte_range()];
        match node.kind() {
            "inner_attribute_item" | "shebang" => true,
            "line_comment" => text.starts_with("//!"),
            "block_comment" => text.starts_with("/*!"),
            _ => false,
        }
    }

    /// Byte offset of the newline ending the line that contains `offset`,
    /// or the end of the text.
    pub fn line_end(&self, offset: usize) -> usize {
        self.text[offset..]
            .find('\n')
            .map_or(self.text.len(), |i| offset + i)
    }

    /// Leading whitespace of the line containing `offset`.
    pub fn line_indent(&self, offset: usize) -> &str {
        let start = self.text[..offset].rfind('\n').map_or(0, |i| i + 1);
        let line = &self.text[start..];
        let width = line.len() - line.trim_start_matches([' ', '\t']).len();
        &line[..width]
    }

    /// Splice `edit` into the text, update the tree incrementally and move
    /// every directive anchor past the edit.
    pub fn apply_edit(&mut self, edit: &Edit) -> Result<(), SourceError> {
        let input = if edit.byte_end <= self.text.len() && edit.byte_start <= edit.byte_end {
            Some(input_edit(
                &self.text,
                edit.byte_start,
                edit.byte_end,
                &edit.new_text,
            ))
        } else {
            None
        };

        edit.apply_to(&mut self.text)
            .map_err(|source| SourceError::Edit {
                path: self.path.clone(),
                source,
            })?;

        // apply_to validated the range, so the input edit exists
        if let Some(input) = input {
            self.tree.edit(&input);
        }
        self.tree = parse_tree(&self.path, &self.text, Some(&self.tree))?;

        let record = SpliceRecord {
            start: edit.byte_start,
            old_end: edit.byte_end,
            new_len: edit.new_text.len(),
        };
        for directive in &mut self.directives {
            directive.shift(&record);
        }

        tracing::debug!(
            "{}: spliced {} byte(s) at {}",
            self.path.display(),
            edit.new_text.len(),
            edit.byte_start
        );
        Ok(())
    }
}

fn parse_tree(path: &Path, text: &str, old: Option<&Tree>) -> Result<Tree, SourceError> {
    with_parser(|parser| parser.parse(text, old))
        .and_then(|result| result)
        .map_err(|source| SourceError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
