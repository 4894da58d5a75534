//! Directive discovery and attachment.
//!
//! Candidates are own-line `//` comments at the top level of a file, in
//! `impl` and `trait` blocks, and in every block of a function body,
//! closures and loop bodies included. Each directive attaches to the next
//! sibling that is neither a comment nor an attribute. A directive comment
//! anywhere else is reported, never dropped.

use crate::directive::{scan_comment, Attachment, Directive, FunctionSite, ScannedDirective, Span};
use crate::source::SourceError;
use std::collections::HashSet;
use std::path::Path;
use tree_sitter::Node;

struct Pending {
    scanned: ScannedDirective,
    text: String,
    line: usize,
    comment: Span,
}

/// `impl` or `trait` block whose methods are being scanned.
struct Owner {
    name: String,
    /// Leading start of the block itself.
    anchor: usize,
}

struct Scanner<'s> {
    path: &'s Path,
    source: &'s str,
    directives: Vec<Directive>,
}

pub(crate) fn collect_directives(
    path: &Path,
    source: &str,
    root: Node<'_>,
) -> Result<Vec<Directive>, SourceError> {
    let mut scanner = Scanner {
        path,
        source,
        directives: Vec::new(),
    };
    scanner.items(root, None)?;
    scanner.check_unreached(root)?;

    let mut directives = scanner.directives;
    directives.sort_by_key(|d| d.comment.start);
    Ok(directives)
}

impl Scanner<'_> {
    /// Item-level scan of the file root or of an `impl`/`trait` body.
    fn items(&mut self, container: Node<'_>, owner: Option<&Owner>) -> Result<(), SourceError> {
        let mut pending = Vec::new();
        let children = named_children(container);

        for idx in 0..children.len() {
            let node = children[idx];
            if self.take_comment(node, &mut pending)? || is_trivia(node) {
                continue;
            }
            if owner.is_some() && node.kind() != "function_item" {
                if let Some(p) = pending.first() {
                    return Err(self.unreachable(p, "an associated item other than a method"));
                }
                continue;
            }
            self.item(&children, idx, owner, &mut pending)?;
        }

        self.finish(pending)
    }

    /// Attach `pending` to the item at `idx` and descend into it.
    fn item(
        &mut self,
        siblings: &[Node<'_>],
        idx: usize,
        owner: Option<&Owner>,
        pending: &mut Vec<Pending>,
    ) -> Result<(), SourceError> {
        let node = siblings[idx];
        let function = function_site(self.source, siblings, idx, owner);
        for p in pending.drain(..) {
            self.directives.push(p.into_directive(Attachment::Item {
                item: Span::new(node.start_byte(), node.end_byte()),
                kind: node.kind().to_string(),
                function: function.clone(),
            }));
        }

        match node.kind() {
            "function_item" => {
                if let (Some(function), Some(body)) = (function, node.child_by_field_name("body")) {
                    self.block(body, &function)?;
                }
            }
            "impl_item" | "trait_item" if owner.is_none() => {
                if let Some(body) = node.child_by_field_name("body") {
                    let owner = Owner {
                        name: owner_name(self.source, node),
                        anchor: leading_start(siblings, idx),
                    };
                    self.items(body, Some(&owner))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Statement-level scan of one block inside `function`.
    fn block(&mut self, block: Node<'_>, function: &FunctionSite) -> Result<(), SourceError> {
        let mut pending = Vec::new();
        let children = named_children(block);

        for idx in 0..children.len() {
            let node = children[idx];
            if self.take_comment(node, &mut pending)? || is_trivia(node) {
                continue;
            }
            if node.kind() == "function_item" {
                self.item(&children, idx, None, &mut pending)?;
                continue;
            }
            for p in pending.drain(..) {
                self.directives.push(p.into_directive(Attachment::Statement {
                    statement: Span::new(node.start_byte(), node.end_byte()),
                    function: function.clone(),
                }));
            }
            self.nested(node, function)?;
        }

        self.finish(pending)
    }

    /// Blocks anywhere below `node`: branches, loop bodies, closures.
    fn nested(&mut self, node: Node<'_>, function: &FunctionSite) -> Result<(), SourceError> {
        for child in named_children(node) {
            if child.kind() == "block" {
                self.block(child, function)?;
            } else {
                self.nested(child, function)?;
            }
        }
        Ok(())
    }

    /// Returns true when `node` is a comment, queueing it if it is a directive.
    fn take_comment(&self, node: Node<'_>, pending: &mut Vec<Pending>) -> Result<bool, SourceError> {
        if node.kind() != "line_comment" {
            return Ok(node.kind() == "block_comment");
        }

        if !starts_own_line(self.source, node.start_byte()) {
            tracing::debug!(
                "{}:{}: skipping trailing comment",
                self.path.display(),
                node.start_position().row + 1
            );
            return Ok(true);
        }

        if let Some(p) = self.scan(node)? {
            tracing::debug!(
                "{}:{}: found directive {}",
                self.path.display(),
                p.line,
                p.scanned.kind
            );
            pending.push(p);
        }
        Ok(true)
    }

    fn scan(&self, node: Node<'_>) -> Result<Option<Pending>, SourceError> {
        let raw = &self.source[node.byte_range()];
        let text = raw.trim_end_matches(['\n', '\r']);
        let line = node.start_position().row + 1;

        let scanned = scan_comment(text).map_err(|source| SourceError::Directive {
            path: self.path.to_path_buf(),
            line,
            source,
        })?;
        Ok(scanned.map(|scanned| Pending {
            scanned,
            text: text.to_string(),
            line,
            comment: Span::new(node.start_byte(), node.start_byte() + text.len()),
        }))
    }

    fn finish(&mut self, pending: Vec<Pending>) -> Result<(), SourceError> {
        for p in pending {
            if !p.scanned.kind.is_detachable() {
                return Err(SourceError::Unattached {
                    path: self.path.to_path_buf(),
                    line: p.line,
                    text: p.text,
                });
            }
            self.directives.push(p.into_directive(Attachment::Detached));
        }
        Ok(())
    }

    /// Fail on any own-line directive comment the scan did not visit.
    fn check_unreached(&self, root: Node<'_>) -> Result<(), SourceError> {
        let seen: HashSet<usize> = self.directives.iter().map(|d| d.comment.start).collect();
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            if node.kind() == "line_comment" {
                if seen.contains(&node.start_byte())
                    || !starts_own_line(self.source, node.start_byte())
                {
                    continue;
                }
                if let Some(p) = self.scan(node)? {
                    if !p.scanned.kind.is_detachable() {
                        return Err(self.unreachable(&p, scope_of(node)));
                    }
                }
                continue;
            }
            stack.extend(named_children(node));
        }
        Ok(())
    }

    fn unreachable(&self, p: &Pending, scope: &'static str) -> SourceError {
        SourceError::Unreachable {
            path: self.path.to_path_buf(),
            line: p.line,
            text: p.text.clone(),
            scope,
        }
    }
}

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn is_trivia(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "attribute_item" | "inner_attribute_item" | "line_comment" | "block_comment"
    )
}

fn starts_own_line(source: &str, offset: usize) -> bool {
    let line_start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    source[line_start..offset].trim().is_empty()
}

/// Closest enclosing construct that explains why a comment was not scanned.
fn scope_of(node: Node<'_>) -> &'static str {
    let mut current = node.parent();
    while let Some(parent) = current {
        let scope = match parent.kind() {
            "mod_item" => Some("an inline module"),
            "impl_item" | "trait_item" => Some("a nested impl or trait block"),
            "match_block" => Some("a match expression"),
            "field_declaration_list" | "ordered_field_declaration_list" | "enum_variant_list" => {
                Some("a type definition")
            }
            "arguments" | "array_expression" | "field_initializer_list" | "token_tree" => {
                Some("an expression")
            }
            _ => None,
        };
        if let Some(scope) = scope {
            return scope;
        }
        current = parent.parent();
    }
    "this position"
}

/// Start of the leading comments and attributes of `siblings[idx]`,
/// without crossing a blank line.
fn leading_start(siblings: &[Node<'_>], idx: usize) -> usize {
    let node = siblings[idx];
    let mut start = node.start_byte();
    let mut row = node.start_position().row;
    for prev in siblings[..idx].iter().rev() {
        if !is_trivia(*prev) || prev.kind() == "inner_attribute_item" {
            break;
        }
        if prev.end_position().row + 1 < row {
            break;
        }
        start = prev.start_byte();
        row = prev.start_position().row;
    }
    start
}

/// Anchors for a `fn` item with a body.
fn function_site(
    source: &str,
    siblings: &[Node<'_>],
    idx: usize,
    owner: Option<&Owner>,
) -> Option<FunctionSite> {
    let node = siblings[idx];
    if node.kind() != "function_item" {
        return None;
    }
    let name = node.child_by_field_name("name")?;
    let body = node.child_by_field_name("body")?;
    let leading_start = leading_start(siblings, idx);

    Some(FunctionSite {
        name: source[name.byte_range()].to_string(),
        owner: owner.map(|o| o.name.clone()),
        leading_start,
        item_anchor: owner.map_or(leading_start, |o| o.anchor),
        body_open: body.start_byte() + 1,
    })
}

/// `Type` for inherent impls, `Type_Trait` for trait impls, the trait name
/// for trait definitions. Generic arguments and paths are dropped.
fn owner_name(source: &str, node: Node<'_>) -> String {
    let base = |field: &str| {
        node.child_by_field_name(field).map(|n| {
            let text = &source[n.byte_range()];
            let text = text.split('<').next().unwrap_or(text);
            text.rsplit("::").next().unwrap_or(text).trim().to_string()
        })
    };
    match node.kind() {
        "trait_item" => base("name").unwrap_or_default(),
        _ => match (base("type"), base("trait")) {
            (Some(ty), Some(tr)) => format!("{ty}_{tr}"),
            (Some(ty), None) => ty,
            _ => String::new(),
        },
    }
}

impl Pending {
    fn into_directive(self, attachment: Attachment) -> Directive {
        Directive {
            kind: self.scanned.kind,
            params: self.scanned.params,
            text: self.text,
            line: self.line,
            comment: self.comment,
            attachment,
        }
    }
}
