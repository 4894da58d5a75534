//! Names bound at the top level of a file.

use crate::ts::query::queries;
use crate::ts::QueryEngine;
use tree_sitter::Node;

/// A name visible at file scope and the path it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub alias: String,
    /// Canonical path without a leading `::`.
    pub path: String,
}

impl ImportBinding {
    pub fn new(alias: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            path: path.into(),
        }
    }

    /// The `use` line that brings this binding into scope. The path is
    /// written absolute so a local module of the same name cannot shadow it.
    pub fn use_line(&self) -> String {
        if last_segment(&self.path) == self.alias {
            format!("use ::{};", self.path)
        } else {
            format!("use ::{} as {};", self.path, self.alias)
        }
    }
}

/// Outcome of checking a wanted binding against a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportCheck {
    /// The exact binding exists already.
    AlreadyPresent,
    /// The path is imported under another alias.
    PresentUnderAlias(String),
    /// The alias is bound to a different path.
    AliasTaken { path: String },
    /// Neither alias nor path is bound.
    Absent,
}

/// Top-level bindings of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSet {
    bindings: Vec<ImportBinding>,
}

impl ImportSet {
    /// Collect the bindings of `use` declarations, `extern crate` items and
    /// items living in the type namespace.
    pub fn from_tree(source: &str, root: Node<'_>) -> Self {
        let mut set = ImportSet::default();

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if child.kind() == "use_declaration" {
                if let Some(argument) = child.child_by_field_name("argument") {
                    collect_use_tree(source, argument, "", &mut set);
                }
            }
        }

        match QueryEngine::new(queries::EXTERN_CRATES) {
            Ok(engine) => {
                for m in engine.find_all(source, root) {
                    if let Some(name) = m.text("name") {
                        let alias = m.text("alias").unwrap_or(name);
                        set.push(ImportBinding::new(alias, name));
                    }
                }
            }
            Err(e) => tracing::warn!("extern crate query failed: {e}"),
        }

        match QueryEngine::new(queries::TYPE_NAMESPACE_ITEMS) {
            Ok(engine) => {
                for m in engine.find_all(source, root) {
                    if let Some(name) = m.text("name") {
                        set.push(ImportBinding::new(name, format!("self::{name}")));
                    }
                }
            }
            Err(e) => tracing::warn!("item query failed: {e}"),
        }

        set
    }

    /// Add a binding unless the identical pair exists.
    pub fn push(&mut self, binding: ImportBinding) {
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
    }

    pub fn bindings(&self) -> &[ImportBinding] {
        &self.bindings
    }

    pub fn check(&self, alias: &str, path: &str) -> ImportCheck {
        if self
            .bindings
            .iter()
            .any(|b| b.alias == alias && b.path == path)
        {
            return ImportCheck::AlreadyPresent;
        }
        if let Some(existing) = self.bindings.iter().find(|b| b.path == path) {
            return ImportCheck::PresentUnderAlias(existing.alias.clone());
        }
        if let Some(taken) = self.bindings.iter().find(|b| b.alias == alias) {
            return ImportCheck::AliasTaken {
                path: taken.path.clone(),
            };
        }
        ImportCheck::Absent
    }
}

fn collect_use_tree(source: &str, node: Node<'_>, prefix: &str, set: &mut ImportSet) {
    match node.kind() {
        "use_as_clause" => {
            let (Some(path), Some(alias)) = (
                node.child_by_field_name("path"),
                node.child_by_field_name("alias"),
            ) else {
                return;
            };
            let alias = &source[alias.byte_range()];
            if alias != "_" {
                let path = join(prefix, &source[path.byte_range()]);
                set.push(ImportBinding::new(alias, path));
            }
        }
        "scoped_use_list" => {
            let nested = match node.child_by_field_name("path") {
                Some(path) => join(prefix, &source[path.byte_range()]),
                None => prefix.to_string(),
            };
            if let Some(list) = node.child_by_field_name("list") {
                collect_use_tree(source, list, &nested, set);
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_use_tree(source, child, prefix, set);
            }
        }
        "self" if !prefix.is_empty() => {
            let path = normalize(prefix);
            set.push(ImportBinding::new(last_segment(&path), path.clone()));
        }
        "identifier" | "scoped_identifier" | "crate" | "super" => {
            let path = join(prefix, &source[node.byte_range()]);
            let alias = last_segment(&path).to_string();
            if alias != "self" {
                set.push(ImportBinding::new(alias, path));
            }
        }
        // wildcards, comments and anything else bind nothing we can name
        _ => {}
    }
}

fn join(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        normalize(path)
    } else {
        normalize(&format!("{prefix}::{path}"))
    }
}

fn normalize(path: &str) -> String {
    let compact: String = path.chars().filter(|c| !c.is_whitespace()).collect();
    compact.trim_start_matches("::").to_string()
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}
