//! Generated code, kept as text with named holes for imported paths.
//!
//! Templates refer to a required package as `$key`. Each reference becomes
//! an identifier slot in the fragment's patch table; when the engine has to
//! import a package under another alias, every slot of that package is
//! retargeted at once and all snippets render consistently.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("template refers to undeclared package `${key}`")]
    UnknownPackage { key: String },

    #[error("generated items do not parse: {message}\n{code}")]
    InvalidDeclarations { message: String, code: String },

    #[error("generated statements do not parse: {message}\n{code}")]
    InvalidStatements { message: String, code: String },
}

/// A package the fragment needs in scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Canonical path, e.g. `prometheus` or `metrics_util::debugging`.
    pub path: String,
    /// Name the fragment currently uses for it.
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IdentSlot {
    package: String,
    ident: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Slot(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Snippet {
    parts: Vec<Part>,
}

/// Items and statements produced for one directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeFragment {
    declarations: Vec<Snippet>,
    statements: Vec<Snippet>,
    packages: BTreeMap<String, Package>,
    slots: Vec<IdentSlot>,
}

impl CodeFragment {
    pub fn builder() -> FragmentBuilder {
        FragmentBuilder::default()
    }

    /// Packages referenced by at least one snippet.
    pub fn packages(&self) -> impl Iterator<Item = (&str, &Package)> {
        self.packages
            .iter()
            .filter(|(key, _)| self.slots.iter().any(|s| &s.package == *key))
            .map(|(k, p)| (k.as_str(), p))
    }

    /// Point every reference to `key` at `alias`.
    pub fn retarget(&mut self, key: &str, alias: &str) {
        if let Some(package) = self.packages.get_mut(key) {
            package.alias = alias.to_string();
        }
        for slot in self.slots.iter_mut().filter(|s| s.package == key) {
            slot.ident = alias.to_string();
        }
    }

    pub fn has_declarations(&self) -> bool {
        !self.declarations.is_empty()
    }

    pub fn has_statements(&self) -> bool {
        !self.statements.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty() && self.statements.is_empty()
    }

    pub fn declarations(&self) -> Vec<String> {
        self.declarations.iter().map(|s| self.render(s)).collect()
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.iter().map(|s| self.render(s)).collect()
    }

    fn render(&self, snippet: &Snippet) -> String {
        let mut out = String::new();
        for part in &snippet.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Slot(id) => out.push_str(&self.slots[*id].ident),
            }
        }
        out
    }

    /// Check that the rendered items form valid Rust and the statements a
    /// valid block body.
    pub fn validate(&self) -> Result<(), FragmentError> {
        let items = self.declarations().join("\n");
        syn::parse_file(&items).map_err(|e| FragmentError::InvalidDeclarations {
            message: e.to_string(),
            code: items.clone(),
        })?;

        let block = format!("{{\n{}\n}}", self.statements().join("\n"));
        syn::parse_str::<syn::Block>(&block).map_err(|e| FragmentError::InvalidStatements {
            message: e.to_string(),
            code: block.clone(),
        })?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FragmentBuilder {
    fragment: CodeFragment,
}

impl FragmentBuilder {
    /// Declare a package the templates may refer to as `$key`. The alias
    /// starts out as the last path segment.
    pub fn package(&mut self, key: &str, path: &str) -> &mut Self {
        let alias = path.rsplit("::").next().unwrap_or(path).to_string();
        self.fragment.packages.insert(
            key.to_string(),
            Package {
                path: path.to_string(),
                alias,
            },
        );
        self
    }

    pub fn declaration(&mut self, template: &str) -> Result<&mut Self, FragmentError> {
        let snippet = self.compile(template)?;
        self.fragment.declarations.push(snippet);
        Ok(self)
    }

    pub fn statement(&mut self, template: &str) -> Result<&mut Self, FragmentError> {
        let snippet = self.compile(template)?;
        self.fragment.statements.push(snippet);
        Ok(self)
    }

    pub fn build(self) -> CodeFragment {
        self.fragment
    }

    fn compile(&mut self, template: &str) -> Result<Snippet, FragmentError> {
        let mut snippet = Snippet::default();
        let mut text = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((idx, c)) = chars.next() {
            if c != '$' {
                text.push(c);
                continue;
            }
            if chars.peek().is_some_and(|(_, next)| *next == '$') {
                chars.next();
                text.push('$');
                continue;
            }

            let rest = &template[idx + 1..];
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            let key = &rest[..len];
            let package = self
                .fragment
                .packages
                .get(key)
                .ok_or_else(|| FragmentError::UnknownPackage {
                    key: key.to_string(),
                })?;

            if !text.is_empty() {
                snippet.parts.push(Part::Text(std::mem::take(&mut text)));
            }
            self.fragment.slots.push(IdentSlot {
                package: key.to_string(),
                ident: package.alias.clone(),
            });
            snippet
                .parts
                .push(Part::Slot(self.fragment.slots.len() - 1));

            for _ in 0..key.chars().count() {
                chars.next();
            }
        }

        if !text.is_empty() {
            snippet.parts.push(Part::Text(text));
        }
        Ok(snippet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CodeFragment {
        let mut builder = CodeFragment::builder();
        builder.package("prom", "prometheus");
        builder
            .declaration("static H: $prom::Histogram = todo!();")
            .unwrap();
        builder
            .statement("let _t = $prom::Histogram::start_timer(&H);")
            .unwrap();
        builder.build()
    }

    #[test]
    fn renders_with_default_alias() {
        let fragment = sample();
        assert_eq!(
            fragment.declarations(),
            vec!["static H: prometheus::Histogram = todo!();"]
        );
        assert!(fragment.validate().is_ok());
    }

    #[test]
    fn retarget_rewrites_every_slot() {
        let mut fragment = sample();
        fragment.retarget("prom", "prometheus_42");
        assert_eq!(
            fragment.declarations(),
            vec!["static H: prometheus_42::Histogram = todo!();"]
        );
        assert_eq!(
            fragment.statements(),
            vec!["let _t = prometheus_42::Histogram::start_timer(&H);"]
        );
        let (_, package) = fragment.packages().next().unwrap();
        assert_eq!(package.alias, "prometheus_42");
        assert_eq!(package.path, "prometheus");
    }

    #[test]
    fn dollar_escape() {
        let mut builder = CodeFragment::builder();
        builder.statement("let s = \"$$5\";").unwrap();
        assert_eq!(builder.build().statements(), vec!["let s = \"$5\";"]);
    }

    #[test]
    fn unknown_package_is_an_error() {
        let mut builder = CodeFragment::builder();
        let err = builder.statement("$nope::f();").unwrap_err();
        assert_eq!(
            err,
            FragmentError::UnknownPackage {
                key: "nope".to_string()
            }
        );
    }

    #[test]
    fn alias_defaults_to_last_segment() {
        let mut builder = CodeFragment::builder();
        builder.package("dbg", "metrics_util::debugging");
        builder.statement("let _r = $dbg::DebuggingRecorder::new();").unwrap();
        assert_eq!(
            builder.build().statements(),
            vec!["let _r = debugging::DebuggingRecorder::new();"]
        );
    }

    #[test]
    fn invalid_code_is_rejected() {
        let mut builder = CodeFragment::builder();
        builder.declaration("static X: = 1;").unwrap();
        assert!(matches!(
            builder.build().validate(),
            Err(FragmentError::InvalidDeclarations { .. })
        ));

        let mut builder = CodeFragment::builder();
        builder.statement("let x = ;").unwrap();
        assert!(matches!(
            builder.build().validate(),
            Err(FragmentError::InvalidStatements { .. })
        ));
    }
}
