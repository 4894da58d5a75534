//! Read access to a directive while rendering it.

use crate::context::{MetricClaim, RunContext};
use crate::directive::{Attachment, Directive, DirectiveKind};
use crate::fragment::FragmentError;
use crate::provider::ProviderError;
use std::path::Path;
use std::time::Duration;

/// A directive together with the file it was found in.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveSite<'a> {
    pub path: &'a Path,
    pub directive: &'a Directive,
    /// The run's `define` directive, for settings that every site honours.
    pub define: Option<&'a Directive>,
    pub metrics_prefix: Option<&'a str>,
}

impl<'a> DirectiveSite<'a> {
    pub fn kind(&self) -> DirectiveKind {
        self.directive.kind
    }

    pub fn line(&self) -> usize {
        self.directive.line
    }

    /// File name without extension, used in default metric names.
    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(sanitize)
            .unwrap_or_else(|| "source".to_string())
    }

    pub fn param(&self, key: &str) -> Option<&'a str> {
        self.directive.param(key)
    }

    pub fn define_param(&self, key: &str) -> Option<&'a str> {
        self.define.and_then(|d| d.param(key))
    }

    /// A parameter that must be present and non-empty.
    pub fn required(&self, key: &'static str) -> Result<&'a str, ProviderError> {
        match self.param(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ProviderError::MissingParam {
                path: self.path.to_path_buf(),
                line: self.line(),
                kind: self.kind(),
                key,
            }),
        }
    }

    pub fn port(&self, key: &str, default: u16) -> Result<u16, ProviderError> {
        match self.param(key) {
            None => Ok(default),
            Some(value) => match value.parse::<u16>() {
                Ok(0) => Err(self.invalid(key, value, "port must be between 1 and 65535")),
                Ok(port) => Ok(port),
                Err(e) => Err(self.invalid(key, value, &e.to_string())),
            },
        }
    }

    /// Duration parameter in humantime notation (`500ms`, `10s`, `1m 30s`).
    pub fn duration(&self, key: &str) -> Result<Option<Duration>, ProviderError> {
        match self.param(key) {
            None => Ok(None),
            Some(value) => humantime::parse_duration(value)
                .map(Some)
                .map_err(|e| self.invalid(key, value, &e.to_string())),
        }
    }

    pub fn flag(&self, key: &str) -> Result<bool, ProviderError> {
        match self.param(key) {
            None | Some("false") => Ok(false),
            Some("true") => Ok(true),
            Some(other) => Err(self.invalid(key, other, "expected `true` or `false`")),
        }
    }

    /// First of `keys` that is set, for parameters with several spellings.
    pub fn duration_any(&self, keys: &[&str]) -> Result<Option<Duration>, ProviderError> {
        for key in keys {
            if let Some(duration) = self.duration(key)? {
                return Ok(Some(duration));
            }
        }
        Ok(None)
    }

    /// Fail if any of `keys` is set.
    pub fn reject(&self, keys: &[&str], reason: &str) -> Result<(), ProviderError> {
        match keys.iter().find_map(|k| self.param(k).map(|v| (*k, v))) {
            Some((key, value)) => Err(self.invalid(key, value, reason)),
            None => Ok(()),
        }
    }

    /// An expression parameter, checked to parse as Rust.
    pub fn expression(&self, key: &'static str) -> Result<&'a str, ProviderError> {
        let value = self.required(key)?;
        syn::parse_str::<syn::Expr>(value)
            .map(|_| value)
            .map_err(|e| self.invalid(key, value, &e.to_string()))
    }

    pub fn invalid(&self, key: &str, value: &str, reason: &str) -> ProviderError {
        ProviderError::InvalidParam {
            path: self.path.to_path_buf(),
            line: self.line(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Enforce that the directive sits above an item.
    pub fn require_item(&self) -> Result<(), ProviderError> {
        match self.directive.attachment {
            Attachment::Item { .. } => Ok(()),
            _ => Err(self.misplaced("a top-level item")),
        }
    }

    /// Enforce that the directive sits above a `fn` item; returns its
    /// label, qualified by the `impl` for methods.
    pub fn require_function(&self) -> Result<String, ProviderError> {
        match &self.directive.attachment {
            Attachment::Item {
                function: Some(function),
                ..
            } => Ok(function.label()),
            Attachment::Item { kind, .. } => Err(ProviderError::NotAFunction {
                path: self.path.to_path_buf(),
                line: self.line(),
                kind: self.kind(),
                found: kind.clone(),
            }),
            _ => Err(self.misplaced("a top-level function")),
        }
    }

    /// Enforce that the directive sits above a statement; returns the label
    /// of the enclosing function.
    pub fn require_statement(&self) -> Result<String, ProviderError> {
        match &self.directive.attachment {
            Attachment::Statement { function, .. } => Ok(function.label()),
            _ => Err(self.misplaced("a statement inside a function body")),
        }
    }

    fn misplaced(&self, expected: &'static str) -> ProviderError {
        ProviderError::Misplaced {
            path: self.path.to_path_buf(),
            line: self.line(),
            kind: self.kind(),
            expected,
        }
    }

    pub fn template(&self, source: FragmentError) -> ProviderError {
        ProviderError::Template {
            path: self.path.to_path_buf(),
            line: self.line(),
            source,
        }
    }

    /// Register metric `name` of `kind` for this site.
    ///
    /// Returns `false` when another site already registered the name with
    /// the same kind and `shared` allows reusing it.
    pub fn claim(
        &self,
        ctx: &mut RunContext,
        name: &str,
        kind: &'static str,
        shared: bool,
    ) -> Result<bool, ProviderError> {
        let claim = MetricClaim {
            kind,
            path: self.path.to_path_buf(),
            line: self.line(),
        };
        match ctx.claim_metric(name, claim) {
            None => Ok(true),
            Some(first) if shared && first.kind == kind => Ok(false),
            Some(first) => Err(ProviderError::DuplicateMetric {
                path: self.path.to_path_buf(),
                line: self.line(),
                name: name.to_string(),
                first_path: first.path,
                first_line: first.line,
            }),
        }
    }

    /// Final metric name: optional prefix, then `name`, sanitized.
    pub fn metric_name(&self, name: &str) -> String {
        match self.metrics_prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => sanitize(&format!("{prefix}_{name}")),
            None => sanitize(name),
        }
    }
}

/// Replace everything outside `[a-zA-Z0-9_]` with `_`.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// `SCREAMING_CASE` identifier for a generated static.
pub fn static_ident(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_");
    format!("METRICS_GEN_{}", sanitize(&joined).to_ascii_uppercase())
}

/// `CamelCase` identifier for a generated type.
pub fn type_ident(parts: &[&str]) -> String {
    let mut out = String::from("MetricsGen");
    for word in parts.iter().flat_map(|p| p.split(|c: char| !c.is_ascii_alphanumeric())) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFile;

    fn with_site<R>(source: &str, f: impl FnOnce(DirectiveSite<'_>) -> R) -> R {
        let file = SourceFile::parse("src/http-server.rs", source).unwrap();
        let site = DirectiveSite {
            path: file.path(),
            directive: &file.directives()[0],
            define: None,
            metrics_prefix: Some("app"),
        };
        f(site)
    }

    #[test]
    fn sanitizing() {
        assert_eq!(sanitize("http-server.v2"), "http_server_v2");
        assert_eq!(sanitize("9lives"), "_9lives");
        assert_eq!(static_ident(&["handle", "", "hits"]), "METRICS_GEN_HANDLE_HITS");
        assert_eq!(type_ident(&["do_work", "Timer"]), "MetricsGenDoWorkTimer");
    }

    #[test]
    fn names_and_params() {
        with_site(
            "// +trace:define prom-port=8080 interval=250ms empty=true\nfn main() {}\n",
            |site| {
                assert_eq!(site.file_stem(), "http_server");
                assert_eq!(site.metric_name("hits-total"), "app_hits_total");
                assert_eq!(site.port("prom-port", 9123).unwrap(), 8080);
                assert_eq!(site.port("other", 9123).unwrap(), 9123);
                assert_eq!(
                    site.duration("interval").unwrap(),
                    Some(Duration::from_millis(250))
                );
                assert!(site.flag("empty").unwrap());
                assert_eq!(site.require_function().unwrap(), "main");
                assert!(site.require_item().is_ok());
                assert!(matches!(
                    site.require_statement(),
                    Err(ProviderError::Misplaced { line: 1, .. })
                ));
            },
        );
    }

    #[test]
    fn invalid_values() {
        with_site(
            "// +trace:define prom-port=99999 interval=soon empty=maybe\nstruct S;\n",
            |site| {
                assert!(matches!(
                    site.port("prom-port", 9123),
                    Err(ProviderError::InvalidParam { .. })
                ));
                assert!(matches!(
                    site.duration("interval"),
                    Err(ProviderError::InvalidParam { .. })
                ));
                assert!(site.flag("empty").is_err());
                assert!(matches!(
                    site.require_function(),
                    Err(ProviderError::NotAFunction { .. })
                ));
                assert!(matches!(
                    site.required("name"),
                    Err(ProviderError::MissingParam { key: "name", .. })
                ));
            },
        );
    }

    #[test]
    fn claims_detect_duplicates() {
        let source = "fn f() {\n    // +trace:inner-counter name=hits\n    g();\n}\n";
        let mut ctx = RunContext::with_seed("T", 1);
        with_site(source, |site| {
            assert!(site.claim(&mut ctx, "hits", "counter", true).unwrap());
            assert!(!site.claim(&mut ctx, "hits", "counter", true).unwrap());
            assert!(matches!(
                site.claim(&mut ctx, "hits", "gauge", true),
                Err(ProviderError::DuplicateMetric { first_line: 2, .. })
            ));
            assert!(matches!(
                site.claim(&mut ctx, "hits", "counter", false),
                Err(ProviderError::DuplicateMetric { .. })
            ));
        });
    }

    #[test]
    fn methods_are_labelled_by_their_impl() {
        with_site(
            "struct S;\nimpl S {\n    fn f(&self) {\n        // +trace:inner-counter name=x\n        g();\n    }\n}\n",
            |site| assert_eq!(site.require_statement().unwrap(), "S_f"),
        );
    }

    #[test]
    fn expressions_are_checked() {
        with_site(
            "fn f() {\n    // +trace:set name=x value=a.len(\n    g();\n}\n",
            |site| {
                assert_eq!(site.require_statement().unwrap(), "f");
                assert!(matches!(
                    site.expression("value"),
                    Err(ProviderError::InvalidParam { .. })
                ));
            },
        );
    }
}
