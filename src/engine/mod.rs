//! Splices rendered fragments into source files.
//!
//! Every insertion is wrapped in region markers carrying the run token, so a
//! later run can tell the file was already instrumented.

pub mod errors;
mod imports;
pub mod markers;

pub use errors::PatchError;

use crate::context::RunContext;
use crate::directive::{Attachment, Directive, FunctionSite};
use crate::edit::Edit;
use crate::fragment::CodeFragment;
use crate::source::SourceFile;
use imports::resolve_imports;
use markers::{begin_marker, wrap_block};

const INDENT_UNIT: &str = "    ";

pub struct PatchEngine<'c> {
    ctx: &'c mut RunContext,
}

impl<'c> PatchEngine<'c> {
    pub fn new(ctx: &'c mut RunContext) -> Self {
        Self { ctx }
    }

    pub fn token(&self) -> &str {
        self.ctx.token()
    }

    /// Refuse files that carry region markers from an earlier run.
    pub fn ensure_unpatched(file: &SourceFile) -> Result<(), PatchError> {
        match file.region_marker() {
            Some(marker) => Err(PatchError::AlreadyGenerated {
                path: file.path().to_path_buf(),
                line: marker.line,
                text: marker.text.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Insert `fragment` for the directive at `index` of `file`.
    ///
    /// Imports go first, then the declarations, then the statements. Each
    /// step re-reads the directive because earlier splices move its anchors.
    pub fn apply(
        &mut self,
        file: &mut SourceFile,
        index: usize,
        mut fragment: CodeFragment,
    ) -> Result<(), PatchError> {
        let directive = directive_at(file, index)?;
        if fragment.is_empty() {
            return Ok(());
        }

        let inserts = resolve_imports(file.path(), &file.imports(), &mut fragment, self.ctx)?;
        fragment
            .validate()
            .map_err(|source| PatchError::InvalidFragment {
                path: file.path().to_path_buf(),
                line: directive.line,
                source,
            })?;

        if !inserts.is_empty() {
            let anchor = file.import_anchor();
            let uses: Vec<String> = inserts.iter().map(|b| b.use_line()).collect();
            let mut text = wrap_block(&uses, "", self.ctx.token());
            text.push('\n');
            let rest = &file.text()[anchor..];
            if anchor == file.text().len() {
                if !file.text().is_empty() && !file.text().ends_with('\n') {
                    text.insert(0, '\n');
                }
            } else if !(rest.starts_with("use ")
                || rest.starts_with("pub use ")
                || rest.starts_with(&begin_marker("")))
            {
                text.push('\n');
            }
            file.apply_edit(&Edit::insert(file.path(), anchor, text))?;
            tracing::debug!(
                "{}: imported {}",
                file.path().display(),
                inserts
                    .iter()
                    .map(|b| b.alias.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if fragment.has_declarations() {
            let directive = directive_at(file, index)?;
            self.insert_declarations(file, &directive, &fragment.declarations())?;
        }

        if fragment.has_statements() {
            let directive = directive_at(file, index)?;
            self.insert_statements(file, &directive, &fragment.statements())?;
        }

        file.mark_modified();

        let (before, after) = (file.baseline_errors(), file.error_count());
        if after > before {
            return Err(PatchError::SyntaxIntroduced {
                path: file.path().to_path_buf(),
                before,
                after,
            });
        }
        Ok(())
    }

    fn insert_declarations(
        &self,
        file: &mut SourceFile,
        directive: &Directive,
        declarations: &[String],
    ) -> Result<(), PatchError> {
        let token = self.ctx.token();
        let edit = match &directive.attachment {
            // items are not allowed inside `impl` and `trait` blocks
            Attachment::Item {
                function: Some(function),
                ..
            } if function.is_method() => {
                verify_body(file, directive, function)?;
                before_item(file, function.item_anchor, declarations, token)
            }
            Attachment::Item { .. } => {
                verify_comment(file, directive)?;
                after_comment_line(file, directive, declarations, token)
            }
            Attachment::Statement { function, .. } => {
                verify_body(file, directive, function)?;
                before_item(file, function.item_anchor, declarations, token)
            }
            Attachment::Detached => return Err(not_found(file, directive)),
        };
        file.apply_edit(&edit)?;
        Ok(())
    }

    fn insert_statements(
        &self,
        file: &mut SourceFile,
        directive: &Directive,
        statements: &[String],
    ) -> Result<(), PatchError> {
        let token = self.ctx.token();
        let edit = match &directive.attachment {
            Attachment::Item {
                function: Some(function),
                ..
            } => {
                verify_body(file, directive, function)?;
                let at = function.body_open;
                let indent = body_indent(file, function);
                let mut text = format!("\n{}", wrap_block(statements, &indent, token));

                let line_rest = &file.text()[at..file.line_end(at)];
                let code = line_rest.trim_start();
                if code.starts_with('}') {
                    // empty body: the closing brace goes on its own line
                    let blank = line_rest.len() - code.len();
                    text.push('\n');
                    text.push_str(file.line_indent(at - 1));
                    Edit::new(file.path(), at, at + blank, text, &line_rest[..blank])
                } else {
                    // keep code that shares the line with `{` out of the marker comment
                    if !code.is_empty() {
                        text.push('\n');
                        text.push_str(&indent);
                    }
                    Edit::insert(file.path(), at, text)
                }
            }
            Attachment::Item { function: None, .. } => {
                return Err(PatchError::NoFunctionBody {
                    path: file.path().to_path_buf(),
                    line: directive.line,
                })
            }
            Attachment::Statement { .. } => {
                verify_comment(file, directive)?;
                after_comment_line(file, directive, statements, token)
            }
            Attachment::Detached => return Err(not_found(file, directive)),
        };
        file.apply_edit(&edit)?;
        Ok(())
    }
}

fn directive_at(file: &SourceFile, index: usize) -> Result<Directive, PatchError> {
    file.directive(index)
        .cloned()
        .ok_or_else(|| PatchError::DeclarationNotFound {
            path: file.path().to_path_buf(),
            line: 0,
            text: format!("directive #{index}"),
        })
}

fn after_comment_line(
    file: &SourceFile,
    directive: &Directive,
    snippets: &[String],
    token: &str,
) -> Edit {
    let at = file.line_end(directive.comment.end);
    let indent = file.line_indent(directive.comment.start);
    Edit::insert(
        file.path(),
        at,
        format!("\n{}", wrap_block(snippets, indent, token)),
    )
}

/// Marker-wrapped items at `at`, followed by a blank line.
fn before_item(file: &SourceFile, at: usize, declarations: &[String], token: &str) -> Edit {
    let indent = file.line_indent(at).to_string();
    let block = wrap_block(declarations, &indent, token);
    Edit::insert(
        file.path(),
        at,
        format!("{}\n\n{indent}", &block[indent.len()..]),
    )
}

fn verify_comment(file: &SourceFile, directive: &Directive) -> Result<(), PatchError> {
    match file.text().get(directive.comment.range()) {
        Some(text) if text == directive.text => Ok(()),
        _ => Err(not_found(file, directive)),
    }
}

fn verify_body(
    file: &SourceFile,
    directive: &Directive,
    function: &FunctionSite,
) -> Result<(), PatchError> {
    let open = function.body_open.checked_sub(1);
    match open.and_then(|start| file.text().get(start..function.body_open)) {
        Some("{") => Ok(()),
        _ => Err(not_found(file, directive)),
    }
}

fn not_found(file: &SourceFile, directive: &Directive) -> PatchError {
    PatchError::DeclarationNotFound {
        path: file.path().to_path_buf(),
        line: directive.line,
        text: directive.text.clone(),
    }
}

/// Indentation for statements at the top of a function body: that of the
/// first line inside the body when it is deeper than the `fn` line, else
/// one level deeper than the `fn` line.
fn body_indent(file: &SourceFile, function: &FunctionSite) -> String {
    let outer = file.line_indent(function.body_open - 1).to_string();
    let next_line = file.line_end(function.body_open) + 1;
    if next_line < file.text().len() {
        let inner = file.line_indent(next_line);
        let line = &file.text()[next_line..file.line_end(next_line)];
        if inner.len() > outer.len() && !line.trim().is_empty() {
            return inner.to_string();
        }
    }
    format!("{outer}{INDENT_UNIT}")
}
