//! Directive comments and their grammar.
//!
//! A directive is a plain `//` line comment of the form
//!
//! ```text
//! // +trace:<kind> key=value key2=value2
//! ```
//!
//! The scanner is a pure function over the comment text. Attaching a
//! directive to an item or statement is done by [`crate::source`], which
//! records the byte anchors the patch engine later splices at.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Prefix that follows the optional `+` sign of a directive comment.
pub const MARKER: &str = "trace:";

/// Parameter map of a directive. Keys are unique; a repeated key keeps the
/// last value written.
pub type Params = BTreeMap<String, String>;

/// Closed set of directive kinds.
///
/// Comments that do not carry the marker are not directives at all; the
/// scanner reports them as `None` instead of a dedicated kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    /// Project-wide setup, exactly one per run.
    Define,
    /// Statement-level gauge assignment.
    Set,
    /// Whole-function execution time.
    FunctionTime,
    /// Execution time from the annotated statement to the end of its block.
    InlineTime,
    /// Statement-level counter increment.
    InlineCounter,
    /// Start of a generated region. Producer-internal.
    RegionBegin,
    /// End of a generated region. Producer-internal.
    RegionEnd,
    /// Marker with no kind token.
    Empty,
}

impl DirectiveKind {
    /// Map a kind token to its kind. Several spellings exist because
    /// different provider generations named the same directive differently.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "define" => Some(DirectiveKind::Define),
            "set" => Some(DirectiveKind::Set),
            "func-exec-time" | "execution-time" => Some(DirectiveKind::FunctionTime),
            "inner-exec-time" => Some(DirectiveKind::InlineTime),
            "inner-counter" => Some(DirectiveKind::InlineCounter),
            "begin-generated" => Some(DirectiveKind::RegionBegin),
            "end-generated" => Some(DirectiveKind::RegionEnd),
            "" => Some(DirectiveKind::Empty),
            _ => None,
        }
    }

    /// Canonical token written for this kind.
    pub fn token(&self) -> &'static str {
        match self {
            DirectiveKind::Define => "define",
            DirectiveKind::Set => "set",
            DirectiveKind::FunctionTime => "func-exec-time",
            DirectiveKind::InlineTime => "inner-exec-time",
            DirectiveKind::InlineCounter => "inner-counter",
            DirectiveKind::RegionBegin => "begin-generated",
            DirectiveKind::RegionEnd => "end-generated",
            DirectiveKind::Empty => "",
        }
    }

    pub fn is_region_marker(&self) -> bool {
        matches!(self, DirectiveKind::RegionBegin | DirectiveKind::RegionEnd)
    }

    /// Kinds that never need an item or statement to attach to.
    pub fn is_detachable(&self) -> bool {
        self.is_region_marker() || *self == DirectiveKind::Empty
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveKind::Empty => write!(f, "<empty>"),
            other => write!(f, "{}", other.token()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("unknown directive kind '{kind}' in `{text}`")]
    UnknownKind { kind: String, text: String },
}

/// Result of scanning one comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDirective {
    pub kind: DirectiveKind,
    pub params: Params,
}

/// Recognize a directive in the text of a single line comment.
///
/// Returns `Ok(None)` for comments without the marker, including doc
/// comments. Marker-prefixed text with an unknown kind token is an error.
pub fn scan_comment(comment: &str) -> Result<Option<ScannedDirective>, DirectiveError> {
    let comment = comment.trim();
    let Some(body) = comment.strip_prefix("//") else {
        return Ok(None);
    };
    // `///` and `//!` are documentation, never directives
    if body.starts_with('/') || body.starts_with('!') {
        return Ok(None);
    }

    let body = body.strip_prefix(' ').unwrap_or(body);
    let Some(body) = body.strip_prefix('+') else {
        return Ok(None);
    };
    let body = body.strip_prefix(' ').unwrap_or(body);
    let Some(rest) = body.strip_prefix(MARKER) else {
        return Ok(None);
    };

    let (token, arguments) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };

    let kind = DirectiveKind::from_token(token).ok_or_else(|| DirectiveError::UnknownKind {
        kind: token.to_string(),
        text: comment.to_string(),
    })?;

    Ok(Some(ScannedDirective {
        kind,
        params: parse_params(arguments),
    }))
}

/// Split whitespace-separated `key=value` pairs.
pub fn parse_params(input: &str) -> Params {
    let mut params = Params::new();
    for part in input.split_whitespace() {
        match part.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                params.insert(key.to_string(), value.to_string());
            }
            _ => tracing::debug!("ignoring directive argument without key: {part}"),
        }
    }
    params
}

/// Byte range inside a source file that moves when text is spliced in
/// front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub(crate) fn shift(&mut self, edit: &SpliceRecord) {
        self.start = edit.shift(self.start);
        self.end = edit.shift(self.end);
    }
}

/// Replacement of `[start, old_end)` by `new_len` bytes, used to move
/// anchors after a splice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpliceRecord {
    pub start: usize,
    pub old_end: usize,
    pub new_len: usize,
}

impl SpliceRecord {
    /// Offsets before the edit stay, offsets inside the replaced range
    /// stay, offsets at or past its end move by the length difference.
    pub fn shift(&self, offset: usize) -> usize {
        if offset < self.old_end {
            offset
        } else {
            offset + self.new_len - (self.old_end - self.start)
        }
    }
}

/// Function a directive belongs to, with the anchors needed to insert
/// items before it and statements at its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSite {
    pub name: String,
    /// `impl` or `trait` block the function is declared in.
    pub owner: Option<String>,
    /// Start of the function's leading comments and attributes.
    pub leading_start: usize,
    /// Where generated items for this function go. Same as `leading_start`
    /// except for methods, whose items go before the enclosing block.
    pub item_anchor: usize,
    /// Byte right after the opening `{` of the body.
    pub body_open: usize,
}

impl FunctionSite {
    /// Name used in generated identifiers and default metric names.
    pub fn label(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{owner}_{}", self.name),
            None => self.name.clone(),
        }
    }

    /// True for methods of `impl` and `trait` blocks.
    pub fn is_method(&self) -> bool {
        self.owner.is_some()
    }

    fn shift(&mut self, edit: &SpliceRecord) {
        self.leading_start = edit.shift(self.leading_start);
        self.item_anchor = edit.shift(self.item_anchor);
        // text inserted at the body entry goes inside the body; the anchor
        // stays right after `{`
        if !(edit.start == edit.old_end && edit.start == self.body_open) {
            self.body_open = edit.shift(self.body_open);
        }
    }
}

/// What a directive is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// An item at file level, in an `impl` or `trait` block, or inside a
    /// function body. `function` is set when the item is a `fn` with a body.
    Item {
        item: Span,
        kind: String,
        function: Option<FunctionSite>,
    },
    /// A statement in any block of a function body.
    Statement {
        statement: Span,
        function: FunctionSite,
    },
    /// Nothing follows the comment. Only region markers and empty
    /// directives may end up here.
    Detached,
}

/// A directive discovered in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub params: Params,
    /// Literal comment text, trimmed.
    pub text: String,
    /// 1-based line at load time.
    pub line: usize,
    pub comment: Span,
    pub attachment: Attachment,
}

impl Directive {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Function this directive instruments, if any.
    pub fn function(&self) -> Option<&FunctionSite> {
        match &self.attachment {
            Attachment::Item { function, .. } => function.as_ref(),
            Attachment::Statement { function, .. } => Some(function),
            Attachment::Detached => None,
        }
    }

    pub fn is_statement_level(&self) -> bool {
        matches!(self.attachment, Attachment::Statement { .. })
    }

    pub(crate) fn shift(&mut self, edit: &SpliceRecord) {
        self.comment.shift(edit);
        match &mut self.attachment {
            Attachment::Item { item, function, .. } => {
                item.shift(edit);
                if let Some(function) = function {
                    function.shift(edit);
                }
            }
            Attachment::Statement {
                statement,
                function,
            } => {
                statement.shift(edit);
                function.shift(edit);
            }
            Attachment::Detached => {}
        }
    }
}
