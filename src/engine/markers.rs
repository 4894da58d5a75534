//! Sentinel comments around generated code.

use crate::directive::{DirectiveKind, MARKER};

pub fn begin_marker(token: &str) -> String {
    marker(DirectiveKind::RegionBegin, token)
}

pub fn end_marker(token: &str) -> String {
    marker(DirectiveKind::RegionEnd, token)
}

fn marker(kind: DirectiveKind, token: &str) -> String {
    format!("// +{MARKER}{} uuid={token}", kind.token())
}

/// Wrap `snippets` between a begin and an end marker. Every line is
/// prefixed with `indent`; there is no leading or trailing newline.
pub(crate) fn wrap_block(snippets: &[String], indent: &str, token: &str) -> String {
    let mut lines = vec![format!("{indent}{}", begin_marker(token))];
    for snippet in snippets {
        for line in snippet.lines() {
            if line.trim().is_empty() {
                lines.push(String::new());
            } else {
                lines.push(format!("{indent}{line}"));
            }
        }
    }
    lines.push(format!("{indent}{}", end_marker(token)));
    lines.join("\n")
}
