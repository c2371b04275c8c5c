//! Template rendering for file and multifile handlers
//!
//! `@%@name@%@` is replaced by the resolved value of `name` (empty when
//! unset). `@%@WARNING=<prefix>@%@` and `@%@WARNING_ASCII=<prefix>@%@`
//! insert a banner naming the source templates, each line starting with
//! `<prefix>`. Substituted values are never scanned again.

use confreg_core::Snapshot;
use std::collections::BTreeSet;

pub const VARIABLE_TOKEN: &str = "@%@";
pub const EXECUTE_TOKEN: &str = "@!@";

const WARNING: &str = "WARNING=";
const WARNING_ASCII: &str = "WARNING_ASCII=";

const WARNING_TEXT: &str = "\
Warning: This file is auto-generated and might be overwritten by
         confreg.
         Please edit the following file(s) instead:
";

/// Render `template` against `snapshot`.
///
/// `sources` are listed in the warning banner, sorted.
pub fn render(template: &str, snapshot: &Snapshot, sources: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(VARIABLE_TOKEN) {
        let after = &rest[start + VARIABLE_TOKEN.len()..];
        let Some(end) = after.find(VARIABLE_TOKEN) else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str(&expand(&after[..end], snapshot, sources));
        rest = &after[end + VARIABLE_TOKEN.len()..];
    }
    out.push_str(rest);
    out
}

fn expand(name: &str, snapshot: &Snapshot, sources: &[String]) -> String {
    if let Some(value) = snapshot.get(name) {
        return value.to_string();
    }
    if let Some(prefix) = name.strip_prefix(WARNING_ASCII) {
        return warning_banner(prefix, sources, true);
    }
    if let Some(prefix) = name.strip_prefix(WARNING) {
        return warning_banner(prefix, sources, false);
    }
    String::new()
}

/// The generated-file banner, without a trailing newline.
pub fn warning_banner(prefix: &str, sources: &[String], ascii_only: bool) -> String {
    let mut lines: Vec<String> = WARNING_TEXT
        .lines()
        .map(|line| format!("{prefix}{line}"))
        .collect();
    let sorted: BTreeSet<&String> = sources.iter().collect();
    for source in sorted {
        let source = if ascii_only {
            source
                .chars()
                .map(|c| if c.is_ascii() { c } else { '?' })
                .collect()
        } else {
            source.clone()
        };
        lines.push(format!("{prefix}\t{source}"));
    }
    lines.push(prefix.to_string());
    lines.join("\n")
}

/// Variable names referenced by a template, excluding banner tokens.
pub fn referenced_variables(template: &str) -> BTreeSet<String> {
    template
        .split(VARIABLE_TOKEN)
        .skip(1)
        .step_by(2)
        .filter(|name| !name.starts_with(WARNING) && !name.starts_with(WARNING_ASCII))
        .filter(|name| confreg_core::validate_key(name).is_ok())
        .map(str::to_string)
        .collect()
}

/// Inline code blocks are not executed; they are left in place.
pub fn has_code_blocks(template: &str) -> bool {
    template.matches(EXECUTE_TOKEN).count() >= 2
}
