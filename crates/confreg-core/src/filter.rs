//! Output filters and regex search over a resolved view

use crate::error::{Error, Result};
use crate::key::{shell_escape_key, shell_quote};
use crate::snapshot::Snapshot;
use regex::Regex;

/// Render `key: value` lines as shell assignments.
///
/// Keys are made into shell variable names and values are quoted. A line
/// without a `": "` separator is a key with an empty value.
pub fn filter_shell<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    lines
        .iter()
        .map(|line| {
            let line = line.as_ref();
            line.split_once(": ")
                .unwrap_or((line.trim_end_matches(':'), ""))
        })
        .map(|(key, value)| format!("{}={}", shell_escape_key(key), shell_quote(value)))
        .collect()
}

/// Keep only the key of each `key: value` line.
pub fn filter_keys_only<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    lines
        .iter()
        .map(|line| {
            let line = line.as_ref();
            line.split_once(": ")
                .map_or(line, |(key, _)| key)
                .trim_end_matches(':')
                .to_string()
        })
        .collect()
}

pub fn filter_sort(mut lines: Vec<String>) -> Vec<String> {
    lines.sort();
    lines
}

/// What a search pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchTarget {
    #[default]
    Key,
    Value,
    All,
}

/// Resolved pairs where any pattern matches somewhere in the chosen target.
///
/// An empty pattern list matches everything.
pub fn search<'s>(
    snapshot: &'s Snapshot,
    patterns: &[&str],
    target: SearchTarget,
) -> Result<Vec<(&'s str, &'s str)>> {
    let regexes = patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| Error::InvalidSearchPattern {
                pattern: pattern.to_string(),
                source,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let matches = |text: &str| regexes.iter().any(|re| re.is_match(text));

    Ok(snapshot
        .items()
        .filter(|(key, value)| {
            regexes.is_empty()
                || match target {
                    SearchTarget::Key => matches(key),
                    SearchTarget::Value => matches(value),
                    SearchTarget::All => matches(key) || matches(value),
                }
        })
        .collect())
}
