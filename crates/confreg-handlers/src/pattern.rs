//! Variable patterns declared by handlers
//!
//! A pattern is an exact key, a glob or a regular expression. Raw strings are
//! classified once by [`PatternSpec::parse`] and compiled once into a
//! [`PatternSet`] when the index is loaded.
//!
//! | Raw pattern          | Kind  | Matches                          |
//! |----------------------|-------|----------------------------------|
//! | `ldap/base`          | exact | `ldap/base` only                 |
//! | `mail/alias/*`       | glob  | one segment below `mail/alias/`  |
//! | `interfaces/.*/addr` | regex | whole-key match                  |
//! | `re:...`/`glob:...` | forced | as the named kind                |

use crate::error::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const REGEX_PREFIX: &str = "re:";
const GLOB_PREFIX: &str = "glob:";
const REGEX_HINTS: &[&str] = &[".*", ".+", "^", "$", "(", "[", "\\", "+", "|", "{"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pattern", rename_all = "lowercase")]
pub enum PatternSpec {
    Exact(String),
    Glob(String),
    Regex(String),
}

impl PatternSpec {
    pub fn parse(raw: &str) -> Self {
        if let Some(pattern) = raw.strip_prefix(REGEX_PREFIX) {
            return Self::Regex(pattern.to_string());
        }
        if let Some(pattern) = raw.strip_prefix(GLOB_PREFIX) {
            return Self::Glob(pattern.to_string());
        }
        if REGEX_HINTS.iter().any(|hint| raw.contains(hint)) {
            Self::Regex(raw.to_string())
        } else if raw.contains(['*', '?']) {
            Self::Glob(raw.to_string())
        } else {
            Self::Exact(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(p) | Self::Glob(p) | Self::Regex(p) => p,
        }
    }

    /// Check that the pattern compiles.
    pub fn validate(&self) -> Result<()> {
        PatternSet::compile(std::slice::from_ref(self)).map(|_| ())
    }
}

impl fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(p) => write!(f, "{p}"),
            Self::Glob(p) => write!(f, "{GLOB_PREFIX}{p}"),
            Self::Regex(p) => write!(f, "{REGEX_PREFIX}{p}"),
        }
    }
}

/// Compiled matcher over all patterns of one handler.
#[derive(Debug, Clone)]
pub struct PatternSet {
    exact: HashSet<String>,
    globs: GlobSet,
    regexes: RegexSet,
}

impl PatternSet {
    pub fn compile(specs: &[PatternSpec]) -> Result<Self> {
        let mut exact = HashSet::new();
        let mut globs = GlobSetBuilder::new();
        let mut regexes = Vec::new();

        for spec in specs {
            match spec {
                PatternSpec::Exact(key) => {
                    exact.insert(key.clone());
                }
                PatternSpec::Glob(pattern) => {
                    let glob = GlobBuilder::new(pattern)
                        .literal_separator(true)
                        .build()
                        .map_err(|e| invalid(spec, e))?;
                    globs.add(glob);
                }
                PatternSpec::Regex(pattern) => {
                    let anchored = format!("^(?:{pattern})$");
                    regex::Regex::new(&anchored).map_err(|e| invalid(spec, e))?;
                    regexes.push(anchored);
                }
            }
        }

        let globs = globs.build().map_err(|e| Error::InvalidPattern {
            pattern: "<glob set>".into(),
            message: e.to_string(),
        })?;
        let regexes = RegexSet::new(&regexes).map_err(|e| Error::InvalidPattern {
            pattern: "<regex set>".into(),
            message: e.to_string(),
        })?;

        Ok(Self {
            exact,
            globs,
            regexes,
        })
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.exact.contains(key) || self.globs.is_match(key) || self.regexes.is_match(key)
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.globs.is_empty() && self.regexes.is_empty()
    }

    /// Exact keys, which may match keys not present in the registry.
    pub fn exact_keys(&self) -> impl Iterator<Item = &str> {
        self.exact.iter().map(String::as_str)
    }
}

fn invalid(spec: &PatternSpec, error: impl fmt::Display) -> Error {
    Error::InvalidPattern {
        pattern: spec.to_string(),
        message: error.to_string(),
    }
}
