//! Append-only replication log of set/unset operations
//!
//! Each line records one operation with a local timestamp, e.g.
//! `2026-01-05 10:00:00: set hostname=master old:[Previously undefined]`.
//! Writes into a layer other than the normal one carry a scope argument
//! (`--force `, `--ldap-policy `, `--schedule ` or `--layer <name> `) so a
//! replay targets the same layer.

use crate::error::Result;
use crate::key::shell_quote;
use crate::settings::layers;
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Registry key enabling the replication log.
pub const REPLOG_ENABLED_KEY: &str = "confreg/replog/enabled";

const UNDEFINED: &str = "[Previously undefined]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplogEntry<'a> {
    Set {
        layer: &'a str,
        key: &'a str,
        value: &'a str,
        old: Option<&'a str>,
    },
    Unset {
        layer: &'a str,
        key: &'a str,
        old: Option<&'a str>,
    },
}

fn scope_arg(layer: &str) -> String {
    match layer {
        layers::NORMAL | layers::CUSTOM => String::new(),
        layers::FORCED => "--force ".to_string(),
        layers::LDAP => "--ldap-policy ".to_string(),
        layers::SCHEDULE => "--schedule ".to_string(),
        other => format!("--layer {other} "),
    }
}

impl ReplogEntry<'_> {
    pub fn format(&self, at: DateTime<Local>) -> String {
        let stamp = at.format("%Y-%m-%d %H:%M:%S");
        match self {
            Self::Set {
                layer,
                key,
                value,
                old,
            } => format!(
                "{stamp}: set {}{key}={} old:{}\n",
                scope_arg(layer),
                shell_quote(value),
                old.unwrap_or(UNDEFINED)
            ),
            Self::Unset { layer, key, old } => format!(
                "{stamp}: unset {}'{key}' old:{}\n",
                scope_arg(layer),
                old.unwrap_or(UNDEFINED)
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Replog {
    path: PathBuf,
}

impl Replog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, entries: &[ReplogEntry<'_>]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let now = Local::now();
        let text: String = entries.iter().map(|entry| entry.format(now)).collect();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }
}
