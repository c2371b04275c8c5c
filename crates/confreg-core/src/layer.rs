//! One persisted layer of the registry
//!
//! A layer file is UTF-8 text: a comment header followed by `key: value`
//! lines sorted by key. Lines starting with `#` and blank lines are ignored
//! on read. Every save writes a `.bak` copy first, and reads fall back to it
//! when the main file has gone missing.

use crate::error::{Error, Result};
use confreg_fs::io::{self, RobustnessConfig};
use confreg_fs::RegistryLock;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Values of a single layer, sorted by key.
pub type LayerValues = BTreeMap<String, String>;

const HEADER: &str = "# This file is maintained by confreg. Manual edits may be overwritten.\n\n";

/// Reads and writes the file behind one layer.
#[derive(Debug, Clone)]
pub struct LayerStore {
    path: PathBuf,
    robustness: RobustnessConfig,
}

impl LayerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_robustness(path, RobustnessConfig::default())
    }

    pub fn with_robustness(path: impl Into<PathBuf>, robustness: RobustnessConfig) -> Self {
        Self {
            path: path.into(),
            robustness,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, ".bak")
    }

    /// Path of the advisory lock file guarding writes to this layer.
    pub fn lock_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, ".lock")
    }

    /// Read the layer. A missing file is an empty layer.
    pub fn read(&self) -> Result<LayerValues> {
        if let Some(content) = io::read_text_if_exists(&self.path)? {
            return parse(&self.path, &content);
        }

        let backup = self.backup_path();
        match io::read_text_if_exists(&backup)? {
            Some(content) => {
                tracing::warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    "Layer file missing, reading backup"
                );
                parse(&backup, &content)
            }
            None => Ok(LayerValues::new()),
        }
    }

    /// Replace the layer file with `values`.
    pub fn write(&self, values: &LayerValues) -> Result<()> {
        let content = serialize(values);
        io::write_atomic(&self.backup_path(), content.as_bytes(), self.robustness)?;
        io::write_atomic(&self.path, content.as_bytes(), self.robustness)?;
        tracing::debug!(path = %self.path.display(), keys = values.len(), "Layer written");
        Ok(())
    }

    /// Take the exclusive lock for a read-modify-write cycle on this layer.
    pub fn lock(&self) -> Result<RegistryLock> {
        Ok(RegistryLock::acquire_with(self.lock_path(), self.robustness)?)
    }
}

/// Parse layer file content.
///
/// Values are taken verbatim after the first `": "`; a line ending in `:`
/// stores the empty string. Any other non-comment line is corruption.
pub fn parse(path: &Path, content: &str) -> Result<LayerValues> {
    let mut values = LayerValues::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once(": ") {
            Some((key, value)) => (key, value),
            None => match line.strip_suffix(':') {
                Some(key) => (key, ""),
                None => return Err(corrupt(path, index, line)),
            },
        };
        if key.is_empty() {
            return Err(corrupt(path, index, line));
        }
        values.insert(key.to_string(), value.to_string());
    }
    Ok(values)
}

pub fn serialize(values: &LayerValues) -> String {
    let mut out = String::from(HEADER);
    for (key, value) in values {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out
}

fn corrupt(path: &Path, index: usize, line: &str) -> Error {
    Error::CorruptLayer {
        path: path.to_path_buf(),
        line: index + 1,
        content: line.to_string(),
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn values(pairs: &[(&str, &str)]) -> LayerValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let content = "# header\n\nldap/base: dc=example,dc=org\n  \nhostname: master\n";
        let parsed = parse(Path::new("base.conf"), content).unwrap();
        assert_eq!(
            parsed,
            values(&[("hostname", "master"), ("ldap/base", "dc=example,dc=org")])
        );
    }

    #[test]
    fn parse_keeps_values_verbatim() {
        let parsed = parse(Path::new("base.conf"), "motd:   spaced: out  \nempty:\n").unwrap();
        assert_eq!(parsed["motd"], "  spaced: out  ");
        assert_eq!(parsed["empty"], "");
    }

    #[test]
    fn parse_accepts_crlf_line_endings() {
        let parsed = parse(Path::new("base.conf"), "a: 1\r\nb: 2\r\n").unwrap();
        assert_eq!(parsed, values(&[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn parse_rejects_lines_without_separator() {
        let err = parse(Path::new("base.conf"), "good: 1\nthis is garbage\n").unwrap_err();
        match err {
            Error::CorruptLayer { line, content, .. } => {
                assert_eq!(line, 2);
                assert_eq!(content, "this is garbage");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn serialize_is_sorted_with_header() {
        let out = serialize(&values(&[("b", "2"), ("a", "1")]));
        assert!(out.starts_with('#'));
        assert!(out.ends_with("a: 1\nb: 2\n"));
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let store = LayerStore::new(dir.path().join("base.conf"));
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn write_creates_backup_and_read_falls_back_to_it() {
        let dir = tempdir().unwrap();
        let store = LayerStore::new(dir.path().join("base.conf"));
        let data = values(&[("hostname", "master")]);

        store.write(&data).unwrap();
        assert!(store.backup_path().exists());

        std::fs::remove_file(store.path()).unwrap();
        assert_eq!(store.read().unwrap(), data);
    }

    #[test]
    fn lock_path_is_next_to_layer_file() {
        let store = LayerStore::new("/etc/confreg/base.conf");
        assert_eq!(store.lock_path(), PathBuf::from("/etc/confreg/base.conf.lock"));
        assert_eq!(store.backup_path(), PathBuf::from("/etc/confreg/base.conf.bak"));
    }

    proptest! {
        #[test]
        fn serialized_layers_parse_back(
            entries in proptest::collection::btree_map(
                "[a-z][a-z0-9/_.-]{0,20}",
                "[ -~]{0,30}",
                0..20,
            )
        ) {
            let text = serialize(&entries);
            let parsed = parse(Path::new("prop.conf"), &text).unwrap();
            prop_assert_eq!(parsed, entries);
        }
    }
}
