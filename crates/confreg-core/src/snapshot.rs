//! Immutable resolved view handed to handlers

use crate::key::{is_false_value, is_true_value};
use crate::registry::{LayeredRegistry, ScopedValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Resolved key/value pairs frozen at one point in time.
///
/// Cloning is cheap; clones share the same data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Arc<BTreeMap<String, ScopedValue>>,
}

impl Snapshot {
    pub fn of(registry: &LayeredRegistry) -> Self {
        Self {
            entries: Arc::new(registry.resolved()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|scoped| scoped.value.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_scoped(&self, key: &str) -> Option<&ScopedValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, scoped)| (key.as_str(), scoped.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when the key holds one of the recognised true words.
    pub fn is_true(&self, key: &str) -> bool {
        self.get(key).is_some_and(is_true_value)
    }

    pub fn is_false(&self, key: &str) -> bool {
        self.get(key).is_some_and(is_false_value)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Snapshot {
    /// Build a snapshot from plain pairs, all attributed to an unnamed layer.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(key, value)| {
                (
                    key.into(),
                    ScopedValue {
                        layer: String::new(),
                        value: value.into(),
                    },
                )
            })
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.items() {
            writeln!(f, "{key}: {value}")?;
        }
        Ok(())
    }
}
