//! What a save changed, and how handlers see it

use serde::Serialize;
use std::collections::BTreeMap;

/// One key touched by a save. `None` means absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub key: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Keys touched by one save, sorted and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    changes: BTreeMap<String, Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change. A later record for the same key keeps the first `old`.
    pub fn record(&mut self, key: impl Into<String>, old: Option<String>, new: Option<String>) {
        let key = key.into();
        match self.changes.get_mut(&key) {
            Some(existing) => existing.new = new,
            None => {
                self.changes.insert(key.clone(), Change { key, old, new });
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Change> {
        self.changes.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Keys whose resolved value actually differs.
    pub fn effective(&self) -> impl Iterator<Item = &Change> {
        self.changes.values().filter(|c| c.old != c.new)
    }

    /// Handler-facing view restricted to keys accepted by `filter`.
    pub fn to_changes(&self, mut filter: impl FnMut(&str) -> bool) -> Changes {
        self.changes
            .values()
            .filter(|change| filter(&change.key))
            .map(|change| (change.key.clone(), ChangeValue::from(change)))
            .collect()
    }
}

impl FromIterator<Change> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Change>>(iter: I) -> Self {
        let mut set = Self::new();
        for change in iter {
            set.record(change.key, change.old, change.new);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::collections::btree_map::Values<'a, String, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.values()
    }
}

/// Per-key value handed to handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChangeValue {
    /// Newly introduced key, or the current value during a commit.
    Value(Option<String>),
    /// Modified or removed key.
    Pair {
        old: Option<String>,
        new: Option<String>,
    },
}

impl ChangeValue {
    pub fn old_value(&self) -> Option<&str> {
        match self {
            Self::Value(_) => None,
            Self::Pair { old, .. } => old.as_deref(),
        }
    }

    pub fn new_value(&self) -> Option<&str> {
        match self {
            Self::Value(value) => value.as_deref(),
            Self::Pair { new, .. } => new.as_deref(),
        }
    }
}

impl From<&Change> for ChangeValue {
    fn from(change: &Change) -> Self {
        match &change.old {
            None => Self::Value(change.new.clone()),
            Some(old) => Self::Pair {
                old: Some(old.clone()),
                new: change.new.clone(),
            },
        }
    }
}

/// Changes relevant to one handler, keyed by registry key.
pub type Changes = BTreeMap<String, ChangeValue>;
