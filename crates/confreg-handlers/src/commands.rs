//! Frontend operations
//!
//! Each operation brackets the registry work the same way: take the layer
//! lock, load, mutate, save, release. Shadow warnings, the replication log
//! and handler dispatch happen after the lock is released.

use crate::descriptor::HandlerKind;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{Error, Result};
use crate::index::{self, HandlerIndex};
use crate::module::ModuleRegistry;
use confreg_core::filter::{self, SearchTarget};
use confreg_core::{
    Autoload, ChangeSet, REPLOG_ENABLED_KEY, ReadWrite, RegistryHandle, Replog, ReplogEntry, Settings,
    Snapshot,
};
use confreg_fs::io;

/// One `key=value` or `key?value` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Set { key: String, value: String },
    /// Only applied when the key resolves in no layer at all.
    SetIfUnset { key: String, value: String },
}

impl Assignment {
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::SetIfUnset { key, .. } => key,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Set { value, .. } | Self::SetIfUnset { value, .. } => value,
        }
    }
}

/// Split at the earliest `=` or `?`.
pub fn parse_assignment(argument: &str) -> Result<Assignment> {
    let invalid = || Error::InvalidAssignment {
        argument: argument.to_string(),
    };
    let at = argument.find(['=', '?']).ok_or_else(invalid)?;
    let (key, rest) = argument.split_at(at);
    if key.is_empty() {
        return Err(invalid());
    }
    let value = rest[1..].to_string();
    let key = key.to_string();
    Ok(if rest.starts_with('=') {
        Assignment::Set { key, value }
    } else {
        Assignment::SetIfUnset { key, value }
    })
}

/// What a set or unset did.
#[derive(Debug, Clone, Default)]
pub struct CommandReport {
    pub changes: ChangeSet,
    /// Written keys still hidden by a higher layer, with that layer's name.
    pub shadowed: Vec<(String, String)>,
    pub dispatch: DispatchReport,
}

#[derive(Debug, Clone)]
pub struct Commands {
    dispatcher: Dispatcher,
}

impl Commands {
    pub fn new(settings: Settings) -> Self {
        Self {
            dispatcher: Dispatcher::new(settings),
        }
    }

    pub fn with_modules(settings: Settings, modules: ModuleRegistry) -> Self {
        Self {
            dispatcher: Dispatcher::with_modules(settings, modules),
        }
    }

    pub fn settings(&self) -> &Settings {
        self.dispatcher.settings()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Apply `key=value` / `key?value` arguments to `layer` (or the default
    /// write layer) and dispatch the resulting changes.
    pub fn set<S: AsRef<str>>(&self, arguments: &[S], layer: Option<&str>) -> Result<CommandReport> {
        let assignments = arguments
            .iter()
            .map(|arg| parse_assignment(arg.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        self.mutate(layer, |handle, log| {
            for assignment in &assignments {
                let key = assignment.key();
                if matches!(assignment, Assignment::SetIfUnset { .. }) && handle.get(key)?.is_some() {
                    tracing::info!(key, "Already set, skipping");
                    continue;
                }
                let old = handle.write_layer_value(key);
                handle.set(key, assignment.value())?;
                log.push(Logged::Set {
                    key: key.to_string(),
                    value: assignment.value().to_string(),
                    old,
                });
            }
            Ok(())
        })
    }

    /// Remove `keys` from `layer` (or the default write layer) and dispatch.
    pub fn unset<S: AsRef<str>>(&self, keys: &[S], layer: Option<&str>) -> Result<CommandReport> {
        self.mutate(layer, |handle, log| {
            for key in keys {
                let key = key.as_ref();
                if handle.write_layer_value(key).is_none() {
                    tracing::warn!(key, layer = %handle.write_layer(), "Not set in this layer, skipping");
                    continue;
                }
                let old = handle.delete(key)?;
                log.push(Logged::Unset {
                    key: key.to_string(),
                    old: Some(old),
                });
            }
            Ok(())
        })
    }

    fn mutate<F>(&self, layer: Option<&str>, apply: F) -> Result<CommandReport>
    where
        F: FnOnce(&mut RegistryHandle<ReadWrite>, &mut Vec<Logged>) -> Result<()>,
    {
        let settings = self.settings();
        let mut handle = RegistryHandle::writable(settings, layer, Autoload::Manual)?;
        let mut log = Vec::new();

        let changes = {
            let _lock = handle.lock()?;
            handle.load()?;
            apply(&mut handle, &mut log)?;
            handle.save()?
        };
        let snapshot = handle.snapshot()?;

        let mut shadowed = Vec::new();
        for entry in &log {
            if let Some(by) = handle.shadowed_by(entry.key())? {
                tracing::warn!(
                    key = entry.key(),
                    layer = %by,
                    "Value is shadowed by a higher layer and has no effect"
                );
                shadowed.push((entry.key().to_string(), by));
            }
        }

        if snapshot.is_true(REPLOG_ENABLED_KEY) {
            let layer = handle.write_layer();
            let entries: Vec<ReplogEntry<'_>> = log.iter().map(|entry| entry.as_entry(&layer)).collect();
            if let Err(e) = Replog::new(&settings.replog_file).record(&entries) {
                tracing::warn!(error = %e, "Failed to write replication log");
            }
        }

        let dispatch = self.dispatcher.dispatch(&snapshot, &changes)?;
        Ok(CommandReport {
            changes,
            shadowed,
            dispatch,
        })
    }

    /// Regenerate `targets`, or run every handler when empty.
    pub fn commit<S: AsRef<str>>(&self, targets: &[S]) -> Result<DispatchReport> {
        let snapshot = self.snapshot()?;
        self.dispatcher.commit(&snapshot, targets)
    }

    /// Rebuild the handler index regardless of the cache.
    pub fn update(&self) -> Result<HandlerIndex> {
        let index = HandlerIndex::build(self.settings())?;
        tracing::info!(handlers = index.len(), "Handler index rebuilt");
        Ok(index)
    }

    /// Run the handlers of a newly installed package with current values.
    pub fn register(&self, package: &str) -> Result<DispatchReport> {
        self.require_package(package)?;
        let index = HandlerIndex::build(self.settings())?;
        let snapshot = self.snapshot()?;
        let entries = index.by_package(package);
        tracing::info!(package, handlers = entries.len(), "Registering package");
        Ok(self.dispatcher.run_expanded(&entries, &snapshot))
    }

    /// Regenerate multifiles the package contributed to, as if it were gone,
    /// and drop the cached index.
    pub fn unregister(&self, package: &str) -> Result<DispatchReport> {
        self.require_package(package)?;
        let settings = self.settings();
        let current = HandlerIndex::load_or_rebuild(settings)?;
        let remaining = HandlerIndex::build_excluding(settings, package)?;

        let targets: Vec<&str> = current
            .by_package(package)
            .into_iter()
            .filter(|entry| entry.handler().kind == HandlerKind::Multifile)
            .map(|entry| entry.handler().target.as_str())
            .collect();
        let entries = remaining.by_targets(&targets[..]);

        let snapshot = self.snapshot()?;
        tracing::info!(package, multifiles = entries.len(), "Unregistering package");
        let report = self.dispatcher.run_expanded(&entries, &snapshot);

        io::remove_if_exists(&settings.cache_file)?;
        Ok(report)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.snapshot()?.get(key).map(str::to_string))
    }

    /// Resolved pairs matching any of `patterns`.
    pub fn search(&self, patterns: &[&str], target: SearchTarget) -> Result<Vec<(String, String)>> {
        let snapshot = self.snapshot()?;
        let found = filter::search(&snapshot, patterns, target)?;
        Ok(found
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect())
    }

    /// Every resolved pair as a `key: value` line.
    pub fn dump(&self) -> Result<Vec<String>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.items().map(|(key, value)| format!("{key}: {value}")).collect())
    }

    /// Shell assignments for `keys`, or for every key when empty.
    pub fn shell(&self, keys: &[&str]) -> Result<Vec<String>> {
        let snapshot = self.snapshot()?;
        let lines: Vec<String> = snapshot
            .items()
            .filter(|(key, _)| keys.is_empty() || keys.iter().any(|k| k == key))
            .map(|(key, value)| format!("{key}: {value}"))
            .collect();
        Ok(filter::filter_shell(&lines))
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let handle = RegistryHandle::read_only(self.settings(), Autoload::Once)?;
        Ok(handle.snapshot()?)
    }

    fn require_package(&self, package: &str) -> Result<()> {
        if index::info_file(self.settings(), package).is_file() {
            Ok(())
        } else {
            Err(Error::UnknownPackage {
                package: package.to_string(),
            })
        }
    }
}

/// A mutation kept for the replication log.
enum Logged {
    Set {
        key: String,
        value: String,
        old: Option<String>,
    },
    Unset {
        key: String,
        old: Option<String>,
    },
}

impl Logged {
    fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Unset { key, .. } => key,
        }
    }

    fn as_entry<'a>(&'a self, layer: &'a str) -> ReplogEntry<'a> {
        match self {
            Self::Set { key, value, old } => ReplogEntry::Set {
                layer,
                key,
                value,
                old: old.as_deref(),
            },
            Self::Unset { key, old } => ReplogEntry::Unset {
                layer,
                key,
                old: old.as_deref(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("hostname=master", Assignment::Set { key: "hostname".into(), value: "master".into() })]
    #[case("a?b", Assignment::SetIfUnset { key: "a".into(), value: "b".into() })]
    #[case("url=http://x?y=1", Assignment::Set { key: "url".into(), value: "http://x?y=1".into() })]
    #[case("q?a=b", Assignment::SetIfUnset { key: "q".into(), value: "a=b".into() })]
    #[case("empty=", Assignment::Set { key: "empty".into(), value: String::new() })]
    fn earliest_separator_wins(#[case] argument: &str, #[case] expected: Assignment) {
        assert_eq!(parse_assignment(argument).unwrap(), expected);
    }

    #[rstest]
    #[case("no-separator")]
    #[case("=value")]
    #[case("?value")]
    fn rejects_malformed_assignments(#[case] argument: &str) {
        assert!(matches!(
            parse_assignment(argument),
            Err(Error::InvalidAssignment { .. })
        ));
    }
}
