//! Change-triggered handler dispatch
//!
//! The dispatcher maps a [`ChangeSet`] onto the handler index and runs every
//! matching handler in index order. Handlers run sequentially and in
//! isolation: a failure is logged and recorded in the [`DispatchReport`], and
//! the remaining handlers still run.

use crate::descriptor::HandlerKind;
use crate::error::Result;
use crate::generate;
use crate::index::{Handler, HandlerIndex, IndexedHandler, normalize_target};
use crate::module::{ModuleCalls, ModuleRegistry, Phase};
use crate::script;
use confreg_core::{ChangeSet, ChangeValue, Changes, Settings, Snapshot};
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Result of one handler run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerOutcome {
    pub handler: String,
    pub kind: HandlerKind,
    pub outcome: Outcome,
}

/// Outcomes of one dispatch, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<HandlerOutcome>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &HandlerOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed(_)))
    }

    /// Ids of the handlers that ran, in order.
    pub fn handlers(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().map(|o| o.handler.as_str())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn extend(&mut self, other: DispatchReport) {
        self.outcomes.extend(other.outcomes);
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            match &outcome.outcome {
                Outcome::Succeeded => writeln!(f, "ok      {}", outcome.handler)?,
                Outcome::Failed(message) => writeln!(f, "FAILED  {}: {message}", outcome.handler)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    settings: Settings,
    modules: ModuleRegistry,
}

impl Dispatcher {
    pub fn new(settings: Settings) -> Self {
        Self::with_modules(settings, ModuleRegistry::new())
    }

    pub fn with_modules(settings: Settings, modules: ModuleRegistry) -> Self {
        Self { settings, modules }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn modules_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.modules
    }

    /// The current index, from cache when fresh.
    pub fn index(&self) -> Result<HandlerIndex> {
        HandlerIndex::load_or_rebuild(&self.settings)
    }

    /// Run every handler interested in the effective changes of `changes`.
    ///
    /// Only index errors fail the call; handler failures are reported.
    pub fn dispatch(&self, snapshot: &Snapshot, changes: &ChangeSet) -> Result<DispatchReport> {
        if changes.effective().next().is_none() {
            tracing::debug!("No effective changes, nothing to dispatch");
            return Ok(DispatchReport::default());
        }
        let index = self.index()?;
        Ok(self.dispatch_with(&index, snapshot, changes))
    }

    pub fn dispatch_with(&self, index: &HandlerIndex, snapshot: &Snapshot, changes: &ChangeSet) -> DispatchReport {
        let keys: Vec<&str> = changes.effective().map(|c| c.key.as_str()).collect();
        let calls = ModuleCalls::new(&self.modules);
        let mut report = DispatchReport::default();
        for entry in index.matching(&keys) {
            let relevant = changes.to_changes(|key| keys.iter().any(|k| *k == key) && entry.matches(key));
            report.outcomes.push(self.run(&calls, entry.handler(), snapshot, &relevant));
        }
        report
    }

    /// Regenerate `targets`, or run every handler when `targets` is empty.
    /// Each handler sees the current value of every key it watches.
    pub fn commit<T: AsRef<str>>(&self, snapshot: &Snapshot, targets: &[T]) -> Result<DispatchReport> {
        let index = self.index()?;
        let selected = if targets.is_empty() {
            index.iter().collect()
        } else {
            let selected = index.by_targets(targets);
            for target in targets {
                let wanted = normalize_target(target.as_ref());
                if !selected.iter().any(|e| normalize_target(&e.handler().target) == wanted) {
                    tracing::warn!(file = wanted, "No file handler generates this target");
                }
            }
            selected
        };
        Ok(self.run_expanded(&selected, snapshot))
    }

    /// Run `entries` with their values expanded from `snapshot`.
    pub fn run_expanded(&self, entries: &[&IndexedHandler], snapshot: &Snapshot) -> DispatchReport {
        let calls = ModuleCalls::new(&self.modules);
        let mut report = DispatchReport::default();
        for entry in entries {
            let changes = expand_values(entry, snapshot);
            report.outcomes.push(self.run(&calls, entry.handler(), snapshot, &changes));
        }
        report
    }

    fn run(&self, calls: &ModuleCalls<'_>, handler: &Handler, snapshot: &Snapshot, changes: &Changes) -> HandlerOutcome {
        tracing::info!(handler = %handler.id, keys = changes.len(), "Running handler");
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(calls, handler, snapshot, changes)));
        let outcome = match result {
            Ok(Ok(())) => Outcome::Succeeded,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(_) => Outcome::Failed(format!("handler {} panicked", handler.id)),
        };
        if let Outcome::Failed(message) = &outcome {
            tracing::warn!(handler = %handler.id, error = %message, "Handler failed");
        }
        HandlerOutcome {
            handler: handler.id.clone(),
            kind: handler.kind,
            outcome,
        }
    }

    fn execute(&self, calls: &ModuleCalls<'_>, handler: &Handler, snapshot: &Snapshot, changes: &Changes) -> Result<()> {
        match handler.kind {
            HandlerKind::File | HandlerKind::Multifile => {
                generate::run_file_handler(&self.settings, calls, handler, snapshot, changes)
            }
            HandlerKind::Module => {
                for phase in [Phase::Preinst, Phase::Generate, Phase::Postinst] {
                    calls.call(&handler.target, phase, snapshot, changes)?;
                }
                Ok(())
            }
            HandlerKind::Script => {
                let path = handler
                    .sources
                    .first()
                    .cloned()
                    .unwrap_or_else(|| self.settings.scripts_dir().join(&handler.target));
                script::run_script(&path, "generate", changes).map(|_| ())
            }
        }
    }
}

/// Current values of every snapshot key `entry` watches, plus its exact keys.
pub fn expand_values(entry: &IndexedHandler, snapshot: &Snapshot) -> Changes {
    let mut changes: Changes = snapshot
        .items()
        .filter(|(key, _)| entry.matches(key))
        .map(|(key, value)| (key.to_string(), ChangeValue::Value(Some(value.to_string()))))
        .collect();
    for key in entry.patterns().exact_keys() {
        changes
            .entry(key.to_string())
            .or_insert_with(|| ChangeValue::Value(None));
    }
    changes
}
