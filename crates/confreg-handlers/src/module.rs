//! In-process module handlers
//!
//! A module receives the registry snapshot and the relevant changes as
//! explicit arguments. Modules are registered by name in a
//! [`ModuleRegistry`]; descriptors refer to them through `Module`,
//! `Preinst` and `Postinst` fields.

use crate::error::{Error, Result};
use confreg_core::{Changes, Snapshot};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub type ModuleResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Entry points of a module handler. Every phase defaults to a no-op.
pub trait ModuleHandler: Send + Sync {
    /// Runs before a generated file is rewritten.
    fn preinst(&self, _snapshot: &Snapshot, _changes: &Changes) -> ModuleResult {
        Ok(())
    }

    fn handler(&self, _snapshot: &Snapshot, _changes: &Changes) -> ModuleResult {
        Ok(())
    }

    /// Runs after a generated file is rewritten.
    fn postinst(&self, _snapshot: &Snapshot, _changes: &Changes) -> ModuleResult {
        Ok(())
    }
}

/// Adapts a closure into a module that only implements [`ModuleHandler::handler`].
pub struct FnModule<F>(pub F);

impl<F> ModuleHandler for FnModule<F>
where
    F: Fn(&Snapshot, &Changes) -> ModuleResult + Send + Sync,
{
    fn handler(&self, snapshot: &Snapshot, changes: &Changes) -> ModuleResult {
        (self.0)(snapshot, changes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Preinst,
    Generate,
    Postinst,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preinst => "preinst",
            Self::Generate => "generate",
            Self::Postinst => "postinst",
        })
    }
}

#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn ModuleHandler>>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under `name`, replacing any previous module.
    pub fn register(&mut self, name: impl Into<String>, module: impl ModuleHandler + 'static) {
        self.modules.insert(name.into(), Arc::new(module));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Run one phase of a module. Errors and panics become `HandlerFailed`.
    pub fn call(&self, name: &str, phase: Phase, snapshot: &Snapshot, changes: &Changes) -> Result<()> {
        let module = self
            .modules
            .get(name)
            .ok_or_else(|| Error::handler_failed(name, "module is not registered"))?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match phase {
            Phase::Preinst => module.preinst(snapshot, changes),
            Phase::Generate => module.handler(snapshot, changes),
            Phase::Postinst => module.postinst(snapshot, changes),
        }));

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::handler_failed(name, format!("{phase}: {e}"))),
            Err(payload) => Err(Error::handler_failed(
                name,
                format!("{phase} panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }
}

/// Module calls made during one dispatch.
///
/// A module can be both a `module` handler and a file handler's `Preinst` or
/// `Postinst`; each of its phases still runs at most once per dispatch.
pub(crate) struct ModuleCalls<'a> {
    modules: &'a ModuleRegistry,
    ran: RefCell<HashSet<(String, Phase)>>,
}

impl<'a> ModuleCalls<'a> {
    pub(crate) fn new(modules: &'a ModuleRegistry) -> Self {
        Self {
            modules,
            ran: RefCell::new(HashSet::new()),
        }
    }

    pub(crate) fn call(&self, name: &str, phase: Phase, snapshot: &Snapshot, changes: &Changes) -> Result<()> {
        if !self.ran.borrow_mut().insert((name.to_string(), phase)) {
            tracing::debug!(module = name, %phase, "Phase already ran in this dispatch, skipping");
            return Ok(());
        }
        self.modules.call(name, phase, snapshot, changes)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
