//! Registry handles with an access mode and a reload policy
//!
//! The access mode is part of the type: only a `RegistryHandle<ReadWrite>`
//! has `set`, `delete` and `save`.
//!
//! ```compile_fail
//! use confreg_core::{Autoload, RegistryHandle, Settings};
//!
//! let settings = Settings::with_root("/tmp/confreg-doc");
//! let mut handle = RegistryHandle::read_only(&settings, Autoload::Manual).unwrap();
//! handle.set("hostname", "master");
//! ```
//!
//! Reads take `&self`. Depending on [`Autoload`] a read may first re-read the
//! layer files, so reads return `Result`.

use crate::changes::ChangeSet;
use crate::error::Result;
use crate::layer::LayerValues;
use crate::registry::{LayeredRegistry, ScopedValue};
use crate::settings::Settings;
use crate::snapshot::Snapshot;
use confreg_fs::RegistryLock;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// When a handle re-reads its layer files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Autoload {
    /// Only on an explicit [`RegistryHandle::load`].
    #[default]
    Manual,
    /// On first access, then never again.
    Once,
    /// Before every read, except inside a [`View`].
    Always,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::ReadOnly {}
    impl Sealed for super::ReadWrite {}
}

/// Access mode marker.
pub trait Access: sealed::Sealed + Send + Sync + 'static {}

#[derive(Debug)]
pub struct ReadOnly;

#[derive(Debug)]
pub struct ReadWrite;

impl Access for ReadOnly {}
impl Access for ReadWrite {}

#[derive(Debug)]
struct State {
    registry: LayeredRegistry,
    loaded: bool,
    views: usize,
    /// Write-layer values as last read from or written to disk.
    baseline: LayerValues,
    /// Unsaved mutations; `None` is a delete.
    pending: BTreeMap<String, Option<String>>,
}

impl State {
    fn reload(&mut self) -> Result<()> {
        self.registry.load()?;
        self.baseline = self.registry.write_values().clone();
        let values = self.registry.write_values_mut();
        for (key, intent) in &self.pending {
            match intent {
                Some(value) => {
                    values.insert(key.clone(), value.clone());
                }
                None => {
                    values.remove(key);
                }
            }
        }
        self.loaded = true;
        Ok(())
    }

    fn is_stale(&self, autoload: Autoload) -> bool {
        match autoload {
            Autoload::Manual => false,
            Autoload::Once => !self.loaded,
            Autoload::Always => !self.loaded || self.views == 0,
        }
    }
}

#[derive(Debug)]
pub struct RegistryHandle<A: Access = ReadOnly> {
    state: Mutex<State>,
    autoload: Autoload,
    _access: PhantomData<A>,
}

impl RegistryHandle<ReadOnly> {
    pub fn read_only(settings: &Settings, autoload: Autoload) -> Result<Self> {
        Ok(Self::new(settings.registry(None)?, autoload))
    }
}

impl RegistryHandle<ReadWrite> {
    /// Writable handle targeting `write_layer`, or the default write layer.
    pub fn writable(settings: &Settings, write_layer: Option<&str>, autoload: Autoload) -> Result<Self> {
        Ok(Self::new(settings.registry(write_layer)?, autoload))
    }
}

impl<A: Access> RegistryHandle<A> {
    pub fn new(registry: LayeredRegistry, autoload: Autoload) -> Self {
        Self {
            state: Mutex::new(State {
                registry,
                loaded: false,
                views: 0,
                baseline: LayerValues::new(),
                pending: BTreeMap::new(),
            }),
            autoload,
            _access: PhantomData,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refreshed(&self) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state();
        if state.is_stale(self.autoload) {
            state.reload()?;
        }
        Ok(state)
    }

    pub fn autoload(&self) -> Autoload {
        self.autoload
    }

    /// Re-read every layer now.
    pub fn load(&self) -> Result<()> {
        self.state().reload()
    }

    pub fn is_loaded(&self) -> bool {
        self.state().loaded
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.refreshed()?.registry.get(key).map(str::to_string))
    }

    pub fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get(key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn get_scoped(&self, key: &str) -> Result<Option<ScopedValue>> {
        let state = self.refreshed()?;
        Ok(state.registry.get_scoped(key).map(|(layer, value)| ScopedValue {
            layer: layer.to_string(),
            value: value.to_string(),
        }))
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.refreshed()?.registry.contains_key(key))
    }

    /// Resolved pairs sorted by key.
    pub fn items(&self) -> Result<Vec<(String, String)>> {
        let state = self.refreshed()?;
        Ok(state
            .registry
            .items()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let state = self.refreshed()?;
        Ok(state.registry.keys().into_iter().map(str::to_string).collect())
    }

    pub fn is_true(&self, key: &str) -> Result<bool> {
        Ok(self.snapshot()?.is_true(key))
    }

    pub fn is_false(&self, key: &str) -> Result<bool> {
        Ok(self.snapshot()?.is_false(key))
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::of(&self.refreshed()?.registry))
    }

    /// Enter a scoped view: reload once on entry, then suppress reloads
    /// until every view is dropped.
    pub fn view(&self) -> Result<View<'_, A>> {
        let mut state = self.refreshed()?;
        state.views += 1;
        let snapshot = Snapshot::of(&state.registry);
        drop(state);
        Ok(View {
            handle: self,
            snapshot,
        })
    }

    pub fn write_layer(&self) -> String {
        self.state().registry.write_layer().to_string()
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.state()
            .registry
            .layer_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Name of a layer above the write target that shadows `key`.
    pub fn shadowed_by(&self, key: &str) -> Result<Option<String>> {
        let state = self.refreshed()?;
        Ok(state.registry.shadowed_by(key).map(str::to_string))
    }
}

impl RegistryHandle<ReadWrite> {
    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set `key` in the write-target layer. Not persisted until [`save`](Self::save).
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let state = self.state_mut();
        state.registry.set(key, value)?;
        state.pending.insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    /// Remove `key` from the write-target layer and return its value there.
    pub fn delete(&mut self, key: &str) -> Result<String> {
        let autoload = self.autoload;
        let state = self.state_mut();
        if state.is_stale(autoload) {
            state.reload()?;
        }
        let old = state.registry.delete(key)?;
        state.pending.insert(key.to_string(), None);
        Ok(old)
    }

    /// Value held by the write-target layer itself.
    pub fn write_layer_value(&mut self, key: &str) -> Option<String> {
        self.state_mut()
            .registry
            .write_layer_value(key)
            .map(str::to_string)
    }

    pub fn is_dirty(&self) -> bool {
        !self.state().pending.is_empty()
    }

    /// Drop unsaved mutations.
    pub fn discard(&mut self) {
        let state = self.state_mut();
        state.pending.clear();
        *state.registry.write_values_mut() = state.baseline.clone();
    }

    /// Persist the write-target layer and report what changed.
    ///
    /// Keys whose write-layer value ends up equal to what was on disk are
    /// left out of the change set. A handle that was never loaded reads the
    /// layers first, so unrelated keys on disk survive the save.
    pub fn save(&mut self) -> Result<ChangeSet> {
        let state = self.state_mut();
        if state.pending.is_empty() {
            return Ok(ChangeSet::new());
        }
        if !state.loaded {
            state.reload()?;
        }

        state.registry.save()?;

        let mut changes = ChangeSet::new();
        for key in state.pending.keys() {
            let before = state.baseline.get(key).map(String::as_str);
            if before == state.registry.write_layer_value(key) {
                continue;
            }
            let old = state.registry.resolve_with(&state.baseline, key);
            let new = state.registry.get(key).map(str::to_string);
            changes.record(key.clone(), old, new);
        }

        state.baseline = state.registry.write_values().clone();
        state.pending.clear();
        tracing::debug!(
            layer = state.registry.write_layer(),
            changed = changes.len(),
            "Registry saved"
        );
        Ok(changes)
    }

    /// Exclusive lock on the write-target layer for `load; mutate; save`.
    pub fn lock(&self) -> Result<RegistryLock> {
        self.state().registry.write_store().lock()
    }
}

/// Scoped view returned by [`RegistryHandle::view`].
///
/// While any view is alive, `Always` handles do not reload. Reads through
/// the view see the snapshot taken on entry.
#[derive(Debug)]
pub struct View<'a, A: Access> {
    handle: &'a RegistryHandle<A>,
    snapshot: Snapshot,
}

impl<A: Access> View<'_, A> {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.snapshot.get(key)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn handle(&self) -> &RegistryHandle<A> {
        self.handle
    }
}

impl<A: Access> Drop for View<'_, A> {
    fn drop(&mut self) {
        let mut state = self.handle.state();
        state.views = state.views.saturating_sub(1);
    }
}

static SHARED: OnceLock<RegistryHandle<ReadOnly>> = OnceLock::new();
static LIVE: OnceLock<RegistryHandle<ReadOnly>> = OnceLock::new();

/// Process-wide read-only handle that loads once.
pub fn shared() -> Result<&'static RegistryHandle<ReadOnly>> {
    global(&SHARED, Autoload::Once)
}

/// Process-wide read-only handle that reloads on every read.
pub fn live() -> Result<&'static RegistryHandle<ReadOnly>> {
    global(&LIVE, Autoload::Always)
}

fn global(
    cell: &'static OnceLock<RegistryHandle<ReadOnly>>,
    autoload: Autoload,
) -> Result<&'static RegistryHandle<ReadOnly>> {
    if let Some(handle) = cell.get() {
        return Ok(handle);
    }
    let handle = RegistryHandle::read_only(&Settings::from_env()?, autoload)?;
    Ok(cell.get_or_init(|| handle))
}
