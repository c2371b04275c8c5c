//! Precedence resolution over an ordered list of layers
//!
//! Reads resolve through every layer, highest precedence first. Writes only
//! ever touch the single write-target layer; a value written there may be
//! shadowed by a higher layer and then does not change the resolved view.

use crate::error::{Error, Result};
use crate::key::{validate_key, validate_value};
use crate::layer::{LayerStore, LayerValues};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Layer {
    name: String,
    store: LayerStore,
    values: LayerValues,
}

/// A resolved value together with the layer it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedValue {
    pub layer: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct LayeredRegistry {
    layers: Vec<Layer>,
    write_target: usize,
}

impl LayeredRegistry {
    /// `layers` must be in precedence order, highest first.
    pub fn new(layers: Vec<(String, LayerStore)>, write_layer: &str) -> Result<Self> {
        let write_target = layers
            .iter()
            .position(|(name, _)| name == write_layer)
            .ok_or_else(|| Error::UnknownLayer {
                name: write_layer.to_string(),
            })?;
        let layers = layers
            .into_iter()
            .map(|(name, store)| Layer {
                name,
                store,
                values: LayerValues::new(),
            })
            .collect();
        Ok(Self {
            layers,
            write_target,
        })
    }

    /// Re-read every layer from disk.
    ///
    /// On error the in-memory values are left untouched.
    pub fn load(&mut self) -> Result<()> {
        let fresh = self
            .layers
            .iter()
            .map(|layer| layer.store.read())
            .collect::<Result<Vec<_>>>()?;
        for (layer, values) in self.layers.iter_mut().zip(fresh) {
            layer.values = values;
        }
        tracing::trace!(layers = self.layers.len(), "Registry loaded");
        Ok(())
    }

    /// Persist the write-target layer.
    pub fn save(&self) -> Result<()> {
        let target = &self.layers[self.write_target];
        target.store.write(&target.values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_scoped(key).map(|(_, value)| value)
    }

    /// Resolved value and the name of the layer that supplied it.
    pub fn get_scoped(&self, key: &str) -> Option<(&str, &str)> {
        self.layers.iter().find_map(|layer| {
            layer
                .values
                .get(key)
                .map(|value| (layer.name.as_str(), value.as_str()))
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.layers.iter().any(|layer| layer.values.contains_key(key))
    }

    /// Value stored in the write-target layer only.
    pub fn write_layer_value(&self, key: &str) -> Option<&str> {
        self.write_values().get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        validate_value(key, value)?;
        self.write_values_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Remove `key` from the write-target layer and return the removed value.
    pub fn delete(&mut self, key: &str) -> Result<String> {
        let layer = self.write_layer().to_string();
        self.write_values_mut()
            .remove(key)
            .ok_or_else(|| Error::KeyNotInLayer {
                key: key.to_string(),
                layer,
            })
    }

    /// Resolved view, sorted by key.
    pub fn items(&self) -> BTreeMap<&str, &str> {
        let mut merged = BTreeMap::new();
        for layer in self.layers.iter().rev() {
            for (key, value) in &layer.values {
                merged.insert(key.as_str(), value.as_str());
            }
        }
        merged
    }

    pub fn keys(&self) -> Vec<&str> {
        self.items().into_keys().collect()
    }

    /// Resolved view with the supplying layer of every key.
    pub fn resolved(&self) -> BTreeMap<String, ScopedValue> {
        let mut merged = BTreeMap::new();
        for layer in self.layers.iter().rev() {
            for (key, value) in &layer.values {
                merged.insert(
                    key.clone(),
                    ScopedValue {
                        layer: layer.name.clone(),
                        value: value.clone(),
                    },
                );
            }
        }
        merged
    }

    /// What `get(key)` would return if the write-target layer held `write_values`.
    pub fn resolve_with(&self, write_values: &LayerValues, key: &str) -> Option<String> {
        self.layers.iter().enumerate().find_map(|(index, layer)| {
            let values = if index == self.write_target {
                write_values
            } else {
                &layer.values
            };
            values.get(key).cloned()
        })
    }

    /// Name of the highest layer above the write target that holds `key`.
    pub fn shadowed_by(&self, key: &str) -> Option<&str> {
        self.layers[..self.write_target]
            .iter()
            .find(|layer| layer.values.contains_key(key))
            .map(|layer| layer.name.as_str())
    }

    pub fn write_layer(&self) -> &str {
        &self.layers[self.write_target].name
    }

    pub fn write_store(&self) -> &LayerStore {
        &self.layers[self.write_target].store
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name.as_str()).collect()
    }

    pub fn write_values(&self) -> &LayerValues {
        &self.layers[self.write_target].values
    }

    pub(crate) fn write_values_mut(&mut self) -> &mut LayerValues {
        &mut self.layers[self.write_target].values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    fn registry_in(dir: &Path, write_layer: &str) -> LayeredRegistry {
        let layers = ["forced", "ldap", "normal"]
            .into_iter()
            .map(|name| {
                let store = LayerStore::new(dir.join(format!("{name}.conf")));
                (name.to_string(), store)
            })
            .collect();
        LayeredRegistry::new(layers, write_layer).unwrap()
    }

    fn seeded() -> (TempDir, LayeredRegistry) {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("forced.conf"), "a: forced\n").unwrap();
        std::fs::write(dir.path().join("ldap.conf"), "a: ldap\nb: ldap\n").unwrap();
        std::fs::write(dir.path().join("normal.conf"), "a: normal\nc: normal\n").unwrap();
        let mut registry = registry_in(dir.path(), "normal");
        registry.load().unwrap();
        (dir, registry)
    }

    #[test]
    fn highest_layer_wins() {
        let (_dir, registry) = seeded();
        assert_eq!(registry.get_scoped("a"), Some(("forced", "forced")));
        assert_eq!(registry.get_scoped("b"), Some(("ldap", "ldap")));
        assert_eq!(registry.get("c"), Some("normal"));
        assert_eq!(registry.get("missing"), None);
    }

    #[test]
    fn items_are_resolved_and_sorted() {
        let (_dir, registry) = seeded();
        let items: Vec<_> = registry.items().into_iter().collect();
        assert_eq!(items, vec![("a", "forced"), ("b", "ldap"), ("c", "normal")]);
    }

    #[test]
    fn shadowed_write_does_not_change_resolved_value() {
        let (_dir, mut registry) = seeded();
        registry.set("a", "mine").unwrap();
        assert_eq!(registry.get("a"), Some("forced"));
        assert_eq!(registry.write_layer_value("a"), Some("mine"));
        assert_eq!(registry.shadowed_by("a"), Some("forced"));
    }

    #[test]
    fn delete_only_touches_write_layer() {
        let (_dir, mut registry) = seeded();
        assert_eq!(registry.delete("c").unwrap(), "normal");
        assert!(matches!(
            registry.delete("b"),
            Err(Error::KeyNotInLayer { .. })
        ));
        assert_eq!(registry.get("b"), Some("ldap"));
    }

    #[test]
    fn save_persists_only_write_layer() {
        let (dir, mut registry) = seeded();
        registry.set("d", "new").unwrap();
        registry.save().unwrap();

        let mut reread = registry_in(dir.path(), "normal");
        reread.load().unwrap();
        assert_eq!(reread.get("d"), Some("new"));
        let forced = std::fs::read_to_string(dir.path().join("forced.conf")).unwrap();
        assert_eq!(forced, "a: forced\n");
    }

    #[test]
    fn failed_load_keeps_previous_values() {
        let (dir, mut registry) = seeded();
        std::fs::write(dir.path().join("ldap.conf"), "broken line\n").unwrap();
        assert!(matches!(registry.load(), Err(Error::CorruptLayer { .. })));
        assert_eq!(registry.get("b"), Some("ldap"));
    }

    #[test]
    fn unknown_write_layer_is_rejected() {
        let dir = tempdir().unwrap();
        let layers = vec![("normal".to_string(), LayerStore::new(dir.path().join("n")))];
        assert!(matches!(
            LayeredRegistry::new(layers, "schedule"),
            Err(Error::UnknownLayer { .. })
        ));
    }

    #[test]
    fn resolve_with_substitutes_write_layer() {
        let (_dir, registry) = seeded();
        let empty = LayerValues::new();
        assert_eq!(registry.resolve_with(&empty, "c"), None);
        assert_eq!(registry.resolve_with(&empty, "a"), Some("forced".to_string()));
    }

    #[test]
    fn set_validates_key_and_value() {
        let (_dir, mut registry) = seeded();
        assert!(registry.set("bad=key", "v").is_err());
        assert!(registry.set("good", "two\nlines").is_err());
    }
}
