//! Where the registry lives and how it behaves
//!
//! Settings are read from a TOML or JSON file through [`ConfigStore`] and
//! then adjusted from the environment:
//!
//! | Variable            | Effect                                           |
//! |---------------------|--------------------------------------------------|
//! | `CONFREG_SETTINGS`  | settings file to load instead of the defaults    |
//! | `CONFREG_ROOT`      | directory relative layer files are resolved in   |
//! | `CONFREG_BASECONF`  | single custom file; replaces all layers          |
//! | `CONFREG_CACHE`     | handler index cache file                         |

use crate::error::{Error, Result};
use crate::layer::LayerStore;
use crate::registry::LayeredRegistry;
use confreg_fs::{ConfigStore, RobustnessConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_SETTINGS: &str = "CONFREG_SETTINGS";
pub const ENV_ROOT: &str = "CONFREG_ROOT";
pub const ENV_BASECONF: &str = "CONFREG_BASECONF";
pub const ENV_CACHE: &str = "CONFREG_CACHE";

/// Well-known layer names.
pub mod layers {
    pub const FORCED: &str = "forced";
    pub const SCHEDULE: &str = "schedule";
    pub const LDAP: &str = "ldap";
    pub const NORMAL: &str = "normal";
    /// The only layer in single-file mode.
    pub const CUSTOM: &str = "custom";
}

/// A named layer and the file that stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub file: PathBuf,
}

impl LayerSpec {
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory relative layer files are resolved against.
    pub root: PathBuf,
    /// Layers in precedence order, highest first.
    pub layers: Vec<LayerSpec>,
    pub default_write_layer: String,
    /// When set, the registry consists of this single file.
    pub custom_file: Option<PathBuf>,
    /// Holds the `info/`, `files/` and `scripts/` directories.
    pub templates_dir: PathBuf,
    /// Generated files are written below this directory.
    pub target_root: PathBuf,
    pub cache_file: PathBuf,
    pub replog_file: PathBuf,
    /// Handler kinds in dispatch order.
    pub handler_order: Vec<String>,
    pub lock_timeout_ms: u64,
    pub fsync: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/etc/confreg"),
            layers: default_layers(),
            default_write_layer: layers::NORMAL.to_string(),
            custom_file: None,
            templates_dir: PathBuf::from("/etc/confreg/templates"),
            target_root: PathBuf::from("/"),
            cache_file: PathBuf::from("/var/cache/confreg/handlers.json"),
            replog_file: PathBuf::from("/var/log/confreg/replog"),
            handler_order: ["file", "multifile", "module", "script"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            lock_timeout_ms: 10_000,
            fsync: true,
        }
    }
}

fn default_layers() -> Vec<LayerSpec> {
    vec![
        LayerSpec::new(layers::FORCED, "base-forced.conf"),
        LayerSpec::new(layers::SCHEDULE, "base-schedule.conf"),
        LayerSpec::new(layers::LDAP, "base-ldap.conf"),
        LayerSpec::new(layers::NORMAL, "base.conf"),
    ]
}

impl Settings {
    /// Default layout with every path placed under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            templates_dir: root.join("templates"),
            target_root: root.join("target"),
            cache_file: root.join("cache").join("handlers.json"),
            replog_file: root.join("log").join("replog"),
            root,
            ..Self::default()
        }
    }

    /// Load settings from a file; keys missing from it keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let settings: Self = ConfigStore::new().load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings for the current process, honouring the `CONFREG_*` variables.
    pub fn from_env() -> Result<Self> {
        let lookup = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let mut settings = match lookup(ENV_SETTINGS) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        settings.apply_env_overrides(lookup);
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `CONFREG_ROOT`, `CONFREG_BASECONF` and `CONFREG_CACHE` from `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup(ENV_ROOT) {
            self.root = PathBuf::from(root);
        }
        if let Some(file) = lookup(ENV_BASECONF) {
            self.custom_file = Some(PathBuf::from(file));
        }
        if let Some(cache) = lookup(ENV_CACHE) {
            self.cache_file = PathBuf::from(cache);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let cache_format = self.cache_file.extension().and_then(|e| e.to_str());
        if !matches!(cache_format, Some("json" | "toml")) {
            return Err(invalid(format!(
                "cache file {} must end in .json or .toml",
                self.cache_file.display()
            )));
        }
        if self.custom_file.is_some() {
            return Ok(());
        }
        if self.layers.is_empty() {
            return Err(invalid("at least one layer is required"));
        }
        let mut seen = HashSet::new();
        for layer in &self.layers {
            if !seen.insert(layer.name.as_str()) {
                return Err(invalid(format!("duplicate layer name {:?}", layer.name)));
            }
        }
        if !seen.contains(self.default_write_layer.as_str()) {
            return Err(invalid(format!(
                "default write layer {:?} is not a configured layer",
                self.default_write_layer
            )));
        }
        Ok(())
    }

    pub fn robustness(&self) -> RobustnessConfig {
        RobustnessConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            enable_fsync: self.fsync,
        }
    }

    /// Layers actually in effect, highest precedence first.
    pub fn effective_layers(&self) -> Vec<LayerSpec> {
        match &self.custom_file {
            Some(file) => vec![LayerSpec::new(layers::CUSTOM, file.clone())],
            None => self.layers.clone(),
        }
    }

    pub fn layer_path(&self, spec: &LayerSpec) -> PathBuf {
        if spec.file.is_absolute() {
            spec.file.clone()
        } else {
            self.root.join(&spec.file)
        }
    }

    /// Build a registry writing to `write_layer`, or the default write layer.
    ///
    /// In single-file mode the custom layer is always the write target.
    pub fn registry(&self, write_layer: Option<&str>) -> Result<LayeredRegistry> {
        self.validate()?;
        let robustness = self.robustness();
        let stores = self
            .effective_layers()
            .into_iter()
            .map(|spec| {
                let store = LayerStore::with_robustness(self.layer_path(&spec), robustness);
                (spec.name, store)
            })
            .collect();
        let target = if self.custom_file.is_some() {
            layers::CUSTOM
        } else {
            write_layer.unwrap_or(&self.default_write_layer)
        };
        LayeredRegistry::new(stores, target)
    }

    pub fn info_dir(&self) -> PathBuf {
        self.templates_dir.join("info")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.templates_dir.join("files")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.templates_dir.join("scripts")
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidSettings {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn default_layer_order() {
        let names: Vec<_> = Settings::default()
            .layers
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["forced", "schedule", "ldap", "normal"]);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            (ENV_ROOT, "/srv/reg"),
            (ENV_BASECONF, "/tmp/custom.conf"),
            (ENV_CACHE, "/tmp/cache.json"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_env_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.root, PathBuf::from("/srv/reg"));
        assert_eq!(settings.custom_file, Some(PathBuf::from("/tmp/custom.conf")));
        assert_eq!(settings.cache_file, PathBuf::from("/tmp/cache.json"));
        assert_eq!(settings.effective_layers().len(), 1);
    }

    #[test]
    fn partial_settings_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("confreg.toml");
        std::fs::write(&path, "root = \"/opt/reg\"\nfsync = false\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.root, PathBuf::from("/opt/reg"));
        assert!(!settings.fsync);
        assert_eq!(settings.default_write_layer, "normal");
    }

    #[test]
    fn rejects_unknown_default_write_layer() {
        let settings = Settings {
            default_write_layer: "missing".into(),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSettings { .. })
        ));
    }

    #[test]
    fn rejects_cache_file_without_a_known_format() {
        let settings = Settings {
            cache_file: PathBuf::from("/var/cache/confreg/handlers.bin"),
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidSettings { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_layer_names() {
        let mut settings = Settings::default();
        settings.layers.push(LayerSpec::new("normal", "other.conf"));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn relative_layer_files_resolve_against_root() {
        let settings = Settings::with_root("/srv/reg");
        let normal = &settings.layers[3];
        assert_eq!(settings.layer_path(normal), PathBuf::from("/srv/reg/base.conf"));

        let absolute = LayerSpec::new("x", "/elsewhere/x.conf");
        assert_eq!(settings.layer_path(&absolute), PathBuf::from("/elsewhere/x.conf"));
    }

    #[test]
    fn custom_file_forces_custom_write_target() {
        let mut settings = Settings::with_root("/srv/reg");
        settings.custom_file = Some(PathBuf::from("/tmp/one.conf"));
        let registry = settings.registry(Some(layers::LDAP)).unwrap();
        assert_eq!(registry.write_layer(), layers::CUSTOM);
    }
}
