//! [`TestRegistry`] builder for registry and handler scenarios.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary registry root with layer files, handler descriptors,
/// templates and a target tree.
///
/// ```text
/// <root>/base.conf, base-ldap.conf, ...   layer files
/// <root>/templates/info/*.info            handler descriptors
/// <root>/templates/files/...              templates
/// <root>/templates/scripts/...            scripts
/// <root>/target/...                       generated files
/// ```
///
/// # Example
///
/// ```rust,no_run
/// use confreg_test_utils::TestRegistry;
///
/// let fixture = TestRegistry::new();
/// fixture.write_layer("base.conf", &[("hostname", "master")]);
/// fixture.write_template("etc/hostname", "@%@hostname@%@\n");
/// fixture.write_info("hostname", "Type: file\nFile: etc/hostname\nVariables: hostname\n");
/// ```
pub struct TestRegistry {
    temp_dir: TempDir,
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRegistry {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        for dir in ["templates/info", "templates/files", "templates/scripts", "target"] {
            fs::create_dir_all(temp_dir.path().join(dir)).unwrap();
        }
        Self { temp_dir }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root().join("templates")
    }

    pub fn target_dir(&self) -> PathBuf {
        self.root().join("target")
    }

    /// Write a layer file (relative to the root) holding `pairs`.
    pub fn write_layer(&self, file: &str, pairs: &[(&str, &str)]) {
        let mut content = String::from("# test layer\n\n");
        for (key, value) in pairs {
            content.push_str(&format!("{key}: {value}\n"));
        }
        self.write(file, &content);
    }

    /// Write `templates/info/<package>.info`.
    pub fn write_info(&self, package: &str, content: &str) {
        self.write(&format!("templates/info/{package}.info"), content);
    }

    /// Write `templates/files/<relative>`.
    pub fn write_template(&self, relative: &str, content: &str) {
        self.write(&format!("templates/files/{relative}"), content);
    }

    /// Write `templates/scripts/<relative>` and make it executable.
    pub fn write_script(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.write(&format!("templates/scripts/{relative}"), content);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    /// Write any file below the root, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Read a generated file below `target/`.
    ///
    /// # Panics
    /// Panics if the file does not exist.
    pub fn read_target(&self, relative: &str) -> String {
        let path = self.target_dir().join(relative);
        fs::read_to_string(&path)
            .unwrap_or_else(|_| panic!("Could not read generated file: {}", path.display()))
    }

    pub fn target_exists(&self, relative: &str) -> bool {
        self.target_dir().join(relative).exists()
    }

    /// Read a file below the root, `None` if absent.
    pub fn read(&self, relative: &str) -> Option<String> {
        fs::read_to_string(self.root().join(relative)).ok()
    }

    /// Assert that the layer file `file` contains the line `key: value`.
    ///
    /// # Panics
    /// Panics with the file content when the line is missing.
    pub fn assert_layer_contains(&self, file: &str, key: &str, value: &str) {
        let content = self.read(file).unwrap_or_default();
        let line = format!("{key}: {value}");
        assert!(
            content.lines().any(|l| l == line),
            "Layer {file} does not contain {line:?}.\nActual:\n{content}"
        );
    }
}
