use confreg_fs::{ConfigStore, Error};
use serde::{Deserialize, Serialize};
use std::fs;
use tempfile::TempDir;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TestSettings {
    root: String,
    layers: Vec<String>,
}

fn sample() -> TestSettings {
    TestSettings {
        root: "/etc/confreg".into(),
        layers: vec!["forced".into(), "normal".into()],
    }
}

#[test]
fn test_load_toml() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("settings.toml");
    fs::write(
        &file_path,
        r#"root = "/etc/confreg"
layers = ["forced", "normal"]"#,
    )
    .unwrap();

    let loaded: TestSettings = ConfigStore::new().load(&file_path).unwrap();
    assert_eq!(loaded, sample());
}

#[test]
fn test_save_then_load_json() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("cache.json");

    let store = ConfigStore::new();
    store.save(&file_path, &sample()).unwrap();
    let loaded: TestSettings = store.load(&file_path).unwrap();

    assert_eq!(loaded, sample());
}

#[test]
fn test_load_if_exists_missing_file() {
    let temp = TempDir::new().unwrap();
    let loaded: Option<TestSettings> = ConfigStore::new()
        .load_if_exists(&temp.path().join("absent.toml"))
        .unwrap();
    assert!(loaded.is_none());
}

#[test]
fn test_invalid_toml_reports_parse_error() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("broken.toml");
    fs::write(&file_path, "root = [unterminated").unwrap();

    let result: Result<TestSettings, _> = ConfigStore::new().load(&file_path);
    assert!(matches!(result, Err(Error::ConfigParse { ref format, .. }) if format == "TOML"));
}

#[test]
fn test_unsupported_extension() {
    let temp = TempDir::new().unwrap();
    let file_path = temp.path().join("settings.ini");
    fs::write(&file_path, "root=/").unwrap();

    let result: Result<TestSettings, _> = ConfigStore::new().load(&file_path);
    assert!(matches!(result, Err(Error::UnsupportedFormat { ref extension }) if extension == "ini"));
}
