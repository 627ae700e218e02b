use super::*;
use crate::services::ports::search::SearchError;
use tempfile::tempdir;

#[test]
fn test_get_settings_path() {
    let path = get_settings_path().unwrap();
    assert!(path.ends_with(Path::new(SETTINGS_DIR).join(SETTINGS_FILE)));
}

#[test]
fn test_write_default_settings_creates_parents() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join(SETTINGS_FILE);

    write_default_settings(&path).unwrap();
    assert!(path.exists());
    assert_eq!(load_settings_from(&path).unwrap(), Settings::default());
}

#[test]
fn test_write_default_settings_keeps_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(SETTINGS_FILE);
    std::fs::write(&path, r#"{"search":{"max_concurrent":2}}"#).unwrap();

    write_default_settings(&path).unwrap();
    let settings = load_settings_from(&path).unwrap();
    assert_eq!(settings.search.max_concurrent, 2);
    assert_eq!(settings.search.batch_size, 40);
}

#[test]
fn test_empty_object_loads_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(SETTINGS_FILE);
    std::fs::write(&path, "{}").unwrap();

    assert_eq!(load_settings_from(&path).unwrap(), Settings::default());
}

#[test]
fn test_load_settings_from_reports_errors() {
    let dir = tempdir().unwrap();

    let missing = load_settings_from(&dir.path().join("missing.json"));
    assert!(matches!(missing, Err(SearchError::Io(_))));

    let path = dir.path().join(SETTINGS_FILE);
    std::fs::write(&path, "{ not json").unwrap();
    let invalid = load_settings_from(&path);
    assert!(matches!(invalid, Err(SearchError::Settings(_))));
}
