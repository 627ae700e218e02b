use super::*;

#[test]
fn test_get_log_dir() {
    let dir = get_log_dir();
    assert!(dir.is_some());
    let dir = dir.unwrap();
    assert!(dir.to_string_lossy().contains(APP_NAME));
    assert!(dir.ends_with(LOG_DIR));
}

#[test]
fn test_fallback_log_dir_is_created() {
    let dir = fallback_log_dir().unwrap();
    assert!(dir.is_dir());
    assert!(dir.starts_with(std::env::temp_dir()));
}
