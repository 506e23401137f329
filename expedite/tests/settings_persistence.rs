use expedite::{Configuration, Offset, Settings, SettingsStore, UiPreferences};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn store(dir: &TempDir) -> SettingsStore {
    SettingsStore::new(dir.path().join("ExpeditedAccess").join("settings.json"))
}

#[test]
fn test_missing_file_loads_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = store(&dir).load();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_round_trip_creates_directories() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = store(&dir);

    let mut settings = Settings::default();
    settings.config.key_delay = Duration::from_millis(125);
    settings.config.field_offset = Offset::new(900, 400);
    settings.ui.show_setup_reminder = false;
    store.save(&settings)?;

    assert!(store.path().exists());
    assert_eq!(store.load(), settings);

    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(store.path())?)?;
    assert_eq!(raw["key_delay"], serde_json::json!(0.125));
    assert_eq!(raw["field_offset"], serde_json::json!([900, 400]));
    assert_eq!(raw["ui"]["show_setup_reminder"], serde_json::json!(false));
    Ok(())
}

#[test]
fn test_malformed_file_falls_back_to_defaults() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = store(&dir);
    fs::create_dir_all(store.path().parent().unwrap())?;
    fs::write(store.path(), "{ not json")?;
    assert_eq!(store.load(), Settings::default());

    // Valid JSON with an invalid value is treated the same way.
    fs::write(store.path(), r#"{"primary_action_offset": [-1, 5]}"#)?;
    assert_eq!(store.load(), Settings::default());
    Ok(())
}

#[test]
fn test_oversized_delays_fall_back_to_defaults() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = store(&dir);
    fs::create_dir_all(store.path().parent().unwrap())?;

    // Too large for a Duration at all
    fs::write(store.path(), r#"{"key_delay": 1e30}"#)?;
    assert_eq!(store.load(), Settings::default());

    // Representable, but would overflow once multiplied or added to a deadline
    fs::write(store.path(), r#"{"key_delay": 1e19}"#)?;
    assert_eq!(store.load(), Settings::default());
    fs::write(store.path(), r#"{"timing": {"recovery_timeout": 1e12}}"#)?;
    assert_eq!(store.load(), Settings::default());
    Ok(())
}

#[test]
fn test_unknown_keys_survive_save() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = store(&dir);
    fs::create_dir_all(store.path().parent().unwrap())?;
    fs::write(
        store.path(),
        r#"{"window_theme": "dark", "ui": {"last_tab": 2, "show_setup_reminder": true}}"#,
    )?;

    store.save_ui(&UiPreferences {
        show_setup_reminder: false,
    })?;

    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(store.path())?)?;
    assert_eq!(raw["window_theme"], serde_json::json!("dark"));
    assert_eq!(raw["ui"]["last_tab"], serde_json::json!(2));
    assert_eq!(raw["ui"]["show_setup_reminder"], serde_json::json!(false));
    assert!(!store.load().ui.show_setup_reminder);
    Ok(())
}

#[test]
fn test_invalid_configuration_is_not_saved() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let mut config = Configuration::default();
    config.secondary_tab_offset = Offset::new(10, 0);
    assert!(store.save_config(&config).is_err());
    assert!(!store.path().exists());
}
