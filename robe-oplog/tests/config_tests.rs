// Configuration Tests
// Defaults, YAML loading and validation

use robe_oplog::{PrimarySelection, RobeConfig, TailOptions, WatcherConfig};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_config_default_values() {
    let config = RobeConfig::default();

    // Watcher defaults
    assert_eq!(config.watcher.database, None);
    assert_eq!(config.watcher.reconnect_delay_ms, 1000);
    assert_eq!(config.watcher.primary_selection, PrimarySelection::Strict);
    assert_eq!(config.watcher.signal_capacity, 64);

    // Cursor defaults
    assert!(config.watcher.cursor.await_data);
    assert!(config.watcher.cursor.no_cursor_timeout);
    assert!(config.watcher.cursor.oplog_replay);
    assert_eq!(config.watcher.cursor.max_read_retries, None);

    // Logging defaults
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn test_config_from_file() {
    let file = write_config(
        r#"
watcher:
  database: shop
  reconnect_delay_ms: 250
  primary_selection: first_match
  cursor:
    await_data: false
    max_read_retries: 5
logging:
  level: debug
  format: pretty
"#,
    );

    let config = RobeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.watcher.database.as_deref(), Some("shop"));
    assert_eq!(config.watcher.reconnect_delay(), Duration::from_millis(250));
    assert_eq!(
        config.watcher.primary_selection,
        PrimarySelection::FirstMatch
    );
    assert!(!config.watcher.cursor.await_data);
    // Unset fields keep their defaults
    assert!(config.watcher.cursor.oplog_replay);
    assert_eq!(config.watcher.cursor.max_read_retries, Some(5));
    assert_eq!(config.watcher.signal_capacity, 64);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "pretty");
}

#[test]
fn test_empty_file_uses_defaults() {
    let file = write_config("{}\n");
    let config = RobeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.watcher, WatcherConfig::default());
}

#[test]
fn test_invalid_values_rejected() {
    let file = write_config("watcher:\n  reconnect_delay_ms: 0\n");
    assert!(RobeConfig::from_file(file.path()).is_err());

    let file = write_config("watcher:\n  database: \"shop.orders\"\n");
    assert!(RobeConfig::from_file(file.path()).is_err());

    let file = write_config("watcher:\n  primary_selection: random\n");
    assert!(RobeConfig::from_file(file.path()).is_err());
}

#[test]
fn test_missing_file() {
    assert!(RobeConfig::from_file("/nonexistent/robe.yml").is_err());
}

#[test]
fn test_cursor_options_follow_config() {
    let mut config = WatcherConfig::default();
    config.cursor.await_data = false;
    config.cursor.max_read_retries = Some(3);

    let options = TailOptions::from(&config.cursor);
    assert!(options.tailable);
    assert!(!options.await_data);
    assert!(options.no_cursor_timeout);
    assert!(options.oplog_replay);
    assert_eq!(options.max_read_retries, Some(3));
}

#[test]
fn test_config_yaml_round_trip() {
    let config = WatcherConfig::for_database("shop");
    let yaml = serde_yaml::to_string(&config).unwrap();
    assert!(yaml.contains("database: shop"));
    assert!(yaml.contains("primary_selection: strict"));
}
