use kiln_config::{ConfigError, KilnConfig, ScopeKind};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn empty_file_yields_defaults() {
    let config = KilnConfig::load_from_str("").expect("empty config should parse");
    assert_eq!(config, KilnConfig::default());
    assert_eq!(config.bridge.source_root_marker, "script-python");
    assert_eq!(config.bridge.entry_filename, "code.py");
    assert_eq!(config.bridge.default_scope, ScopeKind::Gateway);
    assert_eq!(config.remote.request_timeout(), Some(Duration::from_secs(30)));
}

#[test]
fn sections_override_individual_fields() {
    let text = r#"
[logging]
level = "debug"
json = true

[remote]
address = "10.0.0.5:9000"
request_timeout_ms = 0

[bridge]
default_scope = "designer"
"#;

    let config = KilnConfig::load_from_str(text).expect("config should parse");
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
    assert_eq!(config.remote.address, "10.0.0.5:9000");
    assert_eq!(config.remote.request_timeout(), None);
    assert_eq!(config.remote.connect_timeout(), Duration::from_secs(5));
    assert_eq!(config.bridge.default_scope, ScopeKind::Designer);
    assert_eq!(config.bridge.entry_filename, "code.py");
}

#[test]
fn unknown_keys_are_rejected() {
    let err = KilnConfig::load_from_str("[bridge]\nsource_root = \"x\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err:?}");
}

#[test]
fn load_from_path_reports_missing_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("kiln.toml");
    let err = KilnConfig::load_from_path(&missing).unwrap_err();
    match err {
        ConfigError::Io { path, .. } => assert!(path.ends_with("kiln.toml"), "{path}"),
        other => panic!("expected io error, got {other:?}"),
    }
}

#[test]
fn load_from_path_reads_toml() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("kiln.toml");
    std::fs::write(&path, "[remote]\naddress = \"localhost:1234\"\n").expect("write config");

    let config = KilnConfig::load_from_path(&path).expect("config should load");
    assert_eq!(config.remote.address, "localhost:1234");
}
