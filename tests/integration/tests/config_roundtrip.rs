//! Config save/load roundtrip integration tests.
//!
//! These tests verify that configuration can be serialized, written to disk,
//! and loaded back with identical field values.

use parley_core::config::{BindMode, Config};
use parley_core::error::ConfigError;
use parley_core::SecretString;
use std::path::Path;
use tempfile::TempDir;

#[test]
fn test_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("parley.json5");

    let config = Config::default();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.gateway.port, config.gateway.port);
    assert_eq!(loaded.gateway.bind, config.gateway.bind);
    assert_eq!(loaded.chat.edit_window_secs, config.chat.edit_window_secs);
    assert_eq!(loaded.chat.typing_timeout_ms, config.chat.typing_timeout_ms);
    assert!(loaded.auth.token_secret.is_none());
}

#[test]
fn test_config_modify_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("parley.json5");

    let mut config = Config::default();
    config.gateway.port = 9090;
    config.gateway.bind = BindMode::Lan;
    config.auth.token_secret = Some(SecretString::new("s3cret"));
    config.chat.edit_window_secs = 600;
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.gateway.port, 9090);
    assert_eq!(loaded.gateway.bind, BindMode::Lan);
    assert_eq!(loaded.auth.token_secret, Some(SecretString::new("s3cret")));
    assert_eq!(loaded.chat.edit_window_secs, 600);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_config_load_nonexistent() {
    let result = Config::load(Path::new("/nonexistent/parley.json5"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_with_env(Some(&dir.path().join("absent.json5"))).unwrap();
    assert_eq!(config.chat.max_body_len, Config::default().chat.max_body_len);
}

#[test]
fn test_config_parse_invalid() {
    let result = Config::parse("not valid json");
    assert!(result.is_err());
}

#[test]
fn test_partial_file_keeps_defaults() {
    let config = Config::parse("{ gateway: { port: 4000 }, chat: { typing_timeout_ms: 500 } }").unwrap();
    assert_eq!(config.gateway.port, 4000);
    assert_eq!(config.chat.typing_timeout_ms, 500);
    assert_eq!(
        config.gateway.max_connections,
        Config::default().gateway.max_connections
    );
}
