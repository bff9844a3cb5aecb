//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;
use tracing::Level;
use wirekit::config::{CompressionMode, WireConfig, MAX_FRAME_SIZE};
use wirekit::error::ProtocolError;
use wirekit::storage::StorageTree;

#[test]
fn test_default_config_validates() {
    let config = WireConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_invalid_server_address() {
    let mut config = WireConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_zero_max_connections() {
    let mut config = WireConfig::default();
    config.server.max_connections = 0;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max connections")));
}

#[test]
fn test_zstd_level_range() {
    let mut config = WireConfig::default();
    config.transport.compression = CompressionMode::Zstd;
    config.transport.compression_level = 40;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("compression level")));

    // LZ4 ignores the level.
    config.transport.compression = CompressionMode::Lz4;
    assert!(config.validate().is_empty());
}

#[test]
fn test_tiny_frame_limit_rejected() {
    let mut config = WireConfig::default();
    config.transport.max_frame_size = 8;
    assert!(!config.validate().is_empty());
}

#[test]
fn test_client_timeout_bounds() {
    let mut config = WireConfig::default();
    config.client.connection_timeout = Duration::from_millis(10);
    assert!(config.validate().iter().any(|e| e.contains("too short")));
}

#[test]
fn test_validate_strict_collects_every_problem() {
    let mut config = WireConfig::default();
    config.server.address = String::new();
    config.logging.app_name = String::new();

    match config.validate_strict() {
        Err(ProtocolError::ConfigError(msg)) => {
            assert!(msg.contains("Server address cannot be empty"));
            assert!(msg.contains("Application name cannot be empty"));
        }
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = WireConfig::from_toml(
        r#"
        [transport]
        compression = "zstd"
        compression_level = 5

        [storage]
        compression = "lz4"

        [server]
        address = "0.0.0.0:7500"
        shutdown_timeout = 2500

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("valid TOML");

    assert_eq!(config.transport.compression, CompressionMode::Zstd);
    assert_eq!(config.transport.compression_level, 5);
    assert_eq!(config.transport.max_frame_size, MAX_FRAME_SIZE);
    assert_eq!(config.storage.compression, CompressionMode::Lz4);
    assert_eq!(config.server.address, "0.0.0.0:7500");
    assert_eq!(config.server.shutdown_timeout, Duration::from_millis(2500));
    assert_eq!(config.server.max_connections, 1000);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.validate().is_empty());
}

#[test]
fn test_malformed_toml() {
    assert!(matches!(
        WireConfig::from_toml("[transport]\ncompression = \"brotli\""),
        Err(ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wirekit.toml");

    let mut config = WireConfig::default();
    config.storage.compression = CompressionMode::Zstd;
    config.save_to_file(&path).unwrap();

    let loaded = WireConfig::from_file(&path).unwrap();
    assert_eq!(loaded.storage.compression, CompressionMode::Zstd);
    assert!(WireConfig::from_file(dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_storage_config_drives_tree_formatter() {
    let mut config = WireConfig::default();
    config.storage.compression = CompressionMode::Lz4;

    let mut tree = StorageTree::from_config(&config.storage);
    tree.set_value(&["a"], "x".repeat(256)).unwrap();
    let blob = tree.to_bytes().unwrap();
    assert!(blob.len() < 256);

    let mut loaded = StorageTree::from_config(&config.storage);
    loaded.load_bytes(&blob).unwrap();
    assert_eq!(loaded, tree);
}
