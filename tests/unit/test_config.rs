//! Unit tests for the config module
//!
//! Tests cover:
//! - Defaults
//! - TOML parsing with partial sections
//! - Validation failures
//! - Derived durations and the format registry

use pixpress::config::Config;
use pixpress::Format;
use std::time::Duration;

#[test]
fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.compression.default_quality, 80);
    assert_eq!(config.compression.max_concurrent_operations, 5);
    assert_eq!(config.compression.max_upload_bytes, 10 * 1024 * 1024);
    assert_eq!(config.ffmpeg.timeout_secs, 120);
    assert!(config.ffmpeg.path.is_empty());
    assert_eq!(config.retention_window(), Duration::from_secs(30 * 60));
    assert_eq!(config.sweep_interval(), Duration::from_secs(10 * 60));
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_toml_keeps_other_defaults() {
    let config: Config = toml::from_str(
        r#"
[compression]
default_quality = 65
allowed_formats = ["jpg", "webp"]

[retention]
retention_minutes = 5
"#,
    )
    .unwrap();

    assert_eq!(config.compression.default_quality, 65);
    assert_eq!(config.compression.max_concurrent_operations, 5);
    assert_eq!(config.retention.sweep_interval_minutes, 10);
    assert_eq!(config.retention_window(), Duration::from_secs(300));
    assert_eq!(
        config.allowed_formats().unwrap(),
        vec![Format::Jpeg, Format::Webp]
    );
}

#[test]
fn test_registry_follows_config() {
    let mut config = Config::default();
    config.compression.allowed_formats = vec!["png".into(), "PNG".into(), "bmp".into()];
    config.compression.default_format = "png".into();

    let registry = config.format_registry().unwrap();
    assert_eq!(registry.allowed(), &[Format::Png, Format::Bmp]);
    assert_eq!(registry.default_format(), Format::Png);
    assert!(!registry.is_supported("jpeg"));
}

#[test]
fn test_validation_rejects_bad_values() {
    let cases: Vec<Box<dyn Fn(&mut Config)>> = vec![
        Box::new(|c: &mut Config| c.compression.default_quality = 0),
        Box::new(|c: &mut Config| c.compression.default_quality = 101),
        Box::new(|c: &mut Config| c.compression.max_concurrent_operations = 0),
        Box::new(|c: &mut Config| c.compression.allowed_formats.clear()),
        Box::new(|c: &mut Config| c.compression.allowed_formats = vec!["gif".into()]),
        Box::new(|c: &mut Config| c.compression.default_format = "tiff".into()),
        Box::new(|c: &mut Config| c.ffmpeg.timeout_secs = 0),
        Box::new(|c: &mut Config| c.retention.sweep_interval_minutes = 0),
        Box::new(|c: &mut Config| c.retention.sweep_interval_minutes = u64::MAX),
        Box::new(|c: &mut Config| c.retention.retention_minutes = u64::MAX),
        Box::new(|c: &mut Config| c.ffmpeg.timeout_secs = u64::MAX),
    ];

    for (i, mutate) in cases.iter().enumerate() {
        let mut config = Config::default();
        mutate(&mut config);
        let err = config.validate().expect_err(&format!("case {} should fail", i));
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}

#[test]
fn test_load_explicit_missing_file_fails() {
    assert!(Config::load(Some("/definitely/not/here/pixpress.toml")).is_err());
}

#[test]
fn test_load_explicit_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "[logging]\nlevel = \"trace\"\njson = true\n").unwrap();

    let config = Config::load(Some(path.to_str().unwrap())).unwrap();
    assert!(config.logging.json);
}
