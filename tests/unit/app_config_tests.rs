/*!
 * Tests for configuration loading and validation
 */

use anyhow::Result;
use std::time::Duration;

use kanjigloss::app_config::{Config, GeneralConfig, LogLevel};

use crate::common;

#[test]
fn test_default_config_shouldValidate() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.performance.batch_size, 50);
    assert_eq!(config.cache.file_name, "api_cache.json");
    assert_eq!(config.log_level, LogLevel::Info);
}

#[test]
fn test_validate_withZeroWorkers_shouldFail() {
    let mut config = Config::default();
    config.performance.api_workers = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.performance.parallel_workers = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.performance.batch_size = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withInvalidBaseUrl_shouldFail() {
    let mut config = Config::default();
    config.services.meaning.base_url = "not a url".to_string();
    let error = config.validate().unwrap_err();
    assert!(error.to_string().contains("meaning"));
}

#[test]
fn test_validate_withUnknownTemplateVariable_shouldFail() {
    let mut config = Config::default();
    config.templates.kana_entry = "<li>{kana} {kanji}</li>".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_skips_existing_content_withForceOverwrite_shouldPreferOverwrite() {
    let mut general = GeneralConfig::default();
    assert!(!general.skips_existing_content());

    general.ignore_existing = true;
    assert!(general.skips_existing_content());

    general.force_overwrite = true;
    assert!(!general.skips_existing_content());
}

#[test]
fn test_save_interval_withZeroOrDisabled_shouldBeNone() {
    let mut config = Config::default();
    assert_eq!(config.cache.save_interval(), Some(Duration::from_secs(15 * 60)));

    config.cache.save_interval_min = 0;
    assert_eq!(config.cache.save_interval(), None);

    config.cache.save_interval_min = 5;
    config.cache.enabled = false;
    assert_eq!(config.cache.save_interval(), None);
}

#[test]
fn test_load_or_create_withMissingFile_shouldWriteDefaults() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("glossary.json");

    let config = Config::load_or_create(&path)?;
    assert!(path.exists());
    assert_eq!(config.performance.batch_size, Config::default().performance.batch_size);

    let reloaded = Config::load_or_create(&path)?;
    assert_eq!(reloaded.general, config.general);
    assert_eq!(reloaded.templates, config.templates);
    Ok(())
}

#[test]
fn test_load_or_create_withPartialFile_shouldFillDefaults() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("glossary.json");
    std::fs::write(
        &path,
        r#"{ "general": { "include_meanings": false }, "performance": { "batch_size": 7 }, "log_level": "debug" }"#,
    )?;

    let config = Config::load_or_create(&path)?;
    assert!(!config.general.include_meanings);
    assert!(config.general.include_kanji);
    assert_eq!(config.performance.batch_size, 7);
    assert_eq!(config.performance.api_workers, 2);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert!(config.validate().is_ok());
    Ok(())
}

#[test]
fn test_load_or_create_withInvalidJson_shouldFail() -> Result<()> {
    let dir = common::create_temp_dir()?;
    let path = dir.path().join("glossary.json");
    std::fs::write(&path, "{ not json")?;
    assert!(Config::load_or_create(&path).is_err());
    Ok(())
}
