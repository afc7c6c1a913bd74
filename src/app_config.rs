use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::glossary::templates::GlossaryTemplates;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Which character classes end up in the glossary and the overwrite policy
    #[serde(default)]
    pub general: GeneralConfig,

    /// Worker pools, batching and pacing
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Persistent lookup cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Remote lookup services
    #[serde(default)]
    pub services: ServicesConfig,

    /// HTML templates used by the renderer
    #[serde(default)]
    pub templates: GlossaryTemplates,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Content and overwrite settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneralConfig {
    #[serde(default = "default_true")]
    pub include_hiragana: bool,

    #[serde(default = "default_true")]
    pub include_katakana: bool,

    #[serde(default = "default_true")]
    pub include_kanji: bool,

    /// Convert kanji readings to romaji
    #[serde(default = "default_true")]
    pub include_romaji: bool,

    /// Add English meanings to kanji entries
    #[serde(default = "default_true")]
    pub include_meanings: bool,

    /// Leave records alone when their target field already has content
    #[serde(default)]
    pub ignore_existing: bool,

    /// Always regenerate, even when `ignore_existing` is set
    #[serde(default)]
    pub force_overwrite: bool,
}

impl GeneralConfig {
    /// Whether a record whose target field is already filled must be skipped.
    ///
    /// `force_overwrite` takes precedence over `ignore_existing`.
    pub fn skips_existing_content(&self) -> bool {
        self.ignore_existing && !self.force_overwrite
    }

    /// Whether kana lookups are needed at all
    pub fn wants_kana(&self) -> bool {
        self.include_hiragana || self.include_katakana
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            include_hiragana: true,
            include_katakana: true,
            include_kanji: true,
            include_romaji: true,
            include_meanings: true,
            ignore_existing: false,
            force_overwrite: false,
        }
    }
}

/// Concurrency, batching and pacing settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PerformanceConfig {
    /// Records annotated concurrently within a batch
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,

    /// Lookups running concurrently for one record
    #[serde(default = "default_api_workers")]
    pub api_workers: usize,

    /// Records per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause applied once between two batches
    #[serde(default = "default_pause_between_batches_ms")]
    pub pause_between_batches_ms: u64,

    /// Minimum spacing between two outbound calls, across all workers
    #[serde(default = "default_pause_per_api_call_ms")]
    pub pause_per_api_call_ms: u64,
}

impl PerformanceConfig {
    pub fn pause_between_batches(&self) -> Duration {
        Duration::from_millis(self.pause_between_batches_ms)
    }

    pub fn pause_per_api_call(&self) -> Duration {
        Duration::from_millis(self.pause_per_api_call_ms)
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            parallel_workers: default_parallel_workers(),
            api_workers: default_api_workers(),
            batch_size: default_batch_size(),
            pause_between_batches_ms: default_pause_between_batches_ms(),
            pause_per_api_call_ms: default_pause_per_api_call_ms(),
        }
    }
}

/// Lookup cache settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Whether lookups are cached at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Size budget of the cache in megabytes
    #[serde(default = "default_max_cache_size_mb")]
    pub max_size_mb: u64,

    /// Interval of the background flush in minutes (0 disables it)
    #[serde(default = "default_cache_save_interval_min")]
    pub save_interval_min: u64,

    /// Name of the cache file inside the working directory
    #[serde(default = "default_cache_file_name")]
    pub file_name: String,
}

impl CacheConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    /// Interval of the background flush, `None` when periodic saving is off
    pub fn save_interval(&self) -> Option<Duration> {
        if !self.enabled || self.save_interval_min == 0 {
            return None;
        }
        Some(Duration::from_secs(self.save_interval_min * 60))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_mb: default_max_cache_size_mb(),
            save_interval_min: default_cache_save_interval_min(),
            file_name: default_cache_file_name(),
        }
    }
}

/// A single remote endpoint
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServiceEndpoint {
    /// Base URL of the service
    pub base_url: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServiceEndpoint {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Remote lookup services configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServicesConfig {
    /// Reading-conversion service (kana and readings to romaji)
    #[serde(default = "default_reading_endpoint")]
    pub reading: ServiceEndpoint,

    /// Meaning-lookup service (kanji readings and English meanings)
    #[serde(default = "default_meaning_endpoint")]
    pub meaning: ServiceEndpoint,

    /// Fixed delay before the single retry of a transient failure
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl ServicesConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            reading: default_reading_endpoint(),
            meaning: default_meaning_endpoint(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_parallel_workers() -> usize {
    4
}

fn default_api_workers() -> usize {
    2
}

fn default_batch_size() -> usize {
    50
}

fn default_pause_between_batches_ms() -> u64 {
    500
}

fn default_pause_per_api_call_ms() -> u64 {
    50
}

fn default_max_cache_size_mb() -> u64 {
    10
}

fn default_cache_save_interval_min() -> u64 {
    15
}

fn default_cache_file_name() -> String {
    "api_cache.json".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_reading_endpoint() -> ServiceEndpoint {
    ServiceEndpoint {
        base_url: "https://api.romaji2kana.com".to_string(),
        timeout_secs: default_timeout_secs(),
    }
}

fn default_meaning_endpoint() -> ServiceEndpoint {
    ServiceEndpoint {
        base_url: "https://kanjiapi.dev/v1".to_string(),
        timeout_secs: default_timeout_secs(),
    }
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        let perf = &self.performance;
        if perf.parallel_workers == 0 {
            return Err(anyhow!("performance.parallel_workers must be at least 1"));
        }
        if perf.api_workers == 0 {
            return Err(anyhow!("performance.api_workers must be at least 1"));
        }
        if perf.batch_size == 0 {
            return Err(anyhow!("performance.batch_size must be at least 1"));
        }

        for (name, endpoint) in [("reading", &self.services.reading), ("meaning", &self.services.meaning)] {
            Url::parse(&endpoint.base_url)
                .with_context(|| format!("Invalid base URL for the {} service: {}", name, endpoint.base_url))?;
            if endpoint.timeout_secs == 0 {
                return Err(anyhow!("services.{}.timeout_secs must be at least 1", name));
            }
        }

        if self.cache.enabled && self.cache.file_name.trim().is_empty() {
            return Err(anyhow!("cache.file_name cannot be empty when the cache is enabled"));
        }

        self.templates.validate()?;

        Ok(())
    }

    /// Load a configuration file, creating it with defaults when it does not exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("Failed to open config file: {:?}", path))?;
            let reader = BufReader::new(file);
            let config: Config = serde_json::from_reader(reader)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            return Ok(config);
        }

        warn!("Config file not found at {:?}, creating default config.", path);
        let config = Config::default();
        config.save(path)?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let config_json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;
        std::fs::write(path, config_json)
            .with_context(|| format!("Failed to write config to file: {:?}", path))?;
        Ok(())
    }
}
