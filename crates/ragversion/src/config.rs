//! Configuration parsing and validation.
//!
//! RAGVersion is configured via a TOML file. Every section and field has a
//! default, so an empty file (or [`Config::default`]) is a valid SQLite-backed
//! configuration.
//!
//! # Example
//!
//! ```toml
//! [storage]
//! backend = "sqlite"
//!
//! [storage.sqlite]
//! path = "./data/ragversion.sqlite"
//!
//! [tracking]
//! max_file_size_mb = 50
//!
//! [chunking]
//! enabled = true
//! strategy = "recursive"
//! chunk_size = 500
//! chunk_overlap = 50
//! ```
//!
//! Remote credentials may be left out of the file and supplied through
//! `RAGVERSION_REMOTE_URL` and `RAGVERSION_REMOTE_KEY`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use ragversion_core::chunk::{
    ChunkerSettings, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_STRATEGY,
};
use ragversion_core::hash::HashAlgorithm;
use ragversion_core::{Error, Result};

pub const REMOTE_URL_ENV: &str = "RAGVERSION_REMOTE_URL";
pub const REMOTE_KEY_ENV: &str = "RAGVERSION_REMOTE_KEY";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub listeners: ListenerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Remote,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub sqlite: SqliteConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/ragversion.sqlite")
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub service_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    /// URL from the file, else from the environment.
    pub fn resolved_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var(REMOTE_URL_ENV).ok())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn resolved_key(&self) -> Option<String> {
        self.service_key
            .clone()
            .or_else(|| std::env::var(REMOTE_KEY_ENV).ok())
            .filter(|s| !s.trim().is_empty())
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    #[serde(default = "default_true")]
    pub store_content: bool,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            store_content: true,
            max_file_size_mb: default_max_file_size_mb(),
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

impl TrackingConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

fn default_true() -> bool {
    true
}
fn default_max_file_size_mb() -> u64 {
    50
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Zstd,
    None,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ContentConfig {
    #[serde(default)]
    pub compression: Compression,
}

impl ContentConfig {
    pub fn compress(&self) -> bool {
        self.compression == Compression::Zstd
    }
}

/// What a directory run does when one file fails.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Record the failure and keep going.
    #[default]
    Continue,
    /// Return the first failure and abandon files not yet started.
    Stop,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub on_error: OnError,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            on_error: OnError::default(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    #[serde(default = "default_listener_timeout")]
    pub timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_listener_timeout(),
        }
    }
}

fn default_listener_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: default_strategy(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn settings(&self) -> ChunkerSettings {
        ChunkerSettings::new(self.chunk_size, self.chunk_overlap)
    }
}

fn default_strategy() -> String {
    DEFAULT_STRATEGY.to_string()
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Config using the in-memory backend, handy for tests and embedding.
    pub fn in_memory() -> Self {
        let mut config = Config::default();
        config.storage.backend = Backend::Memory;
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.max_workers == 0 {
            return Err(Error::Configuration("batch.max_workers must be >= 1".into()));
        }
        if self.tracking.max_file_size_mb == 0 {
            return Err(Error::Configuration(
                "tracking.max_file_size_mb must be >= 1".into(),
            ));
        }
        if self.chunking.chunk_size == 0 {
            return Err(Error::Configuration("chunking.chunk_size must be > 0".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Configuration(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.storage.sqlite.max_connections == 0 {
            return Err(Error::Configuration(
                "storage.sqlite.max_connections must be >= 1".into(),
            ));
        }
        if self.storage.backend == Backend::Remote {
            if self.storage.remote.resolved_url().is_none() {
                return Err(Error::Configuration(format!(
                    "storage.remote.url must be set (or {}) when backend is 'remote'",
                    REMOTE_URL_ENV
                )));
            }
            if self.storage.remote.resolved_key().is_none() {
                return Err(Error::Configuration(format!(
                    "storage.remote.service_key must be set (or {}) when backend is 'remote'",
                    REMOTE_KEY_ENV
                )));
            }
        }
        Ok(())
    }
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| Error::Configuration(format!("failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Load, parse and validate a TOML configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.storage.backend, Backend::Sqlite);
        assert!(config.tracking.store_content);
        assert_eq!(config.tracking.max_file_size_mb, 50);
        assert_eq!(config.tracking.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.batch.max_workers, 4);
        assert_eq!(config.batch.on_error, OnError::Continue);
        assert_eq!(config.listeners.timeout_secs, 60);
        assert!(!config.chunking.enabled);
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert!(config.content.compress());
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            [storage]
            backend = "memory"

            [tracking]
            store_content = false
            max_file_size_mb = 2
            hash_algorithm = "sha512"

            [content]
            compression = "none"

            [batch]
            max_workers = 8
            on_error = "stop"

            [chunking]
            enabled = true
            strategy = "character"
            chunk_size = 100
            chunk_overlap = 10

            [logging]
            level = "debug"
            format = "json"
        "#;
        let config = parse_config(toml).unwrap();
        assert_eq!(config.storage.backend, Backend::Memory);
        assert!(!config.tracking.store_content);
        assert_eq!(config.tracking.max_file_size_bytes(), 2 * 1024 * 1024);
        assert_eq!(config.tracking.hash_algorithm, HashAlgorithm::Sha512);
        assert!(!config.content.compress());
        assert_eq!(config.batch.on_error, OnError::Stop);
        assert_eq!(config.chunking.settings(), ChunkerSettings::new(100, 10));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config("[chunking]\nchunk_size = 10\nchunk_overlap = 10\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(parse_config("[batch]\nmax_workers = 0\n").is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = parse_config("[storage]\nbackend = \"postgres\"\n").unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_remote_requires_credentials_in_file_or_env() {
        let toml = "[storage]\nbackend = \"remote\"\n[storage.remote]\nurl = \"http://localhost\"\nservice_key = \"k\"\n";
        assert!(parse_config(toml).is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Path::new("/nonexistent/ragversion.toml")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
