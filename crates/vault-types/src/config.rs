//! Configuration loading for the knowledge vault.
//!
//! Layered config: defaults -> config file -> CLI config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/knowledge-vault/config.toml.

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::entry::CompressionAlgorithm;
use crate::error::VaultError;

const APP_NAME: &str = "knowledge-vault";

/// Fingerprinting policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// Append the vector bytes to the digest input.
    /// Only useful when identical text can carry different embeddings.
    #[serde(default)]
    pub include_vector: bool,
}

/// Compression candidates and levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Codecs tried on every payload; `none` is always a candidate.
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<CompressionAlgorithm>,

    /// zstd level used at ingestion
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,

    /// zstd level used when recompressing demoted entries
    #[serde(default = "default_cold_zstd_level")]
    pub cold_zstd_level: i32,

    /// Decode every freshly encoded payload and compare before storing
    #[serde(default = "default_true")]
    pub verify_round_trip: bool,
}

fn default_algorithms() -> Vec<CompressionAlgorithm> {
    vec![CompressionAlgorithm::Lz4, CompressionAlgorithm::Zstd]
}

fn default_zstd_level() -> i32 {
    3
}

fn default_cold_zstd_level() -> i32 {
    19
}

fn default_true() -> bool {
    true
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithms: default_algorithms(),
            zstd_level: default_zstd_level(),
            cold_zstd_level: default_cold_zstd_level(),
            verify_round_trip: true,
        }
    }
}

impl CompressionConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        for level in [self.zstd_level, self.cold_zstd_level] {
            if !(1..=22).contains(&level) {
                return Err(format!("zstd level must be 1-22, got {}", level));
            }
        }
        Ok(())
    }
}

/// Tier classification policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieringConfig {
    /// Reads within the window needed to stay HOT
    #[serde(default = "default_hot_access_threshold")]
    pub hot_access_threshold: u32,

    /// Trailing access window (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// New and freshly promoted entries stay HOT this long (seconds)
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Re-encode demoted entries with the cold zstd level
    #[serde(default = "default_true")]
    pub recompress_cold: bool,

    /// Minimum original size for cold recompression
    #[serde(default = "default_recompress_min_bytes")]
    pub recompress_min_bytes: u64,

    /// Cron expression for the reclassification job (6 fields, with seconds)
    #[serde(default = "default_tiering_cron")]
    pub cron: String,
}

fn default_hot_access_threshold() -> u32 {
    3
}

fn default_window_secs() -> u64 {
    7 * 24 * 3600
}

fn default_grace_period_secs() -> u64 {
    24 * 3600
}

fn default_recompress_min_bytes() -> u64 {
    4096
}

fn default_tiering_cron() -> String {
    "0 0 * * * *".to_string()
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            hot_access_threshold: default_hot_access_threshold(),
            window_secs: default_window_secs(),
            grace_period_secs: default_grace_period_secs(),
            recompress_cold: true,
            recompress_min_bytes: default_recompress_min_bytes(),
            cron: default_tiering_cron(),
        }
    }
}

impl TieringConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.hot_access_threshold == 0 {
            return Err("hot_access_threshold must be > 0".to_string());
        }
        if self.window_secs == 0 {
            return Err("window_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// Ingestion limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Chunks processed concurrently within one batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: usize,

    #[serde(default = "default_max_chunks_per_batch")]
    pub max_chunks_per_batch: usize,

    /// Resolve/link retries when a resolved entry disappears mid-link
    #[serde(default = "default_max_link_attempts")]
    pub max_link_attempts: u32,
}

fn default_concurrency() -> usize {
    8
}

fn default_max_text_bytes() -> usize {
    1024 * 1024
}

fn default_max_chunks_per_batch() -> usize {
    10_000
}

fn default_max_link_attempts() -> u32 {
    3
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_text_bytes: default_max_text_bytes(),
            max_chunks_per_batch: default_max_chunks_per_batch(),
            max_link_attempts: default_max_link_attempts(),
        }
    }
}

impl IngestConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be > 0".to_string());
        }
        if self.max_text_bytes == 0 {
            return Err("max_text_bytes must be > 0".to_string());
        }
        if self.max_chunks_per_batch == 0 {
            return Err("max_chunks_per_batch must be > 0".to_string());
        }
        if self.max_link_attempts == 0 {
            return Err("max_link_attempts must be > 0".to_string());
        }
        Ok(())
    }
}

/// Similarity backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityBackend {
    /// Exact brute-force cosine scan
    #[default]
    Flat,
    /// usearch HNSW graph persisted next to the database
    Hnsw,
}

/// Similarity index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    #[serde(default)]
    pub backend: SimilarityBackend,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Initial capacity reserved by the HNSW backend
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Candidates fetched per requested result before owner filtering
    #[serde(default = "default_oversample")]
    pub oversample: usize,
}

fn default_dimension() -> usize {
    384
}

fn default_index_path() -> String {
    data_dir_path("similarity-index", "./similarity-index")
}

fn default_capacity() -> usize {
    100_000
}

fn default_oversample() -> usize {
    4
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            backend: SimilarityBackend::default(),
            dimension: default_dimension(),
            index_path: default_index_path(),
            capacity: default_capacity(),
            oversample: default_oversample(),
        }
    }
}

impl SimilarityConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("dimension must be > 0".to_string());
        }
        if self.oversample == 0 {
            return Err("oversample must be > 0".to_string());
        }
        Ok(())
    }
}

/// Store capacity settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Refuse new entries beyond this count
    #[serde(default)]
    pub max_entries: Option<u64>,
}

/// Orphan reaper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// References younger than this are never checked (seconds)
    #[serde(default)]
    pub min_reference_age_secs: u64,

    #[serde(default = "default_max_age_processing_days")]
    pub max_age_processing_days: u32,

    #[serde(default = "default_max_age_analytics_days")]
    pub max_age_analytics_days: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// File listing live owner ids, one per line
    #[serde(default)]
    pub owners_file: Option<String>,

    /// Cron expression for the scheduled sweep (6 fields, with seconds)
    #[serde(default = "default_reaper_cron")]
    pub cron: String,
}

fn default_max_age_processing_days() -> u32 {
    30
}

fn default_max_age_analytics_days() -> u32 {
    90
}

fn default_batch_size() -> usize {
    1000
}

fn default_reaper_cron() -> String {
    "0 0 3 * * *".to_string()
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            min_reference_age_secs: 0,
            max_age_processing_days: default_max_age_processing_days(),
            max_age_analytics_days: default_max_age_analytics_days(),
            batch_size: default_batch_size(),
            owners_file: None,
            cron: default_reaper_cron(),
        }
    }
}

impl ReaperConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        Ok(())
    }
}

/// Scheduler settings as they appear in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub fingerprint: FingerprintConfig,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub tiering: TieringConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub similarity: SimilarityConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub reaper: ReaperConfig,

    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

fn data_dir_path(leaf: &str, fallback: &str) -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join(leaf))
        .unwrap_or_else(|| PathBuf::from(fallback))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_dir_path("db", "./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            fingerprint: FingerprintConfig::default(),
            compression: CompressionConfig::default(),
            tiering: TieringConfig::default(),
            ingest: IngestConfig::default(),
            similarity: SimilarityConfig::default(),
            storage: StorageConfig::default(),
            reaper: ReaperConfig::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/knowledge-vault/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (VAULT_*, `__` between nested keys)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, VaultError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| VaultError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| VaultError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: VAULT_DB_PATH, VAULT_TIERING__HOT_ACCESS_THRESHOLD, ...
        builder = builder.add_source(
            Environment::with_prefix("VAULT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| VaultError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| VaultError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), VaultError> {
        self.compression
            .validate()
            .and_then(|_| self.tiering.validate())
            .and_then(|_| self.ingest.validate())
            .and_then(|_| self.similarity.validate())
            .and_then(|_| self.reaper.validate())
            .map_err(VaultError::Config)
    }

    /// Expand ~ in db_path to actual home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in the similarity index path
    pub fn expanded_index_path(&self) -> PathBuf {
        expand_home(&self.similarity.index_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert!(!settings.fingerprint.include_vector);
        assert_eq!(settings.tiering.hot_access_threshold, 3);
        assert_eq!(settings.reaper.max_age_processing_days, 30);
        assert_eq!(settings.reaper.max_age_analytics_days, 90);
        assert_eq!(settings.similarity.backend, SimilarityBackend::Flat);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_compression_defaults() {
        let config = CompressionConfig::default();
        assert_eq!(
            config.algorithms,
            vec![CompressionAlgorithm::Lz4, CompressionAlgorithm::Zstd]
        );
        assert_eq!(config.zstd_level, 3);
        assert!(config.verify_round_trip);
    }

    #[test]
    fn test_section_validation() {
        let mut settings = Settings::default();
        settings.compression.zstd_level = 40;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.ingest.concurrency = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.tiering.hot_access_threshold = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.reaper.batch_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert!(!settings.db_path.is_empty());
        assert_eq!(settings.ingest.max_chunks_per_batch, 10_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("vault.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "db_path = \"/tmp/vault-db\"\n\n[tiering]\nhot_access_threshold = 5\n\n[compression]\nalgorithms = [\"zstd\"]\n\n[similarity]\nbackend = \"hnsw\""
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.db_path, "/tmp/vault-db");
        assert_eq!(settings.tiering.hot_access_threshold, 5);
        assert_eq!(settings.tiering.window_secs, 7 * 24 * 3600);
        assert_eq!(settings.compression.algorithms, vec![CompressionAlgorithm::Zstd]);
        assert_eq!(settings.similarity.backend, SimilarityBackend::Hnsw);
    }

    #[test]
    fn test_expanded_db_path() {
        let settings = Settings {
            db_path: "/var/lib/vault".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.expanded_db_path(), PathBuf::from("/var/lib/vault"));
    }
}
