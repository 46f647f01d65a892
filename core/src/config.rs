//! Configuration loading and management

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::CoreError;

pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_CHAR_BUDGET: usize = 5_000_000;
pub const DEFAULT_LOCAL_OFFSET_HOURS: i64 = 8;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub import: ImportConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub path: PathBuf,
    pub snapshot_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Messages buffered before one transactional flush.
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Worker threads for the word-frequency delta. `None` means one per CPU.
    pub workers: Option<usize>,
    pub partitions_per_worker: usize,
    pub char_budget: usize,
    pub local_offset_hours: i64,
    pub transitive_merges: bool,
    pub items_per_page: i64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("discord_data.db"),
            snapshot_path: PathBuf::from("cache_data_full.bin"),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            workers: None,
            partitions_per_worker: 4,
            char_budget: DEFAULT_CHAR_BUDGET,
            local_offset_hours: DEFAULT_LOCAL_OFFSET_HOURS,
            transitive_merges: false,
            items_per_page: 100,
        }
    }
}

impl AnalyticsConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let config: Config = toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.import.batch_size == 0 {
            return Err(CoreError::Config("import.batch_size must be >= 1".to_string()));
        }
        if self.analytics.partitions_per_worker == 0 {
            return Err(CoreError::Config(
                "analytics.partitions_per_worker must be >= 1".to_string(),
            ));
        }
        if !(-12..=14).contains(&self.analytics.local_offset_hours) {
            return Err(CoreError::Config(
                "analytics.local_offset_hours out of range".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").expect("parse");
        assert_eq!(config.import.batch_size, 5000);
        assert_eq!(config.analytics.char_budget, 5_000_000);
        assert_eq!(config.analytics.local_offset_hours, 8);
        assert!(!config.analytics.transitive_merges);
    }

    #[test]
    fn partial_sections_override() {
        let config = Config::from_toml(
            r#"
            [archive]
            path = "/tmp/guild.db"

            [analytics]
            workers = 3
            transitive_merges = true
            "#,
        )
        .expect("parse");
        assert_eq!(config.archive.path, PathBuf::from("/tmp/guild.db"));
        assert_eq!(config.archive.snapshot_path, PathBuf::from("cache_data_full.bin"));
        assert_eq!(config.analytics.worker_count(), 3);
        assert!(config.analytics.transitive_merges);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = Config::from_toml("[import]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
