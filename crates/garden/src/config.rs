//! Configuration management for the garden primary.
//!
//! This module handles loading, validation, and conversion of the TOML
//! configuration into the settings used by the coordinator and executors.

use garden_shard::seed::standard_seeds;
use garden_shard::{CoordinatorConfig, ExecutorConfig, RegistryError, SeedRegistry, SeedSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

fn default_min_step_ms() -> u64 {
    1_000
}

fn default_flush_interval_secs() -> u64 {
    300
}

fn default_batch_limit() -> usize {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_plants_path() -> String {
    "data/plants.jsonl".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Worker pool and scheduling settings
    #[serde(default)]
    pub cluster: ClusterSettings,
    /// Durable plant storage
    #[serde(default)]
    pub storage: StorageSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Growth profiles, indexed in the order they appear
    #[serde(default = "standard_seeds")]
    pub seeds: Vec<SeedSpec>,
}

/// Worker pool and scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Number of growth workers (0 means one per CPU)
    #[serde(default)]
    pub workers: usize,
    /// Minimum distance between two scheduler wake-ups, in milliseconds
    #[serde(default = "default_min_step_ms")]
    pub min_step_ms: u64,
    /// Interval of the snapshot-and-persist job, in seconds
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Largest batch of plants sent to a worker in one call
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Whether workers post their partition when shutting down
    #[serde(default = "default_true")]
    pub flush_on_exit: bool,
}

/// Durable plant storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// JSON-lines file holding one plant per line
    #[serde(default = "default_plants_path")]
    pub plants_path: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            min_step_ms: default_min_step_ms(),
            flush_interval_secs: default_flush_interval_secs(),
            batch_limit: default_batch_limit(),
            flush_on_exit: true,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            plants_path: default_plants_path(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
            seeds: standard_seeds(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Number of workers to spawn, resolving 0 to the CPU count.
    pub fn worker_count(&self) -> usize {
        match self.cluster.workers {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            min_step_ms: self.cluster.min_step_ms,
            flush_on_exit: self.cluster.flush_on_exit,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            batch_limit: self.cluster.batch_limit,
            flush_interval: Duration::from_secs(self.cluster.flush_interval_secs),
        }
    }

    /// Builds the seed registry from the `[[seeds]]` tables.
    pub fn seed_registry(&self) -> Result<SeedRegistry, RegistryError> {
        SeedRegistry::from_specs(self.seeds.iter().cloned())
    }

    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.cluster.min_step_ms == 0 {
            return Err("cluster.min_step_ms must be greater than 0".to_string());
        }

        if self.cluster.flush_interval_secs == 0 {
            return Err("cluster.flush_interval_secs must be greater than 0".to_string());
        }

        if self.cluster.batch_limit == 0 {
            return Err("cluster.batch_limit must be greater than 0".to_string());
        }

        if self.storage.plants_path.trim().is_empty() {
            return Err("storage.plants_path cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.seeds.is_empty() {
            return Err("At least one seed must be configured".to_string());
        }

        self.seed_registry().map_err(|e| e.to_string())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.cluster.workers, 0);
        assert_eq!(config.cluster.min_step_ms, 1_000);
        assert_eq!(config.cluster.flush_interval_secs, 300);
        assert_eq!(config.cluster.batch_limit, 1_000);
        assert!(config.cluster.flush_on_exit);
        assert_eq!(config.storage.plants_path, "data/plants.jsonl");
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);

        let names: Vec<&str> = config.seeds.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["wheat", "potato", "carrot", "dandelion"]);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garden.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.cluster.min_step_ms, 1_000);
        assert!(path.exists());

        // the written defaults load back the same
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.seeds, config.seeds);
        assert_eq!(reloaded.storage.plants_path, config.storage.plants_path);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[cluster]
workers = 3
min_step_ms = 250
flush_interval_secs = 60

[storage]
plants_path = "/tmp/garden/plants.jsonl"

[logging]
level = "debug"
json_format = true

[[seeds]]
name = "tomato"
stages = 5
time_ms = 600000
fragility = 0.3
max_result = 6
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf())
            .await
            .unwrap();

        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.cluster.min_step_ms, 250);
        assert_eq!(config.cluster.batch_limit, 1_000);
        assert!(config.cluster.flush_on_exit);
        assert_eq!(config.coordinator_config().flush_interval, Duration::from_secs(60));
        assert_eq!(config.executor_config().min_step_ms, 250);
        assert_eq!(config.storage.plants_path, "/tmp/garden/plants.jsonl");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);

        let registry = config.seed_registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(0).unwrap().per_stage(), 120_000);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.seeds.len(), 4);
        assert_eq!(config.cluster.flush_interval_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_count_defaults_to_cpus() {
        let config = AppConfig::default();
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.cluster.min_step_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cluster.flush_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cluster.batch_limit = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.plants_path = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.seeds[0].fragility = 2.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.seeds.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_log_levels() {
        let mut config = AppConfig::default();
        for level in ["trace", "debug", "info", "warn", "error"] {
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "{level} should be accepted");
        }
    }
}
