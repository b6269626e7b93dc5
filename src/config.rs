use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::models::VersioningConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Seconds between scheduler ticks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum pages fetched concurrently within one tick.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_checks: usize,

    /// Maintenance (change-log retention, prune sweep) runs every N ticks.
    #[serde(default = "default_maintenance_every")]
    pub maintenance_every_ticks: u32,

    #[serde(default = "default_retention_days")]
    pub change_log_retention_days: i64,

    /// Optional endpoint for webhook notifications. When unset,
    /// notifications are logged only.
    pub webhook_url: Option<String>,

    /// Default versioning settings applied to newly tracked pages.
    #[serde(default)]
    pub versioning: VersioningConfig,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pagewatch");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("pages.db").to_string_lossy().to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    5
}

fn default_maintenance_every() -> u32 {
    10
}

fn default_retention_days() -> i64 {
    90
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            poll_interval_secs: default_poll_interval(),
            max_concurrent_checks: default_max_concurrent(),
            maintenance_every_ticks: default_maintenance_every(),
            change_log_retention_days: default_retention_days(),
            webhook_url: None,
            versioning: VersioningConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pagewatch")
            .join("config.toml")
    }
}
