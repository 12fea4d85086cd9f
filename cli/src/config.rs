// Configuration management for the EnOcean BLE CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/enocean-ble/config.json
// - Linux: ~/.config/enocean-ble/config.json
// - Windows: %APPDATA%\enocean-ble\config.json

use anyhow::{Context, Result};
use enocean_ble_core::{GatewayOptions, ScanConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Only accept signed telegrams
    pub auth_required: bool,

    /// Reject non-increasing counters on unsigned telegrams
    pub enforce_counter_monotonicity: bool,

    /// Which Bluetooth adapter to scan with
    pub adapter_index: usize,

    /// Commissioning database location; defaults to the data directory
    pub storage_path: Option<String>,

    /// Scan timing and start retries
    #[serde(flatten)]
    pub scan: ScanConfig,
}

impl Default for Config {
    fn default() -> Self {
        let options = GatewayOptions::default();
        Self {
            auth_required: options.auth_required,
            enforce_counter_monotonicity: options.enforce_counter_monotonicity,
            adapter_index: 0,
            storage_path: None,
            scan: ScanConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("enocean-ble");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("enocean-ble");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Where the commissioning database lives
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("commissioning")),
        }
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            auth_required: self.auth_required,
            enforce_counter_monotonicity: self.enforce_counter_monotonicity,
        }
    }

    /// Set a config value (not persisted until [`save`](Self::save))
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "auth_required" => {
                self.auth_required = value.parse().context("Invalid boolean value")?;
            }
            "enforce_counter_monotonicity" => {
                self.enforce_counter_monotonicity =
                    value.parse().context("Invalid boolean value")?;
            }
            "adapter_index" => {
                self.adapter_index = value.parse().context("Invalid adapter index")?;
            }
            "storage_path" => {
                self.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "scan_timeout_secs" => {
                self.scan.scan_timeout_secs = value.parse().context("Invalid number")?;
            }
            "retry_count" => {
                self.scan.retry_count = value.parse().context("Invalid number")?;
            }
            "retry_timeout_secs" => {
                self.scan.retry_timeout_secs = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "auth_required" => Some(self.auth_required.to_string()),
            "enforce_counter_monotonicity" => Some(self.enforce_counter_monotonicity.to_string()),
            "adapter_index" => Some(self.adapter_index.to_string()),
            "storage_path" => self.storage_path.clone(),
            "scan_timeout_secs" => Some(self.scan.scan_timeout_secs.to_string()),
            "retry_count" => Some(self.scan.retry_count.to_string()),
            "retry_timeout_secs" => Some(self.scan.retry_timeout_secs.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("auth_required".to_string(), self.auth_required.to_string()),
            (
                "enforce_counter_monotonicity".to_string(),
                self.enforce_counter_monotonicity.to_string(),
            ),
            ("adapter_index".to_string(), self.adapter_index.to_string()),
            (
                "storage_path".to_string(),
                self.storage_path.clone().unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("scan_timeout_secs".to_string(), format!("{}s", self.scan.scan_timeout_secs)),
            ("retry_count".to_string(), self.scan.retry_count.to_string()),
            ("retry_timeout_secs".to_string(), format!("{}s", self.scan.retry_timeout_secs)),
        ]
    }
}
