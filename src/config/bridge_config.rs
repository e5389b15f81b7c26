use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::{
    BLE_SCAN_WINDOW_SECS, CLASSIC_DISCOVERY_WINDOW_SECS, CLASSIC_SCAN_STAGGER_MS,
    PRINT_TIMEOUT_SECS, RFCOMM_CHANNEL_DEFAULT,
};
use crate::core::bluetooth::manager::ManagerOptions;
use crate::core::bluetooth::registry::ScanOptions;
use crate::error::{BridgeError, Result};
use crate::utils::ensure_directory_exists;

const CONFIG_FILE_NAME: &str = "device_bridge.json";

/// Terminal-level configuration. Every field has a working default so a
/// fresh install runs without a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub ble_scan_window_secs: u64,
    pub classic_discovery_window_secs: u64,
    pub scan_stagger_ms: u64,
    pub rfcomm_channel: u8,
    pub print_timeout_secs: u64,
    /// Addresses the operator manually approved as scales
    pub approved_addresses: Vec<String>,
    /// Directory holding the per-role last-device records
    pub data_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ble_scan_window_secs: BLE_SCAN_WINDOW_SECS,
            classic_discovery_window_secs: CLASSIC_DISCOVERY_WINDOW_SECS,
            scan_stagger_ms: CLASSIC_SCAN_STAGGER_MS,
            rfcomm_channel: RFCOMM_CHANNEL_DEFAULT,
            print_timeout_secs: PRINT_TIMEOUT_SECS,
            approved_addresses: Vec::new(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl BridgeConfig {
    /// Loads the config from `config_dir`, falling back to defaults when no
    /// file exists yet.
    pub async fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&path).await?;
        let config: Self = serde_json::from_str(&config_json)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the current config to `config_dir`.
    pub async fn save(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;
        let path = config_dir.join(CONFIG_FILE_NAME);
        let config_json = serde_json::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        fs::write(&path, config_json).await?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            ble_window: std::time::Duration::from_secs(self.ble_scan_window_secs),
            classic_window: std::time::Duration::from_secs(self.classic_discovery_window_secs),
            stagger: std::time::Duration::from_millis(self.scan_stagger_ms),
            ..ScanOptions::default()
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            print_timeout: std::time::Duration::from_secs(self.print_timeout_secs),
            ..ManagerOptions::default()
        }
    }

    pub fn approved(&self) -> HashSet<String> {
        self.approved_addresses.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.ble_scan_window_secs, BLE_SCAN_WINDOW_SECS);
        assert_eq!(config.rfcomm_channel, RFCOMM_CHANNEL_DEFAULT);
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BridgeConfig::default();
        config.approved_addresses.push("AA:BB:CC:DD:EE:FF".to_string());
        config.print_timeout_secs = 10;
        config.save(dir.path()).await.unwrap();

        let loaded = BridgeConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded.approved_addresses, vec!["AA:BB:CC:DD:EE:FF"]);
        assert_eq!(loaded.print_timeout_secs, 10);
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{ "rfcomm_channel": 2 }"#,
        )
        .unwrap();

        let config = BridgeConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.rfcomm_channel, 2);
        assert_eq!(config.ble_scan_window_secs, BLE_SCAN_WINDOW_SECS);
    }
}
