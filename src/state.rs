//! Application state management
//! This module wires one connection orchestrator per device role over the
//! production transport drivers.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::config::BridgeConfig;
use crate::core::bluetooth::ble::BluestBleDriver;
use crate::core::bluetooth::classic::BluezClassicDriver;
use crate::core::bluetooth::manager::DeviceManager;
use crate::core::bluetooth::types::DeviceRole;
use crate::error::Result;
use crate::storage::FileStore;

/// Global application state: one manager per role, sharing nothing but the
/// role-keyed persistence store.
pub struct AppState {
    pub scale: Arc<DeviceManager>,
    pub printer: Arc<DeviceManager>,
}

impl AppState {
    pub async fn new(config: &BridgeConfig) -> Result<Self> {
        info!("Initializing device managers...");
        let store = Arc::new(FileStore::new(config.data_dir.clone()));

        // Separate driver instances per role keep scale and printer
        // operations independent of each other
        let scale = Arc::new(DeviceManager::new(
            DeviceRole::Scale,
            Arc::new(BluestBleDriver::new(config.approved()).await?),
            Arc::new(Self::classic_driver(config).await?),
            store.clone(),
            config.scan_options(),
            config.manager_options(),
        ));
        let printer = Arc::new(DeviceManager::new(
            DeviceRole::Printer,
            Arc::new(BluestBleDriver::new(config.approved()).await?),
            Arc::new(Self::classic_driver(config).await?),
            store,
            config.scan_options(),
            config.manager_options(),
        ));

        Ok(Self { scale, printer })
    }

    async fn classic_driver(config: &BridgeConfig) -> Result<BluezClassicDriver> {
        BluezClassicDriver::new(
            config.approved(),
            Duration::from_secs(config.classic_discovery_window_secs),
            config.rfcomm_channel,
        )
        .await
    }

    pub fn manager(&self, role: DeviceRole) -> Arc<DeviceManager> {
        match role {
            DeviceRole::Scale => self.scale.clone(),
            DeviceRole::Printer => self.printer.clone(),
        }
    }
}
