//! Unified device registry.
//!
//! Merges BLE and Classic scan results into one device list with stable,
//! case-insensitive identity. Lists are rebuilt from scratch on every scan
//! cycle; per-transport result sets stay queryable because the orchestrator
//! prefers BLE whenever a BLE match exists.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{sleep, timeout};

use crate::core::bluetooth::ble::BleDriver;
use crate::core::bluetooth::classic::ClassicDriver;
use crate::core::bluetooth::constants::{
    BLE_SCAN_WINDOW_SECS, CLASSIC_DISCOVERY_WINDOW_SECS, CLASSIC_SCAN_STAGGER_MS, SCAN_GRACE_SECS,
};
use crate::core::bluetooth::types::{BluetoothDevice, DeviceRole, Transport};
use crate::error::Result;

/// Scan timing knobs; defaults come from the constants table.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub ble_window: Duration,
    pub classic_window: Duration,
    /// Classic starts this long after BLE so the radios don't contend
    pub stagger: Duration,
    /// Extra budget before a driver scan is abandoned as hung
    pub grace: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            ble_window: Duration::from_secs(BLE_SCAN_WINDOW_SECS),
            classic_window: Duration::from_secs(CLASSIC_DISCOVERY_WINDOW_SECS),
            stagger: Duration::from_millis(CLASSIC_SCAN_STAGGER_MS),
            grace: Duration::from_secs(SCAN_GRACE_SECS),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    ble_results: Vec<BluetoothDevice>,
    classic_results: Vec<BluetoothDevice>,
    merged: Vec<BluetoothDevice>,
}

pub struct DeviceRegistry {
    role: DeviceRole,
    ble: Arc<dyn BleDriver>,
    classic: Arc<dyn ClassicDriver>,
    options: ScanOptions,
    inner: Arc<Mutex<RegistryInner>>,
    scanning: Arc<AtomicBool>,
}

impl DeviceRegistry {
    pub fn new(
        role: DeviceRole,
        ble: Arc<dyn BleDriver>,
        classic: Arc<dyn ClassicDriver>,
        options: ScanOptions,
    ) -> Self {
        Self {
            role,
            ble,
            classic,
            options,
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            scanning: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Drops all previous results and scans both transports. The scanning
    /// flag is guaranteed to clear when this returns, discovery outcome or
    /// not.
    pub async fn scan(&self) -> Result<()> {
        if self.scanning.swap(true, Ordering::SeqCst) {
            debug!("Scan already in progress for {}", self.role);
            return Ok(());
        }
        let _flag = ScanFlagGuard(self.scanning.clone());

        {
            let mut inner = self.inner.lock().unwrap();
            inner.ble_results.clear();
            inner.classic_results.clear();
            inner.merged.clear();
        }
        info!("Scanning for {} devices", self.role);

        let ble_fut = async {
            // The current hardware fleet has no BLE printers
            if self.role == DeviceRole::Printer {
                return Ok(Vec::new());
            }
            match timeout(
                self.options.ble_window + self.options.grace,
                self.ble.scan(self.options.ble_window),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("BLE scan overran its window; treating as empty");
                    Ok(Vec::new())
                }
            }
        };
        let classic_fut = async {
            sleep(self.options.stagger).await;
            match timeout(
                self.options.classic_window + self.options.grace,
                self.classic.scan(self.role),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!("Classic scan overran its window; treating as empty");
                    Ok(Vec::new())
                }
            }
        };
        let (ble_result, classic_result) = tokio::join!(ble_fut, classic_fut);

        let mut scan_error = None;
        let ble_results = match ble_result {
            Ok(devices) => devices,
            Err(err) if err.needs_user_intervention() => return Err(err),
            Err(err) => {
                warn!("BLE scan failed: {}", err);
                scan_error = Some(err);
                Vec::new()
            }
        };
        let classic_results = match classic_result {
            Ok(devices) => devices,
            Err(err) if err.needs_user_intervention() => return Err(err),
            Err(err) => {
                warn!("Classic scan failed: {}", err);
                scan_error = Some(err);
                Vec::new()
            }
        };

        // Both transports empty-handed because both errored: surface it
        if ble_results.is_empty() && classic_results.is_empty() {
            if let Some(err) = scan_error {
                return Err(err);
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.ble_results = dedupe(ble_results, &mut HashSet::new());
        let mut seen: HashSet<String> = inner
            .ble_results
            .iter()
            .map(BluetoothDevice::normalized_id)
            .collect();
        inner.classic_results = dedupe(classic_results, &mut HashSet::new());
        let mut merged = inner.ble_results.clone();
        merged.extend(
            inner
                .classic_results
                .iter()
                .filter(|d| seen.insert(d.normalized_id()))
                .cloned(),
        );
        info!(
            "Scan complete: {} BLE, {} Classic, {} merged",
            inner.ble_results.len(),
            inner.classic_results.len(),
            merged.len()
        );
        inner.merged = merged;
        Ok(())
    }

    /// The merged device list in discovery order; never two entries with the
    /// same normalized id.
    pub fn devices(&self) -> Vec<BluetoothDevice> {
        self.inner.lock().unwrap().merged.clone()
    }

    pub fn find_ble(&self, id: &str) -> Option<BluetoothDevice> {
        self.inner
            .lock()
            .unwrap()
            .ble_results
            .iter()
            .find(|d| d.matches_id(id))
            .cloned()
    }

    pub fn find_classic(&self, id: &str) -> Option<BluetoothDevice> {
        self.inner
            .lock()
            .unwrap()
            .classic_results
            .iter()
            .find(|d| d.matches_id(id))
            .cloned()
    }

    pub fn find(&self, id: &str, transport: Transport) -> Option<BluetoothDevice> {
        match transport {
            Transport::Ble => self.find_ble(id),
            Transport::Classic => self.find_classic(id),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }
}

/// Deduplicates by normalized id, keeping the first-seen entry's metadata.
fn dedupe(devices: Vec<BluetoothDevice>, seen: &mut HashSet<String>) -> Vec<BluetoothDevice> {
    devices
        .into_iter()
        .filter(|d| seen.insert(d.normalized_id()))
        .collect()
}

struct ScanFlagGuard(Arc<AtomicBool>);

impl Drop for ScanFlagGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::testing::{classic_device, MockBleDriver, MockClassicDriver};

    fn registry(
        role: DeviceRole,
        ble: Arc<MockBleDriver>,
        classic: Arc<MockClassicDriver>,
    ) -> DeviceRegistry {
        let options = ScanOptions {
            ble_window: Duration::from_millis(50),
            classic_window: Duration::from_millis(50),
            stagger: Duration::from_millis(1),
            grace: Duration::from_millis(100),
        };
        DeviceRegistry::new(role, ble, classic, options)
    }

    #[tokio::test]
    async fn duplicate_discovery_events_collapse_to_first_seen() {
        let ble = Arc::new(MockBleDriver::default());
        let classic = Arc::new(MockClassicDriver::default());
        classic.add_device(classic_device("AA:BB:CC:DD:EE:FF", Some("XH2507")));
        // second event for the same id with different metadata
        classic.add_device(classic_device("aa:bb:cc:dd:ee:ff", Some("XH2507-v2")));

        let reg = registry(DeviceRole::Scale, ble, classic);
        reg.scan().await.unwrap();

        let devices = reg.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name.as_deref(), Some("XH2507"));
        assert!(!reg.is_scanning());
    }

    #[tokio::test]
    async fn same_id_on_both_transports_keeps_ble_entry() {
        let ble = Arc::new(MockBleDriver::default());
        ble.add_device(crate::core::bluetooth::testing::ble_device(
            "AA:BB:CC:DD:EE:FF",
            Some("Scale"),
        ));
        let classic = Arc::new(MockClassicDriver::default());
        classic.add_device(classic_device("AA:BB:CC:DD:EE:FF", Some("Scale")));

        let reg = registry(DeviceRole::Scale, ble.clone(), classic);
        reg.scan().await.unwrap();

        assert_eq!(reg.devices().len(), 1);
        assert_eq!(reg.devices()[0].transport, Transport::Ble);
        // both per-transport views still resolve the id
        assert!(reg.find_ble("aa:bb:cc:dd:ee:ff").is_some());
        assert!(reg.find_classic("AA:BB:CC:DD:EE:FF").is_some());
    }

    #[tokio::test]
    async fn printer_scan_skips_ble_entirely() {
        let ble = Arc::new(MockBleDriver::default());
        let classic = Arc::new(MockClassicDriver::default());
        classic.add_device(classic_device("11:22:33:44:55:66", Some("RPP02N")));

        let reg = registry(DeviceRole::Printer, ble.clone(), classic);
        reg.scan().await.unwrap();

        assert_eq!(ble.scan_calls(), 0);
        assert_eq!(reg.devices().len(), 1);
    }

    #[tokio::test]
    async fn rescan_rebuilds_the_list_from_scratch() {
        let ble = Arc::new(MockBleDriver::default());
        let classic = Arc::new(MockClassicDriver::default());
        classic.add_device(classic_device("11:22:33:44:55:66", Some("XH2507")));

        let reg = registry(DeviceRole::Scale, ble, classic.clone());
        reg.scan().await.unwrap();
        assert_eq!(reg.devices().len(), 1);

        classic.clear_devices();
        reg.scan().await.unwrap();
        assert!(reg.devices().is_empty());
    }
}
