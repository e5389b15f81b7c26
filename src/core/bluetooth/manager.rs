//! Connection orchestrator.
//!
//! One manager per device role (scale or printer) owns the full lifecycle:
//! scan, select, connect with BLE-first transport preference, stream
//! readings, disconnect, and auto-reconnect against the persisted last
//! device. Connection attempts within a role are serialized; the roles are
//! fully independent of each other.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::ble::BleDriver;
use crate::core::bluetooth::classic::ClassicDriver;
use crate::core::bluetooth::constants::{
    KEY_LAST_DEVICE_PRINTER, KEY_LAST_DEVICE_SCALE, PRINT_TIMEOUT_SECS, SCAN_SETTLE_ATTEMPTS,
    SCAN_SETTLE_DELAY_MS,
};
use crate::core::bluetooth::filter;
use crate::core::bluetooth::frame;
use crate::core::bluetooth::registry::{DeviceRegistry, ScanOptions};
use crate::core::bluetooth::types::{
    BluetoothDevice, ConnectionState, DeviceLink, DeviceRole, LastDeviceRecord, RawFrame,
    Transport, WeightReading,
};
use crate::error::{BridgeError, Result};
use crate::storage::KeyValueStore;
use crate::utils::settle;

/// Orchestrator knobs; defaults come from the constants table.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub print_timeout: Duration,
    /// Bounded wait for an in-flight scan during auto-reconnect
    pub settle_attempts: u32,
    pub settle_delay: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            print_timeout: Duration::from_secs(PRINT_TIMEOUT_SECS),
            settle_attempts: SCAN_SETTLE_ATTEMPTS,
            settle_delay: Duration::from_millis(SCAN_SETTLE_DELAY_MS),
        }
    }
}

/// Snapshot observed by the UI layer without touching the operation lock.
struct Observables {
    state: ConnectionState,
    connected: Option<BluetoothDevice>,
    failed: bool,
}

/// An established session; exclusively owns the transport handle and the
/// reading pump attached to it.
struct ActiveConnection {
    device: BluetoothDevice,
    link: Box<dyn DeviceLink>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerInner {
    active: Option<ActiveConnection>,
    /// Explicit user intent is sticky for the session
    manual_disconnect: bool,
    auto_connect_attempted: bool,
}

pub struct DeviceManager {
    role: DeviceRole,
    ble: Arc<dyn BleDriver>,
    classic: Arc<dyn ClassicDriver>,
    registry: DeviceRegistry,
    store: Arc<dyn KeyValueStore>,
    options: ManagerOptions,
    /// Serializes connect/disconnect/print for the role
    inner: Mutex<ManagerInner>,
    obs: Arc<StdMutex<Observables>>,
    reading: Arc<StdMutex<Option<WeightReading>>>,
    reading_tx: Arc<watch::Sender<Option<WeightReading>>>,
}

impl DeviceManager {
    pub fn new(
        role: DeviceRole,
        ble: Arc<dyn BleDriver>,
        classic: Arc<dyn ClassicDriver>,
        store: Arc<dyn KeyValueStore>,
        scan_options: ScanOptions,
        options: ManagerOptions,
    ) -> Self {
        let registry = DeviceRegistry::new(role, ble.clone(), classic.clone(), scan_options);
        let (reading_tx, _) = watch::channel(None);
        Self {
            role,
            ble,
            classic,
            registry,
            store,
            options,
            inner: Mutex::new(ManagerInner::default()),
            obs: Arc::new(StdMutex::new(Observables {
                state: ConnectionState::Disconnected,
                connected: None,
                failed: false,
            })),
            reading: Arc::new(StdMutex::new(None)),
            reading_tx: Arc::new(reading_tx),
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    /// Rebuilds the device list from scratch across both transports.
    pub async fn scan_for_devices(&self) -> Result<()> {
        self.registry.scan().await
    }

    pub fn devices(&self) -> Vec<BluetoothDevice> {
        self.registry.devices()
    }

    pub fn is_scanning(&self) -> bool {
        self.registry.is_scanning()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.obs.lock().unwrap().state
    }

    pub fn is_connecting(&self) -> bool {
        self.connection_state() == ConnectionState::Connecting
    }

    pub fn connection_failed(&self) -> bool {
        self.obs.lock().unwrap().failed
    }

    pub fn connected_device(&self) -> Option<BluetoothDevice> {
        self.obs.lock().unwrap().connected.clone()
    }

    /// Most recent parsed weight, or none before the first valid frame.
    pub fn last_message(&self) -> Option<WeightReading> {
        self.reading.lock().unwrap().clone()
    }

    /// Async view of the reading stream for downstream consumers.
    pub fn subscribe_readings(&self) -> watch::Receiver<Option<WeightReading>> {
        self.reading_tx.subscribe()
    }

    /// The device a caller should offer by default: for printers the first
    /// product-family name match with a first-device fallback, for scales
    /// simply the first result.
    pub fn pick_default_device(&self) -> Option<BluetoothDevice> {
        let devices = self.devices();
        match self.role {
            DeviceRole::Printer => filter::preferred_printer(&devices).cloned(),
            DeviceRole::Scale => devices.first().cloned(),
        }
    }

    /// Connects to a device from the current scan results.
    ///
    /// BLE is preferred whenever the id resolves to a BLE result, even if
    /// that attempt then fails; Classic is the fallback. Any previously
    /// active link for this role is torn down first.
    pub async fn connect_to_device(&self, id: &str) -> Result<BluetoothDevice> {
        let mut inner = self.inner.lock().await;

        if let Some(active) = inner.active.as_ref() {
            if active.device.matches_id(id) && active.link.is_connected().await {
                debug!("Already connected to {}; nothing to do", id);
                return Ok(active.device.clone());
            }
        }
        self.teardown(&mut inner).await;

        let ble_match = self.registry.find_ble(id);
        let classic_match = self.registry.find_classic(id);
        if ble_match.is_none() && classic_match.is_none() {
            self.set_failed();
            return Err(BridgeError::DeviceNotFound(id.to_string()));
        }

        self.set_connecting();
        let mut last_err: Option<BridgeError> = None;

        if let Some(device) = ble_match {
            info!("Attempting BLE connection to {}", device.display_name());
            match self.open_link(&mut inner, &device).await {
                Ok(()) => return self.finish_connect(&device),
                Err(err) => {
                    warn!("BLE connect to {} failed: {}", id, err);
                    last_err = Some(err);
                }
            }
        }

        if let Some(device) = classic_match {
            info!("Attempting Classic connection to {}", device.display_name());
            match self.open_link(&mut inner, &device).await {
                Ok(()) => return self.finish_connect(&device),
                Err(err) => {
                    warn!("Classic connect to {} failed: {}", id, err);
                    last_err = Some(err);
                }
            }
        }

        self.set_failed();
        Err(last_err.expect("at least one transport was attempted"))
    }

    /// One-shot reconnect against the persisted last device for this role.
    ///
    /// Runs at most once per session, never after a manual disconnect, and
    /// only attempts a connect when the remembered transport's scan results
    /// actually contain the device. A stale record is not an error.
    pub async fn auto_reconnect(&self) -> Result<Option<BluetoothDevice>> {
        {
            let mut inner = self.inner.lock().await;
            if inner.auto_connect_attempted {
                return Ok(None);
            }
            inner.auto_connect_attempted = true;
            if inner.manual_disconnect {
                info!("Auto-reconnect for {} skipped: manual disconnect earlier", self.role);
                return Ok(None);
            }
            if inner.active.is_some() {
                return Ok(None);
            }
        }

        let Some(record) = self.load_last_device() else {
            debug!("No persisted {} device; skipping auto-reconnect", self.role);
            return Ok(None);
        };

        if self.registry.is_scanning() {
            settle(self.options.settle_attempts, self.options.settle_delay, || {
                std::future::ready(!self.registry.is_scanning())
            })
            .await;
        } else if self.registry.devices().is_empty() {
            self.registry.scan().await?;
        }

        let Some(device) = self.registry.find(&record.id, record.transport) else {
            info!(
                "Last {} device {} ({}) not visible; no auto-reconnect",
                self.role, record.id, record.transport
            );
            return Ok(None);
        };

        info!("Auto-reconnecting {} to {}", self.role, device.display_name());
        self.connect_to_device(&device.id).await.map(Some)
    }

    /// Tears down the active link, if any. Safe to call when nothing is
    /// connected.
    pub async fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let had_active = inner.active.is_some();
        self.teardown(&mut inner).await;
        if had_active {
            inner.manual_disconnect = true;
            info!(
                "Manual disconnect for {}; auto-reconnect suppressed this session",
                self.role
            );
        }
        self.obs.lock().unwrap().failed = false;
        Ok(())
    }

    /// Sends receipt content through the active printer link, bounded by the
    /// print timeout. A timeout aborts the print but leaves the link up.
    pub async fn print_text(&self, text: &str) -> Result<()> {
        if self.role != DeviceRole::Printer {
            return Err(BridgeError::Transport(
                "print_text is only available on the printer manager".to_string(),
            ));
        }
        let mut inner = self.inner.lock().await;
        let active = inner
            .active
            .as_mut()
            .ok_or(BridgeError::NotConnected(self.role))?;

        match timeout(self.options.print_timeout, active.link.write(text.as_bytes())).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Print did not finish within {:?}; leaving the link up",
                    self.options.print_timeout
                );
                Err(BridgeError::PrintTimeout(self.options.print_timeout))
            }
        }
    }

    async fn open_link(&self, inner: &mut ManagerInner, device: &BluetoothDevice) -> Result<()> {
        let (frames_tx, frames_rx) = mpsc::channel(32);
        let link = match device.transport {
            Transport::Ble => self.ble.connect(device, frames_tx).await?,
            Transport::Classic => self.classic.connect(device, self.role, frames_tx).await?,
        };
        let cancel = CancellationToken::new();
        let pump = spawn_reading_pump(
            frames_rx,
            self.reading.clone(),
            self.reading_tx.clone(),
            cancel.clone(),
        );
        inner.active = Some(ActiveConnection {
            device: device.clone(),
            link,
            cancel,
            pump,
        });
        Ok(())
    }

    fn finish_connect(&self, device: &BluetoothDevice) -> Result<BluetoothDevice> {
        {
            let mut obs = self.obs.lock().unwrap();
            obs.state = ConnectionState::Connected;
            obs.connected = Some(device.clone());
            obs.failed = false;
        }
        self.persist_last_device(device);
        info!(
            "Connected {} to {} ({}) over {}",
            self.role,
            device.display_name(),
            device.address,
            device.transport
        );
        Ok(device.clone())
    }

    async fn teardown(&self, inner: &mut ManagerInner) {
        if let Some(mut active) = inner.active.take() {
            info!(
                "Releasing {} link to {} ({})",
                self.role,
                active.device.display_name(),
                active.device.transport
            );
            active.cancel.cancel();
            if let Err(err) = active.link.close().await {
                warn!("Link close reported: {}", err);
            }
            active.pump.abort();
        }
        {
            let mut obs = self.obs.lock().unwrap();
            obs.state = ConnectionState::Disconnected;
            obs.connected = None;
        }
        *self.reading.lock().unwrap() = None;
        let _ = self.reading_tx.send(None);
    }

    fn set_connecting(&self) {
        let mut obs = self.obs.lock().unwrap();
        obs.state = ConnectionState::Connecting;
        obs.connected = None;
        obs.failed = false;
    }

    fn set_failed(&self) {
        let mut obs = self.obs.lock().unwrap();
        obs.state = ConnectionState::Failed;
        obs.connected = None;
        obs.failed = true;
    }

    fn record_key(&self) -> &'static str {
        match self.role {
            DeviceRole::Scale => KEY_LAST_DEVICE_SCALE,
            DeviceRole::Printer => KEY_LAST_DEVICE_PRINTER,
        }
    }

    fn persist_last_device(&self, device: &BluetoothDevice) {
        let record = LastDeviceRecord::from_device(device);
        match serde_json::to_value(&record) {
            Ok(value) => {
                if let Err(err) = self.store.set(self.record_key(), value) {
                    warn!("Failed to persist last {} device: {}", self.role, err);
                }
            }
            Err(err) => warn!("Failed to encode last {} device: {}", self.role, err),
        }
    }

    fn load_last_device(&self) -> Option<LastDeviceRecord> {
        match self.store.get(self.record_key()) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!("Ignoring malformed last {} device record: {}", self.role, err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("Failed to read last {} device record: {}", self.role, err);
                None
            }
        }
    }
}

/// Consumes raw frames from the active link, parses them and publishes the
/// latest reading. A frame that fails to parse is logged by the parser and
/// skipped; the stream keeps going.
fn spawn_reading_pump(
    mut frames: mpsc::Receiver<RawFrame>,
    reading: Arc<StdMutex<Option<WeightReading>>>,
    reading_tx: Arc<watch::Sender<Option<WeightReading>>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = frames.recv() => match next {
                    Some(frame) => {
                        if let Some(parsed) = frame::parse_frame(&frame) {
                            debug!("Reading {} from {}", parsed.display, frame.source);
                            *reading.lock().unwrap() = Some(parsed.clone());
                            let _ = reading_tx.send(Some(parsed));
                        }
                    }
                    None => break,
                }
            }
        }
        debug!("Reading pump stopped");
    })
}
