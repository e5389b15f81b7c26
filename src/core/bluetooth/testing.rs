//! In-crate mock transports backing the registry and orchestrator tests.
//! Production drivers talk to real radios and are exercised on hardware;
//! everything above the driver traits is tested against these fakes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::core::bluetooth::ble::BleDriver;
use crate::core::bluetooth::classic::ClassicDriver;
use crate::core::bluetooth::types::{
    BluetoothDevice, DeviceLink, DeviceRole, FrameSource, RawFrame, Transport,
};
use crate::error::{BridgeError, Result};

/// Shared chronological log of connect attempts across both mock drivers,
/// entries like `"ble:<id>"` / `"classic:<id>"`.
pub type AttemptLog = Arc<Mutex<Vec<String>>>;

pub fn ble_device(address: &str, name: Option<&str>) -> BluetoothDevice {
    BluetoothDevice {
        id: address.to_string(),
        address: address.to_string(),
        name: name.map(str::to_string),
        transport: Transport::Ble,
        service_hints: Vec::new(),
        rssi: Some(-55),
    }
}

pub fn classic_device(address: &str, name: Option<&str>) -> BluetoothDevice {
    BluetoothDevice {
        id: address.to_string(),
        address: address.to_string(),
        name: name.map(str::to_string),
        transport: Transport::Classic,
        service_hints: Vec::new(),
        rssi: None,
    }
}

/// Observable state of a mock link, kept alive by tests after the link
/// itself moved into the manager.
#[derive(Default)]
pub struct LinkProbe {
    pub connected: AtomicBool,
    pub closed: AtomicBool,
    pub writes: Mutex<Vec<Vec<u8>>>,
}

impl LinkProbe {
    fn new() -> Arc<Self> {
        let probe = Self::default();
        probe.connected.store(true, Ordering::SeqCst);
        Arc::new(probe)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockLink {
    transport: Transport,
    probe: Arc<LinkProbe>,
    write_hangs: bool,
}

#[async_trait]
impl DeviceLink for MockLink {
    fn transport(&self) -> Transport {
        self.transport
    }

    async fn is_connected(&self) -> bool {
        self.probe.connected.load(Ordering::SeqCst) && !self.probe.is_closed()
    }

    async fn write(&mut self, payload: &[u8]) -> Result<()> {
        if self.write_hangs {
            sleep(Duration::from_secs(3600)).await;
        }
        self.probe.writes.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.probe.closed.store(true, Ordering::SeqCst);
        self.probe.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockBleDriver {
    devices: Mutex<Vec<BluetoothDevice>>,
    scan_calls: AtomicUsize,
    fail_connect: AtomicBool,
    log: AttemptLog,
}

impl Default for MockBleDriver {
    fn default() -> Self {
        Self::with_log(Arc::new(Mutex::new(Vec::new())))
    }
}

impl MockBleDriver {
    pub fn with_log(log: AttemptLog) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            scan_calls: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            log,
        }
    }

    pub fn add_device(&self, device: BluetoothDevice) {
        self.devices.lock().unwrap().push(device);
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BleDriver for MockBleDriver {
    async fn scan(&self, _window: Duration) -> Result<Vec<BluetoothDevice>> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn connect(
        &self,
        device: &BluetoothDevice,
        _frames: mpsc::Sender<RawFrame>,
    ) -> Result<Box<dyn DeviceLink>> {
        self.log.lock().unwrap().push(format!("ble:{}", device.id));
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("mock BLE connect refused".into()));
        }
        Ok(Box::new(MockLink {
            transport: Transport::Ble,
            probe: LinkProbe::new(),
            write_hangs: false,
        }))
    }
}

pub struct MockClassicDriver {
    devices: Mutex<Vec<BluetoothDevice>>,
    bonded: Mutex<HashSet<String>>,
    scripted_frames: Mutex<Vec<Vec<u8>>>,
    write_hangs: AtomicBool,
    scan_calls: AtomicUsize,
    links: Mutex<Vec<Arc<LinkProbe>>>,
    log: AttemptLog,
}

impl Default for MockClassicDriver {
    fn default() -> Self {
        Self::with_log(Arc::new(Mutex::new(Vec::new())))
    }
}

impl MockClassicDriver {
    pub fn with_log(log: AttemptLog) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            bonded: Mutex::new(HashSet::new()),
            scripted_frames: Mutex::new(Vec::new()),
            write_hangs: AtomicBool::new(false),
            scan_calls: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
            log,
        }
    }

    pub fn add_device(&self, device: BluetoothDevice) {
        self.devices.lock().unwrap().push(device);
    }

    pub fn clear_devices(&self) {
        self.devices.lock().unwrap().clear();
    }

    pub fn bond(&self, address: &str) {
        self.bonded.lock().unwrap().insert(address.to_lowercase());
    }

    /// Frames streamed to the caller after every successful connect.
    pub fn script_frames(&self, frames: Vec<Vec<u8>>) {
        *self.scripted_frames.lock().unwrap() = frames;
    }

    pub fn set_write_hangs(&self, hangs: bool) {
        self.write_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn last_link(&self) -> Option<Arc<LinkProbe>> {
        self.links.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ClassicDriver for MockClassicDriver {
    async fn scan(&self, _role: DeviceRole) -> Result<Vec<BluetoothDevice>> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn connect(
        &self,
        device: &BluetoothDevice,
        _role: DeviceRole,
        frames: mpsc::Sender<RawFrame>,
    ) -> Result<Box<dyn DeviceLink>> {
        self.log
            .lock()
            .unwrap()
            .push(format!("classic:{}", device.id));
        if !self
            .bonded
            .lock()
            .unwrap()
            .contains(&device.address.to_lowercase())
        {
            return Err(BridgeError::NotPaired {
                address: device.address.clone(),
            });
        }

        let probe = LinkProbe::new();
        self.links.lock().unwrap().push(probe.clone());

        let script = self.scripted_frames.lock().unwrap().clone();
        tokio::spawn(async move {
            for payload in script {
                sleep(Duration::from_millis(5)).await;
                let frame = RawFrame {
                    payload,
                    source: FrameSource::ClassicSocket,
                };
                if frames.send(frame).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(MockLink {
            transport: Transport::Classic,
            probe,
            write_hangs: self.write_hangs.load(Ordering::SeqCst),
        }))
    }
}
