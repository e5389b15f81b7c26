//! BLE transport driver.
//!
//! Owns scanning, connection, characteristic negotiation and frame
//! subscription for BLE peripherals, built on the `bluest` cross-platform
//! adapter. Discovered peripheral handles are cached per scan so a later
//! connect can resolve the platform object from a plain device id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{
    BLE_READ_POLL_INTERVAL_MS, HOUSEKEEPING_SERVICES, UUID_WEIGHT_MEASUREMENT_CHAR,
    UUID_WEIGHT_SCALE_SERVICE,
};
use crate::core::bluetooth::filter::{self, ApprovedAddresses};
use crate::core::bluetooth::types::{
    BluetoothDevice, DeviceLink, DeviceRole, FrameSource, RawFrame, Transport,
};
use crate::error::{BridgeError, Result};

/// Scan and connect operations for the BLE side of the bridge.
#[async_trait]
pub trait BleDriver: Send + Sync {
    /// Scans with duplicate suppression for up to `window`, applying the
    /// scale filter inline. Only scales use BLE in this fleet.
    async fn scan(&self, window: Duration) -> Result<Vec<BluetoothDevice>>;

    /// Opens the link and starts streaming raw frames into `frames`.
    async fn connect(
        &self,
        device: &BluetoothDevice,
        frames: mpsc::Sender<RawFrame>,
    ) -> Result<Box<dyn DeviceLink>>;
}

/// Production driver over the platform BLE stack.
pub struct BluestBleDriver {
    adapter: Adapter,
    approved: ApprovedAddresses,
    /// Peripheral handles from the most recent scan, keyed by normalized id
    discovered: Arc<Mutex<HashMap<String, Device>>>,
}

impl BluestBleDriver {
    pub async fn new(approved: ApprovedAddresses) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or(BridgeError::BluetoothDisabled)?;
        adapter.wait_available().await?;
        info!("BLE adapter is available");
        Ok(Self {
            adapter,
            approved,
            discovered: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn record_device(&self, id: &str, handle: Device) {
        self.discovered
            .lock()
            .unwrap()
            .insert(id.to_lowercase(), handle);
    }

    fn lookup_device(&self, id: &str) -> Option<Device> {
        self.discovered.lock().unwrap().get(&id.to_lowercase()).cloned()
    }
}

fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap();
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}

#[async_trait]
impl BleDriver for BluestBleDriver {
    async fn scan(&self, window: Duration) -> Result<Vec<BluetoothDevice>> {
        self.discovered.lock().unwrap().clear();

        info!("Starting BLE scan ({:?} window)", window);
        let mut scan_stream = self.adapter.scan(&[]).await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        let deadline = sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!("BLE scan window elapsed");
                    break;
                }
                next = scan_stream.next() => {
                    let Some(discovered) = next else {
                        debug!("BLE scan stream ended early");
                        break;
                    };
                    let id = discovered.device.id().to_string();
                    if !seen.insert(id.to_lowercase()) {
                        continue;
                    }

                    let name = discovered
                        .device
                        .name()
                        .ok()
                        .or_else(|| discovered.adv_data.local_name.clone());
                    let candidate = BluetoothDevice {
                        address: extract_mac_address(&id).unwrap_or_else(|| id.clone()),
                        id,
                        name,
                        transport: Transport::Ble,
                        service_hints: discovered.adv_data.services.to_vec(),
                        rssi: discovered.rssi,
                    };

                    if !filter::matches_role(&candidate, DeviceRole::Scale, &self.approved) {
                        continue;
                    }

                    info!(
                        "Found BLE scale candidate {} ({}), rssi {:?}",
                        candidate.display_name(),
                        candidate.address,
                        candidate.rssi
                    );
                    self.record_device(&candidate.id, discovered.device.clone());
                    results.push(candidate);
                }
            }
        }

        Ok(results)
    }

    async fn connect(
        &self,
        device: &BluetoothDevice,
        frames: mpsc::Sender<RawFrame>,
    ) -> Result<Box<dyn DeviceLink>> {
        let handle = self
            .lookup_device(&device.id)
            .ok_or_else(|| BridgeError::DeviceNotFound(device.id.clone()))?;

        if !handle.is_connected().await {
            info!("Opening BLE link to {}", device.id);
            self.adapter.connect_device(&handle).await?;
        }

        match negotiate_data_channel(&handle).await {
            Ok(channel) => {
                let cancel = CancellationToken::new();
                spawn_frame_pump(handle.clone(), channel, frames, cancel.clone());
                Ok(Box::new(BleLink {
                    adapter: self.adapter.clone(),
                    device: handle,
                    cancel,
                }))
            }
            Err(err) => {
                // No usable data channel is a full connection failure; release
                // the link so nothing dangles
                if let Err(close_err) = self.adapter.disconnect_device(&handle).await {
                    warn!("Releasing failed BLE link: {}", close_err);
                }
                Err(err)
            }
        }
    }
}

/// The data channel selected during characteristic negotiation.
enum DataChannel {
    Notify(Characteristic),
    Poll(Characteristic),
}

/// Searches for the designated weight characteristic, then falls back to the
/// first notifiable (preferred) or readable characteristic outside the
/// housekeeping services.
async fn negotiate_data_channel(handle: &Device) -> Result<DataChannel> {
    let services = handle.services().await?;

    let mut fallback_notify: Option<Characteristic> = None;
    let mut fallback_read: Option<Characteristic> = None;

    for service in &services {
        if HOUSEKEEPING_SERVICES.contains(&service.uuid()) {
            continue;
        }
        let is_weight_service = service.uuid() == UUID_WEIGHT_SCALE_SERVICE;

        for characteristic in service.characteristics().await? {
            let props = match characteristic.properties().await {
                Ok(props) => props,
                Err(err) => {
                    debug!("Skipping characteristic {}: {}", characteristic.uuid(), err);
                    continue;
                }
            };

            if is_weight_service && characteristic.uuid() == UUID_WEIGHT_MEASUREMENT_CHAR {
                info!("Found weight measurement characteristic");
                return Ok(if props.notify {
                    DataChannel::Notify(characteristic)
                } else {
                    DataChannel::Poll(characteristic)
                });
            }

            if props.notify && fallback_notify.is_none() {
                fallback_notify = Some(characteristic);
            } else if props.read && fallback_read.is_none() {
                fallback_read = Some(characteristic);
            }
        }
    }

    if let Some(characteristic) = fallback_notify {
        info!("Using fallback notifiable characteristic {}", characteristic.uuid());
        return Ok(DataChannel::Notify(characteristic));
    }
    if let Some(characteristic) = fallback_read {
        info!("Using fallback readable characteristic {}", characteristic.uuid());
        return Ok(DataChannel::Poll(characteristic));
    }

    Err(BridgeError::NoCompatibleCharacteristic {
        id: handle.id().to_string(),
    })
}

/// Streams raw frames until cancelled or the link drops. Malformed frames
/// are the parser's problem; this task only moves bytes.
fn spawn_frame_pump(
    handle: Device,
    channel: DataChannel,
    frames: mpsc::Sender<RawFrame>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        match channel {
            DataChannel::Notify(characteristic) => {
                let stream = match characteristic.notify().await {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!("Failed to subscribe to notifications: {}", err);
                        return;
                    }
                };
                tokio::pin!(stream);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        next = stream.next() => match next {
                            Some(Ok(value)) => {
                                let frame = RawFrame {
                                    payload: value.to_vec(),
                                    source: FrameSource::BleNotify,
                                };
                                if frames.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                warn!("Notification stream error: {}", err);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            DataChannel::Poll(characteristic) => {
                let interval = Duration::from_millis(BLE_READ_POLL_INTERVAL_MS);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(interval) => {
                            match characteristic.read().await {
                                Ok(value) => {
                                    let frame = RawFrame {
                                        payload: value.to_vec(),
                                        source: FrameSource::BlePoll,
                                    };
                                    if frames.send(frame).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    // A read on a dropped link ends the poll;
                                    // transient errors keep it alive
                                    if !handle.is_connected().await {
                                        debug!("Poll ended, link dropped: {}", err);
                                        break;
                                    }
                                    debug!("Characteristic read failed: {}", err);
                                }
                            }
                        }
                    }
                }
            }
        }
        debug!("BLE frame pump stopped");
    });
}

/// Active BLE link; exclusively owns the subscription it was created with.
struct BleLink {
    adapter: Adapter,
    device: Device,
    cancel: CancellationToken,
}

#[async_trait]
impl DeviceLink for BleLink {
    fn transport(&self) -> Transport {
        Transport::Ble
    }

    async fn is_connected(&self) -> bool {
        self.device.is_connected().await
    }

    async fn write(&mut self, _payload: &[u8]) -> Result<()> {
        Err(BridgeError::Transport(
            "BLE links in this fleet are read-only".to_string(),
        ))
    }

    async fn close(&mut self) -> Result<()> {
        self.cancel.cancel();
        if self.device.is_connected().await {
            if let Err(err) = self.adapter.disconnect_device(&self.device).await {
                warn!("BLE disconnect reported: {}", err);
            }
        }
        Ok(())
    }
}
