//! Bluetooth Classic (RFCOMM) transport driver.
//!
//! Serves both roles: serial-profile scales stream readings over the
//! socket, receipt printers accept raw payload writes. Devices must be
//! paired at the OS level before this driver can open a socket; pairing is
//! never initiated here.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, Address, Session};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{
    SCALE_WAKE_COMMANDS, SOCKET_OPEN_ATTEMPTS, SOCKET_OPEN_RETRY_DELAY_MS, WAKE_COMMAND_GAP_MS,
};
use crate::core::bluetooth::filter::{self, ApprovedAddresses};
use crate::core::bluetooth::types::{
    BluetoothDevice, DeviceLink, DeviceRole, FrameSource, RawFrame, Transport,
};
use crate::error::{BridgeError, Result};
use crate::utils::retry_with_delay;

/// Scan and connect operations for the Classic side of the bridge.
#[async_trait]
pub trait ClassicDriver: Send + Sync {
    /// Enumerates bonded devices and runs best-effort active discovery,
    /// merged, deduplicated and filtered for `role`.
    async fn scan(&self, role: DeviceRole) -> Result<Vec<BluetoothDevice>>;

    /// Opens the RFCOMM socket and starts streaming received bytes into
    /// `frames`. Fails with [`BridgeError::NotPaired`] when the device has
    /// not been bonded yet.
    async fn connect(
        &self,
        device: &BluetoothDevice,
        role: DeviceRole,
        frames: mpsc::Sender<RawFrame>,
    ) -> Result<Box<dyn DeviceLink>>;
}

/// Production driver over BlueZ.
pub struct BluezClassicDriver {
    // The session owns the D-Bus connection backing the adapter
    _session: Session,
    adapter: Adapter,
    approved: ApprovedAddresses,
    discovery_window: Duration,
    channel: u8,
}

impl BluezClassicDriver {
    pub async fn new(
        approved: ApprovedAddresses,
        discovery_window: Duration,
        channel: u8,
    ) -> Result<Self> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        if !adapter.is_powered().await? {
            return Err(BridgeError::BluetoothDisabled);
        }
        info!("Classic adapter {} is powered", adapter.name());
        Ok(Self {
            _session: session,
            adapter,
            approved,
            discovery_window,
            channel,
        })
    }

    async fn describe(&self, addr: Address) -> BluetoothDevice {
        let name = match self.adapter.device(addr) {
            Ok(device) => device.name().await.ok().flatten(),
            Err(_) => None,
        };
        let rssi = match self.adapter.device(addr) {
            Ok(device) => device.rssi().await.ok().flatten(),
            Err(_) => None,
        };
        BluetoothDevice {
            id: addr.to_string(),
            address: addr.to_string(),
            name,
            transport: Transport::Classic,
            service_hints: Vec::new(),
            rssi,
        }
    }

    async fn is_bonded(&self, addr: Address) -> bool {
        match self.adapter.device(addr) {
            Ok(device) => device.is_paired().await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ClassicDriver for BluezClassicDriver {
    async fn scan(&self, role: DeviceRole) -> Result<Vec<BluetoothDevice>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::new();

        // Bonded devices first: scales and printers in the fleet are paired
        // once during provisioning
        for addr in self.adapter.device_addresses().await? {
            if !self.is_bonded(addr).await {
                continue;
            }
            let candidate = self.describe(addr).await;
            if !seen.insert(candidate.normalized_id()) {
                continue;
            }
            if filter::matches_role(&candidate, role, &self.approved) {
                info!(
                    "Found bonded {} candidate {} ({})",
                    role,
                    candidate.display_name(),
                    candidate.address
                );
                results.push(candidate);
            }
        }

        // Active discovery is best-effort; adapters without it just serve
        // the bonded list
        match self.adapter.discover_devices().await {
            Ok(events) => {
                tokio::pin!(events);
                let deadline = sleep(self.discovery_window);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = &mut deadline => break,
                        event = events.next() => match event {
                            Some(AdapterEvent::DeviceAdded(addr)) => {
                                let candidate = self.describe(addr).await;
                                if !seen.insert(candidate.normalized_id()) {
                                    continue;
                                }
                                if filter::matches_role(&candidate, role, &self.approved) {
                                    info!(
                                        "Discovered {} candidate {} ({})",
                                        role,
                                        candidate.display_name(),
                                        candidate.address
                                    );
                                    results.push(candidate);
                                }
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }
            Err(err) => {
                debug!("Active discovery unavailable, using bonded list only: {}", err);
            }
        }

        Ok(results)
    }

    async fn connect(
        &self,
        device: &BluetoothDevice,
        role: DeviceRole,
        frames: mpsc::Sender<RawFrame>,
    ) -> Result<Box<dyn DeviceLink>> {
        let addr: Address = device
            .address
            .parse()
            .map_err(|_| BridgeError::Transport(format!("invalid address {}", device.address)))?;

        if !self.is_bonded(addr).await {
            return Err(BridgeError::NotPaired {
                address: device.address.clone(),
            });
        }

        // Slow socket handshakes are normal on these modules; retry before
        // declaring failure
        let channel = self.channel;
        let stream = retry_with_delay(
            SOCKET_OPEN_ATTEMPTS,
            Duration::from_millis(SOCKET_OPEN_RETRY_DELAY_MS),
            || {
                let target = SocketAddr::new(addr, channel);
                async move {
                    Stream::connect(target)
                        .await
                        .map_err(|e| BridgeError::Transport(format!("RFCOMM connect to {addr}: {e}")))
                }
            },
        )
        .await?;
        info!("RFCOMM socket to {} open on channel {}", addr, channel);

        let (read_half, mut write_half) = tokio::io::split(stream);
        let connected = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        spawn_socket_reader(read_half, frames, connected.clone(), cancel.clone());

        if role == DeviceRole::Scale {
            wake_scale(&mut write_half).await;
        }

        Ok(Box::new(ClassicLink {
            write_half,
            connected,
            cancel,
            closed: false,
        }))
    }
}

/// Reads the socket until cancelled or the peer drops; every chunk goes to
/// the frame parser upstream.
fn spawn_socket_reader(
    mut read_half: ReadHalf<Stream>,
    frames: mpsc::Sender<RawFrame>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                read = read_half.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("RFCOMM peer closed the socket");
                        connected.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(n) => {
                        let frame = RawFrame {
                            payload: buf[..n].to_vec(),
                            source: FrameSource::ClassicSocket,
                        };
                        if frames.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        // An errored read means the device went away; stop
                        // rather than retry forever
                        warn!("RFCOMM read failed: {}", err);
                        connected.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }
        debug!("RFCOMM reader stopped");
    });
}

/// Coaxes passive scales into streaming by sending the wake sequence.
/// Write failures are logged only; the read loop decides link health.
async fn wake_scale(write_half: &mut WriteHalf<Stream>) {
    for command in SCALE_WAKE_COMMANDS {
        if let Err(err) = write_half.write_all(command).await {
            warn!("Wake command write failed: {}", err);
            return;
        }
        sleep(Duration::from_millis(WAKE_COMMAND_GAP_MS)).await;
    }
    debug!("Wake sequence sent");
}

/// Active RFCOMM link; owns the write half and the reader's cancel token.
struct ClassicLink {
    write_half: WriteHalf<Stream>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    closed: bool,
}

#[async_trait]
impl DeviceLink for ClassicLink {
    fn transport(&self) -> Transport {
        Transport::Classic
    }

    async fn is_connected(&self) -> bool {
        !self.closed && self.connected.load(Ordering::SeqCst)
    }

    async fn write(&mut self, payload: &[u8]) -> Result<()> {
        self.write_half
            .write_all(payload)
            .await
            .map_err(|e| BridgeError::Transport(format!("RFCOMM write: {e}")))?;
        self.write_half
            .flush()
            .await
            .map_err(|e| BridgeError::Transport(format!("RFCOMM flush: {e}")))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.cancel.cancel();
        if let Err(err) = self.write_half.shutdown().await {
            debug!("RFCOMM shutdown reported: {}", err);
        }
        self.connected.store(false, Ordering::SeqCst);
        self.closed = true;
        Ok(())
    }
}
