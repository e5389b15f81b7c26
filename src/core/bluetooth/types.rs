//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Which physical transport a device was discovered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Ble,
    Classic,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Ble => write!(f, "ble"),
            Transport::Classic => write!(f, "classic"),
        }
    }
}

/// The logical purpose of a connection: weight input or receipt output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Scale,
    Printer,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Scale => write!(f, "scale"),
            DeviceRole::Printer => write!(f, "printer"),
        }
    }
}

/// Represents a discovered Bluetooth device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BluetoothDevice {
    /// Transport-native unique identifier (BLE peripheral id or MAC address)
    pub id: String,
    /// The address of the device (MAC address where the platform exposes one)
    pub address: String,
    /// The advertised name of the device, if available
    pub name: Option<String>,
    /// Which transport the device was discovered on
    pub transport: Transport,
    /// Advertised service UUIDs (BLE only), used for capability detection;
    /// transient, never part of the persisted record
    #[serde(skip)]
    pub service_hints: Vec<Uuid>,
    /// The signal strength (RSSI) of the device, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

impl BluetoothDevice {
    /// Identity key used for deduplication; ids are compared case-insensitively
    pub fn normalized_id(&self) -> String {
        self.id.to_lowercase()
    }

    /// True if `needle` matches this device's id or address, ignoring case
    pub fn matches_id(&self, needle: &str) -> bool {
        self.id.eq_ignore_ascii_case(needle) || self.address.eq_ignore_ascii_case(needle)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unnamed)")
    }
}

/// Where a raw payload came from, for logging and parser diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    BleNotify,
    BlePoll,
    ClassicSocket,
}

impl fmt::Display for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSource::BleNotify => write!(f, "ble-notify"),
            FrameSource::BlePoll => write!(f, "ble-poll"),
            FrameSource::ClassicSocket => write!(f, "classic-socket"),
        }
    }
}

/// A raw payload received from a device, before parsing
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub payload: Vec<u8>,
    pub source: FrameSource,
}

/// A successfully parsed weight reading
#[derive(Debug, Clone, PartialEq)]
pub struct WeightReading {
    /// Parsed numeric value in the scale's native unit
    pub value: f64,
    /// Fixed-point rendering with two decimals, stable across frames
    pub display: String,
    pub received_at: DateTime<Utc>,
}

impl WeightReading {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            display: format!("{:.2}", value),
            received_at: Utc::now(),
        }
    }
}

/// Connection lifecycle as observed by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// An active transport handle, exclusively owned by the connection that
/// created it. Closing is idempotent and releases every driver resource
/// (subscription, poll task, socket) attached to the link.
#[async_trait]
pub trait DeviceLink: Send {
    fn transport(&self) -> Transport;

    /// Whether the underlying link still reports connected
    async fn is_connected(&self) -> bool;

    /// Transmit a payload (printer role); read-only links reject this
    async fn write(&mut self, payload: &[u8]) -> Result<()>;

    /// Tear down the link; safe to call more than once
    async fn close(&mut self) -> Result<()>;
}

/// The minimal device subset persisted per role for auto-reconnect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastDeviceRecord {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub transport: Transport,
    /// RFC 3339 timestamp of the successful connection that wrote this record
    pub saved_at: String,
}

impl LastDeviceRecord {
    pub fn from_device(device: &BluetoothDevice) -> Self {
        Self {
            id: device.id.clone(),
            address: device.address.clone(),
            name: device.name.clone(),
            transport: device.transport,
            saved_at: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, name: Option<&str>) -> BluetoothDevice {
        BluetoothDevice {
            id: id.to_string(),
            address: id.to_string(),
            name: name.map(str::to_string),
            transport: Transport::Classic,
            service_hints: Vec::new(),
            rssi: None,
        }
    }

    #[test]
    fn id_matching_ignores_case() {
        let d = device("AA:BB:CC:DD:EE:FF", Some("HC-05"));
        assert!(d.matches_id("aa:bb:cc:dd:ee:ff"));
        assert!(!d.matches_id("aa:bb:cc:dd:ee:00"));
        assert_eq!(d.normalized_id(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn last_device_record_uses_wire_shape() {
        let record = LastDeviceRecord::from_device(&device("AA:BB:CC:DD:EE:FF", Some("XH2507")));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "classic");
        assert_eq!(json["id"], "AA:BB:CC:DD:EE:FF");
        assert!(json["saved_at"].as_str().unwrap().contains('T'));

        let back: LastDeviceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.transport, Transport::Classic);
    }

    #[test]
    fn reading_display_is_fixed_point() {
        assert_eq!(WeightReading::new(13.0).display, "13.00");
        assert_eq!(WeightReading::new(45.229).display, "45.23");
    }
}
