//! Bluetooth functionality for the device bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, and receiving data from field scales and receipt printers
//! over both BLE and Classic (RFCOMM) transports.

pub mod ble;
pub mod classic;
pub mod constants;
pub mod filter;
pub mod frame;
pub mod manager;
pub mod registry;
pub mod types;

#[cfg(test)]
pub mod testing;

// Re-export types that should be publicly accessible
pub use ble::{BleDriver, BluestBleDriver};
pub use classic::{BluezClassicDriver, ClassicDriver};
pub use manager::{DeviceManager, ManagerOptions};
pub use registry::{DeviceRegistry, ScanOptions};
pub use types::{
    BluetoothDevice, ConnectionState, DeviceLink, DeviceRole, FrameSource, LastDeviceRecord,
    RawFrame, Transport, WeightReading,
};
