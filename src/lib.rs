//! Dairy device bridge library
//! Unified Bluetooth orchestration for the weighing scales and receipt
//! printers used by collection-route field terminals: discovery over BLE
//! and Classic, transport-preferring connection lifecycle, weight frame
//! parsing and last-device persistence.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod storage;
pub mod utils;

pub use crate::config::BridgeConfig;
pub use crate::core::bluetooth::{
    BluetoothDevice, ConnectionState, DeviceManager, DeviceRole, Transport, WeightReading,
};
pub use crate::error::{BridgeError, Result};
pub use crate::state::AppState;
