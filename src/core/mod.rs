//! Core functionality for the device bridge

pub mod bluetooth;

pub use bluetooth::DeviceManager;
