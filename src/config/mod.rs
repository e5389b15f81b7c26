//! Configuration for the device bridge.

pub mod bridge_config;

pub use bridge_config::BridgeConfig;
