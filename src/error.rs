//! Unified error types for the device bridge.
//!
//! Transport-level failures are converted to [`BridgeError`] at the driver
//! boundary; raw `bluest`/`bluer` errors never reach the orchestrator or
//! its callers.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::core::bluetooth::types::DeviceRole;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// OS-level Bluetooth or location permission refused
    #[error("Bluetooth permission denied. Grant the Bluetooth permission and scan again.")]
    PermissionDenied,

    /// The adapter is off or missing
    #[error("Bluetooth is disabled or no adapter is available. Enable Bluetooth and retry.")]
    BluetoothDisabled,

    /// Classic devices must be paired at the OS level before we can open a socket
    #[error("Device {address} is not paired. Pair it in the system Bluetooth settings first.")]
    NotPaired { address: String },

    /// Link-layer connection succeeded but no usable data channel was found
    #[error("Device {id} exposes no notifiable or readable data characteristic.")]
    NoCompatibleCharacteristic { id: String },

    /// The requested id is absent from the current scan results
    #[error("Device '{0}' not found in scan results. Rescan and try again.")]
    DeviceNotFound(String),

    #[error("Connection attempt timed out after {0:?}.")]
    ConnectionTimeout(Duration),

    #[error("Print did not complete within {0:?}.")]
    PrintTimeout(Duration),

    /// An operation that requires an active connection was called without one
    #[error("No {0} is connected.")]
    NotConnected(DeviceRole),

    /// Catch-all for underlying platform errors, message passed through
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// True when the right user action is a rescan rather than a settings fix
    pub fn is_recoverable_by_rescan(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_) | Self::ConnectionTimeout(_))
    }

    /// True when the user has to change something outside the app first
    pub fn needs_user_intervention(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::BluetoothDisabled | Self::NotPaired { .. }
        )
    }
}

impl From<bluest::Error> for BridgeError {
    fn from(err: bluest::Error) -> Self {
        // The platform error kinds differ per OS; the rendered message is the
        // stable part
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("permission") || lowered.contains("not authorized") {
            Self::PermissionDenied
        } else if lowered.contains("powered off") || lowered.contains("disabled") {
            Self::BluetoothDisabled
        } else {
            Self::Transport(message)
        }
    }
}

impl From<bluer::Error> for BridgeError {
    fn from(err: bluer::Error) -> Self {
        match err.kind {
            bluer::ErrorKind::NotReady => Self::BluetoothDisabled,
            bluer::ErrorKind::NotAuthorized => Self::PermissionDenied,
            _ => Self::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(BridgeError::DeviceNotFound("x".into()).is_recoverable_by_rescan());
        assert!(!BridgeError::PermissionDenied.is_recoverable_by_rescan());

        assert!(BridgeError::NotPaired { address: "AA".into() }.needs_user_intervention());
        assert!(BridgeError::BluetoothDisabled.needs_user_intervention());
        assert!(!BridgeError::Transport("boom".into()).needs_user_intervention());
    }

    #[test]
    fn messages_are_actionable() {
        let err = BridgeError::NotPaired { address: "AA:BB".into() };
        assert!(err.to_string().contains("Pair it"));

        let err = BridgeError::DeviceNotFound("scale-1".into());
        assert!(err.to_string().contains("Rescan"));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BridgeError>();
        assert_sync::<BridgeError>();
    }
}
