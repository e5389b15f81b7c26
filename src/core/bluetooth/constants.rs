//! Constants used throughout the device bridge
//! This module contains all the constant values used by the Bluetooth core,
//! such as UUIDs, timeouts, retry budgets and classification tables.

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
pub const UUID_GENERIC_ATTRIBUTE_SERVICE: Uuid = Uuid::from_u128(0x00001801_0000_1000_8000_00805f9b34fb);
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);

/// The UUID of the standard Weight Scale service
pub const UUID_WEIGHT_SCALE_SERVICE: Uuid = Uuid::from_u128(0x0000181d_0000_1000_8000_00805f9b34fb);

/// The UUID of the standard Weight Measurement characteristic
pub const UUID_WEIGHT_MEASUREMENT_CHAR: Uuid = Uuid::from_u128(0x00002a9d_0000_1000_8000_00805f9b34fb);

/// Services that never carry scale data; skipped during characteristic search
pub const HOUSEKEEPING_SERVICES: [Uuid; 3] = [
    UUID_GENERIC_ACCESS_SERVICE,
    UUID_GENERIC_ATTRIBUTE_SERVICE,
    UUID_DEVICE_INFORMATION_SERVICE,
];

/// BLE scan window in seconds; the scan stops on its own after this
pub const BLE_SCAN_WINDOW_SECS: u64 = 15;

/// Grace added on top of a driver scan window before the registry gives up on it
pub const SCAN_GRACE_SECS: u64 = 3;

/// Classic active-discovery window in seconds
pub const CLASSIC_DISCOVERY_WINDOW_SECS: u64 = 10;

/// Delay before the Classic scan starts, so both radios don't kick off at once
pub const CLASSIC_SCAN_STAGGER_MS: u64 = 400;

/// Poll interval for BLE characteristics that are readable but not notifiable
pub const BLE_READ_POLL_INTERVAL_MS: u64 = 250;

/// Attempts and spacing for opening an RFCOMM socket; slow handshakes are normal
pub const SOCKET_OPEN_ATTEMPTS: u32 = 5;
pub const SOCKET_OPEN_RETRY_DELAY_MS: u64 = 500;

/// Default RFCOMM channel for serial-profile scales and printers
pub const RFCOMM_CHANNEL_DEFAULT: u8 = 1;

/// Wake commands written to a freshly connected scale, in order
pub const SCALE_WAKE_COMMANDS: [&[u8]; 3] = [b"\r\n", b"W", b"P"];

/// Spacing between wake command writes in milliseconds
pub const WAKE_COMMAND_GAP_MS: u64 = 200;

/// Print calls are abandoned after this many seconds
pub const PRINT_TIMEOUT_SECS: u64 = 30;

/// Bounded wait for scan results during auto-reconnect
pub const SCAN_SETTLE_ATTEMPTS: u32 = 6;
pub const SCAN_SETTLE_DELAY_MS: u64 = 500;

/// Persistence keys for the per-role last-device records
pub const KEY_LAST_DEVICE_SCALE: &str = "last_device_scale";
pub const KEY_LAST_DEVICE_PRINTER: &str = "last_device_printer";

/// Name fragments that mark a device as a probable scale
pub const SCALE_NAME_KEYWORDS: [&str; 10] = [
    "scale", "weight", "balance", "digital", "measure",
    "hc-05", "hc-06", "hm-10", "jdy", "spp",
];

/// MAC prefixes of serial-module manufacturers commonly embedded in scales
pub const SCALE_ADDRESS_PREFIXES: [&str; 7] = [
    "98:D3:31", "98:D3:32", "98:D3:33",
    "00:18:E4", "00:21:13", "20:16:04", "00:14:03",
];

/// Advertised names that carry no identification value
pub const PLACEHOLDER_NAMES: [&str; 3] = ["unknown", "n/a", "null"];

/// Name fragments of the receipt printer product family in the fleet
pub const PRINTER_NAME_HINTS: [&str; 2] = ["rpp", "printer"];
