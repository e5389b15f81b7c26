//! Heuristic device classification.
//!
//! Field scales ship with generic serial modules and rarely advertise a
//! meaningful name, so the scale filter combines name keywords, known
//! manufacturer MAC prefixes and a manual allow-list. Unnamed devices are
//! never accepted on their own; the surrounding radio noise would flood
//! the device list otherwise.

use std::collections::HashSet;

use log::debug;

use crate::core::bluetooth::constants::{
    PLACEHOLDER_NAMES, PRINTER_NAME_HINTS, SCALE_ADDRESS_PREFIXES, SCALE_NAME_KEYWORDS,
    UUID_WEIGHT_SCALE_SERVICE,
};
use crate::core::bluetooth::types::{BluetoothDevice, DeviceRole};

/// Addresses the operator has manually approved as scales.
pub type ApprovedAddresses = HashSet<String>;

/// Returns true if `device` should be offered to the caller for `role`.
///
/// Printer discovery is not filtered here; the orchestrator picks a printer
/// by product-family name hint with a first-device fallback.
pub fn matches_role(device: &BluetoothDevice, role: DeviceRole, approved: &ApprovedAddresses) -> bool {
    match role {
        DeviceRole::Scale => is_probable_scale(device, approved),
        DeviceRole::Printer => true,
    }
}

/// Picks the preferred printer from a scan result list: the first device
/// whose name contains a known product-family hint, else the first device.
pub fn preferred_printer<'a>(devices: &'a [BluetoothDevice]) -> Option<&'a BluetoothDevice> {
    devices
        .iter()
        .find(|d| {
            d.name
                .as_deref()
                .map(|n| {
                    let n = n.to_lowercase();
                    PRINTER_NAME_HINTS.iter().any(|hint| n.contains(hint))
                })
                .unwrap_or(false)
        })
        .or_else(|| devices.first())
}

fn is_probable_scale(device: &BluetoothDevice, approved: &ApprovedAddresses) -> bool {
    if approved
        .iter()
        .any(|addr| device.address.eq_ignore_ascii_case(addr))
    {
        return true;
    }

    if device
        .service_hints
        .iter()
        .any(|uuid| *uuid == UUID_WEIGHT_SCALE_SERVICE)
    {
        return true;
    }

    if has_meaningful_name(device) {
        let name = device.name.as_deref().unwrap_or_default().to_lowercase();
        if SCALE_NAME_KEYWORDS.iter().any(|kw| name.contains(kw)) {
            return true;
        }
        if has_known_prefix(&device.address) {
            return true;
        }
        debug!(
            "Dropping {} ({}): name matched no scale keyword",
            device.display_name(),
            device.address
        );
        false
    } else {
        // Unnamed devices only pass via an address match, never by default
        has_known_prefix(&device.address)
    }
}

fn has_meaningful_name(device: &BluetoothDevice) -> bool {
    match device.name.as_deref() {
        None => false,
        Some(name) => {
            let trimmed = name.trim();
            !trimmed.is_empty()
                && !PLACEHOLDER_NAMES
                    .iter()
                    .any(|p| trimmed.eq_ignore_ascii_case(p))
        }
    }
}

fn has_known_prefix(address: &str) -> bool {
    let upper = address.to_uppercase();
    SCALE_ADDRESS_PREFIXES
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::Transport;

    fn device(name: Option<&str>, address: &str) -> BluetoothDevice {
        BluetoothDevice {
            id: address.to_string(),
            address: address.to_string(),
            name: name.map(str::to_string),
            transport: Transport::Classic,
            service_hints: Vec::new(),
            rssi: None,
        }
    }

    #[test]
    fn named_scale_module_matches() {
        let d = device(Some("HC-05 Scale"), "11:22:33:44:55:66");
        assert!(matches_role(&d, DeviceRole::Scale, &HashSet::new()));
    }

    #[test]
    fn phone_does_not_match() {
        let d = device(Some("iPhone"), "11:22:33:44:55:66");
        assert!(!matches_role(&d, DeviceRole::Scale, &HashSet::new()));
    }

    #[test]
    fn unnamed_device_needs_address_evidence() {
        let unnamed = device(None, "11:22:33:44:55:66");
        assert!(!matches_role(&unnamed, DeviceRole::Scale, &HashSet::new()));

        let hc05 = device(None, "98:d3:31:aa:bb:cc");
        assert!(matches_role(&hc05, DeviceRole::Scale, &HashSet::new()));

        let placeholder = device(Some("Unknown"), "11:22:33:44:55:66");
        assert!(!matches_role(&placeholder, DeviceRole::Scale, &HashSet::new()));
    }

    #[test]
    fn allow_list_overrides_heuristics() {
        let d = device(Some("XH2507"), "11:22:33:44:55:66");
        assert!(!matches_role(&d, DeviceRole::Scale, &HashSet::new()));

        let approved: ApprovedAddresses = ["11:22:33:44:55:66".to_string()].into_iter().collect();
        assert!(matches_role(&d, DeviceRole::Scale, &approved));
    }

    #[test]
    fn weight_service_hint_matches() {
        let mut d = device(Some("BT Device"), "11:22:33:44:55:66");
        d.service_hints = vec![UUID_WEIGHT_SCALE_SERVICE];
        assert!(matches_role(&d, DeviceRole::Scale, &HashSet::new()));
    }

    #[test]
    fn printers_are_not_content_filtered() {
        let d = device(Some("iPhone"), "11:22:33:44:55:66");
        assert!(matches_role(&d, DeviceRole::Printer, &HashSet::new()));
    }

    #[test]
    fn preferred_printer_prefers_family_hint() {
        let devices = vec![
            device(Some("Car Stereo"), "01:01:01:01:01:01"),
            device(Some("RPP02N"), "02:02:02:02:02:02"),
        ];
        assert_eq!(preferred_printer(&devices).unwrap().address, "02:02:02:02:02:02");

        let no_hint = vec![device(Some("Car Stereo"), "01:01:01:01:01:01")];
        assert_eq!(preferred_printer(&no_hint).unwrap().address, "01:01:01:01:01:01");

        assert!(preferred_printer(&[]).is_none());
    }
}
