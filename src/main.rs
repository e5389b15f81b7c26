use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::info;

use dairy_device_bridge::{logging, AppState, BridgeConfig, DeviceRole};

/// Terminal demo: scan for the requested role, reconnect to the remembered
/// device (or the default pick), then stream readings or print a test
/// receipt. Run with `scale` (default) or `printer` as the first argument.
#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let role = match std::env::args().nth(1).as_deref() {
        Some("printer") => DeviceRole::Printer,
        _ => DeviceRole::Scale,
    };

    let config = BridgeConfig::load(Path::new(".")).await?;
    let state = AppState::new(&config).await?;
    let manager = state.manager(role);

    info!("Scanning for {} devices...", role);
    manager.scan_for_devices().await?;
    for device in manager.devices() {
        info!(
            "  {} [{}] via {} (rssi {:?})",
            device.display_name(),
            device.address,
            device.transport,
            device.rssi
        );
    }

    let connected = match manager.auto_reconnect().await? {
        Some(device) => Some(device),
        None => match manager.pick_default_device() {
            Some(device) => Some(manager.connect_to_device(&device.id).await?),
            None => None,
        },
    };
    let Some(device) = connected else {
        info!("No {} device available; exiting", role);
        return Ok(());
    };
    info!("Connected to {} [{}]", device.display_name(), device.address);

    match role {
        DeviceRole::Scale => {
            let mut readings = manager.subscribe_readings();
            let deadline = tokio::time::sleep(Duration::from_secs(30));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    changed = readings.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if let Some(reading) = readings.borrow_and_update().clone() {
                            info!("Weight: {}", reading.display);
                        }
                    }
                }
            }
        }
        DeviceRole::Printer => {
            manager
                .print_text("DAIRY DEVICE BRIDGE\nTEST RECEIPT\n\n")
                .await?;
            info!("Test receipt sent");
        }
    }

    manager.disconnect().await?;
    Ok(())
}
