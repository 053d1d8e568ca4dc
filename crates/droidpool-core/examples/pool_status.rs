//! Minimal embedding of the device pool.
//!
//! Uses a bridge stub with no devices attached, allocates the seeded
//! no-device slot, and prints the fleet report.

use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;

use droidpool_core::bridge::{
    BridgeError, BridgeListener, DebugBridge, Device, DeviceSelection, SystemRunner,
};
use droidpool_core::{DeviceManager, FreeDisposition, PoolOptions};

/// A bridge with nothing behind it. Real embeddings wrap their adb binding
/// here.
struct EmptyBridge;

impl DebugBridge for EmptyBridge {
    fn init(&self) -> Result<(), BridgeError> {
        Ok(())
    }
    fn terminate(&self) {}
    fn disconnect(&self) {}
    fn devices(&self) -> Vec<Device> {
        Vec::new()
    }
    fn add_listener(&self, _listener: Arc<dyn BridgeListener>) {}
    fn remove_listener(&self, _listener: &Arc<dyn BridgeListener>) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let manager = DeviceManager::new(
        Arc::new(EmptyBridge),
        Arc::new(SystemRunner),
        PoolOptions::default(),
    );
    manager.init().await?;

    let device = manager
        .allocate_matching(
            Some(Duration::from_secs(1)),
            Arc::new(DeviceSelection::null_device()),
        )
        .await?
        .expect("a no-device slot is always seeded");
    println!("allocated {}", device.serial());

    manager.write_device_report(&mut stdout())?;
    manager.write_emulator_stats(&mut stdout())?;

    manager.free(device, FreeDisposition::Available).await?;
    manager.terminate()?;
    Ok(())
}
