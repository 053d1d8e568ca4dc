//! Readiness probing of newly discovered devices.
//!
//! Every device the bridge reports goes through a short probe before it is
//! exposed for allocation: the prober registers the serial in a checking
//! table (so duplicate discoveries are ignored), waits for the device to
//! answer a shell probe, and only then inserts it into the availability
//! queue. Probes run concurrently; a synchronous mode runs them inline for
//! deterministic tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use droidpool_bridge::{Device, DeviceStateMonitor};

use crate::config::SharedPoolMonitor;
use crate::queue::AvailableDeviceQueue;

pub(crate) struct ReadinessProber {
    deadline: Duration,
    checking: Mutex<HashMap<String, Arc<dyn DeviceStateMonitor>>>,
    queue: Arc<AvailableDeviceQueue>,
    observer: SharedPoolMonitor,
    synchronous: AtomicBool,
}

impl ReadinessProber {
    pub(crate) fn new(
        deadline: Duration,
        queue: Arc<AvailableDeviceQueue>,
        observer: SharedPoolMonitor,
    ) -> Self {
        Self {
            deadline,
            checking: Mutex::new(HashMap::new()),
            queue,
            observer,
            synchronous: AtomicBool::new(false),
        }
    }

    /// Run probes inline on the discovery caller instead of spawning.
    pub(crate) fn set_synchronous(&self, synchronous: bool) {
        self.synchronous.store(synchronous, Ordering::Relaxed);
    }

    /// Whether `serial` is currently mid-probe.
    pub(crate) fn is_checking(&self, serial: &str) -> bool {
        self.checking.lock().contains_key(serial)
    }

    /// Monitor of an in-flight probe, for state updates from the bridge.
    pub(crate) fn monitor_for(&self, serial: &str) -> Option<Arc<dyn DeviceStateMonitor>> {
        self.checking.lock().get(serial).cloned()
    }

    /// Serials currently mid-probe.
    pub(crate) fn checking_serials(&self) -> Vec<String> {
        self.checking.lock().keys().cloned().collect()
    }

    /// Probe `device` and promote it into the availability queue on success.
    /// A serial already mid-probe is ignored.
    pub(crate) async fn check_device(
        self: &Arc<Self>,
        device: Device,
        monitor: Arc<dyn DeviceStateMonitor>,
    ) {
        {
            let mut checking = self.checking.lock();
            if checking.contains_key(&device.serial) {
                debug!("already checking new device {}, ignoring", device.serial);
                return;
            }
            checking.insert(device.serial.clone(), Arc::clone(&monitor));
        }

        let prober = Arc::clone(self);
        let probe = async move { prober.run_probe(device, monitor).await };
        if self.synchronous.load(Ordering::Relaxed) {
            probe.await;
        } else {
            tokio::spawn(probe);
        }
    }

    async fn run_probe(&self, device: Device, monitor: Arc<dyn DeviceStateMonitor>) {
        let serial = device.serial.clone();
        debug!("checking new device {serial} responsiveness");
        if monitor.wait_for_shell(self.deadline).await {
            info!("detected new device {serial}");
            self.add_available(device);
        } else {
            error!("device {serial} is not responsive to a shell probe, not adding to available pool");
        }
        self.checking.lock().remove(&serial);
    }

    /// Insert directly into the availability queue, bypassing the probe.
    /// Used for placeholders and fastboot devices.
    pub(crate) fn add_available(&self, device: Device) {
        if let Some(existing) = self.queue.add_unique(device) {
            warn!("replaced existing available entry for {}", existing.serial);
        }
        self.observer.notify();
    }
}
