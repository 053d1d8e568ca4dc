//! Per-device state monitors.
//!
//! Each device handed to the pool gets a monitor that tracks its runtime
//! state and answers readiness questions. The `DeviceStateMonitor` trait is
//! the contract; `StateMonitor` is a ready watch-channel implementation whose
//! shell probe is satisfied by the device reaching `Online`. Harnesses with a
//! real shell channel substitute their own implementation through
//! `MonitorFactory`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::device::{Device, DeviceState};

/// Tracks one device's runtime state and supports bounded waits on it.
#[async_trait]
pub trait DeviceStateMonitor: Send + Sync {
    /// Wait up to `timeout` for the device to answer a shell liveness probe.
    async fn wait_for_shell(&self, timeout: Duration) -> bool;

    /// Record a state transition observed by the bridge or the pool.
    fn set_state(&self, state: DeviceState);

    /// Last recorded state.
    fn state(&self) -> DeviceState;

    /// Wait up to `timeout` for the device to reach `target`.
    async fn wait_for_state(&self, target: DeviceState, timeout: Duration) -> bool;
}

/// Watch-channel monitor. State writers never block; waiters see every
/// transition that is current when they poll.
pub struct StateMonitor {
    serial: String,
    tx: watch::Sender<DeviceState>,
}

impl StateMonitor {
    pub fn new(serial: impl Into<String>, initial: DeviceState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            serial: serial.into(),
            tx,
        }
    }
}

#[async_trait]
impl DeviceStateMonitor for StateMonitor {
    async fn wait_for_shell(&self, timeout: Duration) -> bool {
        // No shell transport of its own: a device that reports online is
        // considered shell-responsive.
        self.wait_for_state(DeviceState::Online, timeout).await
    }

    fn set_state(&self, state: DeviceState) {
        let prev = *self.tx.borrow();
        if prev != state {
            debug!(serial = %self.serial, from = prev.as_str(), to = state.as_str(), "device state");
        }
        self.tx.send_replace(state);
    }

    fn state(&self) -> DeviceState {
        *self.tx.borrow()
    }

    async fn wait_for_state(&self, target: DeviceState, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

/// Mints a monitor for a newly discovered device.
pub trait MonitorFactory: Send + Sync {
    fn create_monitor(&self, device: &Device) -> Arc<dyn DeviceStateMonitor>;
}

/// Default factory producing `StateMonitor`s seeded with the device's
/// bridge-reported state.
#[derive(Debug, Default)]
pub struct WatchMonitorFactory;

impl MonitorFactory for WatchMonitorFactory {
    fn create_monitor(&self, device: &Device) -> Arc<dyn DeviceStateMonitor> {
        Arc::new(StateMonitor::new(device.serial.clone(), device.state))
    }
}
