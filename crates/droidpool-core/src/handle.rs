//! Allocation handles.
//!
//! A `TestDevice` is what `allocate` returns: the live device record, its
//! state monitor, the recovery policy, and any subprocesses owned on the
//! device's behalf (a launched emulator, a logcat capture). The record is
//! swappable because the bridge mints a fresh `Device` on every reconnect.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use droidpool_bridge::{CommandRunner, Device, DeviceKind, DeviceState, DeviceStateMonitor};

use crate::error::{PoolError, Result};

/// Timeout for per-device adb commands issued by the handle.
const ADB_CMD_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `recover` waits for the device to come back online.
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Port devices listen on after switching adb to TCP.
const ADB_TCP_PORT: u16 = 5555;

/// What a device operation does when the device is not in the state it
/// needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Wait for the device to come back.
    Wait,
    /// Fail immediately; the session is being torn down.
    Abort,
}

/// A device allocated to one caller.
pub struct TestDevice {
    device: RwLock<Device>,
    monitor: Arc<dyn DeviceStateMonitor>,
    state: RwLock<DeviceState>,
    recovery: RwLock<RecoveryPolicy>,
    emulator_process: Mutex<Option<Child>>,
    logcat_process: Mutex<Option<Child>>,
    runner: Arc<dyn CommandRunner>,
}

impl TestDevice {
    pub(crate) fn new(
        device: Device,
        monitor: Arc<dyn DeviceStateMonitor>,
        runner: Arc<dyn CommandRunner>,
    ) -> Arc<Self> {
        let initial = match device.kind {
            DeviceKind::Real => device.state,
            DeviceKind::Fastboot => DeviceState::Fastboot,
            _ => DeviceState::NotAvailable,
        };
        Arc::new(Self {
            device: RwLock::new(device),
            monitor,
            state: RwLock::new(initial),
            recovery: RwLock::new(RecoveryPolicy::Wait),
            emulator_process: Mutex::new(None),
            logcat_process: Mutex::new(None),
            runner,
        })
    }

    pub fn serial(&self) -> String {
        self.device.read().serial.clone()
    }

    /// Current device record.
    pub fn device(&self) -> Device {
        self.device.read().clone()
    }

    /// Replace the device record after a bridge reconnect.
    pub(crate) fn set_device(&self, device: Device) {
        *self.device.write() = device;
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read()
    }

    /// Record a runtime state transition, mirrored into the state monitor so
    /// pending waits observe it.
    pub fn set_state(&self, state: DeviceState) {
        *self.state.write() = state;
        self.monitor.set_state(state);
    }

    pub fn monitor(&self) -> Arc<dyn DeviceStateMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn set_recovery(&self, policy: RecoveryPolicy) {
        *self.recovery.write() = policy;
    }

    fn check_session(&self) -> Result<()> {
        match *self.recovery.read() {
            RecoveryPolicy::Wait => Ok(()),
            RecoveryPolicy::Abort => Err(PoolError::DeviceNotAvailable(
                "aborted test session".into(),
            )),
        }
    }

    /// Wait for the device to come online.
    pub async fn wait_for_online(&self, timeout: Duration) -> Result<()> {
        self.check_session()?;
        if self.monitor.wait_for_state(DeviceState::Online, timeout).await {
            Ok(())
        } else {
            Err(PoolError::DeviceNotAvailable(format!(
                "device {} did not come online within {:?}",
                self.serial(),
                timeout
            )))
        }
    }

    /// Wait for the device to drop off the bridge. Used during emulator
    /// teardown; does not consult the recovery policy.
    pub async fn wait_for_not_available(&self, timeout: Duration) -> bool {
        self.monitor
            .wait_for_state(DeviceState::NotAvailable, timeout)
            .await
    }

    /// Re-establish contact with the device per the recovery policy.
    pub async fn recover(&self) -> Result<()> {
        self.check_session()?;
        if self.state() == DeviceState::Online {
            return Ok(());
        }
        self.wait_for_online(RECOVERY_TIMEOUT).await
    }

    // Emulator subprocess ownership.

    pub(crate) async fn set_emulator_process(&self, child: Child) {
        *self.emulator_process.lock().await = Some(child);
    }

    pub(crate) async fn take_emulator_process(&self) -> Option<Child> {
        self.emulator_process.lock().await.take()
    }

    /// Whether this handle launched and still owns an emulator subprocess.
    pub async fn has_emulator_process(&self) -> bool {
        self.emulator_process.lock().await.is_some()
    }

    // Logcat capture.

    /// Start capturing logcat for this device in the background.
    pub async fn start_logcat(&self) {
        let mut guard = self.logcat_process.lock().await;
        if guard.is_some() {
            return;
        }
        let serial = self.serial();
        match self
            .runner
            .run_background(&["adb", "-s", &serial, "logcat", "-v", "threadtime"])
            .await
        {
            Ok(child) => *guard = Some(child),
            Err(err) => warn!("could not start logcat capture for {serial}: {err}"),
        }
    }

    /// Stop any running logcat capture. Best-effort.
    pub async fn stop_logcat(&self) {
        if let Some(mut child) = self.logcat_process.lock().await.take() {
            if let Err(err) = child.start_kill() {
                debug!("logcat capture for {} already gone: {err}", self.serial());
            }
        }
    }

    // Transport switching.

    /// Switch the device's adb connection to TCP. Returns the `ip:port` the
    /// device now listens on, or `None` when the switch failed.
    pub async fn switch_to_adb_tcp(&self) -> Result<Option<String>> {
        self.check_session()?;
        let serial = self.serial();

        let result = self
            .runner
            .run_timed(
                ADB_CMD_TIMEOUT,
                &["adb", "-s", &serial, "shell", "getprop", "dhcp.eth0.ipaddress"],
            )
            .await;
        let ip = result.stdout.trim().to_string();
        if !result.success() || ip.is_empty() {
            warn!("could not determine ip address of {serial}");
            return Ok(None);
        }

        let port = ADB_TCP_PORT.to_string();
        let switched = self
            .runner
            .run_timed(ADB_CMD_TIMEOUT, &["adb", "-s", &serial, "tcpip", &port])
            .await;
        if !switched.success() {
            warn!("adb tcpip failed for {serial}: {}", switched.stderr.trim());
            return Ok(None);
        }

        Ok(Some(format!("{ip}:{ADB_TCP_PORT}")))
    }

    /// Switch the device's adb connection back to USB.
    pub async fn switch_to_adb_usb(&self) -> Result<bool> {
        self.check_session()?;
        let serial = self.serial();
        let result = self
            .runner
            .run_timed(ADB_CMD_TIMEOUT, &["adb", "-s", &serial, "usb"])
            .await;
        Ok(result.success())
    }
}

#[cfg(test)]
mod tests {
    use droidpool_bridge::{StateMonitor, SystemRunner};

    use super::*;

    fn handle(device: Device) -> Arc<TestDevice> {
        let monitor = Arc::new(StateMonitor::new(device.serial.clone(), device.state));
        TestDevice::new(device, monitor, Arc::new(SystemRunner))
    }

    #[test]
    fn initial_state_by_kind() {
        assert_eq!(
            handle(Device::real("A1", DeviceState::Online)).state(),
            DeviceState::Online
        );
        assert_eq!(
            handle(Device::fastboot("F1X")).state(),
            DeviceState::Fastboot
        );
        assert_eq!(
            handle(Device::emulator_stub("emulator-5554")).state(),
            DeviceState::NotAvailable
        );
        assert_eq!(
            handle(Device::tcp_stub("10.0.0.2:5555")).state(),
            DeviceState::NotAvailable
        );
    }

    #[tokio::test]
    async fn abort_policy_fails_device_waits() {
        let d = handle(Device::real("A1", DeviceState::Online));
        d.set_recovery(RecoveryPolicy::Abort);

        let err = d.wait_for_online(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, PoolError::DeviceNotAvailable(msg) if msg.contains("aborted")));

        let err = d.recover().await.unwrap_err();
        assert!(matches!(err, PoolError::DeviceNotAvailable(_)));
    }

    #[tokio::test]
    async fn set_state_reaches_monitor_waiters() {
        let d = handle(Device::real("A1", DeviceState::Offline));
        let waiter = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.wait_for_online(Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        d.set_state(DeviceState::Online);
        assert!(waiter.await.unwrap().is_ok());
    }
}
