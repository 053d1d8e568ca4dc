//! Fastboot channel monitoring.
//!
//! Devices stuck in fastboot are invisible to the debug bridge, so the pool
//! polls `fastboot devices` on a fixed cadence and reconciles the answer with
//! the allocation registry. Polling is gated on listener registration:
//! running fastboot against an idle fleet can hang other fastboot commands.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use droidpool_bridge::{CommandRunner, DeviceState};

use crate::registry::AllocationRegistry;

/// Hard timeout for every fastboot invocation.
const FASTBOOT_CMD_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the one-shot availability probe.
const FASTBOOT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between `fastboot devices` polls.
const FASTBOOT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Notified whenever a poll cycle has reconciled fastboot state.
pub trait FastbootListener: Send + Sync {
    fn state_updated(&self);
}

/// Listener registry plus the polling loop.
#[derive(Default)]
pub(crate) struct FastbootMonitor {
    listeners: Mutex<Vec<Arc<dyn FastbootListener>>>,
    enabled: AtomicBool,
}

impl FastbootMonitor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn FastbootListener>) {
        self.listeners.lock().push(listener);
    }

    pub(crate) fn remove_listener(&self, listener: &Arc<dyn FastbootListener>) {
        self.listeners
            .lock()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn has_listeners(&self) -> bool {
        !self.listeners.lock().is_empty()
    }

    /// Copy of the listener set, taken before dispatch so no internal lock is
    /// held while listener code runs.
    fn listener_snapshot(&self) -> Vec<Arc<dyn FastbootListener>> {
        self.listeners.lock().clone()
    }

    /// Run the polling loop until `cancel` fires.
    pub(crate) fn spawn(
        self: Arc<Self>,
        runner: Arc<dyn CommandRunner>,
        registry: Arc<AllocationRegistry>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            debug!("fastboot monitor started");
            loop {
                if self.has_listeners() {
                    self.tick(runner.as_ref(), &registry).await;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = runner.sleep(FASTBOOT_POLL_INTERVAL) => {}
                }
            }
            debug!("fastboot monitor stopped");
        });
    }

    async fn tick(&self, runner: &dyn CommandRunner, registry: &AllocationRegistry) {
        let Some(serials) = devices_on_fastboot(runner).await else {
            // Poll failure: log and try again next tick.
            return;
        };

        for serial in &serials {
            if let Some(handle) = registry.get(serial) {
                if handle.state() != DeviceState::Fastboot {
                    handle.set_state(DeviceState::Fastboot);
                }
            }
        }
        for handle in registry.handles() {
            if handle.state() == DeviceState::Fastboot && !serials.contains(&handle.serial()) {
                handle.set_state(DeviceState::NotAvailable);
            }
        }

        for listener in self.listener_snapshot() {
            listener.state_updated();
        }
    }
}

/// Whether a usable fastboot binary is on the PATH.
pub(crate) async fn is_fastboot_available(runner: &dyn CommandRunner) -> bool {
    let result = runner.run_timed(FASTBOOT_PROBE_TIMEOUT, &["fastboot", "help"]).await;
    if result.success() {
        return true;
    }
    // Old fastboot versions exit non-zero from `help` but print usage.
    if result.stderr.contains("usage: fastboot") {
        warn!("you are running an older version of fastboot, please update it");
        return true;
    }
    false
}

/// Serials currently visible on the fastboot channel, or `None` when the
/// command failed.
pub(crate) async fn devices_on_fastboot(runner: &dyn CommandRunner) -> Option<HashSet<String>> {
    let result = runner
        .run_timed(FASTBOOT_CMD_TIMEOUT, &["fastboot", "devices"])
        .await;
    if result.success() {
        trace!("fastboot devices returned\n{}", result.stdout);
        Some(parse_devices_on_fastboot(&result.stdout))
    } else {
        warn!(
            "'fastboot devices' failed: {:?}, stderr: {}",
            result.status,
            result.stderr.trim()
        );
        None
    }
}

/// Parse `fastboot devices` output into a serial set.
pub(crate) fn parse_devices_on_fastboot(output: &str) -> HashSet<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"([\w\d]+)\s+fastboot\s*").unwrap());
    pattern
        .captures_iter(output)
        .map(|c| c[1].to_string())
        .collect()
}
