//! Pool configuration.
//!
//! `PoolOptions` is the option bag the embedding harness hands to the
//! manager; `ConfigProvider` is how the harness supplies the global device
//! filter and the optional pool monitor alongside it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use droidpool_bridge::{DeviceSelection, DeviceSelector};

use crate::error::Result;
use crate::report::DeviceDescriptor;

/// Tunables for the device pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PoolOptions {
    /// Maximum number of emulators that can be allocated at one time.
    /// Placeholders count only additional capacity; emulators already running
    /// when the pool starts are not reconciled against this cap.
    pub max_emulators: usize,
    /// Maximum number of no-device allocations at one time.
    pub max_null_devices: usize,
    /// Whether devices freed as unresponsive go back into circulation.
    pub return_unresponsive_to_pool: bool,
    /// How long a newly discovered device may take to answer the shell
    /// readiness probe, in milliseconds.
    pub check_availability_ms: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_emulators: 1,
            max_null_devices: 1,
            return_unresponsive_to_pool: true,
            check_availability_ms: 30_000,
        }
    }
}

impl PoolOptions {
    /// Readiness probe deadline as a `Duration`.
    pub fn check_availability_timeout(&self) -> Duration {
        Duration::from_millis(self.check_availability_ms)
    }

    /// Load options from a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        let options = toml::from_str(&contents)?;
        debug!(path = %path.as_ref().display(), "loaded pool options");
        Ok(options)
    }

    /// Save options to a TOML file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(path.as_ref(), contents).await?;
        debug!(path = %path.as_ref().display(), "saved pool options");
        Ok(())
    }
}

/// Produces the descriptors of every device the pool currently knows about.
pub type DeviceLister = Arc<dyn Fn() -> Vec<DeviceDescriptor> + Send + Sync>;

/// Observer of pool-wide changes, notified on every allocation-state
/// mutation. The pool snapshots nothing on its behalf; the lister handed to
/// `run` pulls a fresh view on demand.
pub trait PoolMonitor: Send + Sync {
    /// Called once at init with a lister for on-demand snapshots.
    fn run(&self, _lister: DeviceLister) {}

    /// Something about the pool changed.
    fn notify_change(&self);
}

/// Supplies the pool's configuration at init time.
pub trait ConfigProvider: Send + Sync {
    /// Option bag.
    fn options(&self) -> PoolOptions;

    /// Global filter applied to every discovered device.
    fn default_selector(&self) -> Arc<dyn DeviceSelector>;

    /// Optional pool-wide observer.
    fn pool_monitor(&self) -> Option<Arc<dyn PoolMonitor>>;
}

/// A fixed, in-memory configuration.
pub struct StaticConfig {
    pub options: PoolOptions,
    pub selector: Arc<dyn DeviceSelector>,
    pub monitor: Option<Arc<dyn PoolMonitor>>,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            options: PoolOptions::default(),
            selector: Arc::new(DeviceSelection::any()),
            monitor: None,
        }
    }
}

impl ConfigProvider for StaticConfig {
    fn options(&self) -> PoolOptions {
        self.options.clone()
    }

    fn default_selector(&self) -> Arc<dyn DeviceSelector> {
        Arc::clone(&self.selector)
    }

    fn pool_monitor(&self) -> Option<Arc<dyn PoolMonitor>> {
        self.monitor.clone()
    }
}

/// Shared slot for the optional pool monitor, cloned into every component
/// that mutates the pool so change notifications come from one place.
#[derive(Clone, Default)]
pub(crate) struct SharedPoolMonitor {
    inner: Arc<RwLock<Option<Arc<dyn PoolMonitor>>>>,
}

impl SharedPoolMonitor {
    pub(crate) fn set(&self, monitor: Option<Arc<dyn PoolMonitor>>) {
        *self.inner.write() = monitor;
    }

    pub(crate) fn notify(&self) {
        let monitor = self.inner.read().clone();
        if let Some(monitor) = monitor {
            monitor.notify_change();
        }
    }
}
