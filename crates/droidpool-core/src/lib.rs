//! droidpool-core - Concurrent test-device pool
//!
//! Multiplexes a shared, dynamically changing fleet of devices (physical
//! handsets, emulators, and placeholder slots) across concurrent test
//! requests. Devices discovered on the debug bridge go through a readiness
//! probe before they become allocatable; devices stuck in fastboot are
//! pooled through a polling monitor. Callers allocate under selection
//! predicates with bounded waits and return devices with a disposition that
//! decides whether they re-enter circulation.
//!
//! The bridge itself, shell execution, and external commands are injected
//! through the traits in `droidpool-bridge`.

pub mod config;
pub mod error;
pub mod fastboot;
pub mod handle;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod report;

mod emulator;
mod prober;

pub use config::{ConfigProvider, DeviceLister, PoolMonitor, PoolOptions, StaticConfig};
pub use error::{PoolError, Result};
pub use fastboot::FastbootListener;
pub use handle::{RecoveryPolicy, TestDevice};
pub use manager::{DeviceManager, FreeDisposition};
pub use queue::AvailableDeviceQueue;
pub use registry::AllocationRegistry;
pub use report::{AllocationState, DeviceDescriptor};

// Re-exported so embedders depend on one crate.
pub use droidpool_bridge as bridge;
