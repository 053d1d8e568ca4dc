//! Debug-bridge boundary for the droidpool device pool.
//!
//! Defines the device model and the contracts the embedding harness must
//! implement: the debug bridge itself, per-device state monitors, and the
//! external command runner. The pool core (`droidpool-core`) consumes these
//! traits and never talks to adb or fastboot directly.

pub mod adapter;
pub mod device;
pub mod error;
pub mod monitor;
pub mod runner;
pub mod selector;

pub use adapter::{BridgeListener, DebugBridge, CHANGE_STATE};
pub use device::{Device, DeviceKind, DeviceState};
pub use error::BridgeError;
pub use monitor::{DeviceStateMonitor, MonitorFactory, StateMonitor, WatchMonitorFactory};
pub use runner::{CommandResult, CommandRunner, CommandStatus, SystemRunner};
pub use selector::{DeviceSelection, DeviceSelector};

/// Console port of the first emulator slot.
pub const FIRST_EMULATOR_PORT: u16 = 5554;

/// Serial prefix the debug bridge assigns to local emulators.
pub const EMULATOR_SERIAL_PREFIX: &str = "emulator-";
