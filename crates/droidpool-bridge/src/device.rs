//! Device records and state.
//!
//! A `Device` is the bridge's view of one entry in the fleet: a physical
//! handset, an emulator, a device stuck in fastboot, or one of the synthetic
//! placeholder entries the pool seeds to reserve capacity.

use serde::{Deserialize, Serialize};

use crate::{EMULATOR_SERIAL_PREFIX, FIRST_EMULATOR_PORT};

/// Runtime state of a device, driven by bridge events and the fastboot
/// monitor. Orthogonal to the pool's allocation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Device is online and can accept shell commands.
    Online,
    /// Device is visible but not responding.
    Offline,
    /// Device is in recovery mode.
    Recovery,
    /// Device is in fastboot (bootloader) mode.
    Fastboot,
    /// Device is gone or has never been seen by the bridge.
    NotAvailable,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "online",
            DeviceState::Offline => "offline",
            DeviceState::Recovery => "recovery",
            DeviceState::Fastboot => "fastboot",
            DeviceState::NotAvailable => "not-available",
        }
    }
}

/// What kind of entry a device record represents.
///
/// Everything except `Real` is a stub: it reserves capacity or marks a device
/// reachable only out-of-band, and never shows up in public listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Backed by a live connection on the debug bridge.
    Real,
    /// Visible only through the fastboot channel; cannot run shell commands.
    Fastboot,
    /// Placeholder reserving capacity for an emulator to be launched.
    EmulatorStub,
    /// Placeholder for an allocation that needs no device at all.
    NullStub,
    /// Placeholder for a device being brought online over TCP.
    TcpStub,
}

/// A device as seen by the debug bridge, plus the metadata selectors and
/// reports care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Opaque serial uniquely identifying the device.
    pub serial: String,
    /// Entry kind.
    pub kind: DeviceKind,
    /// Bridge-reported state at discovery time.
    pub state: DeviceState,
    /// Product type (e.g. "husky").
    pub product: Option<String>,
    /// Product variant.
    pub variant: Option<String>,
    /// Build id (e.g. "AP2A.240805.005").
    pub build_id: Option<String>,
    /// SDK/API level.
    pub sdk_version: Option<u32>,
    /// Battery level, 0-100.
    pub battery: Option<u32>,
}

impl Device {
    /// A real device visible on the debug bridge.
    pub fn real(serial: impl Into<String>, state: DeviceState) -> Self {
        Self::with_kind(serial, DeviceKind::Real, state)
    }

    /// A device visible only on the fastboot channel.
    pub fn fastboot(serial: impl Into<String>) -> Self {
        Self::with_kind(serial, DeviceKind::Fastboot, DeviceState::Fastboot)
    }

    /// Placeholder slot for an emulator that may be launched later.
    pub fn emulator_stub(serial: impl Into<String>) -> Self {
        Self::with_kind(serial, DeviceKind::EmulatorStub, DeviceState::NotAvailable)
    }

    /// Placeholder for an allocation that requires no device.
    pub fn null_stub(serial: impl Into<String>) -> Self {
        Self::with_kind(serial, DeviceKind::NullStub, DeviceState::NotAvailable)
    }

    /// Placeholder reserved for a device coming online over TCP.
    pub fn tcp_stub(serial: impl Into<String>) -> Self {
        Self::with_kind(serial, DeviceKind::TcpStub, DeviceState::NotAvailable)
    }

    fn with_kind(serial: impl Into<String>, kind: DeviceKind, state: DeviceState) -> Self {
        Self {
            serial: serial.into(),
            kind,
            state,
            product: None,
            variant: None,
            build_id: None,
            sdk_version: None,
            battery: None,
        }
    }

    /// True for every synthetic or out-of-band entry. Stubs never appear in
    /// public listings.
    pub fn is_stub(&self) -> bool {
        self.kind != DeviceKind::Real
    }

    /// Whether this entry is an emulator, by slot kind or serial convention.
    pub fn is_emulator(&self) -> bool {
        self.kind == DeviceKind::EmulatorStub || self.serial.starts_with(EMULATOR_SERIAL_PREFIX)
    }

    /// Console port of an emulator serial (`emulator-5554` -> 5554).
    pub fn console_port(&self) -> Option<u16> {
        self.serial
            .strip_prefix(EMULATOR_SERIAL_PREFIX)
            .and_then(|p| p.parse().ok())
    }
}

/// Whether a serial reported by the bridge is usable. The bridge emits
/// `????????????` placeholders for half-enumerated devices.
pub fn is_valid_serial(serial: &str) -> bool {
    serial.len() > 1 && !serial.contains('?')
}

/// Serial for the nth seeded emulator slot. Console ports step by two.
pub fn emulator_slot_serial(index: usize) -> String {
    format!(
        "{}{}",
        EMULATOR_SERIAL_PREFIX,
        FIRST_EMULATOR_PORT as usize + index * 2
    )
}

/// Serial for the nth seeded null-device slot.
pub fn null_slot_serial(index: usize) -> String {
    format!("null-device-{index}")
}
