//! Device selection.
//!
//! A selector is the predicate a caller hands to `allocate`: it decides which
//! pooled devices qualify, and doubles as the accessor for the metadata shown
//! in reports. Matching must be pure; the pool may evaluate it any number of
//! times while a caller waits.

use crate::device::{Device, DeviceKind};

/// Predicate plus metadata accessors over devices.
pub trait DeviceSelector: Send + Sync {
    /// Whether `device` satisfies this selector.
    fn matches(&self, device: &Device) -> bool;

    /// Product type for display purposes.
    fn device_product(&self, device: &Device) -> Option<String> {
        device.product.clone()
    }

    /// Product variant for display purposes.
    fn device_variant(&self, device: &Device) -> Option<String> {
        device.variant.clone()
    }

    /// Battery level for display purposes.
    fn battery_level(&self, device: &Device) -> Option<u32> {
        device.battery
    }
}

/// Concrete selection criteria.
///
/// Emulators and no-device placeholders are deliberately excluded unless
/// requested: a caller asking for "any device" means any real device, and
/// capacity slots must never be consumed by accident.
#[derive(Debug, Clone, Default)]
pub struct DeviceSelection {
    /// Restrict to these serials; empty means no restriction.
    pub serials: Vec<String>,
    /// Required product type.
    pub product: Option<String>,
    /// Required product variant.
    pub variant: Option<String>,
    /// Minimum battery level.
    pub min_battery: Option<u32>,
    /// Match emulators instead of physical devices.
    pub emulator_requested: bool,
    /// Match no-device placeholder entries.
    pub null_requested: bool,
}

impl DeviceSelection {
    /// Criteria matching any real device.
    pub fn any() -> Self {
        Self::default()
    }

    /// Criteria matching exactly one serial.
    pub fn serial(serial: impl Into<String>) -> Self {
        Self {
            serials: vec![serial.into()],
            ..Self::default()
        }
    }

    /// Criteria matching an emulator or emulator slot.
    pub fn emulator() -> Self {
        Self {
            emulator_requested: true,
            ..Self::default()
        }
    }

    /// Criteria matching a no-device placeholder.
    pub fn null_device() -> Self {
        Self {
            null_requested: true,
            ..Self::default()
        }
    }
}

impl DeviceSelector for DeviceSelection {
    fn matches(&self, device: &Device) -> bool {
        if !self.serials.is_empty() {
            return self.serials.iter().any(|s| s == &device.serial);
        }
        if self.emulator_requested != device.is_emulator() {
            return false;
        }
        if self.null_requested != (device.kind == DeviceKind::NullStub) {
            return false;
        }
        if let Some(ref product) = self.product {
            if device.product.as_deref() != Some(product.as_str()) {
                return false;
            }
        }
        if let Some(ref variant) = self.variant {
            if device.variant.as_deref() != Some(variant.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_battery {
            match device.battery {
                Some(level) if level >= min => {}
                _ => return false,
            }
        }
        true
    }
}
