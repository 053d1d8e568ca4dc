//! The allocation registry.
//!
//! Concurrent map from serial to the handle currently allocated for it.
//! Point operations need no external lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

use crate::handle::TestDevice;

/// Serial -> allocated handle.
#[derive(Default)]
pub struct AllocationRegistry {
    devices: RwLock<HashMap<String, Arc<TestDevice>>>,
}

impl AllocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly allocated handle. A second insert for the same serial
    /// is a caller bug: it is refused and reported.
    pub fn insert(&self, handle: Arc<TestDevice>) -> bool {
        let serial = handle.serial();
        let mut devices = self.devices.write();
        if devices.contains_key(&serial) {
            error!("device {serial} is already allocated, refusing duplicate allocation");
            return false;
        }
        devices.insert(serial, handle);
        true
    }

    /// Remove and return the handle for `serial`, if allocated.
    pub fn remove(&self, serial: &str) -> Option<Arc<TestDevice>> {
        self.devices.write().remove(serial)
    }

    pub fn get(&self, serial: &str) -> Option<Arc<TestDevice>> {
        self.devices.read().get(serial).cloned()
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.devices.read().contains_key(serial)
    }

    /// All allocated handles, in no particular order.
    pub fn handles(&self) -> Vec<Arc<TestDevice>> {
        self.devices.read().values().cloned().collect()
    }

    /// All allocated serials.
    pub fn serials(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}
