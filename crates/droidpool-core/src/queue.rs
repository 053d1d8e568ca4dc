//! The availability queue.
//!
//! A dedup-by-serial, FIFO queue of devices free to allocate. Callers block
//! in `poll`/`take` under a selector; a matching entry is handed to exactly
//! one caller. One lock guards the list; waiters park on a `Notify` and
//! rescan in FIFO order after every insert.

use std::collections::VecDeque;
use std::pin::pin;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use droidpool_bridge::{Device, DeviceSelector};

use crate::error::PoolError;

/// Thread-safe FIFO of allocatable devices, unique by serial.
#[derive(Default)]
pub struct AvailableDeviceQueue {
    entries: Mutex<VecDeque<Device>>,
    inserted: Notify,
}

impl AvailableDeviceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `device`, replacing any existing entry with the same serial in
    /// place. Returns the replaced entry, if any.
    pub fn add_unique(&self, device: Device) -> Option<Device> {
        let replaced = {
            let mut entries = self.entries.lock();
            match entries.iter_mut().find(|d| d.serial == device.serial) {
                Some(slot) => Some(std::mem::replace(slot, device)),
                None => {
                    entries.push_back(device);
                    None
                }
            }
        };
        self.inserted.notify_waiters();
        replaced
    }

    /// Remove and return the first entry matching `selector`, without
    /// waiting.
    pub fn try_take(&self, selector: &dyn DeviceSelector) -> Option<Device> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|d| selector.matches(d))?;
        entries.remove(index)
    }

    /// Wait up to `timeout` for an entry matching `selector`.
    ///
    /// `None` waits indefinitely; `Duration::ZERO` never blocks. Fails with
    /// `PoolError::Timeout` on expiry and `PoolError::Cancelled` when
    /// `cancel` fires while waiting.
    pub async fn poll(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        selector: &dyn DeviceSelector,
    ) -> Result<Device, PoolError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            // Register for wakeups before scanning so an insert between the
            // scan and the await is not lost.
            let mut inserted = pin!(self.inserted.notified());
            inserted.as_mut().enable();

            if let Some(device) = self.try_take(selector) {
                trace!(serial = %device.serial, "queue poll matched");
                return Ok(device);
            }
            if cancel.is_cancelled() {
                return Err(PoolError::Cancelled);
            }

            match deadline {
                Some(deadline) => tokio::select! {
                    _ = inserted => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        return Err(PoolError::Timeout("no matching device".into()));
                    }
                    _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                },
                None => tokio::select! {
                    _ = inserted => {}
                    _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                },
            }
        }
    }

    /// `poll` with an unbounded wait.
    pub async fn take(
        &self,
        cancel: &CancellationToken,
        selector: &dyn DeviceSelector,
    ) -> Result<Device, PoolError> {
        self.poll(None, cancel, selector).await
    }

    /// Remove the entry with `serial`. Idempotent.
    pub fn remove(&self, serial: &str) -> Option<Device> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|d| d.serial == serial)?;
        entries.remove(index)
    }

    /// Whether an entry with `serial` is queued.
    pub fn contains(&self, serial: &str) -> bool {
        self.entries.lock().iter().any(|d| d.serial == serial)
    }

    /// Stable copy of the queue contents, in FIFO order.
    pub fn snapshot(&self) -> Vec<Device> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
