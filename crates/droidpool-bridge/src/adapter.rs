//! Debug-bridge adapter contract.
//!
//! The pool never owns the bridge process; it talks to whatever the embedding
//! harness provides through this trait, and reacts to connect/disconnect/state
//! events delivered to a registered listener.

use std::sync::Arc;

use async_trait::async_trait;

use crate::device::Device;
use crate::error::BridgeError;

/// Change-mask bit: the device's state field changed.
pub const CHANGE_STATE: u32 = 0x0001;

/// Receiver for device presence and state updates from the bridge.
///
/// Implementations must not assume any ordering across serials; for a single
/// serial, events arrive in the order the bridge observed them.
#[async_trait]
pub trait BridgeListener: Send + Sync {
    /// A device appeared on the bridge.
    async fn device_connected(&self, device: &Device);

    /// A device disappeared from the bridge.
    async fn device_disconnected(&self, device: &Device);

    /// Something about a known device changed; `mask` says what.
    async fn device_changed(&self, device: &Device, mask: u32);
}

/// The debug bridge: discovery source for running devices.
pub trait DebugBridge: Send + Sync {
    /// Connect the bridge. Listeners registered before this call must not
    /// miss early connect events.
    fn init(&self) -> Result<(), BridgeError>;

    /// Tear the bridge down.
    fn terminate(&self);

    /// Force-disconnect the underlying transport without a full teardown.
    fn disconnect(&self);

    /// Devices currently visible on the bridge.
    fn devices(&self) -> Vec<Device>;

    /// Register a listener for device events.
    fn add_listener(&self, listener: Arc<dyn BridgeListener>);

    /// Unregister a previously registered listener, matched by identity.
    fn remove_listener(&self, listener: &Arc<dyn BridgeListener>);
}
