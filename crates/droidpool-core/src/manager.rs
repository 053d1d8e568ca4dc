//! The device pool manager.
//!
//! Orchestrates the whole pool: bridge discovery flows through the readiness
//! prober into the availability queue; allocation moves devices into the
//! registry; free returns them according to the caller's disposition. The
//! manager also owns the fastboot monitor, emulator launch/teardown, and the
//! TCP transport helpers.
//!
//! There is no process-wide singleton: the bridge, the command runner, and
//! the configuration are injected, and tests construct their own instances.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use droidpool_bridge::device::{emulator_slot_serial, is_valid_serial, null_slot_serial};
use droidpool_bridge::{
    BridgeListener, CommandRunner, DebugBridge, Device, DeviceKind, DeviceSelection,
    DeviceSelector, DeviceState, MonitorFactory, WatchMonitorFactory, CHANGE_STATE,
};

use crate::config::{ConfigProvider, DeviceLister, PoolMonitor, PoolOptions, SharedPoolMonitor};
use crate::emulator::{console_kill, is_process_running, EmulatorStats};
use crate::error::{PoolError, Result};
use crate::fastboot::{
    devices_on_fastboot, is_fastboot_available, FastbootListener, FastbootMonitor,
};
use crate::handle::{RecoveryPolicy, TestDevice};
use crate::prober::ReadinessProber;
use crate::queue::AvailableDeviceQueue;
use crate::registry::AllocationRegistry;
use crate::report::{format_device_table, sort_descriptors, AllocationState, DeviceDescriptor};

/// Timeout for global adb commands such as `adb connect`.
const ADB_CMD_TIMEOUT: Duration = Duration::from_secs(60);

/// Pause between `adb connect` attempts.
const ADB_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

const ADB_CONNECT_ATTEMPTS: u32 = 3;

/// Grace period before checking that a freshly spawned emulator survived.
const EMULATOR_SPAWN_GRACE: Duration = Duration::from_millis(500);

/// Wait for the device to drop off the bridge after a console kill.
const EMULATOR_CONSOLE_KILL_WAIT: Duration = Duration::from_secs(5);

/// Overall wait for the emulator to disappear during teardown.
const EMULATOR_KILL_WAIT: Duration = Duration::from_secs(20);

/// Timeout for the `kill -9` fallback.
const FORCE_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for a network device to come online after `adb connect`.
const TCP_ONLINE_TIMEOUT: Duration = Duration::from_secs(60);

/// What should happen to a device when its allocation ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeDisposition {
    /// The device is fine; return it to the pool.
    Available,
    /// The device is broken; drop it from circulation.
    Unavailable,
    /// The device stopped answering; policy decides whether it returns.
    Unresponsive,
    /// Drop silently, no questions asked.
    Ignore,
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    terminated: bool,
}

struct ManagerInner {
    bridge: Arc<dyn DebugBridge>,
    runner: Arc<dyn CommandRunner>,
    monitor_factory: RwLock<Arc<dyn MonitorFactory>>,
    options: PoolOptions,
    default_selector: RwLock<Arc<dyn DeviceSelector>>,
    default_monitor: Mutex<Option<Arc<dyn PoolMonitor>>>,
    lifecycle: Mutex<Lifecycle>,
    filter: RwLock<Arc<dyn DeviceSelector>>,
    observer: SharedPoolMonitor,
    available: Arc<AvailableDeviceQueue>,
    allocated: Arc<AllocationRegistry>,
    prober: Arc<ReadinessProber>,
    fastboot: Arc<FastbootMonitor>,
    stats: EmulatorStats,
    /// Cancels allocation waiters; fired by `terminate_hard`.
    cancel: CancellationToken,
    /// Child of `cancel`; stops the fastboot loop on plain `terminate`.
    fastboot_cancel: CancellationToken,
    listener: Mutex<Option<Arc<PoolListener>>>,
}

/// The pool manager. Cheap to clone; clones share one pool.
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<ManagerInner>,
}

impl DeviceManager {
    /// Create a manager over the given bridge and runner. Call `init` before
    /// anything else.
    pub fn new(
        bridge: Arc<dyn DebugBridge>,
        runner: Arc<dyn CommandRunner>,
        options: PoolOptions,
    ) -> Self {
        let available = Arc::new(AvailableDeviceQueue::new());
        let observer = SharedPoolMonitor::default();
        let prober = Arc::new(ReadinessProber::new(
            options.check_availability_timeout(),
            Arc::clone(&available),
            observer.clone(),
        ));
        let cancel = CancellationToken::new();
        let fastboot_cancel = cancel.child_token();
        let any: Arc<dyn DeviceSelector> = Arc::new(DeviceSelection::any());

        Self {
            inner: Arc::new(ManagerInner {
                bridge,
                runner,
                monitor_factory: RwLock::new(Arc::new(WatchMonitorFactory)),
                options,
                default_selector: RwLock::new(Arc::clone(&any)),
                default_monitor: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle::default()),
                filter: RwLock::new(any),
                observer,
                available,
                allocated: Arc::new(AllocationRegistry::new()),
                prober,
                fastboot: Arc::new(FastbootMonitor::new()),
                stats: EmulatorStats::new(),
                cancel,
                fastboot_cancel,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Create a manager configured by `provider`.
    pub fn with_config(
        bridge: Arc<dyn DebugBridge>,
        runner: Arc<dyn CommandRunner>,
        provider: &dyn ConfigProvider,
    ) -> Self {
        let manager = Self::new(bridge, runner, provider.options());
        *manager.inner.default_selector.write() = provider.default_selector();
        *manager.inner.default_monitor.lock() = provider.pool_monitor();
        manager
    }

    /// Replace the monitor factory. Must happen before `init`.
    pub fn set_monitor_factory(&self, factory: Arc<dyn MonitorFactory>) {
        *self.inner.monitor_factory.write() = factory;
    }

    /// Run readiness probes inline on the discovery caller instead of in the
    /// background. Makes discovery deterministic for tests.
    pub fn set_synchronous_mode(&self, synchronous: bool) {
        self.inner.prober.set_synchronous(synchronous);
    }

    /// Initialize with the configured defaults.
    pub async fn init(&self) -> Result<()> {
        self.init_with(None, None).await
    }

    /// Initialize the pool. Must be called once and only once; a second call
    /// is an error.
    ///
    /// `filter` is the global device filter applied at discovery; `monitor`
    /// observes pool-wide changes. Either falls back to the configured
    /// default when `None`.
    pub async fn init_with(
        &self,
        filter: Option<Arc<dyn DeviceSelector>>,
        monitor: Option<Arc<dyn PoolMonitor>>,
    ) -> Result<()> {
        let inner = &self.inner;
        {
            let mut lifecycle = inner.lifecycle.lock();
            if lifecycle.initialized {
                error!("device manager is already initialized");
                return Err(PoolError::InvalidState("already initialized".into()));
            }
            lifecycle.initialized = true;
        }

        let filter = filter.unwrap_or_else(|| inner.default_selector.read().clone());
        *inner.filter.write() = filter;
        let monitor = monitor.or_else(|| inner.default_monitor.lock().clone());
        inner.observer.set(monitor.clone());

        // Fastboot support is established before any devices are added, so
        // devices stuck in the bootloader are pooled from the start.
        if is_fastboot_available(inner.runner.as_ref()).await {
            inner.fastboot.set_enabled(true);
            Arc::clone(&inner.fastboot).spawn(
                Arc::clone(&inner.runner),
                Arc::clone(&inner.allocated),
                inner.fastboot_cancel.clone(),
            );
            if let Some(serials) = devices_on_fastboot(inner.runner.as_ref()).await {
                for serial in serials {
                    inner.prober.add_available(Device::fastboot(serial));
                }
            }
        } else {
            warn!("fastboot is not available");
        }

        // The listener must be registered before the bridge connects, or
        // early connect events would be lost.
        let listener = Arc::new(PoolListener {
            inner: Arc::downgrade(&self.inner),
        });
        *inner.listener.lock() = Some(Arc::clone(&listener));
        inner.bridge.add_listener(listener);

        if let Some(monitor) = monitor {
            let lister: DeviceLister = {
                let weak = Arc::downgrade(&self.inner);
                Arc::new(move || {
                    weak.upgrade()
                        .map(|inner| inner.device_descriptors())
                        .unwrap_or_default()
                })
            };
            monitor.run(lister);
        }

        inner.bridge.init().map_err(|err| {
            PoolError::DeviceNotAvailable(format!("debug bridge failed to start: {err}"))
        })?;

        for i in 0..inner.options.max_emulators {
            inner.prober.add_available(Device::emulator_stub(emulator_slot_serial(i)));
        }
        for i in 0..inner.options.max_null_devices {
            inner.prober.add_available(Device::null_stub(null_slot_serial(i)));
        }

        info!("device manager initialized");
        Ok(())
    }

    fn check_init(&self) -> Result<()> {
        if self.inner.lifecycle.lock().initialized {
            Ok(())
        } else {
            error!("device manager has not been initialized");
            Err(PoolError::InvalidState("not initialized".into()))
        }
    }

    // Allocation.

    /// Block until any real device is free and allocate it. Returns `None`
    /// when the wait is cancelled by termination.
    pub async fn allocate(&self) -> Result<Option<Arc<TestDevice>>> {
        self.allocate_matching(None, Arc::new(DeviceSelection::any())).await
    }

    /// Allocate any real device, waiting up to `timeout`. Returns `None` on
    /// expiry.
    pub async fn allocate_timeout(&self, timeout: Duration) -> Result<Option<Arc<TestDevice>>> {
        self.allocate_matching(Some(timeout), Arc::new(DeviceSelection::any())).await
    }

    /// Allocate the first free device matching `selector`. A `timeout` of
    /// `None` waits indefinitely.
    pub async fn allocate_matching(
        &self,
        timeout: Option<Duration>,
        selector: Arc<dyn DeviceSelector>,
    ) -> Result<Option<Arc<TestDevice>>> {
        self.check_init()?;
        match self
            .inner
            .available
            .poll(timeout, &self.inner.cancel, selector.as_ref())
            .await
        {
            Ok(device) => self.inner.create_allocated(device).map(Some),
            Err(PoolError::Timeout(_)) => Ok(None),
            Err(PoolError::Cancelled) => {
                warn!("interrupted while waiting for a device");
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    /// Allocate a specific serial whether or not it is present. When the
    /// serial is not in the pool a network placeholder is minted for it, so
    /// the allocation is visible in the registry before the device exists.
    /// Refused when the serial is already allocated.
    pub async fn force_allocate(&self, serial: &str) -> Result<Option<Arc<TestDevice>>> {
        self.check_init()?;
        if self.inner.allocated.contains(serial) {
            warn!("device {serial} is already allocated");
            return Ok(None);
        }
        let selector = DeviceSelection::serial(serial);
        let device = match self
            .inner
            .available
            .poll(Some(Duration::from_millis(1)), &self.inner.cancel, &selector)
            .await
        {
            Ok(device) => device,
            Err(_) => Device::tcp_stub(serial),
        };
        self.inner.create_allocated(device).map(Some)
    }

    // Free.

    /// Return an allocated device with the given disposition.
    pub async fn free(&self, handle: Arc<TestDevice>, disposition: FreeDisposition) -> Result<()> {
        self.check_init()?;
        let mut disposition = disposition;

        handle.stop_logcat().await;

        let mut device_to_return = handle.device();
        // Emulators the pool launched die with their allocation; the slot
        // placeholder takes their place in the queue.
        if device_to_return.is_emulator() && handle.has_emulator_process().await {
            match self.kill_emulator(&handle).await {
                Ok(()) => {
                    device_to_return = Device::emulator_stub(device_to_return.serial.clone());
                    disposition = FreeDisposition::Available;
                }
                Err(err) => {
                    error!("failed to kill emulator {}: {err}", device_to_return.serial);
                    disposition = FreeDisposition::Unavailable;
                }
            }
        }

        let serial = device_to_return.serial.clone();
        if self.inner.allocated.remove(&serial).is_none() {
            error!("free called for unallocated device {serial}");
        } else {
            match disposition {
                FreeDisposition::Available => self.inner.requeue_freed(device_to_return),
                FreeDisposition::Unresponsive => {
                    if self.inner.options.return_unresponsive_to_pool {
                        self.inner.requeue_freed(device_to_return);
                    } else {
                        warn!("dropping unresponsive device {serial} from the pool");
                    }
                }
                FreeDisposition::Unavailable => {
                    warn!("freed device {serial} is unavailable, removing from use");
                }
                FreeDisposition::Ignore => {}
            }
        }

        self.inner.observer.notify();
        if handle.device().is_emulator() {
            self.inner.stats.record_free(&serial);
        }
        Ok(())
    }

    // Emulator lifecycle.

    /// Launch an emulator on an allocated emulator slot and wait up to
    /// `boot_timeout` for it to come online. On boot timeout the partially
    /// started subprocess stays attached to the handle and is reaped by
    /// `free`.
    pub async fn launch_emulator(
        &self,
        handle: &Arc<TestDevice>,
        boot_timeout: Duration,
        args: &[String],
    ) -> Result<()> {
        self.check_init()?;
        let device = handle.device();
        if !device.is_emulator() {
            error!("device {} is not an emulator", device.serial);
            return Err(PoolError::InvalidState(format!(
                "device {} is not an emulator",
                device.serial
            )));
        }
        if handle.state() != DeviceState::NotAvailable {
            return Err(PoolError::InvalidState(format!(
                "emulator device {} is in state {:?}, expected {:?}",
                device.serial,
                handle.state(),
                DeviceState::NotAvailable
            )));
        }

        info!("launching emulator with {args:?}");
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut child = self.inner.runner.run_background(&argv).await.map_err(|err| {
            PoolError::DeviceNotAvailable(format!("failed to start emulator process: {err}"))
        })?;

        self.inner.runner.sleep(EMULATOR_SPAWN_GRACE).await;
        if !is_process_running(&mut child) {
            let output = child.wait_with_output().await?;
            error!(
                "emulator process died after launch, stdout: '{}', stderr: '{}'",
                String::from_utf8_lossy(&output.stdout).trim(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(PoolError::DeviceNotAvailable("emulator died after launch".into()));
        }
        handle.set_emulator_process(child).await;

        handle.wait_for_online(boot_timeout).await
    }

    /// Shut a launched emulator down: console kill first, then the process,
    /// then `kill -9` as a last resort.
    pub async fn kill_emulator(&self, handle: &Arc<TestDevice>) -> Result<()> {
        let serial = handle.serial();

        match handle.device().console_port() {
            Some(port) => {
                if console_kill(port).await {
                    handle.wait_for_not_available(EMULATOR_CONSOLE_KILL_WAIT).await;
                } else {
                    warn!("could not reach emulator console for {serial}");
                }
            }
            None => warn!("could not determine console port for {serial}"),
        }

        if let Some(mut child) = handle.take_emulator_process().await {
            if is_process_running(&mut child) {
                if let Err(err) = child.start_kill() {
                    warn!("could not signal emulator process for {serial}: {err}");
                }
                self.inner.runner.sleep(Duration::from_millis(100)).await;
                if is_process_running(&mut child) {
                    warn!("emulator process still running after kill for {serial}");
                    match child.id() {
                        Some(pid) => {
                            let pid = pid.to_string();
                            self.inner
                                .runner
                                .run_timed(FORCE_KILL_TIMEOUT, &["kill", "-9", &pid])
                                .await;
                        }
                        None => debug!("no pid available for emulator process of {serial}"),
                    }
                }
            }
        }

        if handle.wait_for_not_available(EMULATOR_KILL_WAIT).await {
            Ok(())
        } else {
            Err(PoolError::DeviceNotAvailable(format!(
                "failed to kill emulator {serial}"
            )))
        }
    }

    // Network transport.

    /// Allocate and connect a device over TCP. The placeholder is allocated
    /// before `adb connect` so state updates land on it and no other caller
    /// can grab the device once it comes online under this serial.
    pub async fn connect_tcp(&self, ip_and_port: &str) -> Result<Option<Arc<TestDevice>>> {
        self.check_init()?;
        if self.inner.allocated.contains(ip_and_port) {
            warn!("device with tcp serial {ip_and_port} is already allocated");
            return Ok(None);
        }
        let handle = self.inner.create_allocated(Device::tcp_stub(ip_and_port))?;
        if self.do_adb_connect(ip_and_port).await {
            handle.set_recovery(RecoveryPolicy::Wait);
            match handle.wait_for_online(TCP_ONLINE_TIMEOUT).await {
                Ok(()) => return Ok(Some(handle)),
                Err(_) => warn!("device with tcp serial {ip_and_port} did not come online"),
            }
        }
        self.free(handle, FreeDisposition::Ignore).await?;
        Ok(None)
    }

    /// Switch a USB device to TCP and reconnect to it. On failure the USB
    /// handle is recovered.
    pub async fn reconnect_tcp(
        &self,
        usb_handle: &Arc<TestDevice>,
    ) -> Result<Option<Arc<TestDevice>>> {
        self.check_init()?;
        info!("reconnecting device {} to adb over tcp", usb_handle.serial());
        let Some(ip_and_port) = usb_handle.switch_to_adb_tcp().await? else {
            return Ok(None);
        };
        debug!(
            "device {} was switched to adb tcp on {ip_and_port}",
            usb_handle.serial()
        );
        let tcp_handle = self.connect_tcp(&ip_and_port).await?;
        if tcp_handle.is_none() {
            usb_handle.recover().await?;
        }
        Ok(tcp_handle)
    }

    /// Switch a TCP device back to USB and free it.
    pub async fn disconnect_tcp(&self, tcp_handle: Arc<TestDevice>) -> Result<bool> {
        self.check_init()?;
        info!("disconnecting and freeing tcp device {}", tcp_handle.serial());
        let switched = match tcp_handle.switch_to_adb_usb().await {
            Ok(ok) => ok,
            Err(err) => {
                warn!(
                    "failed to switch device {} to usb mode: {err}",
                    tcp_handle.serial()
                );
                false
            }
        };
        self.free(tcp_handle, FreeDisposition::Ignore).await?;
        Ok(switched)
    }

    async fn do_adb_connect(&self, ip_and_port: &str) -> bool {
        let expected = format!("connected to {ip_and_port}");
        for attempt in 1..=ADB_CONNECT_ATTEMPTS {
            if let Some(stdout) = self.execute_global_adb_command(&["connect", ip_and_port]).await {
                if stdout.starts_with(&expected) {
                    return true;
                }
                warn!(
                    "failed to connect to device on {ip_and_port}, attempt {attempt} of {ADB_CONNECT_ATTEMPTS}, response: {}",
                    stdout.trim()
                );
            }
            self.inner.runner.sleep(ADB_CONNECT_RETRY_DELAY).await;
        }
        false
    }

    /// Run an adb command not targeted at a particular device, e.g.
    /// `adb connect`. Returns stdout on success.
    pub async fn execute_global_adb_command(&self, args: &[&str]) -> Option<String> {
        let mut argv = vec!["adb"];
        argv.extend_from_slice(args);
        let result = self.inner.runner.run_timed(ADB_CMD_TIMEOUT, &argv).await;
        if result.success() {
            Some(result.stdout)
        } else {
            warn!("adb {} failed", args.first().unwrap_or(&""));
            None
        }
    }

    // Termination.

    /// Tear the pool down: stop listening to the bridge, terminate it, and
    /// stop the fastboot monitor. Safe to call more than once.
    pub fn terminate(&self) -> Result<()> {
        self.check_init()?;
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.terminated {
                return Ok(());
            }
            lifecycle.terminated = true;
        }
        if let Some(listener) = self.inner.listener.lock().take() {
            let listener: Arc<dyn BridgeListener> = listener;
            self.inner.bridge.remove_listener(&listener);
        }
        self.inner.bridge.terminate();
        self.inner.fastboot_cancel.cancel();
        info!("device manager terminated");
        Ok(())
    }

    /// Abort the session: every allocated handle fails fast from here on,
    /// blocked allocation waiters are cancelled, and the bridge is
    /// force-disconnected before the normal teardown.
    pub fn terminate_hard(&self) -> Result<()> {
        self.check_init()?;
        if self.inner.lifecycle.lock().terminated {
            return Ok(());
        }
        for handle in self.inner.allocated.handles() {
            handle.set_recovery(RecoveryPolicy::Abort);
        }
        self.inner.bridge.disconnect();
        self.inner.cancel.cancel();
        self.terminate()
    }

    // Fastboot listeners.

    /// Register for fastboot reconcile notifications. Polling only runs
    /// while at least one listener is registered.
    pub fn add_fastboot_listener(&self, listener: Arc<dyn FastbootListener>) -> Result<()> {
        self.check_init()?;
        if !self.inner.fastboot.is_enabled() {
            return Err(PoolError::InvalidState("fastboot is not enabled".into()));
        }
        self.inner.fastboot.add_listener(listener);
        Ok(())
    }

    pub fn remove_fastboot_listener(&self, listener: &Arc<dyn FastbootListener>) {
        if self.inner.fastboot.is_enabled() {
            self.inner.fastboot.remove_listener(listener);
        }
    }

    // Reporting.

    /// Serials currently allocated, sorted for stable output.
    pub fn allocated_serials(&self) -> Result<Vec<String>> {
        self.check_init()?;
        let mut serials = self.inner.allocated.serials();
        serials.sort();
        Ok(serials)
    }

    /// Serials free to allocate. Placeholders are not listed.
    pub fn available_serials(&self) -> Result<Vec<String>> {
        self.check_init()?;
        Ok(self
            .inner
            .available
            .snapshot()
            .into_iter()
            .filter(|d| !d.is_stub())
            .map(|d| d.serial)
            .collect())
    }

    /// Serials visible on the bridge but neither available nor allocated.
    pub fn unavailable_serials(&self) -> Result<Vec<String>> {
        self.check_init()?;
        let available = self.available_serials()?;
        let allocated = self.inner.allocated.serials();
        Ok(self
            .inner
            .bridge
            .devices()
            .into_iter()
            .map(|d| d.serial)
            .filter(|s| !available.contains(s) && !allocated.contains(s))
            .collect())
    }

    /// Raw queue contents including placeholders. Diagnostic view.
    pub fn available_snapshot(&self) -> Vec<Device> {
        self.inner.available.snapshot()
    }

    /// Descriptors for every device the pool knows about, sorted for
    /// display.
    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        self.check_init()?;
        Ok(self.inner.device_descriptors())
    }

    /// Write the fleet as an aligned text table.
    pub fn write_device_report(&self, out: &mut dyn Write) -> Result<()> {
        self.check_init()?;
        let table = format_device_table(&self.inner.device_descriptors());
        out.write_all(table.as_bytes())?;
        Ok(())
    }

    /// Write the emulator utilization summary.
    pub fn write_emulator_stats(&self, out: &mut dyn Write) -> Result<()> {
        self.check_init()?;
        writeln!(
            out,
            "Average percent utilization in last 24 hours: {}",
            self.inner.stats.total_utilization(self.inner.options.max_emulators)
        )?;
        Ok(())
    }
}

impl ManagerInner {
    fn create_allocated(&self, device: Device) -> Result<Arc<TestDevice>> {
        let monitor = self.monitor_factory.read().create_monitor(&device);
        let handle = TestDevice::new(device.clone(), monitor, Arc::clone(&self.runner));
        if !self.allocated.insert(Arc::clone(&handle)) {
            return Err(PoolError::InvalidState(format!(
                "device {} is already allocated",
                device.serial
            )));
        }
        info!("allocated device {}", device.serial);
        if device.is_emulator() {
            self.stats.record_allocation(&device.serial);
        }
        self.observer.notify();
        Ok(handle)
    }

    /// Return a freed device to the queue. Network placeholders are not
    /// requeued: the connection they stood for is gone.
    fn requeue_freed(&self, device: Device) {
        if device.kind == DeviceKind::TcpStub {
            debug!("not returning network placeholder {} to the pool", device.serial);
            return;
        }
        self.prober.add_available(device);
    }

    async fn check_and_add_available(&self, device: Device) {
        if self.prober.is_checking(&device.serial) {
            debug!("already checking new device {}, ignoring", device.serial);
            return;
        }
        let filter = self.filter.read().clone();
        if !filter.matches(&device) {
            debug!("new device {} doesn't match global filter, ignoring", device.serial);
            return;
        }
        let monitor = self.monitor_factory.read().create_monitor(&device);
        self.prober.check_device(device, monitor).await;
    }

    fn device_descriptors(&self) -> Vec<DeviceDescriptor> {
        let filter = self.filter.read().clone();

        let mut map: HashMap<String, (Device, AllocationState)> = HashMap::new();
        for device in self.bridge.devices() {
            let state = if filter.matches(&device) {
                AllocationState::Unavailable
            } else {
                AllocationState::Ignored
            };
            map.insert(device.serial.clone(), (device, state));
        }
        for serial in self.prober.checking_serials() {
            if let Some(entry) = map.get_mut(&serial) {
                entry.1 = AllocationState::Checking;
            }
        }
        for handle in self.allocated.handles() {
            let device = handle.device();
            map.insert(device.serial.clone(), (device, AllocationState::Allocated));
        }
        for device in self.available.snapshot() {
            if !device.is_stub() {
                map.insert(device.serial.clone(), (device, AllocationState::Available));
            }
        }

        let mut rows: Vec<DeviceDescriptor> = map
            .values()
            .map(|(device, state)| DeviceDescriptor::new(device, *state, filter.as_ref()))
            .collect();
        sort_descriptors(&mut rows);
        rows
    }
}

/// Translates bridge events into pool actions.
struct PoolListener {
    inner: Weak<ManagerInner>,
}

#[async_trait]
impl BridgeListener for PoolListener {
    async fn device_connected(&self, device: &Device) {
        let Some(inner) = self.inner.upgrade() else { return };
        debug!("detected device connect {}", device.serial);
        match inner.allocated.get(&device.serial) {
            None => {
                if is_valid_serial(&device.serial) && device.state == DeviceState::Online {
                    inner.check_and_add_available(device.clone()).await;
                } else if let Some(monitor) = inner.prober.monitor_for(&device.serial) {
                    monitor.set_state(device.state);
                }
            }
            Some(handle) => {
                // The bridge mints a fresh record on every reconnect; keep
                // the allocated handle pointed at the current one.
                debug!("updating device record for {}", device.serial);
                handle.set_device(device.clone());
                handle.set_state(device.state);
            }
        }
    }

    async fn device_changed(&self, device: &Device, mask: u32) {
        let Some(inner) = self.inner.upgrade() else { return };
        if mask & CHANGE_STATE == 0 {
            return;
        }
        if let Some(handle) = inner.allocated.get(&device.serial) {
            handle.set_state(device.state);
        } else if let Some(monitor) = inner.prober.monitor_for(&device.serial) {
            monitor.set_state(device.state);
        } else if !inner.available.contains(&device.serial) && device.state == DeviceState::Online {
            inner.check_and_add_available(device.clone()).await;
        }
    }

    async fn device_disconnected(&self, device: &Device) {
        let Some(inner) = self.inner.upgrade() else { return };
        if inner.available.remove(&device.serial).is_some() {
            info!("removed disconnected device {} from available pool", device.serial);
        }
        if let Some(handle) = inner.allocated.get(&device.serial) {
            handle.set_state(DeviceState::NotAvailable);
        } else if let Some(monitor) = inner.prober.monitor_for(&device.serial) {
            monitor.set_state(DeviceState::NotAvailable);
        }
        inner.observer.notify();
    }
}
