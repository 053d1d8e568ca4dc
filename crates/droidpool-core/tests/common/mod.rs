//! Fake collaborators for driving the pool without adb, fastboot, or real
//! hardware.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::watch;

use droidpool_core::bridge::{
    BridgeError, BridgeListener, CommandResult, CommandRunner, CommandStatus, DebugBridge, Device,
    DeviceState, DeviceStateMonitor, MonitorFactory, CHANGE_STATE,
};

/// In-memory debug bridge. Tests push devices in and out; listener dispatch
/// is awaited so event handling is fully observable.
#[derive(Default)]
pub struct FakeBridge {
    devices: Mutex<Vec<Device>>,
    listeners: Mutex<Vec<Arc<dyn BridgeListener>>>,
    init_calls: AtomicUsize,
    terminate_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl FakeBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn snapshot(&self) -> Vec<Arc<dyn BridgeListener>> {
        self.listeners.lock().clone()
    }

    pub async fn connect_device(&self, device: Device) {
        {
            let mut devices = self.devices.lock();
            devices.retain(|d| d.serial != device.serial);
            devices.push(device.clone());
        }
        for listener in self.snapshot() {
            listener.device_connected(&device).await;
        }
    }

    pub async fn disconnect_device(&self, device: Device) {
        self.devices.lock().retain(|d| d.serial != device.serial);
        for listener in self.snapshot() {
            listener.device_disconnected(&device).await;
        }
    }

    pub async fn change_state(&self, device: Device) {
        {
            let mut devices = self.devices.lock();
            devices.retain(|d| d.serial != device.serial);
            devices.push(device.clone());
        }
        for listener in self.snapshot() {
            listener.device_changed(&device, CHANGE_STATE).await;
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::Relaxed)
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::Relaxed)
    }
}

impl DebugBridge for FakeBridge {
    fn init(&self) -> Result<(), BridgeError> {
        self.init_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn terminate(&self) {
        self.terminate_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn devices(&self) -> Vec<Device> {
        self.devices.lock().clone()
    }

    fn add_listener(&self, listener: Arc<dyn BridgeListener>) {
        self.listeners.lock().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn BridgeListener>) {
        self.listeners.lock().retain(|l| !Arc::ptr_eq(l, listener));
    }
}

/// Monitor whose shell answer and state are driven by the test.
pub struct ScriptedMonitor {
    state_tx: watch::Sender<DeviceState>,
    shell_tx: watch::Sender<Option<bool>>,
}

impl ScriptedMonitor {
    pub fn new(initial: DeviceState) -> Self {
        let (state_tx, _) = watch::channel(initial);
        let (shell_tx, _) = watch::channel(None);
        Self { state_tx, shell_tx }
    }

    /// Drive the device into `state`, releasing any waiters.
    pub fn set(&self, state: DeviceState) {
        self.state_tx.send_replace(state);
    }

    /// Answer the pending (or next) shell readiness probe.
    pub fn respond_shell(&self, ok: bool) {
        self.shell_tx.send_replace(Some(ok));
    }
}

#[async_trait]
impl DeviceStateMonitor for ScriptedMonitor {
    async fn wait_for_shell(&self, timeout: Duration) -> bool {
        let mut rx = self.shell_tx.subscribe();
        let result = match tokio::time::timeout(timeout, rx.wait_for(|v| v.is_some())).await {
            Ok(Ok(answer)) => (*answer).unwrap_or(false),
            _ => false,
        };
        result
    }

    fn set_state(&self, state: DeviceState) {
        self.state_tx.send_replace(state);
    }

    fn state(&self) -> DeviceState {
        *self.state_tx.borrow()
    }

    async fn wait_for_state(&self, target: DeviceState, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

/// Factory that records every monitor it mints so tests can reach them.
#[derive(Default)]
pub struct ScriptedFactory {
    monitors: Mutex<HashMap<String, Arc<ScriptedMonitor>>>,
    created: AtomicUsize,
    auto_shell: Mutex<Option<bool>>,
    online_on_create: AtomicBool,
}

impl ScriptedFactory {
    /// Answer every future shell probe without test involvement.
    pub fn set_auto_shell(&self, answer: Option<bool>) {
        *self.auto_shell.lock() = answer;
    }

    /// Mint monitors already in the online state.
    pub fn set_online_on_create(&self, online: bool) {
        self.online_on_create.store(online, Ordering::Relaxed);
    }

    pub fn monitor(&self, serial: &str) -> Arc<ScriptedMonitor> {
        self.monitors
            .lock()
            .get(serial)
            .cloned()
            .unwrap_or_else(|| panic!("no monitor created for {serial}"))
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl MonitorFactory for ScriptedFactory {
    fn create_monitor(&self, device: &Device) -> Arc<dyn DeviceStateMonitor> {
        let initial = if self.online_on_create.load(Ordering::Relaxed) {
            DeviceState::Online
        } else {
            device.state
        };
        let monitor = Arc::new(ScriptedMonitor::new(initial));
        if let Some(answer) = *self.auto_shell.lock() {
            monitor.respond_shell(answer);
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        self.monitors
            .lock()
            .insert(device.serial.clone(), Arc::clone(&monitor));
        monitor
    }
}

/// Command runner with canned results. Unknown commands succeed with empty
/// output; sleeps are compressed so retry loops stay fast.
#[derive(Default)]
pub struct FakeRunner {
    results: Mutex<HashMap<String, CommandResult>>,
    commands: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_success(&self, command: &str, stdout: &str) {
        self.results.lock().insert(
            command.to_string(),
            CommandResult {
                status: CommandStatus::Success,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    pub fn set_failure(&self, command: &str, stderr: &str) {
        self.results.lock().insert(
            command.to_string(),
            CommandResult {
                status: CommandStatus::Failed,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// How many times `command` was run.
    pub fn run_count(&self, command: &str) -> usize {
        self.commands.lock().iter().filter(|c| *c == command).count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run_timed(&self, _timeout: Duration, argv: &[&str]) -> CommandResult {
        let command = argv.join(" ");
        self.commands.lock().push(command.clone());
        self.results.lock().get(&command).cloned().unwrap_or(CommandResult {
            status: CommandStatus::Success,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn run_background(&self, argv: &[&str]) -> io::Result<Child> {
        // Only harmless helpers may actually be spawned from tests.
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;
        if *program != "sleep" && *program != "true" {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("refusing to spawn {program} from tests"),
            ));
        }
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration.min(Duration::from_millis(10))).await;
    }
}

/// Fastboot listener that counts reconcile notifications.
#[derive(Default)]
pub struct CountingFastbootListener {
    updates: AtomicUsize,
}

impl CountingFastbootListener {
    pub fn count(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }
}

impl droidpool_core::FastbootListener for CountingFastbootListener {
    fn state_updated(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }
}

/// Pool monitor that counts change notifications.
#[derive(Default)]
pub struct CountingPoolMonitor {
    changes: AtomicUsize,
}

impl CountingPoolMonitor {
    pub fn count(&self) -> usize {
        self.changes.load(Ordering::Relaxed)
    }
}

impl droidpool_core::PoolMonitor for CountingPoolMonitor {
    fn notify_change(&self) {
        self.changes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
