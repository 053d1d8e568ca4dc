//! Emulator process helpers and utilization statistics.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Child;
use tracing::{debug, warn};

/// Timeout for talking to the emulator console.
const CONSOLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Utilization reporting window.
const STATS_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Whether a spawned process is still running.
pub(crate) fn is_process_running(child: &mut Child) -> bool {
    matches!(child.try_wait(), Ok(None))
}

/// Ask a local emulator to shut down through its console port.
/// Returns false when the console could not be reached.
pub(crate) async fn console_kill(port: u16) -> bool {
    let connect = TcpStream::connect(("127.0.0.1", port));
    match tokio::time::timeout(CONSOLE_TIMEOUT, connect).await {
        Ok(Ok(mut stream)) => {
            if let Err(err) = stream.write_all(b"kill\n").await {
                warn!("emulator console kill on port {port} failed: {err}");
                return false;
            }
            let _ = stream.shutdown().await;
            true
        }
        Ok(Err(err)) => {
            debug!("emulator console on port {port} unreachable: {err}");
            false
        }
        Err(_) => {
            debug!("emulator console on port {port} timed out");
            false
        }
    }
}

#[derive(Debug, Default)]
struct UsageSpans {
    /// Closed allocation spans within the window.
    closed: Vec<(Instant, Instant)>,
    /// Start of the current allocation, if the serial is allocated now.
    open: Option<Instant>,
}

/// Rolling-window record of how busy the emulator slots have been.
pub(crate) struct EmulatorStats {
    window: Duration,
    usage: Mutex<HashMap<String, UsageSpans>>,
}

impl EmulatorStats {
    pub(crate) fn new() -> Self {
        Self::with_window(STATS_WINDOW)
    }

    pub(crate) fn with_window(window: Duration) -> Self {
        Self {
            window,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn record_allocation(&self, serial: &str) {
        let mut usage = self.usage.lock();
        let spans = usage.entry(serial.to_string()).or_default();
        if spans.open.is_none() {
            spans.open = Some(Instant::now());
        }
    }

    pub(crate) fn record_free(&self, serial: &str) {
        let mut usage = self.usage.lock();
        if let Some(spans) = usage.get_mut(serial) {
            if let Some(start) = spans.open.take() {
                spans.closed.push((start, Instant::now()));
            }
        }
    }

    /// Average utilization of `slots` emulator slots over the window, as a
    /// percentage.
    pub(crate) fn total_utilization(&self, slots: usize) -> u64 {
        let now = Instant::now();
        let window_start = now.checked_sub(self.window);
        let mut busy = Duration::ZERO;

        let mut usage = self.usage.lock();
        for spans in usage.values_mut() {
            spans
                .closed
                .retain(|(_, end)| window_start.map_or(true, |ws| *end > ws));
            for (start, end) in &spans.closed {
                let clipped = window_start.map_or(*start, |ws| (*start).max(ws));
                busy += end.saturating_duration_since(clipped);
            }
            if let Some(start) = spans.open {
                let clipped = window_start.map_or(start, |ws| start.max(ws));
                busy += now.saturating_duration_since(clipped);
            }
        }

        let capacity = self.window.as_millis() * slots.max(1) as u128;
        ((busy.as_millis() * 100 / capacity) as u64).min(100)
    }
}
