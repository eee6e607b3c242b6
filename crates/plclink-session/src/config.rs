use std::path::Path;
use std::time::Duration;

use plclink_transport::{ChannelConfig, ScanConfig};
use serde::Deserialize;

use crate::error::Result;

/// Default telemetry poll period.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_millis(100);
/// Default wait for one telemetry read response.
pub const DEFAULT_MONITOR_READ_TIMEOUT: Duration = Duration::from_millis(500);
/// Sub-interval at which the inbound buffer is polled for a full line.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Default command queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;
/// Default per-operation timeout for queued commands.
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Telemetry monitor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_MONITOR_INTERVAL,
            read_timeout: DEFAULT_MONITOR_READ_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl MonitorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Command queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Entries allowed at once, counting the one executing.
    pub capacity: usize,
    pub default_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            default_timeout: DEFAULT_QUEUE_TIMEOUT,
        }
    }
}

/// Flat, file-loadable session settings. Durations are milliseconds.
///
/// Every field is optional in the JSON form; missing fields keep defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub inbound_capacity: usize,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub event_capacity: usize,
    pub monitor_interval_ms: u64,
    pub monitor_read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub queue_capacity: usize,
    pub queue_timeout_ms: u64,
    pub scan_batch_size: usize,
    pub scan_probe_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let channel = ChannelConfig::default();
        let monitor = MonitorConfig::default();
        let queue = QueueConfig::default();
        let scan = ScanConfig::default();
        Self {
            inbound_capacity: channel.inbound_capacity,
            connect_timeout_ms: millis(channel.connect_timeout),
            close_timeout_ms: millis(channel.close_timeout),
            request_timeout_ms: millis(channel.request_timeout),
            event_capacity: channel.event_capacity,
            monitor_interval_ms: millis(monitor.interval),
            monitor_read_timeout_ms: millis(monitor.read_timeout),
            poll_interval_ms: millis(monitor.poll_interval),
            queue_capacity: queue.capacity,
            queue_timeout_ms: millis(queue.default_timeout),
            scan_batch_size: scan.batch_size,
            scan_probe_timeout_ms: millis(scan.probe_timeout),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON config document.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn channel(&self) -> ChannelConfig {
        ChannelConfig {
            inbound_capacity: self.inbound_capacity,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            event_capacity: self.event_capacity,
        }
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(self.monitor_interval_ms.max(1)),
            read_timeout: Duration::from_millis(self.monitor_read_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
            default_timeout: Duration::from_millis(self.queue_timeout_ms),
        }
    }

    pub fn scan(&self) -> ScanConfig {
        ScanConfig {
            batch_size: self.scan_batch_size,
            probe_timeout: Duration::from_millis(self.scan_probe_timeout_ms),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
