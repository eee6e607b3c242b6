use std::time::Duration;

/// Default inbound buffer capacity per channel: 64 KiB.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64 * 1024;
/// Window for a connection to be established.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// After this long a close is reported complete even without a close event.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound for any single request/response cycle on a channel.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Depth of the transport event broadcast.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Per-channel transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Inbound bytes kept per channel; oldest bytes are evicted past this.
    pub inbound_capacity: usize,
    /// Connect/open window.
    pub connect_timeout: Duration,
    /// Close safety timeout.
    pub close_timeout: Duration,
    /// Maximum single-request timeout.
    pub request_timeout: Duration,
    /// Broadcast depth for transport events.
    pub event_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Network probe scan settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Probes run concurrently per batch.
    pub batch_size: usize,
    /// Connect timeout for each probe.
    pub probe_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            probe_timeout: Duration::from_millis(500),
        }
    }
}
