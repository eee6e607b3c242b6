use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use plclink_frame::HealthStats;
use plclink_transport::ChannelKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::manager::LinkManager;
use crate::monitor::Region;
use crate::queue::CommandQueue;

/// Identifies one logical consumer of the link layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One client's view of the link layer.
///
/// Atomic device calls go through the client's own [`CommandQueue`], so the
/// same client never has two of them in flight. Dropping the client stops its
/// monitors and rejects anything still queued.
#[derive(Debug)]
pub struct LinkClient {
    id: ClientId,
    manager: LinkManager,
    queue: CommandQueue,
}

impl LinkClient {
    pub(crate) fn new(id: ClientId, manager: LinkManager) -> Self {
        let queue = CommandQueue::new(manager.config().queue());
        Self { id, manager, queue }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn manager(&self) -> &LinkManager {
        &self.manager
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    fn timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.queue.config().default_timeout)
    }

    /// Send a raw command line and return the raw response line.
    pub async fn send_command(
        &self,
        key: &ChannelKey,
        command: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let device = self.manager.device(key);
        let command = command.into();
        let timeout = self.timeout(timeout);
        self.queue
            .run(Some(timeout), async move { device.send(&command, timeout).await })
            .await
    }

    pub async fn read_memory(
        &self,
        key: &ChannelKey,
        address: u32,
        size: u32,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        let device = self.manager.device(key);
        let timeout = self.timeout(timeout);
        self.queue
            .run(Some(timeout), async move {
                device.read_memory(address, size, timeout).await
            })
            .await
    }

    pub async fn write_memory(
        &self,
        key: &ChannelKey,
        address: u32,
        data: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let device = self.manager.device(key);
        let data = data.into();
        let timeout = self.timeout(timeout);
        self.queue
            .run(Some(timeout), async move {
                device.write_memory(address, &data, timeout).await
            })
            .await
    }

    pub async fn program_info(&self, key: &ChannelKey, timeout: Option<Duration>) -> Result<Bytes> {
        let device = self.manager.device(key);
        let timeout = self.timeout(timeout);
        self.queue
            .run(Some(timeout), async move { device.program_info(timeout).await })
            .await
    }

    pub async fn get_health(
        &self,
        key: &ChannelKey,
        timeout: Option<Duration>,
    ) -> Result<HealthStats> {
        let device = self.manager.device(key);
        let timeout = self.timeout(timeout);
        self.queue
            .run(Some(timeout), async move { device.health(timeout).await })
            .await
    }

    pub async fn reset_health(&self, key: &ChannelKey, timeout: Option<Duration>) -> Result<()> {
        let device = self.manager.device(key);
        let timeout = self.timeout(timeout);
        self.queue
            .run(Some(timeout), async move { device.reset_health(timeout).await })
            .await
    }

    pub fn subscribe_monitor(
        &self,
        key: &ChannelKey,
        regions: &[Region],
        interval: Option<Duration>,
    ) -> Result<usize> {
        self.manager
            .subscribe_monitor(&self.id, key, regions, interval)
    }

    pub fn unsubscribe_monitor(&self, key: &ChannelKey) -> Result<()> {
        self.manager.unsubscribe_monitor(&self.id, key)
    }

    /// Reject queued work, e.g. after reconnecting. Returns the number of
    /// entries dropped.
    pub fn reset(&self) -> usize {
        self.queue.clear()
    }
}

impl Drop for LinkClient {
    fn drop(&mut self) {
        let monitors = self.manager.disconnect_client(&self.id);
        let queued = self.queue.clear();
        debug!(client = %self.id, monitors, queued, "client disconnected");
    }
}
