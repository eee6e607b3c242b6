use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use plclink_frame::HealthStats;
use plclink_transport::{
    list_ports, ChannelKey, ChannelTarget, DeviceStream, PortInfo, Transport, TransportError,
    TransportEvent,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::arbiter::ArbiterRegistry;
use crate::client::{ClientId, LinkClient};
use crate::config::SessionConfig;
use crate::device::DeviceLink;
use crate::error::{Result, SessionError};
use crate::monitor::{Monitor, MonitorContext, Region, TelemetryBatch};
use crate::rpc::LinkEvent;

type MonitorKey = (ClientId, ChannelKey);

/// Owns the transport, the per-channel arbiters and every running monitor.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct LinkManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: SessionConfig,
    transport: Transport,
    arbiters: ArbiterRegistry,
    monitors: Mutex<HashMap<MonitorKey, Monitor>>,
    telemetry: broadcast::Sender<TelemetryBatch>,
}

impl LinkManager {
    pub fn new(config: SessionConfig) -> Self {
        let transport = Transport::new(config.channel());
        let (telemetry, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(ManagerInner {
                config,
                transport,
                arbiters: ArbiterRegistry::new(),
                monitors: Mutex::new(HashMap::new()),
                telemetry,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn arbiters(&self) -> &ArbiterRegistry {
        &self.inner.arbiters
    }

    /// A client handle with its own command queue.
    pub fn client(&self, id: impl Into<ClientId>) -> LinkClient {
        LinkClient::new(id.into(), self.clone())
    }

    pub fn list_ports(&self) -> Result<Vec<PortInfo>> {
        Ok(list_ports()?)
    }

    /// Open a channel. With `force`, an already-open channel for the same key
    /// is closed first (stopping its monitors and force-releasing its arbiter).
    pub async fn open(&self, target: &ChannelTarget, force: bool) -> Result<ChannelKey> {
        let key = target.key();
        if self.is_open(&key) {
            if !force {
                return Err(TransportError::AlreadyConnected(key).into());
            }
            warn!(%key, "forced reopen; closing existing channel");
            self.close(&key).await;
        }
        Ok(self.inner.transport.open(target).await?)
    }

    /// Register an already-connected stream as a channel.
    pub fn attach<S>(&self, key: impl Into<ChannelKey>, stream: S) -> Result<ChannelKey>
    where
        S: DeviceStream + 'static,
    {
        Ok(self.inner.transport.attach(key, stream)?)
    }

    /// Close a channel: stop its monitors, wake anyone waiting on its
    /// arbiter, then close the transport.
    pub async fn close(&self, key: &ChannelKey) {
        let stopped = self.remove_monitors(|(_, monitored)| monitored == key);
        let woken = self.inner.arbiters.force_release(key);
        info!(%key, monitors = stopped, woken, "closing channel");
        self.inner.transport.close(key).await;
    }

    pub async fn write(&self, key: &ChannelKey, data: &[u8]) -> Result<()> {
        Ok(self.inner.transport.write(key, data).await?)
    }

    pub fn read(&self, key: &ChannelKey, max: Option<usize>) -> Result<Bytes> {
        Ok(self.inner.transport.read(key, max)?)
    }

    pub fn available(&self, key: &ChannelKey) -> Result<usize> {
        Ok(self.inner.transport.available(key)?)
    }

    pub fn is_open(&self, key: &ChannelKey) -> bool {
        self.inner.transport.is_open(key)
    }

    pub fn list_open(&self) -> Vec<ChannelKey> {
        self.inner.transport.list_open()
    }

    /// Arbitrated request/response access to `key`.
    pub fn device(&self, key: &ChannelKey) -> DeviceLink {
        DeviceLink::new(
            self.inner.transport.clone(),
            self.inner.arbiters.get(key),
            key.clone(),
        )
        .with_poll_interval(self.inner.config.monitor().poll_interval)
    }

    fn request_timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.inner.config.channel().request_timeout)
    }

    /// Send a raw command line and return the raw response line.
    pub async fn send_command(
        &self,
        key: &ChannelKey,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        self.device(key)
            .send(command, self.request_timeout(timeout))
            .await
    }

    pub async fn get_health(&self, key: &ChannelKey, timeout: Option<Duration>) -> Result<HealthStats> {
        self.device(key).health(self.request_timeout(timeout)).await
    }

    pub async fn reset_health(&self, key: &ChannelKey, timeout: Option<Duration>) -> Result<()> {
        self.device(key)
            .reset_health(self.request_timeout(timeout))
            .await
    }

    /// Start (or replace) `client`'s monitor on `key`. Returns the number of
    /// distinct regions polled.
    pub fn subscribe_monitor(
        &self,
        client: &ClientId,
        key: &ChannelKey,
        regions: &[Region],
        interval: Option<Duration>,
    ) -> Result<usize> {
        if regions.is_empty() {
            return Err(SessionError::InvalidRequest(
                "monitor needs at least one region".to_string(),
            ));
        }
        if !self.is_open(key) {
            return Err(TransportError::NotOpen(key.clone()).into());
        }

        let monitor_key = (client.clone(), key.clone());
        if let Some(previous) = self.lock_monitors().remove(&monitor_key) {
            previous.stop();
        }

        let mut config = self.inner.config.monitor();
        if let Some(interval) = interval {
            config = config.with_interval(interval.max(Duration::from_millis(1)));
        }
        let monitor = Monitor::start(
            client.clone(),
            key.clone(),
            regions,
            MonitorContext {
                transport: self.inner.transport.clone(),
                arbiter: self.inner.arbiters.get(key),
                config,
                telemetry: self.inner.telemetry.clone(),
            },
        );
        let count = monitor.subscriptions().len();
        self.lock_monitors().insert(monitor_key, monitor);
        Ok(count)
    }

    pub fn unsubscribe_monitor(&self, client: &ClientId, key: &ChannelKey) -> Result<()> {
        match self.lock_monitors().remove(&(client.clone(), key.clone())) {
            Some(monitor) => {
                monitor.stop();
                Ok(())
            }
            None => Err(SessionError::NotMonitoring(key.clone())),
        }
    }

    pub fn is_monitoring(&self, client: &ClientId, key: &ChannelKey) -> bool {
        self.lock_monitors()
            .get(&(client.clone(), key.clone()))
            .is_some_and(Monitor::is_running)
    }

    /// Stop every monitor belonging to `client`. Returns how many stopped.
    pub fn disconnect_client(&self, client: &ClientId) -> usize {
        self.remove_monitors(|(owner, _)| owner == client)
    }

    /// Merged stream of transport events and telemetry batches.
    pub fn events(&self) -> SessionEvents {
        SessionEvents {
            transport: Some(self.inner.transport.subscribe()),
            telemetry: Some(self.inner.telemetry.subscribe()),
        }
    }

    /// Stop all monitors and close all channels.
    pub async fn shutdown(&self) {
        self.remove_monitors(|_| true);
        for key in self.list_open() {
            self.close(&key).await;
        }
    }

    fn remove_monitors(&self, matches: impl Fn(&MonitorKey) -> bool) -> usize {
        let removed: Vec<Monitor> = {
            let mut monitors = self.lock_monitors();
            let keys: Vec<MonitorKey> = monitors.keys().filter(|&k| matches(k)).cloned().collect();
            keys.iter().filter_map(|k| monitors.remove(k)).collect()
        };
        for monitor in &removed {
            monitor.stop();
        }
        removed.len()
    }

    fn lock_monitors(&self) -> MutexGuard<'_, HashMap<MonitorKey, Monitor>> {
        self.inner
            .monitors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LinkManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("transport", &self.inner.transport)
            .field("monitors", &self.lock_monitors().len())
            .finish()
    }
}

/// Receiver for [`LinkEvent`]s.
pub struct SessionEvents {
    transport: Option<broadcast::Receiver<TransportEvent>>,
    telemetry: Option<broadcast::Receiver<TelemetryBatch>>,
}

impl SessionEvents {
    /// Next event, or `None` once both sources are gone.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        loop {
            tokio::select! {
                event = recv_from(&mut self.transport), if self.transport.is_some() => {
                    if let Some(event) = event {
                        return Some(event.into());
                    }
                }
                batch = recv_from(&mut self.telemetry), if self.telemetry.is_some() => {
                    if let Some(batch) = batch {
                        return Some(LinkEvent::Telemetry(batch));
                    }
                }
                else => return None,
            }
        }
    }
}

/// Receive from an optional broadcast receiver, dropping it once closed.
/// Lag is logged and skipped.
async fn recv_from<T: Clone>(slot: &mut Option<broadcast::Receiver<T>>) -> Option<T> {
    let rx = slot.as_mut()?;
    loop {
        match rx.recv().await {
            Ok(value) => return Some(value),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event receiver lagged"),
            Err(RecvError::Closed) => {
                *slot = None;
                return None;
            }
        }
    }
}
