//! Telemetry monitor: periodic memory-region reads on one channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use plclink_frame::{bytes_to_hex, decode_response, CommandFrame};
use plclink_transport::{ChannelHandle, ChannelKey, Transport};
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::arbiter::{Acquired, Arbiter, ArbiterGuard};
use crate::client::ClientId;
use crate::config::MonitorConfig;
use crate::device::request_line;
use crate::error::Result;

/// A memory region to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    pub address: u32,
    pub size: u32,
}

impl Region {
    pub fn new(address: u32, size: u32) -> Self {
        Self { address, size }
    }
}

impl std::str::FromStr for Region {
    type Err = String;

    /// `address:size`, each decimal or `0x`-prefixed hex.
    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let (address, size) = input
            .split_once(':')
            .ok_or_else(|| format!("expected address:size, got '{input}'"))?;
        Ok(Self {
            address: parse_number(address)?,
            size: parse_number(size)?,
        })
    }
}

fn parse_number(text: &str) -> std::result::Result<u32, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| format!("invalid number '{text}'"))
}

/// One subscribed region with its read command built up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    region: Region,
    command: String,
}

impl Subscription {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            command: CommandFrame::memory_read(region.address, region.size).to_line(),
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// `address:size`, the subscription's identity within a set.
    pub fn id(&self) -> String {
        format!("{}:{}", self.region.address, self.region.size)
    }
}

/// Data read from one region during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub address: u32,
    pub size: u32,
    #[serde(serialize_with = "hex_string")]
    pub data: Bytes,
}

/// All samples from one monitor cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryBatch {
    pub client: ClientId,
    pub key: ChannelKey,
    pub samples: Vec<Sample>,
}

pub(crate) fn hex_string<S: Serializer>(data: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&bytes_to_hex(data))
}

/// A running poll loop for one (client, channel) pair.
///
/// While running it holds an inbound claim on the channel, so raw `Data`
/// events for that channel are not broadcast.
#[derive(Debug)]
pub struct Monitor {
    client: ClientId,
    key: ChannelKey,
    subscriptions: Arc<Vec<Subscription>>,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// What a monitor task needs to do its work.
#[derive(Clone)]
pub struct MonitorContext {
    pub transport: Transport,
    pub arbiter: Arc<Arbiter>,
    pub config: MonitorConfig,
    pub telemetry: broadcast::Sender<TelemetryBatch>,
}

impl Monitor {
    /// Start polling `regions` on `key`.
    ///
    /// Duplicate regions collapse into one subscription. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        client: ClientId,
        key: ChannelKey,
        regions: &[Region],
        context: MonitorContext,
    ) -> Self {
        let subscriptions: BTreeMap<String, Subscription> = regions
            .iter()
            .map(|region| {
                let sub = Subscription::new(*region);
                (sub.id(), sub)
            })
            .collect();
        let subscriptions = Arc::new(subscriptions.into_values().collect::<Vec<_>>());
        let running = Arc::new(AtomicBool::new(true));

        info!(
            client = %client,
            key = %key,
            regions = subscriptions.len(),
            interval = ?context.config.interval,
            "monitor started"
        );
        let task = tokio::spawn(run(MonitorTask {
            client: client.clone(),
            key: key.clone(),
            subscriptions: Arc::clone(&subscriptions),
            running: Arc::clone(&running),
            context,
        }));

        Self {
            client,
            key,
            subscriptions,
            running,
            task,
        }
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// False once stopped or after the channel closed underneath it.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Stop after the current request, if any. The cycle in progress emits
    /// nothing.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(client = %self.client, key = %self.key, "monitor stopped");
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct MonitorTask {
    client: ClientId,
    key: ChannelKey,
    subscriptions: Arc<Vec<Subscription>>,
    running: Arc<AtomicBool>,
    context: MonitorContext,
}

impl MonitorTask {
    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn cycle(&self, channel: &ChannelHandle) -> Vec<Sample> {
        let MonitorContext { arbiter, config, .. } = &self.context;
        let mut samples = Vec::with_capacity(self.subscriptions.len());

        for sub in self.subscriptions.iter() {
            if !self.running() {
                break;
            }
            let guard = match arbiter.acquire().await {
                Acquired::Held(guard) => guard,
                Acquired::ForceReleased => {
                    debug!(key = %self.key, "monitor cycle aborted by channel reset");
                    break;
                }
            };
            if !self.running() || !channel.is_open() {
                break;
            }

            match self.read(channel, &guard, sub, config).await {
                Ok(data) => samples.push(Sample {
                    address: sub.region.address,
                    size: sub.region.size,
                    data,
                }),
                // One region failing must not sink the batch.
                Err(err) => debug!(key = %self.key, region = %sub.id(), error = %err, "sample skipped"),
            }
            drop(guard);
        }
        samples
    }

    async fn read(
        &self,
        channel: &ChannelHandle,
        guard: &ArbiterGuard,
        sub: &Subscription,
        config: &MonitorConfig,
    ) -> Result<Bytes> {
        let line = request_line(
            channel,
            guard,
            &sub.command,
            config.read_timeout,
            config.poll_interval,
        )
        .await?;
        Ok(decode_response(&line)?)
    }
}

async fn run(task: MonitorTask) {
    let transport = &task.context.transport;
    // Polling stays on the channel instance open at start.
    let Ok(channel) = transport.handle(&task.key) else {
        info!(client = %task.client, key = %task.key, "channel not open; monitor stopping");
        task.running.store(false, Ordering::SeqCst);
        return;
    };
    let _claim = transport.claim_inbound(&task.key, format!("monitor:{}", task.client));
    let mut ticker = tokio::time::interval(task.context.config.interval);
    // A slow cycle swallows the ticks it overlaps.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while task.running() {
        ticker.tick().await;
        if !task.running() {
            break;
        }
        if !channel.is_open() {
            info!(client = %task.client, key = %task.key, "channel closed; monitor stopping");
            task.running.store(false, Ordering::SeqCst);
            break;
        }

        let samples = task.cycle(&channel).await;
        if !samples.is_empty() && task.running() {
            let _ = task.context.telemetry.send(TelemetryBatch {
                client: task.client.clone(),
                key: task.key.clone(),
                samples,
            });
        }
    }
    debug!(client = %task.client, key = %task.key, "monitor task finished");
}
