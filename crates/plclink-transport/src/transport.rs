use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::buffer::InboundBuffer;
use crate::config::ChannelConfig;
use crate::error::{Result, TransportError};
use crate::event::TransportEvent;
use crate::stream::{self, BoxedStream, DeviceStream};
use crate::target::{ChannelKey, ChannelTarget};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Registry of open device channels.
///
/// Each channel owns its stream, a reader task feeding a bounded inbound
/// buffer, and a write half guarded by an async mutex. Cloning is cheap and
/// every clone refers to the same registry.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    config: ChannelConfig,
    channels: Mutex<HashMap<ChannelKey, Arc<Channel>>>,
    claims: Mutex<HashMap<ChannelKey, Vec<(u64, String)>>>,
    next_claim: AtomicU64,
    events: broadcast::Sender<TransportEvent>,
}

struct Channel {
    key: ChannelKey,
    description: String,
    writer: tokio::sync::Mutex<WriteHalf<BoxedStream>>,
    inbound: InboundBuffer,
    open: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(config: ChannelConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                channels: Mutex::new(HashMap::new()),
                claims: Mutex::new(HashMap::new()),
                next_claim: AtomicU64::new(1),
                events,
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Connect to `target` and register it under its key.
    ///
    /// Fails with `AlreadyConnected` if the key is open, `ConnectTimeout` if
    /// the connection is not up within the connect window, and
    /// `ConnectFailed` for any lower-level error.
    pub async fn open(&self, target: &ChannelTarget) -> Result<ChannelKey> {
        let key = target.key();
        if self.is_open(&key) {
            return Err(TransportError::AlreadyConnected(key));
        }

        let timeout = self.inner.config.connect_timeout;
        info!(%target, "opening channel");
        let stream = match tokio::time::timeout(timeout, stream::connect(target)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(%target, ?timeout, "connect timed out");
                return Err(TransportError::ConnectTimeout {
                    target: target.to_string(),
                    timeout,
                });
            }
        };

        self.register(key, target.to_string(), stream)
    }

    /// Register an already-connected stream under `key`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach<S>(&self, key: impl Into<ChannelKey>, stream: S) -> Result<ChannelKey>
    where
        S: DeviceStream + 'static,
    {
        let key = key.into();
        let description = format!("attached://{key}");
        self.register(key, description, Box::new(stream))
    }

    fn register(
        &self,
        key: ChannelKey,
        description: String,
        stream: BoxedStream,
    ) -> Result<ChannelKey> {
        let (read_half, write_half) = tokio::io::split(stream);
        let channel = Arc::new(Channel {
            key: key.clone(),
            description,
            writer: tokio::sync::Mutex::new(write_half),
            inbound: InboundBuffer::new(self.inner.config.inbound_capacity),
            open: AtomicBool::new(true),
            reader: Mutex::new(None),
        });

        {
            let mut channels = self.inner.lock_channels();
            if channels.contains_key(&key) {
                return Err(TransportError::AlreadyConnected(key));
            }
            channels.insert(key.clone(), Arc::clone(&channel));
        }

        let handle = tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            Arc::clone(&channel),
            read_half,
        ));
        *lock(&channel.reader) = Some(handle);

        info!(%key, target = %channel.description, "channel open");
        Ok(key)
    }

    /// Close a channel. Always succeeds from the caller's point of view.
    ///
    /// If the stream does not finish shutting down within the close timeout
    /// the channel is reported closed anyway.
    pub async fn close(&self, key: &ChannelKey) {
        let Some(channel) = self.inner.remove_channel(key) else {
            debug!(%key, "close requested for unknown channel");
            return;
        };

        let was_open = channel.open.swap(false, Ordering::SeqCst);
        if let Some(handle) = lock(&channel.reader).take() {
            handle.abort();
        }

        let timeout = self.inner.config.close_timeout;
        let shutdown = async {
            let mut writer = channel.writer.lock().await;
            writer.shutdown().await
        };
        match tokio::time::timeout(timeout, shutdown).await {
            Ok(Ok(())) => debug!(%key, "channel shut down"),
            Ok(Err(err)) => debug!(%key, error = %err, "shutdown error ignored"),
            Err(_) => warn!(%key, ?timeout, "close timed out; reporting closed"),
        }

        let dropped = channel.inbound.clear();
        if dropped > 0 {
            debug!(%key, dropped, "discarded unread inbound bytes");
        }
        if was_open {
            info!(%key, "channel closed");
            self.inner.emit(TransportEvent::Closed { key: key.clone() });
        }
    }

    /// Close every open channel.
    pub async fn close_all(&self) {
        for key in self.list_open() {
            self.close(&key).await;
        }
    }

    /// Pin the channel currently registered under `key`.
    ///
    /// Operations through the returned handle keep targeting that instance,
    /// even after the key is closed and reopened.
    pub fn handle(&self, key: &ChannelKey) -> Result<ChannelHandle> {
        Ok(ChannelHandle {
            channel: self.inner.channel(key)?,
        })
    }

    /// Write all of `data`, waiting for the sink to drain as needed.
    pub async fn write(&self, key: &ChannelKey, data: &[u8]) -> Result<()> {
        self.handle(key)?.write(data).await
    }

    /// Drain buffered inbound bytes (all of them when `max` is `None`).
    pub fn read(&self, key: &ChannelKey, max: Option<usize>) -> Result<Bytes> {
        self.handle(key)?.read(max)
    }

    /// Discard buffered inbound bytes, returning how many were dropped.
    pub fn discard_inbound(&self, key: &ChannelKey) -> Result<usize> {
        self.handle(key)?.discard_inbound()
    }

    /// Number of buffered inbound bytes.
    pub fn available(&self, key: &ChannelKey) -> Result<usize> {
        self.handle(key)?.available()
    }

    pub fn is_open(&self, key: &ChannelKey) -> bool {
        self.inner
            .lock_channels()
            .get(key)
            .is_some_and(|channel| channel.is_open())
    }

    /// Keys of all open channels, sorted.
    pub fn list_open(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self
            .inner
            .lock_channels()
            .values()
            .filter(|channel| channel.is_open())
            .map(|channel| channel.key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Subscribe to transport events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    /// Register `owner` as a consumer that interprets inbound traffic on `key`
    /// itself. While any claim is held, `Data` events for the key are not
    /// broadcast; bytes still accumulate in the inbound buffer.
    pub fn claim_inbound(&self, key: &ChannelKey, owner: impl Into<String>) -> InboundClaim {
        let id = self.inner.next_claim.fetch_add(1, Ordering::Relaxed);
        let owner = owner.into();
        debug!(%key, %owner, "inbound claim registered");
        lock(&self.inner.claims)
            .entry(key.clone())
            .or_default()
            .push((id, owner));
        InboundClaim {
            inner: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
        }
    }

    /// Whether some consumer currently claims inbound traffic on `key`.
    pub fn is_claimed(&self, key: &ChannelKey) -> bool {
        self.inner.is_claimed(key)
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("open", &self.list_open())
            .finish()
    }
}

impl Inner {
    fn lock_channels(&self) -> MutexGuard<'_, HashMap<ChannelKey, Arc<Channel>>> {
        lock(&self.channels)
    }

    fn channel(&self, key: &ChannelKey) -> Result<Arc<Channel>> {
        self.lock_channels()
            .get(key)
            .filter(|channel| channel.is_open())
            .cloned()
            .ok_or_else(|| TransportError::NotOpen(key.clone()))
    }

    fn remove_channel(&self, key: &ChannelKey) -> Option<Arc<Channel>> {
        self.lock_channels().remove(key)
    }

    /// Remove `channel` only if it is still the registered instance for its key.
    fn retire(&self, channel: &Arc<Channel>) {
        let mut channels = self.lock_channels();
        if channels
            .get(&channel.key)
            .is_some_and(|current| Arc::ptr_eq(current, channel))
        {
            channels.remove(&channel.key);
        }
    }

    fn is_claimed(&self, key: &ChannelKey) -> bool {
        lock(&self.claims)
            .get(key)
            .is_some_and(|owners| !owners.is_empty())
    }

    fn emit(&self, event: TransportEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl Channel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

async fn read_loop(inner: Weak<Inner>, channel: Arc<Channel>, mut reader: ReadHalf<BoxedStream>) {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let key = channel.key.clone();

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!(%key, "channel reached end of stream");
                break;
            }
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(%key, error = %err, "channel read failed");
                if let Some(inner) = inner.upgrade() {
                    inner.emit(TransportEvent::Error {
                        key: key.clone(),
                        message: err.to_string(),
                    });
                }
                break;
            }
        };

        let data = &chunk[..read];
        let evicted = channel.inbound.push(data);
        if evicted > 0 {
            debug!(%key, evicted, "inbound buffer full; dropped oldest bytes");
        }
        trace!(%key, bytes = read, "received from channel");

        let Some(registry) = inner.upgrade() else {
            break;
        };
        if !registry.is_claimed(&key) {
            registry.emit(TransportEvent::Data {
                key: key.clone(),
                data: Bytes::copy_from_slice(data),
            });
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.retire(&channel);
        if channel.open.swap(false, Ordering::SeqCst) {
            info!(%key, "channel closed by peer");
            inner.emit(TransportEvent::Closed { key });
        }
    }
}

/// One opened channel instance, as returned by [`Transport::handle`].
///
/// Every operation fails with `NotOpen` once this instance has closed. A
/// later channel registered under the same key is never reached.
#[derive(Clone)]
pub struct ChannelHandle {
    channel: Arc<Channel>,
}

impl ChannelHandle {
    pub fn key(&self) -> &ChannelKey {
        &self.channel.key
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let key = &self.channel.key;
        let mut writer = self.channel.writer.lock().await;
        if !self.channel.is_open() {
            return Err(TransportError::NotOpen(key.clone()));
        }

        let write_failed = |source| TransportError::WriteFailed {
            key: key.clone(),
            source,
        };
        writer.write_all(data).await.map_err(write_failed)?;
        writer.flush().await.map_err(write_failed)?;
        trace!(%key, bytes = data.len(), "wrote to channel");
        Ok(())
    }

    pub fn read(&self, max: Option<usize>) -> Result<Bytes> {
        self.ensure_open()?;
        Ok(self.channel.inbound.drain(max))
    }

    pub fn discard_inbound(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.channel.inbound.clear())
    }

    pub fn available(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.channel.inbound.len())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.channel.is_open() {
            Ok(())
        } else {
            Err(TransportError::NotOpen(self.channel.key.clone()))
        }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("key", &self.channel.key)
            .field("target", &self.channel.description)
            .field("open", &self.channel.is_open())
            .finish()
    }
}

/// Registration returned by [`Transport::claim_inbound`]; released on drop.
#[derive(Debug)]
pub struct InboundClaim {
    inner: Weak<Inner>,
    key: ChannelKey,
    id: u64,
}

impl InboundClaim {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }
}

impl Drop for InboundClaim {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut claims = lock(&inner.claims);
        if let Some(owners) = claims.get_mut(&self.key) {
            owners.retain(|(id, _)| *id != self.id);
            if owners.is_empty() {
                claims.remove(&self.key);
            }
        }
        debug!(key = %self.key, "inbound claim released");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    use super::*;

    async fn wait_until(mut check: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition should become true");
    }

    #[tokio::test]
    async fn write_reaches_device() {
        let transport = Transport::default();
        let (mut device, host) = duplex(256);
        let key = transport.attach("plc-1", host).unwrap();

        transport.write(&key, b"PI00\n").await.unwrap();

        let mut buf = [0u8; 16];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PI00\n");
    }

    #[tokio::test]
    async fn inbound_bytes_are_buffered_and_broadcast() {
        let transport = Transport::default();
        let mut events = transport.subscribe();
        let (mut device, host) = duplex(256);
        let key = transport.attach("plc-1", host).unwrap();

        device.write_all(b"OK 01\n").await.unwrap();

        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            TransportEvent::Data {
                key: key.clone(),
                data: Bytes::from_static(b"OK 01\n"),
            }
        );
        assert_eq!(transport.available(&key).unwrap(), 6);
        assert_eq!(transport.read(&key, Some(2)).unwrap().as_ref(), b"OK");
        assert_eq!(transport.read(&key, None).unwrap().as_ref(), b" 01\n");
    }

    #[tokio::test]
    async fn inbound_buffer_stays_bounded() {
        let transport = Transport::new(ChannelConfig {
            inbound_capacity: 4,
            ..ChannelConfig::default()
        });
        let mut events = transport.subscribe();
        let (mut device, host) = duplex(256);
        let key = transport.attach("plc-1", host).unwrap();

        for byte in b"abcdefgh" {
            device.write_all(&[*byte]).await.unwrap();
        }
        let mut delivered = 0;
        while delivered < 8 {
            match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
                Ok(TransportEvent::Data { data, .. }) => delivered += data.len(),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(transport.read(&key, None).unwrap().as_ref(), b"efgh");
    }

    #[tokio::test]
    async fn claimed_channel_suppresses_data_events() {
        let transport = Transport::default();
        let mut events = transport.subscribe();
        let (mut device, host) = duplex(256);
        let key = transport.attach("plc-1", host).unwrap();

        let claim = transport.claim_inbound(&key, "monitor");
        assert!(transport.is_claimed(&key));
        device.write_all(b"OK 02\n").await.unwrap();
        wait_until(|| transport.available(&key).unwrap_or(0) == 6).await;
        assert!(events.try_recv().is_err());

        drop(claim);
        assert!(!transport.is_claimed(&key));
        device.write_all(b"OK 03\n").await.unwrap();
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TransportEvent::Data { .. }));
    }

    #[tokio::test]
    async fn duplicate_key_is_already_connected() {
        let transport = Transport::default();
        let (_d1, h1) = duplex(64);
        let (_d2, h2) = duplex(64);
        transport.attach("plc-1", h1).unwrap();
        assert!(matches!(
            transport.attach("plc-1", h2),
            Err(TransportError::AlreadyConnected(_))
        ));
    }

    #[tokio::test]
    async fn close_emits_closed_once_and_forgets_channel() {
        let transport = Transport::default();
        let mut events = transport.subscribe();
        let (_device, host) = duplex(64);
        let key = transport.attach("plc-1", host).unwrap();

        transport.close(&key).await;
        transport.close(&key).await;

        assert!(!transport.is_open(&key));
        assert!(transport.list_open().is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Closed { key: key.clone() }
        );
        assert!(events.try_recv().is_err());
        assert!(matches!(
            transport.write(&key, b"x").await,
            Err(TransportError::NotOpen(_))
        ));
    }

    #[tokio::test]
    async fn peer_eof_closes_channel() {
        let transport = Transport::default();
        let mut events = transport.subscribe();
        let (device, host) = duplex(64);
        let key = transport.attach("plc-1", host).unwrap();

        drop(device);
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, TransportEvent::Closed { key: key.clone() });
        assert!(!transport.is_open(&key));
    }

    #[tokio::test]
    async fn key_can_be_reopened_after_close() {
        let transport = Transport::default();
        let (_d1, h1) = duplex(64);
        let key = transport.attach("plc-1", h1).unwrap();
        transport.close(&key).await;

        let (_d2, h2) = duplex(64);
        assert_eq!(transport.attach("plc-1", h2).unwrap(), key);
        assert!(transport.is_open(&key));
    }

    #[tokio::test]
    async fn close_reports_closed_when_shutdown_stalls() {
        let transport = Transport::new(ChannelConfig {
            close_timeout: Duration::from_millis(50),
            ..ChannelConfig::default()
        });
        // A duplex with a tiny buffer and a writer stuck on backpressure
        // keeps the write half locked.
        let (_device, host) = duplex(1);
        let key = transport.attach("plc-1", host).unwrap();
        let writer = transport.clone();
        let stuck_key = key.clone();
        let pending = tokio::spawn(async move { writer.write(&stuck_key, b"0123456789").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        transport.close(&key).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!transport.is_open(&key));
        pending.abort();
    }

    #[tokio::test]
    async fn tcp_open_and_duplicate_open() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let transport = Transport::default();
        let target = ChannelTarget::tcp("127.0.0.1", port);
        let key = transport.open(&target).await.unwrap();
        let _device = accept.await.unwrap();

        assert_eq!(key.as_str(), format!("127.0.0.1:{port}"));
        assert!(matches!(
            transport.open(&target).await,
            Err(TransportError::AlreadyConnected(_))
        ));
        transport.close_all().await;
        assert!(!transport.is_open(&key));
    }

    #[tokio::test]
    async fn handle_stays_bound_to_its_channel_instance() {
        let transport = Transport::default();
        let (_d1, h1) = duplex(64);
        let key = transport.attach("plc-1", h1).unwrap();
        let old = transport.handle(&key).unwrap();
        transport.close(&key).await;

        let (mut device, h2) = duplex(64);
        transport.attach("plc-1", h2).unwrap();
        device.write_all(b"OK 504C\n").await.unwrap();
        wait_until(|| transport.available(&key).unwrap_or(0) == 8).await;

        assert!(!old.is_open());
        assert!(matches!(old.read(None), Err(TransportError::NotOpen(_))));
        assert!(matches!(old.discard_inbound(), Err(TransportError::NotOpen(_))));
        assert!(matches!(old.write(b"PI00\n").await, Err(TransportError::NotOpen(_))));
        // The reopened channel still has its bytes.
        assert_eq!(transport.read(&key, None).unwrap().as_ref(), b"OK 504C\n");
    }

    // Linux drops SYNs once a listener's accept queue is full, so further
    // connects hang until the caller gives up.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn open_gives_up_after_connect_timeout() {
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut backlog = Vec::new();
        for _ in 0..16 {
            match timeout(Duration::from_millis(100), tokio::net::TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => backlog.push(stream),
                _ => break,
            }
        }

        let transport = Transport::new(ChannelConfig {
            connect_timeout: Duration::from_millis(50),
            ..ChannelConfig::default()
        });
        let target = ChannelTarget::tcp("127.0.0.1", addr.port());
        match transport.open(&target).await {
            Err(TransportError::ConnectTimeout { timeout, .. }) => {
                assert_eq!(timeout, Duration::from_millis(50));
            }
            other => panic!("expected connect timeout, got {other:?}"),
        }
        assert!(!transport.is_open(&target.key()));
        assert!(transport.list_open().is_empty());
        drop(listener);
    }
}
