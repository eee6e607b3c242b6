use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use plclink_frame::{
    decode_response, is_error_response, parse_health, take_line, CommandFrame, FrameError,
    HealthStats,
};
use plclink_transport::{ChannelHandle, ChannelKey, Transport};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::arbiter::{Acquired, Arbiter, ArbiterGuard};
use crate::config::DEFAULT_POLL_INTERVAL;
use crate::error::{Result, SessionError};

/// Request/response access to one device channel.
///
/// Every request holds the channel's arbiter from before the stale-byte
/// drain until the response line has been taken, so exchanges from
/// different callers never interleave.
#[derive(Debug, Clone)]
pub struct DeviceLink {
    transport: Transport,
    arbiter: Arc<Arbiter>,
    key: ChannelKey,
    poll_interval: Duration,
}

impl DeviceLink {
    pub fn new(transport: Transport, arbiter: Arc<Arbiter>, key: ChannelKey) -> Self {
        Self {
            transport,
            arbiter,
            key,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Send one command line and return the raw response line.
    ///
    /// `timeout` is capped at the channel's maximum request timeout.
    pub async fn send(&self, command: &str, timeout: Duration) -> Result<String> {
        let (guard, channel) = self.acquire().await?;
        let timeout = timeout.min(self.transport.config().request_timeout);
        let mut line = command.trim_end_matches(['\r', '\n']).to_string();
        line.push('\n');

        let response = request_line(&channel, &guard, &line, timeout, self.poll_interval).await;
        drop(guard);
        response
    }

    pub async fn request(&self, frame: &CommandFrame, timeout: Duration) -> Result<String> {
        self.send(&frame.encode(), timeout).await
    }

    /// `MR`: read `size` bytes at `address`.
    pub async fn read_memory(&self, address: u32, size: u32, timeout: Duration) -> Result<Bytes> {
        let line = self
            .request(&CommandFrame::memory_read(address, size), timeout)
            .await?;
        let data = decode_response(&line)?;
        if data.len() != size as usize {
            debug!(key = %self.key, address, size, got = data.len(), "short memory read");
        }
        Ok(data)
    }

    /// `MW`: write `data` at `address`; the device must answer `OK`.
    pub async fn write_memory(&self, address: u32, data: &[u8], timeout: Duration) -> Result<()> {
        let frame = CommandFrame::memory_write(address, Bytes::copy_from_slice(data))?;
        let line = self.request(&frame, timeout).await?;
        expect_ok(&line)
    }

    /// `PI`: raw program-info payload.
    pub async fn program_info(&self, timeout: Duration) -> Result<Bytes> {
        let line = self.request(&CommandFrame::program_info(), timeout).await?;
        Ok(decode_response(&line)?)
    }

    /// `PH`: runtime health counters.
    pub async fn health(&self, timeout: Duration) -> Result<HealthStats> {
        let line = self.request(&CommandFrame::health_query(), timeout).await?;
        Ok(parse_health(&line)?)
    }

    /// `RH`: reset the device's health counters.
    pub async fn reset_health(&self, timeout: Duration) -> Result<()> {
        let line = self.request(&CommandFrame::health_reset(), timeout).await?;
        expect_ok(&line)
    }

    /// Take the arbiter, then pin the channel that is open under it.
    async fn acquire(&self) -> Result<(ArbiterGuard, ChannelHandle)> {
        match self.arbiter.acquire().await {
            Acquired::Held(guard) => {
                // The channel may have gone away while we waited.
                let channel = self.transport.handle(&self.key)?;
                Ok((guard, channel))
            }
            Acquired::ForceReleased => Err(SessionError::ChannelReset(self.key.clone())),
        }
    }
}

/// Drain stale input, write `line`, then wait for one response line.
///
/// `guard` must be the arbiter hold `channel` was pinned under. The exchange
/// aborts with `ChannelReset` as soon as that hold is force-released.
pub(crate) async fn request_line(
    channel: &ChannelHandle,
    guard: &ArbiterGuard,
    line: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<String> {
    let result = exchange(channel, guard, line, timeout, poll_interval).await;
    match result {
        // A torn-down channel surfaces as a reset, whichever step noticed it.
        Err(err) if guard.is_stale() && !matches!(err, SessionError::ChannelReset(_)) => {
            debug!(key = %channel.key(), error = %err, "request failed after force release");
            Err(SessionError::ChannelReset(channel.key().clone()))
        }
        other => other,
    }
}

async fn exchange(
    channel: &ChannelHandle,
    guard: &ArbiterGuard,
    line: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<String> {
    let key = channel.key();
    let stale = channel.discard_inbound()?;
    if stale > 0 {
        debug!(%key, stale, "dropped stale inbound bytes");
    }
    channel.write(line.as_bytes()).await?;
    trace!(%key, command = line.trim_end(), "command sent");
    wait_for_line(channel, guard, timeout, poll_interval).await
}

async fn wait_for_line(
    channel: &ChannelHandle,
    guard: &ArbiterGuard,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<String> {
    let key = channel.key();
    let deadline = Instant::now() + timeout;
    let mut pending = BytesMut::new();

    loop {
        if guard.is_stale() {
            debug!(%key, "request abandoned after force release");
            return Err(SessionError::ChannelReset(key.clone()));
        }
        pending.extend_from_slice(&channel.read(None)?);
        while let Some(line) = take_line(&mut pending) {
            if !line.trim().is_empty() {
                if !pending.is_empty() {
                    debug!(%key, trailing = pending.len(), "discarding bytes after response");
                }
                trace!(%key, response = %line, "response received");
                return Ok(line);
            }
        }

        if Instant::now() >= deadline {
            debug!(%key, ?timeout, partial = pending.len(), "no response line");
            return Err(SessionError::Timeout(timeout));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

fn expect_ok(line: &str) -> Result<()> {
    let text = line.trim();
    if is_error_response(text) {
        return Err(FrameError::DeviceError(text.to_string()).into());
    }
    if text.starts_with("OK") {
        Ok(())
    } else {
        Err(FrameError::MalformedResponse(format!("expected OK, got '{text}'")).into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{spawn_fake_plc, spawn_silent_device};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn link(transport: &Transport, key: &ChannelKey) -> DeviceLink {
        DeviceLink::new(
            transport.clone(),
            Arc::new(Arbiter::new(key.clone())),
            key.clone(),
        )
        .with_poll_interval(Duration::from_millis(2))
    }

    #[tokio::test]
    async fn memory_round_trip_through_fake_plc() {
        let transport = Transport::default();
        let plc = spawn_fake_plc(&transport, "plc");
        let device = link(&transport, &plc.key);

        device
            .write_memory(16, &[0xDE, 0xAD, 0xBE, 0xEF], TIMEOUT)
            .await
            .unwrap();
        let data = device.read_memory(16, 4, TIMEOUT).await.unwrap();
        assert_eq!(data.as_ref(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[tokio::test]
    async fn device_error_is_surfaced() {
        let transport = Transport::default();
        let plc = spawn_fake_plc(&transport, "plc");
        let device = link(&transport, &plc.key);

        let err = device.read_memory(0xFFFF_0000, 4, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, SessionError::Frame(FrameError::DeviceError(_))));
    }

    #[tokio::test]
    async fn health_and_program_info() {
        let transport = Transport::default();
        let plc = spawn_fake_plc(&transport, "plc");
        let device = link(&transport, &plc.key);

        let stats = device.health(TIMEOUT).await.unwrap();
        assert_eq!(stats.last_cycle_us, 1);
        assert_eq!(stats.max_jitter_us, Some(13));

        device.reset_health(TIMEOUT).await.unwrap();
        let info = device.program_info(TIMEOUT).await.unwrap();
        assert_eq!(info.as_ref(), crate::testing::PROGRAM_INFO);
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let transport = Transport::default();
        let key = spawn_silent_device(&transport, "quiet");
        let device = link(&transport, &key);

        let err = device
            .send("PI00", Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));
        // The arbiter is free again after the timeout.
        assert!(!device.arbiter.is_locked());
    }

    #[tokio::test]
    async fn stale_bytes_are_dropped_before_sending() {
        let transport = Transport::default();
        let plc = spawn_fake_plc(&transport, "plc");
        plc.inject(b"OK FFFF\n").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let device = link(&transport, &plc.key);
        let info = device.program_info(TIMEOUT).await.unwrap();
        assert_eq!(info.as_ref(), crate::testing::PROGRAM_INFO);
    }

    #[tokio::test]
    async fn force_release_aborts_waiting_request() {
        let transport = Transport::default();
        let plc = spawn_fake_plc(&transport, "plc");
        let device = link(&transport, &plc.key);

        let holder = match device.arbiter.acquire().await {
            Acquired::Held(guard) => guard,
            Acquired::ForceReleased => unreachable!(),
        };
        let waiting = {
            let device = device.clone();
            tokio::spawn(async move { device.program_info(TIMEOUT).await })
        };
        while device.arbiter.waiting() == 0 {
            tokio::task::yield_now().await;
        }

        device.arbiter.force_release();
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::ChannelReset(_)));
        drop(holder);
    }

    #[tokio::test]
    async fn force_release_aborts_request_in_flight() {
        let transport = Transport::default();
        let key = spawn_silent_device(&transport, "quiet");
        let device = link(&transport, &key);

        let in_flight = {
            let device = device.clone();
            tokio::spawn(async move { device.send("PH00", Duration::from_secs(5)).await })
        };
        while !device.arbiter.is_locked() {
            tokio::task::yield_now().await;
        }

        device.arbiter.force_release();
        let err = tokio::time::timeout(Duration::from_secs(1), in_flight)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, SessionError::ChannelReset(_)));
    }

    #[test]
    fn expect_ok_variants() {
        assert!(expect_ok("OK\r").is_ok());
        assert!(expect_ok(" OK 00").is_ok());
        assert!(matches!(
            expect_ok("ERR locked"),
            Err(SessionError::Frame(FrameError::DeviceError(_)))
        ));
        assert!(matches!(
            expect_ok("??"),
            Err(SessionError::Frame(FrameError::MalformedResponse(_)))
        ));
    }
}
