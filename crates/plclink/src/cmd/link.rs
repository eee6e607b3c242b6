use std::time::Duration;

use plclink_session::{LinkClient, LinkManager, SessionConfig};
use plclink_transport::{ChannelKey, ChannelTarget};
use tracing::{debug, info};

use crate::cmd::{parse_duration, LinkArgs};
use crate::exit::{session_error, transport_error, CliResult};

/// One opened device channel plus the client the CLI talks through.
pub struct Link {
    pub manager: LinkManager,
    pub client: LinkClient,
    pub key: ChannelKey,
    pub timeout: Duration,
}

impl Link {
    pub async fn open(args: &LinkArgs, config: SessionConfig) -> CliResult<Self> {
        let timeout = parse_duration(&args.timeout)?;
        let target: ChannelTarget = args
            .target
            .parse()
            .map_err(|err| transport_error("invalid target", err))?;

        let manager = LinkManager::new(config);
        let key = manager
            .open(&target, false)
            .await
            .map_err(|err| session_error(&format!("failed to open {target}"), err))?;
        info!(%key, transport = target.transport_name(), "channel open");

        let client = manager.client("cli");
        Ok(Self {
            manager,
            client,
            key,
            timeout,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    pub async fn close(self) {
        let Self {
            manager,
            client,
            key,
            ..
        } = self;
        drop(client);
        manager.shutdown().await;
        debug!(%key, "channel closed");
    }
}
