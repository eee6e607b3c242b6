use bytes::Bytes;

use crate::target::ChannelKey;

/// Unsolicited notifications pushed to transport subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes arrived on a channel with no inbound claim.
    Data { key: ChannelKey, data: Bytes },
    /// The channel closed (by request, EOF, or error).
    Closed { key: ChannelKey },
    /// A read error occurred; a `Closed` event follows.
    Error { key: ChannelKey, message: String },
}

impl TransportEvent {
    pub fn key(&self) -> &ChannelKey {
        match self {
            TransportEvent::Data { key, .. }
            | TransportEvent::Closed { key }
            | TransportEvent::Error { key, .. } => key,
        }
    }
}
