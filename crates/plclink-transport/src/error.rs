use std::time::Duration;

use crate::target::ChannelKey;

/// Errors that can occur in channel transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The low-level connect/open call failed.
    #[error("failed to connect to {target}: {source}")]
    ConnectFailed {
        target: String,
        source: std::io::Error,
    },

    /// No connection was established within the connect window.
    #[error("connecting to {target} timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    /// The key already has an open channel.
    #[error("channel {0} is already connected")]
    AlreadyConnected(ChannelKey),

    /// No open channel exists for the key.
    #[error("channel {0} is not open")]
    NotOpen(ChannelKey),

    /// Writing to the channel failed; the channel may still be usable.
    #[error("write to {key} failed: {source}")]
    WriteFailed {
        key: ChannelKey,
        source: std::io::Error,
    },

    /// The target string could not be parsed.
    #[error("invalid channel target: {0}")]
    InvalidTarget(String),

    /// The requested transport kind was not compiled in.
    #[error("{0} support is not enabled in this build")]
    Unsupported(&'static str),

    /// An I/O error outside a specific channel (discovery, port listing).
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
