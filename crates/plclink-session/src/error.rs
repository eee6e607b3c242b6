use std::time::Duration;

use plclink_transport::ChannelKey;

/// Errors surfaced by session-level operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] plclink_transport::TransportError),

    /// Codec or device-reported error.
    #[error("frame error: {0}")]
    Frame(#[from] plclink_frame::FrameError),

    /// No complete response (or operation result) within the timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The command queue is at capacity.
    #[error("command queue full ({0} pending)")]
    QueueFull(usize),

    /// The command queue was cleared before this operation ran.
    #[error("command queue cleared")]
    QueueCleared,

    /// The channel's arbiter was force-released while waiting.
    #[error("channel {0} was reset while waiting for access")]
    ChannelReset(ChannelKey),

    /// No active monitor for this client and channel.
    #[error("no active monitor on {0}")]
    NotMonitoring(ChannelKey),

    /// A request carried invalid parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A queued operation panicked or was aborted.
    #[error("operation failed: {0}")]
    Internal(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a config file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
