//! JSON payloads for driving the link layer over a request/response RPC.
//!
//! Only the payload shapes live here; framing and transport of the RPC
//! itself belong to whoever embeds the link layer.

use std::time::Duration;

use bytes::Bytes;
use plclink_frame::{bytes_to_hex, hex_to_bytes};
use plclink_transport::{ChannelKey, ChannelTarget, TransportEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::client::LinkClient;
use crate::error::{Result, SessionError};
use crate::monitor::{hex_string, Region, TelemetryBatch};

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LinkRequest {
    ListPorts,
    Open {
        /// `tcp://host:port`, `udp://host:port` or a serial path/URL.
        target: String,
        #[serde(default)]
        force: bool,
    },
    Close {
        key: ChannelKey,
    },
    /// Exactly one of `text` or `hex` must be given.
    Write {
        key: ChannelKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hex: Option<String>,
    },
    Read {
        key: ChannelKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<usize>,
    },
    Available {
        key: ChannelKey,
    },
    IsOpen {
        key: ChannelKey,
    },
    ListOpen,
    SendCommand {
        key: ChannelKey,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    SubscribeMonitor {
        key: ChannelKey,
        regions: Vec<Region>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
    },
    UnsubscribeMonitor {
        key: ChannelKey,
    },
    GetHealth {
        key: ChannelKey,
    },
    ResetHealth {
        key: ChannelKey,
    },
}

impl LinkRequest {
    /// The `op` tag, for logs.
    pub fn op(&self) -> &'static str {
        match self {
            LinkRequest::ListPorts => "list_ports",
            LinkRequest::Open { .. } => "open",
            LinkRequest::Close { .. } => "close",
            LinkRequest::Write { .. } => "write",
            LinkRequest::Read { .. } => "read",
            LinkRequest::Available { .. } => "available",
            LinkRequest::IsOpen { .. } => "is_open",
            LinkRequest::ListOpen => "list_open",
            LinkRequest::SendCommand { .. } => "send_command",
            LinkRequest::SubscribeMonitor { .. } => "subscribe_monitor",
            LinkRequest::UnsubscribeMonitor { .. } => "unsubscribe_monitor",
            LinkRequest::GetHealth { .. } => "get_health",
            LinkRequest::ResetHealth { .. } => "reset_health",
        }
    }
}

/// The single response to a [`LinkRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LinkResponse {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: &SessionError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Unsolicited notifications pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    Data {
        key: ChannelKey,
        #[serde(serialize_with = "hex_string")]
        data: Bytes,
    },
    Closed {
        key: ChannelKey,
    },
    Error {
        key: ChannelKey,
        message: String,
    },
    Telemetry(TelemetryBatch),
}

impl From<TransportEvent> for LinkEvent {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::Data { key, data } => LinkEvent::Data { key, data },
            TransportEvent::Closed { key } => LinkEvent::Closed { key },
            TransportEvent::Error { key, message } => LinkEvent::Error { key, message },
        }
    }
}

impl LinkClient {
    /// Execute a request. Failures come back as `ok: false` with the error text.
    pub async fn handle(&self, request: LinkRequest) -> LinkResponse {
        let op = request.op();
        match self.dispatch(request).await {
            Ok(result) => LinkResponse::success(result),
            Err(err) => {
                debug!(client = %self.id(), op, error = %err, "request failed");
                LinkResponse::failure(&err)
            }
        }
    }

    async fn dispatch(&self, request: LinkRequest) -> Result<Value> {
        let manager = self.manager();
        let value = match request {
            LinkRequest::ListPorts => serde_json::to_value(manager.list_ports()?)?,
            LinkRequest::Open { target, force } => {
                let target: ChannelTarget = target.parse()?;
                if force && manager.is_open(&target.key()) {
                    // Queued work was aimed at the connection being replaced.
                    let cleared = self.reset();
                    debug!(client = %self.id(), key = %target.key(), cleared, "queue cleared for reconnect");
                }
                json!({ "key": manager.open(&target, force).await? })
            }
            LinkRequest::Close { key } => {
                manager.close(&key).await;
                json!({ "key": key })
            }
            LinkRequest::Write { key, text, hex } => {
                let data = match (text, hex) {
                    (Some(text), None) => text.into_bytes(),
                    (None, Some(hex)) => hex_to_bytes(&hex)?,
                    _ => {
                        return Err(SessionError::InvalidRequest(
                            "write needs exactly one of text or hex".to_string(),
                        ))
                    }
                };
                manager.write(&key, &data).await?;
                json!({ "written": data.len() })
            }
            LinkRequest::Read { key, max } => {
                let data = manager.read(&key, max)?;
                json!({
                    "hex": bytes_to_hex(&data),
                    "text": String::from_utf8_lossy(&data),
                })
            }
            LinkRequest::Available { key } => json!({ "available": manager.available(&key)? }),
            LinkRequest::IsOpen { key } => json!({ "open": manager.is_open(&key) }),
            LinkRequest::ListOpen => json!(manager.list_open()),
            LinkRequest::SendCommand {
                key,
                command,
                timeout_ms,
            } => {
                let timeout = timeout_ms.map(Duration::from_millis);
                json!({ "response": self.send_command(&key, command, timeout).await? })
            }
            LinkRequest::SubscribeMonitor {
                key,
                regions,
                interval_ms,
            } => {
                let interval = interval_ms.map(Duration::from_millis);
                json!({ "subscriptions": self.subscribe_monitor(&key, &regions, interval)? })
            }
            LinkRequest::UnsubscribeMonitor { key } => {
                self.unsubscribe_monitor(&key)?;
                json!({ "key": key })
            }
            LinkRequest::GetHealth { key } => serde_json::to_value(self.get_health(&key, None).await?)?,
            LinkRequest::ResetHealth { key } => {
                self.reset_health(&key, None).await?;
                json!({ "key": key })
            }
        };
        Ok(value)
    }
}
