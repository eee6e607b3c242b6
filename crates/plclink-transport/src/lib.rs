//! Byte-channel transport for PLC device links.
//!
//! Owns the physical channels (serial ports, TCP and UDP sockets) keyed by a
//! stable [`ChannelKey`]:
//! - a bounded inbound buffer per channel that evicts the oldest bytes
//! - backpressured writes
//! - push events for inbound data, close and error
//! - inbound claims, so one consumer can own a channel's traffic
//!
//! Nothing here knows about the wire protocol. Framing lives in
//! `plclink-frame`; request/response arbitration lives in `plclink-session`.

pub mod buffer;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod stream;
pub mod target;
pub mod transport;

pub use buffer::InboundBuffer;
pub use config::{ChannelConfig, ScanConfig};
pub use discovery::{discover_broadcast, scan_hosts, DiscoveryReply, ProbeResult};
pub use error::{Result, TransportError};
pub use event::TransportEvent;
pub use stream::{list_ports, BoxedStream, DeviceStream, PortInfo, UdpStream};
pub use target::{ChannelKey, ChannelTarget, Parity, SerialOptions, StopBits};
pub use transport::{ChannelHandle, InboundClaim, Transport};
