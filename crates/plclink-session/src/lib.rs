//! Shared access to PLC device channels.
//!
//! A channel carries one request/response cycle at a time. This crate keeps
//! independent consumers from trampling each other:
//!
//! - [`Arbiter`]: per-channel FIFO mutual exclusion with an explicit
//!   force-release for teardown
//! - [`DeviceLink`]: arbitrated command/response exchanges and the typed
//!   device operations built on them
//! - [`Monitor`]: periodic telemetry reads of subscribed memory regions
//! - [`CommandQueue`]: per-client FIFO of atomic operations with timeouts
//! - [`LinkManager`] / [`LinkClient`]: the client-facing operation set, also
//!   reachable through the JSON payloads in [`rpc`]

pub mod arbiter;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod queue;
pub mod rpc;

#[cfg(test)]
mod testing;

pub use arbiter::{Acquired, Arbiter, ArbiterGuard, ArbiterRegistry};
pub use client::{ClientId, LinkClient};
pub use config::{MonitorConfig, QueueConfig, SessionConfig};
pub use device::DeviceLink;
pub use error::{Result, SessionError};
pub use manager::{LinkManager, SessionEvents};
pub use monitor::{Monitor, MonitorContext, Region, Sample, Subscription, TelemetryBatch};
pub use queue::{CommandQueue, Ticket};
pub use rpc::{LinkEvent, LinkRequest, LinkResponse};
