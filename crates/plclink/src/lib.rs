//! Arbitrated access to PLC devices over serial, TCP and UDP links.
//!
//! plclink multiplexes several independent consumers (interactive commands,
//! periodic telemetry, health queries) over a single half-duplex device
//! channel without interleaving their request/response exchanges.
//!
//! # Crate Structure
//!
//! - [`transport`]: channel registry over serial ports, TCP and UDP sockets
//! - [`frame`]: checksummed ASCII-hex command/response codec
//! - [`session`]: arbiter, telemetry monitor, command queue and client API
//!   (behind the `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use plclink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use plclink_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use plclink_session::*;
}
