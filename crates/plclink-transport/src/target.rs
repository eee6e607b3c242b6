use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Stable identifier of a channel: `host:port` for sockets, the port path for serial.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ChannelKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

/// Serial line framing options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialOptions {
    pub path: String,
    pub baud_rate: u32,
    /// 5 through 8.
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl SerialOptions {
    /// 8N1 at the default baud rate.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

/// Where a channel connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelTarget {
    Serial(SerialOptions),
    Tcp { host: String, port: u16 },
    Udp { host: String, port: u16 },
}

impl ChannelTarget {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::Udp {
            host: host.into(),
            port,
        }
    }

    pub fn serial(path: impl Into<String>) -> Self {
        Self::Serial(SerialOptions::new(path))
    }

    /// The registry key this target maps to.
    pub fn key(&self) -> ChannelKey {
        match self {
            ChannelTarget::Serial(opts) => ChannelKey::new(opts.path.clone()),
            ChannelTarget::Tcp { host, port } | ChannelTarget::Udp { host, port } => {
                ChannelKey::new(format!("{host}:{port}"))
            }
        }
    }

    /// Short transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            ChannelTarget::Serial(_) => "serial",
            ChannelTarget::Tcp { .. } => "tcp",
            ChannelTarget::Udp { .. } => "udp",
        }
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelTarget::Serial(opts) => write!(f, "serial://{}", opts.path),
            ChannelTarget::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            ChannelTarget::Udp { host, port } => write!(f, "udp://{host}:{port}"),
        }
    }
}

impl FromStr for ChannelTarget {
    type Err = TransportError;

    /// Accepts `tcp://host:port`, `udp://host:port`,
    /// `serial://<path>[?baud=..&data_bits=..&parity=..&stop_bits=..]` or a bare
    /// serial path.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TransportError::InvalidTarget("empty target".to_string()));
        }

        if let Some(rest) = input.strip_prefix("tcp://") {
            let (host, port) = split_host_port(rest)?;
            return Ok(Self::Tcp { host, port });
        }
        if let Some(rest) = input.strip_prefix("udp://") {
            let (host, port) = split_host_port(rest)?;
            return Ok(Self::Udp { host, port });
        }

        let rest = input.strip_prefix("serial://").unwrap_or(input);
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        if path.is_empty() {
            return Err(TransportError::InvalidTarget(format!(
                "missing serial path in '{input}'"
            )));
        }

        let mut opts = SerialOptions::new(path);
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                TransportError::InvalidTarget(format!("expected name=value, got '{pair}'"))
            })?;
            apply_serial_option(&mut opts, name, value)?;
        }
        Ok(Self::Serial(opts))
    }
}

fn split_host_port(rest: &str) -> Result<(String, u16), TransportError> {
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidTarget(format!("expected host:port, got '{rest}'")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(TransportError::InvalidTarget(format!(
            "missing host in '{rest}'"
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| TransportError::InvalidTarget(format!("invalid port '{port}'")))?;
    Ok((host.to_string(), port))
}

fn apply_serial_option(
    opts: &mut SerialOptions,
    name: &str,
    value: &str,
) -> Result<(), TransportError> {
    let invalid = || TransportError::InvalidTarget(format!("invalid {name} '{value}'"));
    match name {
        "baud" | "baud_rate" => opts.baud_rate = value.parse().map_err(|_| invalid())?,
        "data_bits" => {
            let bits: u8 = value.parse().map_err(|_| invalid())?;
            if !(5..=8).contains(&bits) {
                return Err(invalid());
            }
            opts.data_bits = bits;
        }
        "parity" => {
            opts.parity = match value.to_ascii_lowercase().as_str() {
                "none" | "n" => Parity::None,
                "odd" | "o" => Parity::Odd,
                "even" | "e" => Parity::Even,
                _ => return Err(invalid()),
            }
        }
        "stop_bits" => {
            opts.stop_bits = match value {
                "1" => StopBits::One,
                "2" => StopBits::Two,
                _ => return Err(invalid()),
            }
        }
        _ => {
            return Err(TransportError::InvalidTarget(format!(
                "unknown serial option '{name}'"
            )))
        }
    }
    Ok(())
}
