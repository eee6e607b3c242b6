use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use clap::{Args, Subcommand};
use plclink_session::{Region, SessionConfig};

use crate::exit::{io_error, session_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod device;
pub mod discover;
pub mod link;
pub mod monitor;
pub mod ports;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports visible to the OS.
    Ports(PortsArgs),
    /// Probe a /24 network for hosts accepting TCP connections on a port.
    Scan(ScanArgs),
    /// Broadcast a UDP discovery message and print the replies.
    Discover(DiscoverArgs),
    /// Read the device program info block.
    Info(InfoArgs),
    /// Read a memory region.
    Read(ReadArgs),
    /// Write bytes to device memory.
    Write(WriteArgs),
    /// Query (and optionally reset) the device health counters.
    Health(HealthArgs),
    /// Send a raw command line and print the response line.
    Send(SendArgs),
    /// Poll memory regions periodically and print each cycle.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    let command = match command {
        Command::Version(args) => return version::run(args),
        other => other,
    };

    let config = load_config(config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start async runtime", err))?;
    runtime.block_on(dispatch(command, format, config))
}

async fn dispatch(command: Command, format: OutputFormat, config: SessionConfig) -> CliResult<i32> {
    match command {
        Command::Ports(args) => ports::run(args, format),
        Command::Scan(args) => discover::scan(args, format, &config).await,
        Command::Discover(args) => discover::broadcast(args, format).await,
        Command::Info(args) => device::info(args, format, config).await,
        Command::Read(args) => device::read(args, format, config).await,
        Command::Write(args) => device::write(args, format, config).await,
        Command::Health(args) => device::health(args, format, config).await,
        Command::Send(args) => device::send(args, format, config).await,
        Command::Monitor(args) => monitor::run(args, format, config).await,
        Command::Version(args) => version::run(args),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load(path).map_err(|err| {
            session_error(&format!("failed to load config {}", path.display()), err)
        }),
        None => Ok(SessionConfig::default()),
    }
}

/// Where to reach the device.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// `tcp://host:port`, `udp://host:port`, `serial://<path>?baud=..` or a serial path.
    pub target: String,
    /// Per-request timeout (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Any address inside the /24 network to scan (e.g. 192.168.1.0).
    pub network: Ipv4Addr,
    /// TCP port to probe.
    #[arg(long, short = 'p')]
    pub port: u16,
    /// First host suffix.
    #[arg(long, default_value_t = 1)]
    pub first: u8,
    /// Last host suffix.
    #[arg(long, default_value_t = 254)]
    pub last: u8,
    /// Per-probe connect timeout, overriding the config (e.g. 300ms).
    #[arg(long)]
    pub probe_timeout: Option<String>,
    /// Include unreachable hosts in the output.
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// UDP port to broadcast to.
    #[arg(long, short = 'p')]
    pub port: u16,
    /// Discovery message text.
    #[arg(long, default_value = "PLCLINK?")]
    pub message: String,
    /// How long to collect replies (e.g. 2s).
    #[arg(long, default_value = "2s")]
    pub duration: String,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Start address, decimal or 0x-prefixed hex.
    #[arg(value_parser = parse_u32)]
    pub address: u32,
    /// Number of bytes, decimal or 0x-prefixed hex.
    #[arg(value_parser = parse_u32)]
    pub size: u32,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Start address, decimal or 0x-prefixed hex.
    #[arg(value_parser = parse_u32)]
    pub address: u32,
    /// Payload as hex digits.
    #[arg(long, conflicts_with = "text", required_unless_present = "text")]
    pub hex: Option<String>,
    /// Payload as text.
    #[arg(long)]
    pub text: Option<String>,
}

#[derive(Args, Debug)]
pub struct HealthArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Reset the counters after reading them.
    #[arg(long)]
    pub reset: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Encoded command line, e.g. PI<crc>.
    pub command: String,
    /// Send the line without checking its opcode and checksum.
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Region to poll as address:size (repeatable).
    #[arg(long = "region", short = 'r', value_name = "ADDR:SIZE", required = true)]
    pub regions: Vec<Region>,
    /// Poll interval (e.g. 100ms, 1s).
    #[arg(long, default_value = "100ms")]
    pub interval: String,
    /// Exit after N cycles.
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Decimal or `0x`-prefixed hex.
pub fn parse_u32(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid number '{input}'"))
}
