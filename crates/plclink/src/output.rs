use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use plclink_frame::{bytes_to_hex, HealthStats};
use plclink_session::Sample;
use plclink_transport::{ChannelKey, PortInfo, ProbeResult};
use serde::Serialize;

const SCHEMA_BASE: &str = "https://schemas.3leaps.dev/plclink/cli/v1";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A command result that can be printed in every [`OutputFormat`].
pub trait Render: Serialize {
    fn headers(&self) -> Vec<&'static str>;
    fn rows(&self) -> Vec<Vec<String>>;
    fn pretty(&self) -> String;

    /// Bytes written for `--format raw`. Defaults to the pretty text.
    fn raw(&self) -> Vec<u8> {
        let mut out = self.pretty().into_bytes();
        out.push(b'\n');
        out
    }
}

pub fn emit<T: Render>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(value.headers());
            for row in value.rows() {
                table.add_row(row);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", value.pretty()),
        OutputFormat::Raw => print_raw(&value.raw()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn schema(name: &str) -> String {
    format!("{SCHEMA_BASE}/{name}.schema.json")
}

/// Printable text when the bytes are ASCII, otherwise empty.
fn ascii_preview(data: &[u8]) -> String {
    if !data.is_empty() && data.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        String::from_utf8_lossy(data).into_owned()
    } else {
        String::new()
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[derive(Serialize)]
pub struct PortsOutput {
    schema_id: String,
    ports: Vec<PortInfo>,
}

impl PortsOutput {
    pub fn new(ports: Vec<PortInfo>) -> Self {
        Self {
            schema_id: schema("ports"),
            ports,
        }
    }
}

impl Render for PortsOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["PATH", "KIND"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.ports
            .iter()
            .map(|port| vec![port.path.clone(), port.kind.to_string()])
            .collect()
    }

    fn pretty(&self) -> String {
        if self.ports.is_empty() {
            return "no serial ports found".to_string();
        }
        self.ports
            .iter()
            .map(|port| format!("{} ({})", port.path, port.kind))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Serialize)]
pub struct ScanOutput {
    schema_id: String,
    network: String,
    port: u16,
    scanned: usize,
    hosts: Vec<ProbeResult>,
}

impl ScanOutput {
    /// Keeps only reachable hosts unless `all` is set.
    pub fn new(network: String, port: u16, results: Vec<ProbeResult>, all: bool) -> Self {
        let scanned = results.len();
        let hosts = results
            .into_iter()
            .filter(|result| all || result.reachable)
            .collect();
        Self {
            schema_id: schema("scan"),
            network,
            port,
            scanned,
            hosts,
        }
    }
}

impl Render for ScanOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["HOST", "PORT", "REACHABLE", "LATENCY"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.hosts
            .iter()
            .map(|host| {
                vec![
                    host.host.to_string(),
                    host.port.to_string(),
                    host.reachable.to_string(),
                    host.latency_ms
                        .map(|ms| format!("{ms:.1}ms"))
                        .unwrap_or_default(),
                ]
            })
            .collect()
    }

    fn pretty(&self) -> String {
        let mut lines = vec![format!(
            "scanned {} hosts on {} port {}",
            self.scanned, self.network, self.port
        )];
        for host in &self.hosts {
            match host.latency_ms {
                Some(ms) => lines.push(format!("{}:{} up ({ms:.1}ms)", host.host, host.port)),
                None => lines.push(format!("{}:{} down", host.host, host.port)),
            }
        }
        lines.join("\n")
    }
}

#[derive(Serialize)]
pub struct ReplyOutput {
    pub addr: String,
    pub hex: String,
    pub text: String,
}

#[derive(Serialize)]
pub struct DiscoverOutput {
    schema_id: String,
    port: u16,
    replies: Vec<ReplyOutput>,
}

impl DiscoverOutput {
    pub fn new(port: u16, replies: Vec<ReplyOutput>) -> Self {
        Self {
            schema_id: schema("discover"),
            port,
            replies,
        }
    }
}

impl Render for DiscoverOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["ADDRESS", "PAYLOAD", "TEXT"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.replies
            .iter()
            .map(|reply| vec![reply.addr.clone(), reply.hex.clone(), reply.text.clone()])
            .collect()
    }

    fn pretty(&self) -> String {
        if self.replies.is_empty() {
            return format!("no replies on port {}", self.port);
        }
        self.replies
            .iter()
            .map(|reply| format!("{} {}", reply.addr, reply.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Bytes read from the device: a memory region or the program info block.
#[derive(Serialize)]
pub struct DataOutput {
    schema_id: String,
    key: ChannelKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<u32>,
    size: usize,
    hex: String,
    text: String,
    #[serde(skip)]
    data: Vec<u8>,
}

impl DataOutput {
    pub fn memory(key: ChannelKey, address: u32, data: &[u8]) -> Self {
        Self::build("memory-read", key, Some(address), data)
    }

    pub fn program_info(key: ChannelKey, data: &[u8]) -> Self {
        Self::build("program-info", key, None, data)
    }

    fn build(name: &str, key: ChannelKey, address: Option<u32>, data: &[u8]) -> Self {
        Self {
            schema_id: schema(name),
            key,
            address,
            size: data.len(),
            hex: bytes_to_hex(data),
            text: ascii_preview(data),
            data: data.to_vec(),
        }
    }
}

impl Render for DataOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["CHANNEL", "ADDRESS", "SIZE", "HEX", "TEXT"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.key.to_string(),
            self.address
                .map(|address| format!("0x{address:08X}"))
                .unwrap_or_else(|| "-".to_string()),
            self.size.to_string(),
            self.hex.clone(),
            self.text.clone(),
        ]]
    }

    fn pretty(&self) -> String {
        let mut line = match self.address {
            Some(address) => format!("{} @0x{address:08X} [{}] {}", self.key, self.size, self.hex),
            None => format!("{} [{}] {}", self.key, self.size, self.hex),
        };
        if !self.text.is_empty() {
            line.push_str(&format!(" \"{}\"", self.text));
        }
        line
    }

    fn raw(&self) -> Vec<u8> {
        self.data.clone()
    }
}

#[derive(Serialize)]
pub struct WriteOutput {
    schema_id: String,
    key: ChannelKey,
    address: u32,
    written: usize,
}

impl WriteOutput {
    pub fn new(key: ChannelKey, address: u32, written: usize) -> Self {
        Self {
            schema_id: schema("memory-write"),
            key,
            address,
            written,
        }
    }
}

impl Render for WriteOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["CHANNEL", "ADDRESS", "WRITTEN"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.key.to_string(),
            format!("0x{:08X}", self.address),
            self.written.to_string(),
        ]]
    }

    fn pretty(&self) -> String {
        format!(
            "{} wrote {} bytes at 0x{:08X}",
            self.key, self.written, self.address
        )
    }
}

#[derive(Serialize)]
pub struct HealthOutput {
    schema_id: String,
    key: ChannelKey,
    health: HealthStats,
    reset: bool,
}

impl HealthOutput {
    pub fn new(key: ChannelKey, health: HealthStats, reset: bool) -> Self {
        Self {
            schema_id: schema("health"),
            key,
            health,
            reset,
        }
    }

    fn fields(&self) -> Vec<(&'static str, Option<u32>)> {
        let h = &self.health;
        vec![
            ("last_cycle_us", Some(h.last_cycle_us)),
            ("min_cycle_us", Some(h.min_cycle_us)),
            ("max_cycle_us", Some(h.max_cycle_us)),
            ("ram_free", Some(h.ram_free)),
            ("ram_free_min", Some(h.ram_free_min)),
            ("ram_free_max", Some(h.ram_free_max)),
            ("total_ram", h.total_ram),
            ("last_period_us", h.last_period_us),
            ("min_period_us", h.min_period_us),
            ("max_period_us", h.max_period_us),
            ("last_jitter_us", h.last_jitter_us),
            ("min_jitter_us", h.min_jitter_us),
            ("max_jitter_us", h.max_jitter_us),
        ]
    }
}

impl Render for HealthOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["FIELD", "VALUE"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.fields()
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| vec![name.to_string(), v.to_string()]))
            .collect()
    }

    fn pretty(&self) -> String {
        let fields: Vec<String> = self
            .fields()
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| format!("{name}={v}")))
            .collect();
        let mut line = format!("{} {}", self.key, fields.join(" "));
        if self.reset {
            line.push_str(" (counters reset)");
        }
        line
    }
}

#[derive(Serialize)]
pub struct CommandOutput {
    schema_id: String,
    key: ChannelKey,
    command: String,
    response: String,
}

impl CommandOutput {
    pub fn new(key: ChannelKey, command: String, response: String) -> Self {
        Self {
            schema_id: schema("command"),
            key,
            command,
            response,
        }
    }
}

impl Render for CommandOutput {
    fn headers(&self) -> Vec<&'static str> {
        vec!["CHANNEL", "COMMAND", "RESPONSE"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        vec![vec![
            self.key.to_string(),
            self.command.clone(),
            self.response.clone(),
        ]]
    }

    fn pretty(&self) -> String {
        format!("{} > {}\n{} < {}", self.key, self.command, self.key, self.response)
    }

    fn raw(&self) -> Vec<u8> {
        format!("{}\n", self.response).into_bytes()
    }
}

/// One monitor cycle.
#[derive(Serialize)]
pub struct TelemetryOutput<'a> {
    schema_id: String,
    key: &'a ChannelKey,
    cycle: u64,
    timestamp: String,
    samples: &'a [Sample],
}

impl<'a> TelemetryOutput<'a> {
    pub fn new(key: &'a ChannelKey, cycle: u64, samples: &'a [Sample]) -> Self {
        Self {
            schema_id: schema("telemetry"),
            key,
            cycle,
            timestamp: now_unix_seconds(),
            samples,
        }
    }
}

impl Render for TelemetryOutput<'_> {
    fn headers(&self) -> Vec<&'static str> {
        vec!["CYCLE", "ADDRESS", "SIZE", "HEX"]
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.samples
            .iter()
            .map(|sample| {
                vec![
                    self.cycle.to_string(),
                    format!("0x{:08X}", sample.address),
                    sample.size.to_string(),
                    bytes_to_hex(&sample.data),
                ]
            })
            .collect()
    }

    fn pretty(&self) -> String {
        let samples: Vec<String> = self
            .samples
            .iter()
            .map(|sample| format!("0x{:08X}={}", sample.address, bytes_to_hex(&sample.data)))
            .collect();
        format!("#{} {} {}", self.cycle, self.key, samples.join(" "))
    }

    fn raw(&self) -> Vec<u8> {
        self.samples
            .iter()
            .flat_map(|sample| sample.data.iter().copied())
            .collect()
    }
}
