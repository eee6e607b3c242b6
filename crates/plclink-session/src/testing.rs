//! In-process mock controllers attached over `tokio::io::duplex`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use plclink_frame::{bytes_to_hex, parse_command, LineCodec, Opcode};
use plclink_transport::{ChannelKey, Transport};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

type LineWriter = FramedWrite<WriteHalf<DuplexStream>, LineCodec>;

pub(crate) const PROGRAM_INFO: &[u8] = &[0x50, 0x4C, 0x43, 0x01];
const MEMORY_SIZE: usize = 1024;

pub(crate) struct FakePlc {
    pub key: ChannelKey,
    writer: Arc<Mutex<LineWriter>>,
}

impl FakePlc {
    /// Push unsolicited bytes toward the host.
    pub async fn inject(&self, bytes: &[u8]) {
        let mut writer = self.writer.lock().await;
        writer.get_mut().write_all(bytes).await.unwrap();
    }
}

/// A device that answers every protocol command from a 1 KiB memory image
/// where byte `i` starts out as `i as u8`.
pub(crate) fn spawn_fake_plc(transport: &Transport, key: &str) -> FakePlc {
    let (device, host) = duplex(4096);
    let key = transport.attach(key, host).unwrap();
    let (reader, writer) = tokio::io::split(device);
    let writer = Arc::new(Mutex::new(FramedWrite::new(writer, LineCodec::new())));

    let replies = Arc::clone(&writer);
    tokio::spawn(async move {
        let mut memory: Vec<u8> = (0..MEMORY_SIZE).map(|i| i as u8).collect();
        let mut lines = FramedRead::new(reader, LineCodec::new());
        while let Some(Ok(line)) = lines.next().await {
            let reply = respond(&mut memory, &line);
            if replies.lock().await.send(reply).await.is_err() {
                break;
            }
        }
    });

    FakePlc { key, writer }
}

fn respond(memory: &mut [u8], line: &str) -> String {
    let frame = match parse_command(line) {
        Ok(frame) => frame,
        Err(_) => return "ERR checksum".to_string(),
    };
    let region = |fields: &[u32]| {
        let start = fields[0] as usize;
        let end = start.checked_add(fields[1] as usize)?;
        (end <= MEMORY_SIZE).then_some(start..end)
    };

    match frame.opcode() {
        Opcode::MemoryRead => match region(frame.fields()) {
            Some(range) => format!("OK {}", bytes_to_hex(&memory[range])),
            None => "ERR bad addr".to_string(),
        },
        Opcode::MemoryWrite => match region(frame.fields()) {
            Some(range) => {
                memory[range].copy_from_slice(frame.payload());
                "OK".to_string()
            }
            None => "ERR bad addr".to_string(),
        },
        Opcode::ProgramInfo => format!("OK {}", bytes_to_hex(PROGRAM_INFO)),
        Opcode::HealthQuery => {
            let fields: String = (1..=13u32).map(|v| format!("{v:08X}")).collect();
            format!("PH{fields}")
        }
        Opcode::HealthReset => "OK".to_string(),
    }
}

/// A device that writes back exactly each line it receives.
pub(crate) fn spawn_echo_device(transport: &Transport, key: &str) -> ChannelKey {
    let (device, host) = duplex(4096);
    let key = transport.attach(key, host).unwrap();
    let (reader, writer) = tokio::io::split(device);

    tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, LineCodec::new());
        let mut echo = FramedWrite::new(writer, LineCodec::new());
        while let Some(Ok(line)) = lines.next().await {
            if echo.send(line).await.is_err() {
                break;
            }
        }
    });
    key
}

/// A device that accepts input and never answers.
pub(crate) fn spawn_silent_device(transport: &Transport, key: &str) -> ChannelKey {
    let (mut device, host) = duplex(4096);
    let key = transport.attach(key, host).unwrap();

    tokio::spawn(async move {
        let mut sink = [0u8; 256];
        while matches!(device.read(&mut sink).await, Ok(n) if n > 0) {}
    });
    key
}
