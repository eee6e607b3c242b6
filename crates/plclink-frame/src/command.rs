use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::crc8_update;
use crate::error::{FrameError, Result};
use crate::hex::{hex_to_bytes, push_hex};

/// Hex characters per 32-bit field.
pub const FIELD_HEX_WIDTH: usize = 8;

/// Two-letter operation codes understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `MR`: read `size` bytes at `address`.
    MemoryRead,
    /// `MW`: write the payload at `address`.
    MemoryWrite,
    /// `PI`: program info.
    ProgramInfo,
    /// `PH`: health counters.
    HealthQuery,
    /// `RH`: reset health counters.
    HealthReset,
}

impl Opcode {
    /// The ASCII code sent on the wire.
    pub fn code(self) -> &'static str {
        match self {
            Opcode::MemoryRead => "MR",
            Opcode::MemoryWrite => "MW",
            Opcode::ProgramInfo => "PI",
            Opcode::HealthQuery => "PH",
            Opcode::HealthReset => "RH",
        }
    }

    /// Look up an opcode by its two-letter code (case-insensitive).
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "MR" => Some(Opcode::MemoryRead),
            "MW" => Some(Opcode::MemoryWrite),
            "PI" => Some(Opcode::ProgramInfo),
            "PH" => Some(Opcode::HealthQuery),
            "RH" => Some(Opcode::HealthReset),
            _ => None,
        }
    }

    /// Number of fixed-width u32 fields following the opcode.
    pub fn field_count(self) -> usize {
        match self {
            Opcode::MemoryRead | Opcode::MemoryWrite => 2,
            Opcode::ProgramInfo | Opcode::HealthQuery | Opcode::HealthReset => 0,
        }
    }

    /// Whether a variable-length payload follows the fields.
    pub fn has_payload(self) -> bool {
        matches!(self, Opcode::MemoryWrite)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An immutable command: opcode, big-endian u32 fields, optional payload and
/// the CRC-8 computed over all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    opcode: Opcode,
    fields: Vec<u32>,
    payload: Bytes,
    checksum: u8,
}

impl CommandFrame {
    /// Build a command, validating the field count and payload shape.
    pub fn new(opcode: Opcode, fields: &[u32], payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if fields.len() != opcode.field_count() {
            return Err(FrameError::InvalidCommand(format!(
                "{opcode} takes {} fields, got {}",
                opcode.field_count(),
                fields.len()
            )));
        }
        if !opcode.has_payload() && !payload.is_empty() {
            return Err(FrameError::InvalidCommand(format!(
                "{opcode} does not carry a payload"
            )));
        }
        if opcode == Opcode::MemoryWrite && fields[1] as usize != payload.len() {
            return Err(FrameError::InvalidCommand(format!(
                "MW size field {} does not match payload length {}",
                fields[1],
                payload.len()
            )));
        }

        let checksum = checksum_parts(opcode, fields, &payload);
        Ok(Self {
            opcode,
            fields: fields.to_vec(),
            payload,
            checksum,
        })
    }

    /// `MR` for `size` bytes at `address`.
    pub fn memory_read(address: u32, size: u32) -> Self {
        let fields = [address, size];
        Self {
            opcode: Opcode::MemoryRead,
            checksum: checksum_parts(Opcode::MemoryRead, &fields, &[]),
            fields: fields.to_vec(),
            payload: Bytes::new(),
        }
    }

    /// `MW` writing `data` at `address`; the size field is the data length.
    pub fn memory_write(address: u32, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let size = u32::try_from(data.len()).map_err(|_| {
            FrameError::InvalidCommand(format!("MW payload too large ({} bytes)", data.len()))
        })?;
        Self::new(Opcode::MemoryWrite, &[address, size], data)
    }

    /// `PI` program info query.
    pub fn program_info() -> Self {
        Self::bare(Opcode::ProgramInfo)
    }

    /// `PH` health query.
    pub fn health_query() -> Self {
        Self::bare(Opcode::HealthQuery)
    }

    /// `RH` health reset.
    pub fn health_reset() -> Self {
        Self::bare(Opcode::HealthReset)
    }

    fn bare(opcode: Opcode) -> Self {
        Self {
            opcode,
            fields: Vec::new(),
            payload: Bytes::new(),
            checksum: checksum_parts(opcode, &[], &[]),
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn fields(&self) -> &[u32] {
        &self.fields
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Encoded command text without the line terminator.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.wire_len());
        out.push_str(self.opcode.code());
        for field in &self.fields {
            push_hex(&mut out, &field.to_be_bytes());
        }
        push_hex(&mut out, &self.payload);
        push_hex(&mut out, &[self.checksum]);
        out
    }

    /// Encoded command text terminated with `\n`, ready for the channel.
    pub fn to_line(&self) -> String {
        let mut line = self.encode();
        line.push('\n');
        line
    }

    /// Append the newline-terminated command to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        let line = self.to_line();
        dst.reserve(line.len());
        dst.put_slice(line.as_bytes());
    }

    /// Length of the encoded text without the terminator.
    pub fn wire_len(&self) -> usize {
        2 + self.fields.len() * FIELD_HEX_WIDTH + self.payload.len() * 2 + 2
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn checksum_parts(opcode: Opcode, fields: &[u32], payload: &[u8]) -> u8 {
    let mut crc = crc8_update(0, opcode.code().as_bytes());
    for field in fields {
        crc = crc8_update(crc, &field.to_be_bytes());
    }
    crc8_update(crc, payload)
}

/// Parse a command line back into a [`CommandFrame`], verifying its checksum.
///
/// Surrounding whitespace (including the line terminator) is ignored.
pub fn parse_command(line: &str) -> Result<CommandFrame> {
    let line = line.trim();
    if line.len() < 4 || !line.is_char_boundary(2) {
        return Err(FrameError::InvalidCommand(format!(
            "command too short: '{line}'"
        )));
    }

    let (code, rest) = line.split_at(2);
    let opcode = Opcode::from_code(code).ok_or_else(|| FrameError::UnknownOpcode(code.into()))?;
    let body = hex_to_bytes(rest)?;

    let field_bytes = opcode.field_count() * 4;
    if body.len() < field_bytes + 1 {
        return Err(FrameError::InvalidCommand(format!(
            "{opcode} needs at least {} bytes after the opcode, got {}",
            field_bytes + 1,
            body.len()
        )));
    }

    let (content, trailer) = body.split_at(body.len() - 1);
    let actual = trailer[0];
    let (field_raw, payload) = content.split_at(field_bytes);

    let fields: Vec<u32> = field_raw
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let expected = checksum_parts(opcode, &fields, payload);
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    CommandFrame::new(opcode, &fields, Bytes::copy_from_slice(payload))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn reference_crc(data: &[u8]) -> u8 {
        let mut crc = 0u8;
        for &byte in data {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 {
                    (crc << 1) ^ 0x31
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    #[test]
    fn memory_read_matches_reference_checksum() {
        let frame = CommandFrame::memory_read(256, 4);
        let expected_crc = reference_crc(&[b'M', b'R', 0, 0, 1, 0, 0, 0, 0, 4]);
        assert_eq!(
            frame.encode(),
            format!("MR0000010000000004{expected_crc:02X}")
        );
        assert!(frame.encode().starts_with("MR00000100000000043"));
    }

    #[test]
    fn memory_write_includes_payload_and_size() {
        let frame = CommandFrame::memory_write(0x10, vec![0xDE, 0xAD]).unwrap();
        let crc = reference_crc(&[b'M', b'W', 0, 0, 0, 0x10, 0, 0, 0, 2, 0xDE, 0xAD]);
        assert_eq!(frame.encode(), format!("MW0000001000000002DEAD{crc:02X}"));
        assert_eq!(frame.wire_len(), frame.encode().len());
    }

    #[test]
    fn bare_commands_are_opcode_and_checksum() {
        for (frame, code) in [
            (CommandFrame::program_info(), "PI"),
            (CommandFrame::health_query(), "PH"),
            (CommandFrame::health_reset(), "RH"),
        ] {
            let text = frame.encode();
            assert_eq!(text.len(), 4);
            assert_eq!(&text[..2], code);
            assert_eq!(
                u8::from_str_radix(&text[2..], 16).unwrap(),
                reference_crc(code.as_bytes())
            );
        }
    }

    #[test]
    fn to_line_is_newline_terminated() {
        let line = CommandFrame::program_info().to_line();
        assert!(line.ends_with('\n'));
        assert_eq!(line.trim_end(), CommandFrame::program_info().encode());
    }

    #[test]
    fn parse_recovers_extreme_fields() {
        for (address, size) in [(0, 0), (u32::MAX, u32::MAX), (256, 4)] {
            let frame = CommandFrame::memory_read(address, size);
            let parsed = parse_command(&frame.to_line()).unwrap();
            assert_eq!(parsed.opcode(), Opcode::MemoryRead);
            assert_eq!(parsed.fields(), &[address, size]);
            assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        let mut text = CommandFrame::memory_read(1, 2).encode();
        let last = text.pop().unwrap();
        text.push(if last == '0' { '1' } else { '0' });
        assert!(matches!(
            parse_command(&text),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn parse_rejects_unknown_opcode() {
        assert!(matches!(
            parse_command("ZZ00"),
            Err(FrameError::UnknownOpcode(code)) if code == "ZZ"
        ));
    }

    #[test]
    fn parse_rejects_truncated_fields() {
        assert!(matches!(
            parse_command("MR0000010000"),
            Err(FrameError::InvalidCommand(_))
        ));
    }

    #[test]
    fn new_rejects_wrong_field_count() {
        assert!(CommandFrame::new(Opcode::MemoryRead, &[1], Bytes::new()).is_err());
        assert!(CommandFrame::new(Opcode::ProgramInfo, &[], vec![1u8]).is_err());
        assert!(CommandFrame::new(Opcode::MemoryWrite, &[0, 3], vec![1u8]).is_err());
    }

    #[test]
    fn opcode_codes_roundtrip() {
        for opcode in [
            Opcode::MemoryRead,
            Opcode::MemoryWrite,
            Opcode::ProgramInfo,
            Opcode::HealthQuery,
            Opcode::HealthReset,
        ] {
            assert_eq!(Opcode::from_code(opcode.code()), Some(opcode));
        }
        assert_eq!(Opcode::from_code("mr"), Some(Opcode::MemoryRead));
    }

    proptest! {
        #[test]
        fn memory_read_parse_recovers_fields(address in any::<u32>(), size in any::<u32>()) {
            let parsed = parse_command(&CommandFrame::memory_read(address, size).encode()).unwrap();
            prop_assert_eq!(parsed.fields(), &[address, size][..]);
        }

        #[test]
        fn memory_write_parse_recovers_payload(address in any::<u32>(), data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let frame = CommandFrame::memory_write(address, data.clone()).unwrap();
            let parsed = parse_command(&frame.encode()).unwrap();
            prop_assert_eq!(parsed.fields()[0], address);
            prop_assert_eq!(parsed.payload().as_ref(), data.as_slice());
        }
    }
}
