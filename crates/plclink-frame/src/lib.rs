//! Checksummed ASCII-hex command/response codec for PLC device links.
//!
//! Commands are a two-letter opcode, big-endian u32 fields and an optional
//! payload, all hex encoded, followed by a CRC-8 (polynomial 0x31) trailer:
//!
//! ```text
//! MR 00000100 00000004 38      (spaces for readability only)
//! ^^ ^^^^^^^^ ^^^^^^^^ ^^
//! op address  size     crc8(b"MR" ++ be(address) ++ be(size))
//! ```
//!
//! Responses are newline-terminated text: `OK <hex>`, bare hex, or an error
//! line starting with `ERR` or `E:`.

pub mod command;
pub mod crc;
pub mod error;
pub mod health;
pub mod hex;
pub mod response;

#[cfg(feature = "async")]
pub mod codec;

pub use command::{parse_command, CommandFrame, Opcode, FIELD_HEX_WIDTH};
pub use crc::{crc8, crc8_update};
pub use error::{FrameError, Result};
pub use health::{parse_health, HealthStats};
pub use hex::{bytes_to_hex, hex_to_bytes, hex_to_text, text_to_hex};
pub use response::{decode_response, is_error_response, take_line, LINE_TERMINATOR};

#[cfg(feature = "async")]
pub use codec::LineCodec;
