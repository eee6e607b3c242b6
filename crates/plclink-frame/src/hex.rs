//! Hex/text helpers. Encoding is uppercase; decoding accepts either case.

use crate::error::{FrameError, Result};

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Encode bytes as uppercase hex, two characters per byte.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    push_hex(&mut out, bytes);
    out
}

pub(crate) fn push_hex(out: &mut String, bytes: &[u8]) {
    for &byte in bytes {
        out.push(char::from(DIGITS[usize::from(byte >> 4)]));
        out.push(char::from(DIGITS[usize::from(byte & 0x0F)]));
    }
}

/// Decode a hex string into bytes.
///
/// Fails on odd length or any non-hex character; no whitespace is skipped.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>> {
    let raw = hex.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(FrameError::InvalidHex(format!(
            "odd length ({} chars)",
            raw.len()
        )));
    }

    raw.chunks_exact(2)
        .enumerate()
        .map(|(index, pair)| match (nibble(pair[0]), nibble(pair[1])) {
            (Some(high), Some(low)) => Ok((high << 4) | low),
            _ => Err(FrameError::InvalidHex(format!(
                "non-hex character near offset {}",
                index * 2
            ))),
        })
        .collect()
}

/// Encode UTF-8 text as hex of its bytes.
pub fn text_to_hex(text: &str) -> String {
    bytes_to_hex(text.as_bytes())
}

/// Decode hex into UTF-8 text.
pub fn hex_to_text(hex: &str) -> Result<String> {
    let bytes = hex_to_bytes(hex)?;
    String::from_utf8(bytes)
        .map_err(|err| FrameError::InvalidHex(format!("decoded bytes are not UTF-8: {err}")))
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
