use bytes::{Buf, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::hex::hex_to_bytes;

/// Line terminator for commands and responses.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Decode one response line into its payload bytes.
///
/// - leading/trailing whitespace is ignored
/// - an `OK` prefix is stripped
/// - `ERR...` or `E:...` is a [`FrameError::DeviceError`] carrying the text
/// - anything else must be hex digit pairs ([`FrameError::MalformedResponse`])
pub fn decode_response(text: &str) -> Result<Bytes> {
    let text = text.trim();
    if is_error_response(text) {
        return Err(FrameError::DeviceError(text.to_string()));
    }

    let body = text.strip_prefix("OK").unwrap_or(text).trim();
    hex_to_bytes(body).map(Bytes::from).map_err(|err| {
        FrameError::MalformedResponse(format!("{err} in response '{}'", preview(text)))
    })
}

/// Whether the (trimmed) line signals an explicit device failure.
pub fn is_error_response(text: &str) -> bool {
    let text = text.trim_start();
    text.starts_with("ERR") || text.starts_with("E:")
}

/// Remove and return the first complete line from `buf`.
///
/// The terminator and any trailing `\r` are stripped. Returns `None` until a
/// terminator has arrived; bytes after the line stay in `buf`.
pub fn take_line(buf: &mut BytesMut) -> Option<String> {
    let end = buf.iter().position(|&b| b == LINE_TERMINATOR)?;
    let line = buf.split_to(end);
    buf.advance(1);
    let text = String::from_utf8_lossy(&line);
    Some(text.trim_end_matches('\r').to_string())
}

fn preview(text: &str) -> String {
    const MAX: usize = 48;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}...")
    }
}
