//! Newline-delimited line codec for `tokio_util::codec::Framed` streams.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::CommandFrame;
use crate::error::FrameError;
use crate::response::{take_line, LINE_TERMINATOR};

/// Default maximum line length: 64 KiB.
pub const DEFAULT_MAX_LINE: usize = 64 * 1024;

/// Splits a byte stream into text lines and writes commands or raw lines.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self { max_line }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, FrameError> {
        match take_line(src) {
            Some(line) if line.len() > self.max_line => Err(FrameError::LineTooLong {
                len: line.len(),
                max: self.max_line,
            }),
            Some(line) => Ok(Some(line)),
            None if src.len() > self.max_line => Err(FrameError::LineTooLong {
                len: src.len(),
                max: self.max_line,
            }),
            None => Ok(None),
        }
    }
}

impl Encoder<&CommandFrame> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &CommandFrame, dst: &mut BytesMut) -> Result<(), FrameError> {
        item.encode_into(dst);
        Ok(())
    }
}

impl Encoder<&str> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), FrameError> {
        if item.len() > self.max_line {
            return Err(FrameError::LineTooLong {
                len: item.len(),
                max: self.max_line,
            });
        }
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(LINE_TERMINATOR);
        Ok(())
    }
}

impl Encoder<String> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), FrameError> {
        <Self as Encoder<&str>>::encode(self, &item, dst)
    }
}
