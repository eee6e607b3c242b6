/// Errors that can occur while encoding commands or decoding responses.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The device answered with an explicit failure (`ERR ...` / `E:...`).
    #[error("device error: {0}")]
    DeviceError(String),

    /// The response text could not be interpreted as a hex payload.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A hex string had odd length or non-hex characters.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// A command line carried a checksum that does not match its content.
    #[error("checksum mismatch (expected {expected:02X}, got {actual:02X})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    /// The two-letter operation code is not one this codec knows.
    #[error("unknown opcode '{0}'")]
    UnknownOpcode(String),

    /// A command could not be built or parsed from its parts.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A health response carried fewer hex digits than the mandatory fields need.
    #[error("health response too short ({len} hex chars, need at least {min})")]
    HealthTooShort { len: usize, min: usize },

    /// A single line exceeded the configured maximum length.
    #[error("line too long ({len} bytes, max {max})")]
    LineTooLong { len: usize, max: usize },

    /// An I/O error occurred while reading or writing lines.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
