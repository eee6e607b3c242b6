use std::fmt;
use std::io;

use plclink_frame::FrameError;
use plclink_session::SessionError;
use plclink_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::ConnectFailed { source, .. }
            if matches!(
                source.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::TimedOut
            ) =>
        {
            io_error(context, source)
        }
        TransportError::Io(source) => io_error(context, source),
        TransportError::ConnectTimeout { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        TransportError::InvalidTarget(_) | TransportError::Unsupported(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::DeviceError(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::UnknownOpcode(_) | FrameError::InvalidCommand(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Frame(err) => frame_error(context, err),
        SessionError::Io(err) => io_error(context, err),
        SessionError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SessionError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        SessionError::InvalidRequest(_) | SessionError::NotMonitoring(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        SessionError::QueueFull(_)
        | SessionError::QueueCleared
        | SessionError::ChannelReset(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        SessionError::Internal(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use plclink_transport::ChannelKey;

    use super::*;

    #[test]
    fn timeouts_map_to_timeout_code() {
        let err = session_error("read failed", SessionError::Timeout(Duration::from_millis(5)));
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("read failed: "));

        let err = transport_error(
            "open failed",
            TransportError::ConnectTimeout {
                target: "tcp://10.0.0.9:502".into(),
                timeout: Duration::from_secs(1),
            },
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn nested_errors_keep_their_category() {
        let err = session_error(
            "open failed",
            SessionError::Transport(TransportError::InvalidTarget("nope".into())),
        );
        assert_eq!(err.code, USAGE);

        let err = session_error(
            "read failed",
            SessionError::Frame(FrameError::MalformedResponse("zz".into())),
        );
        assert_eq!(err.code, DATA_INVALID);

        let err = session_error(
            "write failed",
            SessionError::Transport(TransportError::NotOpen(ChannelKey::from("plc"))),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn refused_connection_is_a_transport_error() {
        let err = transport_error(
            "open failed",
            TransportError::ConnectFailed {
                target: "tcp://127.0.0.1:1".into(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
