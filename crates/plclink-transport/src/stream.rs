use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::target::{ChannelTarget, SerialOptions};

/// Any bidirectional byte stream a channel can run over.
pub trait DeviceStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> DeviceStream for T {}

/// Type-erased device stream.
pub type BoxedStream = Box<dyn DeviceStream>;

/// A connected UDP socket presented as a byte stream.
///
/// Each write is sent as one datagram; reads return one datagram at a time
/// (truncated to the caller's buffer).
#[derive(Debug)]
pub struct UdpStream {
    socket: UdpSocket,
}

impl UdpStream {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl AsyncRead for UdpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for UdpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Open the physical stream for a target (no timeout applied here).
pub(crate) async fn connect(target: &ChannelTarget) -> Result<BoxedStream> {
    let connect_failed = |source: io::Error| TransportError::ConnectFailed {
        target: target.to_string(),
        source,
    };

    match target {
        ChannelTarget::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(connect_failed)?;
            // Commands are short lines; do not let Nagle hold them back.
            stream.set_nodelay(true).map_err(connect_failed)?;
            debug!(%target, "tcp channel connected");
            Ok(Box::new(stream))
        }
        ChannelTarget::Udp { host, port } => {
            let socket = UdpSocket::bind(("0.0.0.0", 0))
                .await
                .map_err(connect_failed)?;
            socket
                .connect((host.as_str(), *port))
                .await
                .map_err(connect_failed)?;
            debug!(%target, "udp channel connected");
            Ok(Box::new(UdpStream::new(socket)))
        }
        ChannelTarget::Serial(opts) => open_serial(opts).await.map_err(|err| match err {
            TransportError::Io(source) => connect_failed(source),
            other => other,
        }),
    }
}

#[cfg(feature = "serial")]
async fn open_serial(opts: &SerialOptions) -> Result<BoxedStream> {
    use tokio_serial::SerialPortBuilderExt;

    let builder = tokio_serial::new(opts.path.as_str(), opts.baud_rate)
        .data_bits(serial::data_bits(opts.data_bits))
        .parity(serial::parity(opts.parity))
        .stop_bits(serial::stop_bits(opts.stop_bits))
        .flow_control(tokio_serial::FlowControl::None);

    // Opening a port can block on the OS driver; keep it off the reactor.
    let stream = tokio::task::spawn_blocking(move || builder.open_native_async())
        .await
        .map_err(|err| io::Error::other(format!("serial open task failed: {err}")))?
        .map_err(io::Error::from)?;
    debug!(path = %opts.path, baud = opts.baud_rate, "serial channel opened");
    Ok(Box::new(stream))
}

#[cfg(not(feature = "serial"))]
async fn open_serial(_opts: &SerialOptions) -> Result<BoxedStream> {
    Err(TransportError::Unsupported("serial"))
}

/// Serial ports visible to the OS.
#[cfg(feature = "serial")]
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports().map_err(io::Error::from)?;
    Ok(ports
        .into_iter()
        .map(|port| PortInfo {
            kind: serial::port_kind(&port.port_type),
            path: port.port_name,
        })
        .collect())
}

/// Serial ports visible to the OS.
#[cfg(not(feature = "serial"))]
pub fn list_ports() -> Result<Vec<PortInfo>> {
    Err(TransportError::Unsupported("serial"))
}

/// One serial port reported by [`list_ports`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortInfo {
    pub path: String,
    /// `usb`, `pci`, `bluetooth` or `unknown`.
    pub kind: &'static str,
}

#[cfg(feature = "serial")]
mod serial {
    use crate::target::{Parity, StopBits};

    pub(super) fn data_bits(bits: u8) -> tokio_serial::DataBits {
        match bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    pub(super) fn parity(parity: Parity) -> tokio_serial::Parity {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }

    pub(super) fn stop_bits(stop_bits: StopBits) -> tokio_serial::StopBits {
        match stop_bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }

    pub(super) fn port_kind(port_type: &tokio_serial::SerialPortType) -> &'static str {
        match port_type {
            tokio_serial::SerialPortType::UsbPort(_) => "usb",
            tokio_serial::SerialPortType::PciPort => "pci",
            tokio_serial::SerialPortType::BluetoothPort => "bluetooth",
            tokio_serial::SerialPortType::Unknown => "unknown",
        }
    }
}
