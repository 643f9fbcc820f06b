//! Serial port byte link for display communication.
//!
//! [`SerialTransport`] implements the [`Transport`] trait for USB virtual COM
//! ports and RS-232/TTL serial connections. Matrix Orbital modules always
//! talk 8N1; only the baud rate and flow control are selectable. GTT
//! displays ship at 115200 baud, the older GLK keypad modules at 19200.
//!
//! # Example
//!
//! ```no_run
//! use gttlib_transport::SerialTransport;
//! use gttlib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> gttlib_core::Result<()> {
//! let mut link = SerialTransport::open("/dev/ttyUSB0", 115_200).await?;
//!
//! // Ask for the firmware version (command 0x00).
//! link.send(&[0xFE, 0x00]).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = link.receive(&mut buf, Duration::from_millis(600)).await?;
//! # Ok(())
//! # }
//! ```

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, trace, warn};

use gttlib_core::error::{Error, Result};
use gttlib_core::transport::Transport;

pub use tokio_serial::FlowControl;

/// Serial line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    /// Baud rate (default: 115200).
    pub baud_rate: u32,
    /// Flow control; GTT modules can be strapped for RTS/CTS (default: none).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baud_rate: 115_200,
            flow_control: FlowControl::None,
        }
    }
}

/// Serial port byte link to a display.
pub struct SerialTransport {
    stream: Option<SerialStream>,
    name: String,
}

impl SerialTransport {
    /// Open `port` at `baud_rate` without flow control.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..SerialConfig::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open `port` with explicit line settings.
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        let stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(config.flow_control)
            .open_native_async()
            .map_err(|e| Error::Transport(format!("cannot open {port}: {e}")))?;

        debug!(port, baud = config.baud_rate, flow = ?config.flow_control, "serial link open");
        Ok(SerialTransport {
            stream: Some(stream),
            name: port.to_string(),
        })
    }

    /// The port path this link was opened on.
    pub fn port_name(&self) -> &str {
        &self.name
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.stream.as_mut().ok_or(Error::LinkClosed)
    }
}

/// Classify a read or write error on a live port.
///
/// An unplugged USB adapter surfaces as a broken pipe or "not connected".
fn link_error(port: &str, e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::TimedOut => Error::Timeout,
        ErrorKind::BrokenPipe | ErrorKind::NotConnected => {
            Error::Transport(format!("{port} disconnected: {e}"))
        }
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::WriteFailed("nothing to write".into()));
        }
        let name = self.name.clone();
        let stream = self.stream()?;
        trace!(port = %name, data = ?data, "tx");

        let written = async {
            stream.write_all(data).await?;
            stream.flush().await
        };
        written
            .await
            .map_err(|e| Error::WriteFailed(format!("{name}: {e}")))
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let name = self.name.clone();
        let stream = self.stream()?;
        let n = tokio::time::timeout(timeout, stream.read(buf))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| link_error(&name, e))?;
        trace!(port = %name, data = ?&buf[..n], "rx");
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        if let Err(e) = stream.flush().await {
            warn!(port = %self.name, error = %e, "flush on close failed");
        }
        debug!(port = %self.name, "serial link closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
