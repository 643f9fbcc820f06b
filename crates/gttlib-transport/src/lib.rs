//! Byte link implementations for gttlib.
//!
//! This crate provides the concrete [`Transport`](gttlib_core::Transport)
//! used to reach a display:
//!
//! - [`SerialTransport`]: USB virtual COM ports and RS-232/TTL serial lines
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
//! link.send(&[0xFE, 0xFF, 0x55]).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = link.receive(&mut buf, Duration::from_millis(600)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{FlowControl, SerialConfig, SerialTransport};
