//! Transport trait for display communication.
//!
//! The [`Transport`] trait abstracts over the physical byte link to a
//! display. The serial implementation lives in `gttlib-transport`; a
//! scriptable mock lives in `gttlib-test-harness`.
//!
//! The protocol engine in `gttlib-display` operates on a `Transport` rather
//! than directly on a serial port, enabling both real hardware control and
//! deterministic unit testing.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level link to a display.
///
/// Implementations handle buffering and error recovery at the physical
/// layer. Framing and request/response correlation are handled by the
/// protocol engine that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the display.
    ///
    /// Implementations should block until all bytes have been written to
    /// the underlying link.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the display into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if no data is received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the link.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::LinkClosed`](crate::error::Error::LinkClosed).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the link is currently usable.
    fn is_connected(&self) -> bool;
}
