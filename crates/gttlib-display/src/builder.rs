//! DisplayBuilder -- fluent builder for constructing [`Display`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial line parameters and engine tunables before the link is opened.
//!
//! # Example
//!
//! ```no_run
//! use gttlib_display::DisplayBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> gttlib_core::Result<()> {
//! let display = DisplayBuilder::new()
//!     .serial_port("/dev/ttyACM0")
//!     .baud_rate(115_200)
//!     .read_timeout(Duration::from_millis(600))
//!     .build()?;
//! display.open().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use gttlib_core::error::{Error, Result};
use gttlib_core::transport::Transport;
use gttlib_transport::SerialConfig;

use crate::display::Display;
use crate::frame::EventFraming;

/// Engine tunables of a [`Display`].
///
/// The defaults suit GTT displays at 115200 baud.
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Bound on a single link read (default: 600 ms).
    pub read_timeout: Duration,
    /// Deadline used by `echo()`, `version()` and `poll_keys()` (default: 600 ms).
    pub request_timeout: Duration,
    /// How long the background reader waits for room in the response
    /// mailbox or event queue before dropping a frame (default: 600 ms).
    pub delivery_timeout: Duration,
    /// Capacity of the event queue (default: 32).
    pub event_queue_depth: usize,
    /// Consecutive failed reads after which listening stops (default: 5).
    pub max_read_errors: u32,
    /// Whether a read timeout on an idle link counts toward
    /// `max_read_errors` (default: `true`).
    ///
    /// With the default, a display that stays silent for
    /// `max_read_errors × read_timeout` is treated as gone and listening
    /// ends. Turn it off to keep listening to a quiet display; read errors
    /// and empty reads still count.
    pub count_idle_timeouts: bool,
    /// How long `stop_listen()` waits for the background reader (default: 1 s).
    pub stop_grace: Duration,
    /// Property-event layout on the wire (default: unframed).
    pub event_framing: EventFraming,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            read_timeout: Duration::from_millis(600),
            request_timeout: Duration::from_millis(600),
            delivery_timeout: Duration::from_millis(600),
            event_queue_depth: 32,
            max_read_errors: 5,
            count_idle_timeouts: true,
            stop_grace: Duration::from_secs(1),
            event_framing: EventFraming::Unframed,
        }
    }
}

/// Where `open()` finds the serial port.
#[derive(Debug, Clone)]
pub(crate) struct SerialSettings {
    pub port: String,
    pub line: SerialConfig,
}

/// Fluent builder for [`Display`].
///
/// The simplest usage is:
///
/// ```ignore
/// let display = DisplayBuilder::new()
///     .serial_port("/dev/ttyACM0")
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct DisplayBuilder {
    serial_port: Option<String>,
    line: SerialConfig,
    config: DisplayConfig,
}

impl DisplayBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the serial port path (e.g. `/dev/ttyACM0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Set the baud rate (default: 115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.line.baud_rate = baud;
        self
    }

    /// Replace the full serial line configuration.
    pub fn serial_config(mut self, line: SerialConfig) -> Self {
        self.line = line;
        self
    }

    /// Set the bound on a single link read (default: 600 ms).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set the deadline for the built-in commands (default: 600 ms).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set how long a frame may wait for queue space (default: 600 ms).
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = timeout;
        self
    }

    /// Set the event queue capacity (default: 32).
    pub fn event_queue_depth(mut self, depth: usize) -> Self {
        self.config.event_queue_depth = depth;
        self
    }

    /// Set the consecutive read failures tolerated while listening (default: 5).
    pub fn max_read_errors(mut self, n: u32) -> Self {
        self.config.max_read_errors = n;
        self
    }

    /// Choose whether idle read timeouts count as read failures (default: `true`).
    pub fn count_idle_timeouts(mut self, count: bool) -> Self {
        self.config.count_idle_timeouts = count;
        self
    }

    /// Set how long `stop_listen()` waits for the reader (default: 1 s).
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.config.stop_grace = grace;
        self
    }

    /// Select the property-event layout (default: unframed).
    pub fn event_framing(mut self, framing: EventFraming) -> Self {
        self.config.event_framing = framing;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.config.event_queue_depth == 0 {
            return Err(Error::state("event_queue_depth must be at least 1"));
        }
        if self.config.max_read_errors == 0 {
            return Err(Error::state("max_read_errors must be at least 1"));
        }
        Ok(())
    }

    /// Build a [`Display`] around a caller-provided link.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockTransport` from `gttlib-test-harness`). The display starts
    /// `Closed`; call [`Display::open`] before use.
    pub fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<Display> {
        self.validate()?;
        Ok(Display::new(self.config, None, Some(transport)))
    }

    /// Build a [`Display`] that opens a serial port on [`Display::open`].
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub fn build(self) -> Result<Display> {
        self.validate()?;
        let port = self.serial_port.ok_or(Error::LinkUnavailable)?;
        let serial = SerialSettings {
            port,
            line: self.line,
        };
        Ok(Display::new(self.config, Some(serial), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gttlib_core::types::ConnectionState;
    use gttlib_test_harness::MockTransport;

    #[test]
    fn config_defaults() {
        let config = DisplayConfig::default();
        assert_eq!(config.read_timeout, Duration::from_millis(600));
        assert_eq!(config.request_timeout, Duration::from_millis(600));
        assert_eq!(config.delivery_timeout, Duration::from_millis(600));
        assert_eq!(config.event_queue_depth, 32);
        assert_eq!(config.max_read_errors, 5);
        assert!(config.count_idle_timeouts);
        assert_eq!(config.stop_grace, Duration::from_secs(1));
        assert_eq!(config.event_framing, EventFraming::Unframed);
    }

    #[test]
    fn builder_with_transport_starts_closed() {
        let display = DisplayBuilder::new()
            .build_with_transport(Box::new(MockTransport::new()))
            .unwrap();
        assert_eq!(display.state(), ConnectionState::Closed);
    }

    #[test]
    fn builder_serial_port_required_for_build() {
        let result = DisplayBuilder::new().build();
        assert!(matches!(result, Err(Error::LinkUnavailable)));
    }

    #[test]
    fn builder_rejects_zero_queue_depth() {
        let result = DisplayBuilder::new()
            .event_queue_depth(0)
            .build_with_transport(Box::new(MockTransport::new()));
        assert!(matches!(result, Err(Error::State(_))));
    }

    #[test]
    fn builder_fluent_chain() {
        let display = DisplayBuilder::new()
            .serial_port("/dev/ttyACM0")
            .baud_rate(19_200)
            .read_timeout(Duration::from_millis(200))
            .request_timeout(Duration::from_millis(300))
            .delivery_timeout(Duration::from_millis(100))
            .event_queue_depth(8)
            .max_read_errors(3)
            .count_idle_timeouts(false)
            .stop_grace(Duration::from_millis(500))
            .event_framing(EventFraming::LengthPrefixed)
            .build()
            .unwrap();

        let config = display.config();
        assert_eq!(config.read_timeout, Duration::from_millis(200));
        assert_eq!(config.request_timeout, Duration::from_millis(300));
        assert_eq!(config.event_queue_depth, 8);
        assert_eq!(config.max_read_errors, 3);
        assert!(!config.count_idle_timeouts);
        assert_eq!(config.event_framing, EventFraming::LengthPrefixed);
        assert_eq!(display.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn open_missing_serial_port_is_unavailable() {
        let display = DisplayBuilder::new()
            .serial_port("/dev/gttlib-does-not-exist")
            .build()
            .unwrap();
        assert!(matches!(display.open().await, Err(Error::LinkUnavailable)));
        assert_eq!(display.state(), ConnectionState::Closed);
    }
}
