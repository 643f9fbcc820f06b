//! Error types for gttlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Link-layer, protocol-layer, and
//! lifecycle errors are all captured here.

/// The error type for all gttlib operations.
///
/// Variants cover the failure modes met when driving a display over a
/// shared serial link: an unbound or closed link, failed writes, missing
/// or malformed replies, and operations issued in the wrong lifecycle state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation was attempted while the connection is closed.
    #[error("link closed")]
    LinkClosed,

    /// No underlying byte link is bound, or it could not be opened.
    #[error("link unavailable")]
    LinkUnavailable,

    /// The underlying write failed or wrote zero bytes.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Timed out waiting for a response from the display.
    ///
    /// This typically indicates the display is powered off, the baud rate
    /// is wrong, or the reply carried a different command id.
    #[error("timeout waiting for response")]
    Timeout,

    /// A malformed, too-short, or mismatched reply.
    ///
    /// `raw` holds the offending bytes exactly as received.
    #[error("protocol error: {message} (raw: {raw:02X?})")]
    Protocol {
        /// What was wrong with the reply.
        message: String,
        /// The reply bytes as read from the link.
        raw: Vec<u8>,
    },

    /// The operation is not valid for the current connection state.
    #[error("invalid state: {0}")]
    State(String),

    /// A transport-level error reported by the byte link (serial port).
    #[error("transport error: {0}")]
    Transport(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::Protocol`] from a message and the raw reply bytes.
    pub fn protocol(message: impl Into<String>, raw: &[u8]) -> Self {
        Error::Protocol {
            message: message.into(),
            raw: raw.to_vec(),
        }
    }

    /// Build a [`Error::State`] from a message.
    pub fn state(message: impl Into<String>) -> Self {
        Error::State(message.into())
    }

    /// The raw reply bytes attached to a protocol error, if any.
    pub fn raw_reply(&self) -> Option<&[u8]> {
        match self {
            Error::Protocol { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_link_closed() {
        assert_eq!(Error::LinkClosed.to_string(), "link closed");
    }

    #[test]
    fn error_display_link_unavailable() {
        assert_eq!(Error::LinkUnavailable.to_string(), "link unavailable");
    }

    #[test]
    fn error_display_write_failed() {
        let e = Error::WriteFailed("0 bytes written".into());
        assert_eq!(e.to_string(), "write failed: 0 bytes written");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_protocol_includes_raw_bytes() {
        let e = Error::protocol("wrong sentinel", &[0xAB, 0x01]);
        assert_eq!(e.to_string(), "protocol error: wrong sentinel (raw: [AB, 01])");
        assert_eq!(e.raw_reply(), Some(&[0xAB, 0x01][..]));
    }

    #[test]
    fn error_display_state() {
        let e = Error::state("not listening");
        assert_eq!(e.to_string(), "invalid state: not listening");
        assert!(e.raw_reply().is_none());
    }

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("port busy".into());
        assert_eq!(e.to_string(), "transport error: port busy");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
