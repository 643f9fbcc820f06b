//! Core types shared by the gttlib crates.

use std::fmt;

/// Lifecycle state of a display connection.
///
/// Owned by the connection itself; everything else only reads it.
/// Transitions are `Closed → Open` (open), `Open → Listening` (listen),
/// `Listening → Open` (stop-listen, or the background reader giving up),
/// and `Open | Listening → Closed` (close).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No link is open.
    #[default]
    Closed,
    /// The link is open; exchanges are direct read-after-write.
    Open,
    /// A background reader owns the link and routes responses and events.
    Listening,
}

impl ConnectionState {
    /// `true` for [`Open`](ConnectionState::Open) and
    /// [`Listening`](ConnectionState::Listening).
    pub fn is_open(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// `true` only for [`Listening`](ConnectionState::Listening).
    pub fn is_listening(&self) -> bool {
        matches!(self, ConnectionState::Listening)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Listening => write!(f, "listening"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_closed() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    }

    #[test]
    fn state_predicates() {
        assert!(!ConnectionState::Closed.is_open());
        assert!(ConnectionState::Open.is_open());
        assert!(ConnectionState::Listening.is_open());
        assert!(!ConnectionState::Open.is_listening());
        assert!(ConnectionState::Listening.is_listening());
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Listening.to_string(), "listening");
    }
}
