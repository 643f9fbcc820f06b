//! Asynchronous display event types.
//!
//! Events are decoded from unsolicited frames while a connection is
//! listening and delivered through the connection's event stream. Each
//! event is handed to the active subscriber at most once and then dropped.

use std::fmt;

/// The kind of an unsolicited display notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A property of an on-screen object changed (event subtype `0x01`).
    PropertyChange,
    /// A key was reported by a visual object (event subtype `0x02`).
    Key,
    /// A button object was clicked (event subtype `0x15`).
    ButtonClick,
    /// A touch region was pressed (`0xFC 0x87` touch report).
    RegionTouch,
}

impl EventKind {
    /// Map a property-event subtype to its kind.
    ///
    /// Returns `None` for subtypes the engine does not surface.
    pub fn from_subtype(subtype: u16) -> Option<Self> {
        match subtype {
            0x01 => Some(EventKind::PropertyChange),
            0x02 => Some(EventKind::Key),
            0x15 => Some(EventKind::ButtonClick),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::PropertyChange => write!(f, "property-change"),
            EventKind::Key => write!(f, "key"),
            EventKind::ButtonClick => write!(f, "button-click"),
            EventKind::RegionTouch => write!(f, "region-touch"),
        }
    }
}

/// An event emitted by the display without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The object (or touch region) the event refers to.
    pub object_id: u16,
    /// Event-specific value bytes; empty for touch reports.
    pub value: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_mapping() {
        assert_eq!(EventKind::from_subtype(0x01), Some(EventKind::PropertyChange));
        assert_eq!(EventKind::from_subtype(0x02), Some(EventKind::Key));
        assert_eq!(EventKind::from_subtype(0x15), Some(EventKind::ButtonClick));
        assert_eq!(EventKind::from_subtype(0x03), None);
        assert_eq!(EventKind::from_subtype(0x0100), None);
    }

    #[test]
    fn event_kind_display() {
        assert_eq!(EventKind::PropertyChange.to_string(), "property-change");
        assert_eq!(EventKind::RegionTouch.to_string(), "region-touch");
    }
}
