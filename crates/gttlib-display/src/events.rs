//! Event demultiplexing for unsolicited display frames.
//!
//! While a connection is listening, the background reader hands every
//! property event and touch report to [`decode_event`] and publishes the
//! result on a bounded queue. The single subscriber drains that queue
//! through an [`EventStream`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

use gttlib_core::error::{Error, Result};
use gttlib_core::events::{Event, EventKind};

use crate::frame::{Frame, FrameKind};

/// Decode an event from a property-event or touch-report frame.
///
/// Returns `None` (after logging) for frames that carry no event the
/// engine surfaces: unknown subtypes, truncated headers, and non-event
/// frames.
pub fn decode_event(frame: &Frame) -> Option<Event> {
    match frame.kind {
        FrameKind::TouchEvent => Some(Event {
            kind: EventKind::RegionTouch,
            object_id: frame.object_id?,
            value: Vec::new(),
        }),
        FrameKind::PropertyEvent => {
            let body = &frame.payload;
            if body.len() < 4 {
                debug!(raw = ?&frame.raw[..], "property event too short, dropping");
                return None;
            }
            let subtype = u16::from_le_bytes([body[0], body[1]]);
            let Some(kind) = EventKind::from_subtype(subtype) else {
                debug!(subtype, raw = ?&frame.raw[..], "unknown event subtype, dropping");
                return None;
            };
            Some(Event {
                kind,
                object_id: u16::from_be_bytes([body[2], body[3]]),
                value: body[4..].to_vec(),
            })
        }
        FrameKind::CommandResponse | FrameKind::RawOpaque => None,
    }
}

/// Publish one event, waiting up to `delivery_timeout` for queue space.
///
/// A full queue past the timeout drops the event with a warning. Returns
/// `false` only when the subscriber side is gone.
pub(crate) async fn publish(
    event_tx: &mpsc::Sender<Event>,
    event: Event,
    delivery_timeout: Duration,
) -> bool {
    match event_tx.send_timeout(event, delivery_timeout).await {
        Ok(()) => true,
        Err(SendTimeoutError::Timeout(event)) => {
            warn!(
                kind = %event.kind,
                object_id = event.object_id,
                "event queue full, dropping event"
            );
            true
        }
        Err(SendTimeoutError::Closed(event)) => {
            debug!(kind = %event.kind, "event subscriber gone, dropping event");
            false
        }
    }
}

/// Receiving end of a listening session's event queue.
///
/// Obtained from [`Display::subscribe`](crate::Display::subscribe). The
/// stream ends (`recv()` returns `None`) once the connection stops
/// listening; a new subscription is needed after the next `listen()`.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<Event>) -> Self {
        EventStream { rx }
    }

    /// Wait for the next event. `None` means the listening session ended.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Wait up to `timeout` for the next event.
    ///
    /// Returns `Ok(None)` when the session ended and [`Error::Timeout`]
    /// when nothing arrived in time.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Event>> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .map_err(|_| Error::Timeout)
    }

    /// Take an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DecodeResult, EventFraming, decode_frame};

    fn frame(bytes: &[u8]) -> Frame {
        match decode_frame(bytes, EventFraming::Unframed) {
            DecodeResult::Frame(frame, _) => frame,
            DecodeResult::Incomplete => panic!("incomplete test frame"),
        }
    }

    #[test]
    fn decode_property_change() {
        let event = decode_event(&frame(&[0xFC, 0xEB, 0x01, 0x00, 0x00, 0x05, 0x2A])).unwrap();
        assert_eq!(
            event,
            Event {
                kind: EventKind::PropertyChange,
                object_id: 5,
                value: vec![0x2A],
            }
        );
    }

    #[test]
    fn decode_button_click_with_wide_object_id() {
        let event = decode_event(&frame(&[0xFC, 0xEB, 0x15, 0x00, 0x01, 0x02, 0x01])).unwrap();
        assert_eq!(event.kind, EventKind::ButtonClick);
        assert_eq!(event.object_id, 0x0102);
        assert_eq!(event.value, vec![0x01]);
    }

    #[test]
    fn decode_key_event_without_value() {
        let event = decode_event(&frame(&[0xFC, 0xEB, 0x02, 0x00, 0x00, 0x09])).unwrap();
        assert_eq!(event.kind, EventKind::Key);
        assert!(event.value.is_empty());
    }

    #[test]
    fn decode_touch_report() {
        let event = decode_event(&frame(&[0xFC, 0x87, 0x03])).unwrap();
        assert_eq!(event.kind, EventKind::RegionTouch);
        assert_eq!(event.object_id, 3);
        assert!(event.value.is_empty());
    }

    #[test]
    fn unknown_subtype_is_dropped() {
        assert!(decode_event(&frame(&[0xFC, 0xEB, 0x03, 0x00, 0x00, 0x05])).is_none());
    }

    #[test]
    fn short_length_prefixed_event_is_dropped() {
        let short = match decode_frame(&[0xFC, 0xEB, 0x00, 0x02, 0x01, 0x00], EventFraming::LengthPrefixed) {
            DecodeResult::Frame(frame, _) => frame,
            DecodeResult::Incomplete => panic!("incomplete test frame"),
        };
        assert!(decode_event(&short).is_none());
    }

    #[test]
    fn responses_are_not_events() {
        assert!(decode_event(&frame(&[0xFC, 0x00, 0x00, 0x00])).is_none());
        assert!(decode_event(&frame(&[0x41, 0x42])).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_drops_when_queue_stays_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let event = Event {
            kind: EventKind::Key,
            object_id: 1,
            value: vec![],
        };

        assert!(publish(&tx, event.clone(), Duration::from_millis(600)).await);
        // Queue is full; the second event is dropped after the timeout.
        assert!(publish(&tx, event.clone(), Duration::from_millis(600)).await);

        assert_eq!(rx.recv().await, Some(event));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_reports_closed_subscriber() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let event = Event {
            kind: EventKind::RegionTouch,
            object_id: 2,
            value: vec![],
        };
        assert!(!publish(&tx, event, Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_recv_timeout_and_close() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = EventStream::new(rx);

        assert!(matches!(
            stream.recv_timeout(Duration::from_millis(50)).await,
            Err(Error::Timeout)
        ));

        tx.send(Event {
            kind: EventKind::Key,
            object_id: 7,
            value: vec![0x41],
        })
        .await
        .unwrap();
        assert_eq!(stream.try_recv().map(|e| e.object_id), Some(7));

        drop(tx);
        assert_eq!(stream.recv().await, None);
        assert!(matches!(
            stream.recv_timeout(Duration::from_millis(50)).await,
            Ok(None)
        ));
    }
}
