//! Inbound frame decoder and stream assembler.
//!
//! Everything a GTT display sends on its own initiative or in reply to a
//! command starts with the inbound sentinel `0xFC`. This module splits the
//! raw serial byte stream into complete frames.
//!
//! # Frame formats
//!
//! ```text
//! 0xFC <id> <len BE u16> <len bytes>                       command response
//! 0xFC 0xEB <subtype LE u16> <object id BE u16> <value...>  property/object event
//! 0xFC 0x87 <object id>                                    touch report
//! ```
//!
//! Property events carry no length field on the firmware revisions seen in
//! the field, so by default their value runs to the end of whatever is
//! buffered. [`EventFraming::LengthPrefixed`] selects the alternative
//! `0xFC 0xEB <len BE u16> <len bytes>` layout.
//!
//! Input that does not start with the sentinel (legacy GLK replies, line
//! noise) is handed over whole as a single [`FrameKind::RawOpaque`] frame.

use bytes::{Buf, Bytes, BytesMut};

/// Leading byte of every frame sent by the display.
pub const RESPONSE_SENTINEL: u8 = 0xFC;

/// Second byte of a property/object event frame.
pub const PROPERTY_EVENT: u8 = 0xEB;

/// Second byte of a touch report frame.
pub const TOUCH_EVENT: u8 = 0x87;

/// Terminator of legacy (GLK and extended-command status) replies.
pub const LEGACY_TERMINATOR: u8 = 0xFE;

/// Bytes before the payload of a length-prefixed frame.
pub const HEADER_LEN: usize = 4;

/// Size of a touch report frame.
const TOUCH_FRAME_LEN: usize = 3;

/// Minimum size of an unframed property event (sentinel, type, subtype, object id).
const PROPERTY_HEADER_LEN: usize = 6;

/// What a decoded frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Reply to a command, correlated by its echoed command id.
    CommandResponse,
    /// Unsolicited property/object event (`0xFC 0xEB`).
    PropertyEvent,
    /// Unsolicited touch report (`0xFC 0x87`).
    TouchEvent,
    /// Bytes that do not start with the inbound sentinel.
    RawOpaque,
}

/// How property events are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFraming {
    /// No length field; the value runs to the end of the buffered input.
    ///
    /// Anything read together with the event is swallowed into its value,
    /// including a command response that happens to share the read. That
    /// response is lost and its request times out. Use
    /// [`LengthPrefixed`](Self::LengthPrefixed) when the firmware supports it.
    #[default]
    Unframed,
    /// A big-endian u16 length follows `0xFC 0xEB`.
    LengthPrefixed,
}

/// One complete frame as received from the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame classification.
    pub kind: FrameKind,
    /// Echoed command id; set for command responses only.
    pub command_id: Option<u8>,
    /// Object id for property events and touch reports.
    pub object_id: Option<u16>,
    /// Frame body without the envelope.
    ///
    /// For property events this is `<subtype LE u16> <object id BE u16> <value...>`.
    pub payload: Bytes,
    /// The exact wire bytes of the frame.
    pub raw: Bytes,
}

impl Frame {
    fn command_response(buf: &[u8], len: usize) -> Self {
        let raw = Bytes::copy_from_slice(&buf[..HEADER_LEN + len]);
        Frame {
            kind: FrameKind::CommandResponse,
            command_id: Some(buf[1]),
            object_id: None,
            payload: raw.slice(HEADER_LEN..),
            raw,
        }
    }

    fn property_event(raw: Bytes, body_start: usize) -> Self {
        let payload = raw.slice(body_start..);
        let object_id = (payload.len() >= 4).then(|| u16::from_be_bytes([payload[2], payload[3]]));
        Frame {
            kind: FrameKind::PropertyEvent,
            command_id: None,
            object_id,
            payload,
            raw,
        }
    }

    fn touch_event(buf: &[u8]) -> Self {
        Frame {
            kind: FrameKind::TouchEvent,
            command_id: None,
            object_id: Some(u16::from(buf[2])),
            payload: Bytes::new(),
            raw: Bytes::copy_from_slice(&buf[..TOUCH_FRAME_LEN]),
        }
    }

    fn raw_opaque(buf: &[u8]) -> Self {
        let raw = Bytes::copy_from_slice(buf);
        Frame {
            kind: FrameKind::RawOpaque,
            command_id: None,
            object_id: None,
            payload: raw.clone(),
            raw,
        }
    }

    /// `true` for property events and touch reports.
    pub fn is_event(&self) -> bool {
        matches!(self.kind, FrameKind::PropertyEvent | FrameKind::TouchEvent)
    }
}

/// Result of attempting to decode a frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete frame was decoded. The `usize` is the number of bytes
    /// consumed from the input buffer.
    Frame(Frame, usize),

    /// The buffer does not yet contain a complete frame. More data is needed.
    Incomplete,
}

/// Attempt to decode one frame from the start of `buf`.
///
/// Never skips bytes: a buffer whose first byte is not
/// [`RESPONSE_SENTINEL`] is returned whole as a [`FrameKind::RawOpaque`]
/// frame.
///
/// # Example
///
/// ```
/// use gttlib_display::frame::{decode_frame, DecodeResult, EventFraming, FrameKind};
///
/// let buf = [0xFC, 0x00, 0x00, 0x02, 0xAB, 0xCD];
/// match decode_frame(&buf, EventFraming::Unframed) {
///     DecodeResult::Frame(frame, consumed) => {
///         assert_eq!(frame.kind, FrameKind::CommandResponse);
///         assert_eq!(frame.command_id, Some(0x00));
///         assert_eq!(&frame.payload[..], &[0xAB, 0xCD]);
///         assert_eq!(consumed, 6);
///     }
///     DecodeResult::Incomplete => panic!("expected a frame"),
/// }
/// ```
pub fn decode_frame(buf: &[u8], framing: EventFraming) -> DecodeResult {
    let Some(&first) = buf.first() else {
        return DecodeResult::Incomplete;
    };
    if first != RESPONSE_SENTINEL {
        return DecodeResult::Frame(Frame::raw_opaque(buf), buf.len());
    }
    if buf.len() < 2 {
        return DecodeResult::Incomplete;
    }

    match (buf[1], framing) {
        (TOUCH_EVENT, _) => {
            if buf.len() < TOUCH_FRAME_LEN {
                return DecodeResult::Incomplete;
            }
            DecodeResult::Frame(Frame::touch_event(buf), TOUCH_FRAME_LEN)
        }
        (PROPERTY_EVENT, EventFraming::Unframed) => {
            if buf.len() < PROPERTY_HEADER_LEN {
                return DecodeResult::Incomplete;
            }
            let raw = Bytes::copy_from_slice(buf);
            DecodeResult::Frame(Frame::property_event(raw, 2), buf.len())
        }
        (PROPERTY_EVENT, EventFraming::LengthPrefixed) => match declared_len(buf) {
            Some(len) => {
                let raw = Bytes::copy_from_slice(&buf[..HEADER_LEN + len]);
                DecodeResult::Frame(Frame::property_event(raw, HEADER_LEN), HEADER_LEN + len)
            }
            None => DecodeResult::Incomplete,
        },
        _ => match declared_len(buf) {
            Some(len) => DecodeResult::Frame(Frame::command_response(buf, len), HEADER_LEN + len),
            None => DecodeResult::Incomplete,
        },
    }
}

/// The payload length of a length-prefixed frame, once all of it is buffered.
fn declared_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
    (buf.len() >= HEADER_LEN + len).then_some(len)
}

/// Position just past the first legacy terminator in `buf`, if present.
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.iter()
        .position(|&b| b == LEGACY_TERMINATOR)
        .map(|pos| pos + 1)
}

/// Incremental frame assembler.
///
/// Feed raw chunks with [`push`](Self::push) in arrival order and take
/// complete frames with [`next_frame`](Self::next_frame) or the lazy
/// [`frames`](Self::frames) iterator. A trailing partial frame stays
/// buffered until the rest of it arrives. Nothing here blocks.
///
/// # Example
///
/// ```
/// use gttlib_display::frame::{FrameAssembler, FrameKind};
///
/// let mut asm = FrameAssembler::new();
/// asm.push(&[0xFC, 0x00]);
/// assert!(asm.next_frame().is_none());
///
/// asm.push(&[0x00, 0x02, 0xAB, 0xCD]);
/// let frame = asm.next_frame().unwrap();
/// assert_eq!(frame.kind, FrameKind::CommandResponse);
/// assert_eq!(&frame.payload[..], &[0xAB, 0xCD]);
/// ```
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
    framing: EventFraming,
}

impl FrameAssembler {
    /// Create an assembler using the default (unframed) event layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler with an explicit property-event layout.
    pub fn with_framing(framing: EventFraming) -> Self {
        FrameAssembler {
            buf: BytesMut::new(),
            framing,
        }
    }

    /// Append a chunk of received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        match decode_frame(&self.buf, self.framing) {
            DecodeResult::Frame(frame, consumed) => {
                self.buf.advance(consumed);
                Some(frame)
            }
            DecodeResult::Incomplete => None,
        }
    }

    /// Lazily drain every complete frame currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { assembler: self }
    }

    /// Number of bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partially received frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Iterator returned by [`FrameAssembler::frames`].
pub struct Frames<'a> {
    assembler: &'a mut FrameAssembler,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.assembler.next_frame()
    }
}
