//! Protocol engine for Matrix Orbital GTT and GLK displays.
//!
//! This crate turns the raw, error-prone serial byte stream of a display
//! into discrete request/response exchanges and an asynchronous event feed,
//! while a single physical link is shared by many logical operations. It
//! provides:
//!
//! - **Frame assembler** ([`frame`]) -- split inbound bytes into command
//!   responses, property events, and touch reports, buffering partial
//!   frames across reads.
//! - **Command encoding** ([`commands`]) -- simple `0xFE <id>` and extended
//!   `0xFE 0xFA` object commands.
//! - **Event demultiplexer** ([`events`]) -- decode unsolicited frames into
//!   [`Event`](gttlib_core::Event)s and deliver them through an
//!   [`EventStream`].
//! - **Display** ([`display`]) -- the connection itself: open/close,
//!   fire-and-forget `send`, correlated `request`, and the
//!   `listen`/`subscribe`/`stop_listen` lifecycle.
//! - **DisplayBuilder** ([`builder`]) -- fluent construction with serial
//!   settings and engine tunables.
//!
//! # Example
//!
//! ```
//! use gttlib_display::frame::{FrameAssembler, FrameKind};
//! use gttlib_display::commands::{encode_command, CMD_VERSION};
//!
//! // Ask for the firmware version.
//! assert_eq!(encode_command(CMD_VERSION, &[]), vec![0xFE, 0x00]);
//!
//! // The reply may arrive in pieces.
//! let mut asm = FrameAssembler::new();
//! asm.push(&[0xFC, 0x00]);
//! asm.push(&[0x00, 0x02, 0x01, 0x07]);
//! let frame = asm.next_frame().unwrap();
//! assert_eq!(frame.kind, FrameKind::CommandResponse);
//! assert_eq!(&frame.payload[..], &[0x01, 0x07]);
//! ```

pub mod builder;
pub mod commands;
pub mod display;
pub mod events;
pub mod frame;
mod io;

pub use builder::{DisplayBuilder, DisplayConfig};
pub use display::Display;
pub use events::EventStream;
pub use frame::{EventFraming, Frame, FrameAssembler, FrameKind};
