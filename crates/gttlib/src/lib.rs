//! # gttlib -- Async protocol engine for Matrix Orbital displays
//!
//! `gttlib` is an asynchronous Rust library for driving Matrix Orbital GTT
//! touch displays (and the older GLK keypad modules) over a serial line.
//! It turns the raw byte stream into correlated request/response exchanges
//! and a feed of touch, key, and property events, with one link shared by
//! any number of concurrent callers.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gttlib::DisplayBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let display = DisplayBuilder::new()
//!         .serial_port("/dev/ttyACM0")
//!         .baud_rate(115_200)
//!         .build()?;
//!     display.open().await?;
//!
//!     let version = display.version().await?;
//!     println!("firmware: {:02X?}", version);
//!
//!     display.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                 | Purpose                                            |
//! |-----------------------|----------------------------------------------------|
//! | `gttlib-core`         | [`Transport`] trait, [`Event`]s, [`ConnectionState`], errors |
//! | `gttlib-transport`    | Serial byte link                                   |
//! | `gttlib-display`      | Frame assembler, correlator, event demultiplexer   |
//! | **`gttlib`**          | This facade crate -- re-exports everything         |
//!
//! ## Events
//!
//! Put the display into listening mode to receive unsolicited events:
//!
//! ```no_run
//! # async fn example(display: &gttlib::Display) -> gttlib::Result<()> {
//! display.listen().await?;
//! let mut events = display.subscribe()?;
//! while let Some(event) = events.recv().await {
//!     println!("{} on object {}: {:02X?}", event.kind, event.object_id, event.value);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Requests keep working while listening; their responses are routed back
//! to the caller while events go to the subscriber.

pub use gttlib_core::*;

pub use gttlib_display::{
    Display, DisplayBuilder, DisplayConfig, EventFraming, EventStream, Frame, FrameAssembler,
    FrameKind,
};

/// Wire-level building blocks: frame decoding and command encoding.
pub mod protocol {
    pub use gttlib_display::commands;
    pub use gttlib_display::frame;
}

/// Serial byte link.
pub mod serial {
    pub use gttlib_transport::*;
}
