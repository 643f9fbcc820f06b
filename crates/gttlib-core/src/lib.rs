//! gttlib-core: Core traits, types, and error definitions for gttlib.
//!
//! This crate defines the device-agnostic abstractions shared by the
//! display protocol engine, the serial link, and the test harness.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication link
//! - [`ConnectionState`] -- lifecycle state of a display connection
//! - [`Event`] -- asynchronous display notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

// Re-export key types at crate root for ergonomic `use gttlib_core::*`.
pub use error::{Error, Result};
pub use events::{Event, EventKind};
pub use transport::Transport;
pub use types::ConnectionState;
