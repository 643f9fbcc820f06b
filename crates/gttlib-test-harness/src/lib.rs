//! gttlib-test-harness: Test utilities and mock byte links for gttlib.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of
//! the display protocol engine without real display hardware.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport, echo_responder};
