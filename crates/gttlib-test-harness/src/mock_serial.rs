//! Mock byte link for deterministic testing of the display protocol engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs, an optional auto-responder, injected unsolicited
//! bytes, and injected read failures. All state sits behind a shared
//! [`MockHandle`], so a test can keep inspecting and feeding the link after
//! the transport itself has been moved into a connection's background reader.
//!
//! # Example
//!
//! ```
//! use gttlib_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! // When the engine sends "version", answer with a 2-byte payload.
//! mock.expect(&[0xFE, 0x00], &[0xFC, 0x00, 0x00, 0x02, 0x01, 0x07]);
//! let handle = mock.handle();
//! // Later: an unsolicited touch report arrives.
//! handle.inject(&[0xFC, 0x87, 0x03]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use gttlib_core::error::{Error, Result};
use gttlib_core::transport::Transport;

/// Computes a reply for bytes written to the link, or `None` for silence.
type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// A pre-loaded request/response pair.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes that become readable once the request is seen.
    response: Vec<u8>,
}

/// One queued outcome for a future `receive()` call.
#[derive(Debug, Clone)]
enum Inbound {
    /// A chunk of bytes; an empty chunk is an empty read.
    Data(Vec<u8>),
    /// A read failure.
    Fail,
}

#[derive(Default)]
struct MockState {
    expectations: VecDeque<Expectation>,
    inbound: VecDeque<Inbound>,
    responder: Option<Responder>,
    connected: bool,
    fail_next_send: bool,
    at_eof: bool,
    sent_log: Vec<Vec<u8>>,
    close_count: usize,
    receive_count: usize,
}

/// Shared control surface of a [`MockTransport`].
///
/// Cloning is cheap; every clone observes and drives the same link.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    readable: Arc<Notify>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the log from other assertions.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an expected request/response pair.
    ///
    /// Expectations are consumed in order. When `send()` is called with data
    /// matching `request`, `response` becomes readable as one chunk (nothing
    /// is queued for an empty response).
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Answer writes that have no pending expectation with `responder`.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Queue bytes the display sends on its own (events, stray frames).
    ///
    /// Each call is delivered by a separate `receive()`, so chunk boundaries
    /// are preserved exactly as injected.
    pub fn inject(&self, bytes: &[u8]) {
        self.lock().inbound.push_back(Inbound::Data(bytes.to_vec()));
        self.readable.notify_one();
    }

    /// Queue one empty read (`Ok(0)`).
    pub fn inject_empty_read(&self) {
        self.inject(&[]);
    }

    /// Queue `count` consecutive read failures.
    pub fn fail_reads(&self, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.inbound.push_back(Inbound::Fail);
        }
        drop(state);
        self.readable.notify_one();
    }

    /// Make the next `send()` fail with [`Error::WriteFailed`].
    pub fn fail_next_send(&self) {
        self.lock().fail_next_send = true;
    }

    /// All data that has been sent through the link, one entry per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    /// Number of queued inbound chunks/failures not yet read.
    pub fn pending_inbound(&self) -> usize {
        self.lock().inbound.len()
    }

    /// Make every read with nothing queued return `Ok(0)` at once, the way
    /// a serial port reports end of file after its device went away.
    pub fn set_eof(&self, at_eof: bool) {
        self.lock().at_eof = at_eof;
        self.readable.notify_one();
    }

    /// How many times `receive()` has been called.
    pub fn receive_count(&self) -> usize {
        self.lock().receive_count
    }

    /// How many times `close()` has been called.
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }

    /// Set the connected state of the link.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls
    /// return [`Error::LinkClosed`].
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
        self.readable.notify_one();
    }

    /// Whether the link is currently connected.
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

/// A mock [`Transport`] for testing the protocol engine without hardware.
///
/// `receive()` honours its timeout: with nothing queued it waits until
/// either bytes are injected or the timeout elapses, then returns
/// [`Error::Timeout`]. Tests that exercise timing run on a paused Tokio
/// clock so these waits cost nothing.
pub struct MockTransport {
    handle: MockHandle,
}

impl MockTransport {
    /// Create a new mock link in the connected state.
    pub fn new() -> Self {
        let state = MockState {
            connected: true,
            ..Default::default()
        };
        MockTransport {
            handle: MockHandle {
                state: Arc::new(Mutex::new(state)),
                readable: Arc::new(Notify::new()),
            },
        }
    }

    /// Create a mock that answers every write with `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let mock = Self::new();
        mock.set_responder(responder);
        mock
    }

    /// A shared handle for driving the link after it has been moved.
    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for MockTransport {
    type Target = MockHandle;

    fn deref(&self) -> &MockHandle {
        &self.handle
    }
}

/// Auto-responder that echoes simple commands the way a GTT display does.
///
/// `0xFE <id> <payload…>` is answered with `0xFC <id> <len BE> <payload…>`.
/// Anything else gets no reply.
pub fn echo_responder(written: &[u8]) -> Option<Vec<u8>> {
    match written {
        [0xFE, id, payload @ ..] => {
            let len = u16::try_from(payload.len()).ok()?;
            let mut reply = vec![0xFC, *id];
            reply.extend_from_slice(&len.to_be_bytes());
            reply.extend_from_slice(payload);
            Some(reply)
        }
        _ => None,
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.handle.lock();
        if !state.connected {
            return Err(Error::LinkClosed);
        }
        if std::mem::take(&mut state.fail_next_send) {
            return Err(Error::WriteFailed("injected write failure".into()));
        }

        state.sent_log.push(data.to_vec());

        let reply = if let Some(expectation) = state.expectations.pop_front() {
            if data != expectation.request.as_slice() {
                return Err(Error::protocol(
                    format!(
                        "unexpected send data: expected {:02X?}, got {:02X?}",
                        expectation.request, data
                    ),
                    data,
                ));
            }
            Some(expectation.response).filter(|r| !r.is_empty())
        } else if let Some(responder) = state.responder.as_ref() {
            responder(data)
        } else {
            return Err(Error::protocol("no more expectations in mock transport", data));
        };

        if let Some(reply) = reply {
            state.inbound.push_back(Inbound::Data(reply));
            drop(state);
            self.handle.readable.notify_one();
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        self.handle.lock().receive_count += 1;

        loop {
            {
                let mut guard = self.handle.lock();
                let state = &mut *guard;
                if !state.connected {
                    return Err(Error::LinkClosed);
                }
                match state.inbound.front_mut() {
                    Some(Inbound::Data(chunk)) => {
                        let n = chunk.len().min(buf.len());
                        buf[..n].copy_from_slice(&chunk[..n]);
                        chunk.drain(..n);
                        if chunk.is_empty() {
                            state.inbound.pop_front();
                        }
                        return Ok(n);
                    }
                    Some(Inbound::Fail) => {
                        state.inbound.pop_front();
                        return Err(Error::Io(std::io::Error::other("injected read failure")));
                    }
                    None if state.at_eof => return Ok(0),
                    None => {}
                }
            }

            if tokio::time::timeout_at(deadline, self.handle.readable.notified())
                .await
                .is_err()
            {
                return Err(Error::Timeout);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.handle.lock();
        state.connected = false;
        state.close_count += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }
}
