//! Display -- a shared connection to one GTT/GLK display.
//!
//! A [`Display`] owns one byte link and multiplexes it between any number
//! of concurrent callers. Outside of listening mode every exchange is a
//! direct write followed by bounded reads. In listening mode a background
//! reader owns the link (see [`crate::io`]); requests register a pending
//! slot, write through the reader, and wait for their response while
//! unsolicited events flow to the subscriber.
//!
//! All exchanges are serialized by one command lock held for the whole
//! round trip. Lifecycle transitions additionally hold a lifecycle lock and
//! also take the command lock, so an exchange never straddles a mode switch.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use gttlib_core::error::{Error, Result};
use gttlib_core::events::Event;
use gttlib_core::transport::Transport;
use gttlib_core::types::ConnectionState;
use gttlib_transport::SerialTransport;

use crate::builder::{DisplayConfig, SerialSettings};
use crate::commands::{CMD_ECHO, CMD_POLL_KEYPAD, CMD_VERSION, encode_command};
use crate::events::EventStream;
use crate::frame::{
    Frame, FrameAssembler, FrameKind, HEADER_LEN, RESPONSE_SENTINEL, find_terminator,
};
use crate::io::{
    IoConfig, LinkSlot, ListenerChannels, ListenerIo, READ_CHUNK, Shared, spawn_listener,
};

/// Upper bound on keys collected by one [`Display::poll_keys`] call.
pub const MAX_POLLED_KEYS: usize = 64;

/// A connection to a display.
///
/// `Display` is `Send + Sync`; share it behind an `Arc` and call its
/// methods from as many tasks as needed.
pub struct Display {
    config: DisplayConfig,
    serial: Option<SerialSettings>,
    state: Arc<watch::Sender<ConnectionState>>,
    link: LinkSlot,
    command_lock: Mutex<()>,
    lifecycle: Mutex<()>,
    listener: StdMutex<Option<ListenerIo>>,
    events: StdMutex<Option<mpsc::Receiver<Event>>>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Display {
    pub(crate) fn new(
        config: DisplayConfig,
        serial: Option<SerialSettings>,
        transport: Option<Box<dyn Transport>>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Display {
            config,
            serial,
            state: Arc::new(state),
            link: Arc::new(Mutex::new(transport)),
            command_lock: Mutex::new(()),
            lifecycle: Mutex::new(()),
            listener: StdMutex::new(None),
            events: StdMutex::new(None),
        }
    }

    /// The engine tunables this display was built with.
    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions, including the background reader
    /// giving up after repeated read failures.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the link. A no-op when already open.
    ///
    /// Fails with [`Error::LinkUnavailable`] when no usable link is bound
    /// and no serial port is configured, or the port cannot be opened.
    pub async fn open(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state().is_open() {
            return Ok(());
        }
        let _cmd = self.command_lock.lock().await;

        let mut link = self.link.lock().await;
        let usable = link.as_ref().is_some_and(|t| t.is_connected());
        if !usable {
            let serial = self.serial.as_ref().ok_or(Error::LinkUnavailable)?;
            let transport = SerialTransport::open_with_config(&serial.port, serial.line)
                .await
                .map_err(|e| {
                    warn!(port = %serial.port, error = %e, "cannot open display link");
                    Error::LinkUnavailable
                })?;
            *link = Some(Box::new(transport));
        }

        self.state.send_replace(ConnectionState::Open);
        info!("display opened");
        Ok(())
    }

    /// Close the link, stopping the background reader first if needed.
    /// A no-op when already closed.
    pub async fn close(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let _cmd = self.command_lock.lock().await;
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.stop_worker().await;

        let mut link = self.link.lock().await;
        if let Some(transport) = link.as_mut() {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "error closing display link (continuing anyway)");
            }
        }
        if self.serial.is_some() {
            // Reopened from the serial settings on the next open().
            *link = None;
        }

        self.state.send_replace(ConnectionState::Closed);
        info!("display closed");
        Ok(())
    }

    /// Start the background reader and switch to `Listening`.
    ///
    /// Requires the `Open` state; `Closed` and `Listening` are rejected
    /// with [`Error::State`].
    pub async fn listen(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let _cmd = self.command_lock.lock().await;
        match self.state() {
            ConnectionState::Open => {}
            state => return Err(Error::state(format!("cannot listen while {state}"))),
        }
        // Reap a reader that gave up on its own.
        let stale = lock(&self.listener).take();
        if let Some(stale) = stale {
            stale.stop(self.config.stop_grace).await;
        }

        let transport = self.link.lock().await.take().ok_or(Error::LinkUnavailable)?;

        let (event_tx, event_rx) = mpsc::channel(self.config.event_queue_depth);
        let io_config = IoConfig {
            read_timeout: self.config.read_timeout,
            max_read_errors: self.config.max_read_errors,
            count_idle_timeouts: self.config.count_idle_timeouts,
            delivery_timeout: self.config.delivery_timeout,
            framing: self.config.event_framing,
        };
        let shared = Shared {
            link: self.link.clone(),
            state: self.state.clone(),
        };

        *lock(&self.events) = Some(event_rx);
        self.state.send_replace(ConnectionState::Listening);
        let io = spawn_listener(transport, io_config, shared, event_tx);
        *lock(&self.listener) = Some(io);

        info!("display listening");
        Ok(())
    }

    /// Stop the background reader and return to `Open`.
    ///
    /// Idempotent and safe from any state. Waits up to the configured
    /// grace period; a reader that does not stop in time is aborted and
    /// its link dropped, leaving the display `Closed`.
    pub async fn stop_listen(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let _cmd = self.command_lock.lock().await;
        self.stop_worker().await;
    }

    async fn stop_worker(&self) {
        let Some(io) = lock(&self.listener).take() else {
            return;
        };
        lock(&self.events).take();
        if !io.stop(self.config.stop_grace).await {
            self.state.send_replace(ConnectionState::Closed);
        }
    }

    /// Take the event stream of the current listening session.
    ///
    /// Only one subscription exists per session: a second call, or a call
    /// while not listening, fails with [`Error::State`].
    pub fn subscribe(&self) -> Result<EventStream> {
        if !self.state().is_listening() {
            return Err(Error::state("subscribe requires a listening display"));
        }
        lock(&self.events)
            .take()
            .map(EventStream::new)
            .ok_or_else(|| Error::state("events already subscribed for this session"))
    }

    // -----------------------------------------------------------------------
    // Exchanges
    // -----------------------------------------------------------------------

    /// Write raw bytes without waiting for a reply.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(Error::WriteFailed("nothing to write".into()));
        }
        let _cmd = self.command_lock.lock().await;
        match self.state() {
            ConnectionState::Closed => Err(Error::LinkClosed),
            ConnectionState::Listening => self.listener_channels()?.write(bytes.to_vec()).await,
            ConnectionState::Open => {
                let mut link = self.link.lock().await;
                let transport = link.as_mut().ok_or(Error::LinkUnavailable)?;
                transport.send(bytes).await
            }
        }
    }

    /// Send command `command_id` and wait for its response payload.
    ///
    /// Fails with [`Error::Timeout`] when no matching response arrives
    /// within `timeout`, and with [`Error::Protocol`] when the reply is
    /// malformed or answers another command.
    pub async fn request(
        &self,
        command_id: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let bytes = encode_command(command_id, payload);
        let _cmd = self.command_lock.lock().await;
        let deadline = Instant::now() + timeout;

        let frame = match self.state() {
            ConnectionState::Closed => return Err(Error::LinkClosed),
            ConnectionState::Open => self.direct_frame(&bytes, deadline).await?,
            ConnectionState::Listening => {
                self.routed_frame(Some(command_id), bytes, deadline).await?
            }
        };
        validate_response(&frame, command_id)
    }

    /// Write `bytes` and return the raw reply without id correlation.
    ///
    /// Outside listening mode the reply is read up to and including the
    /// legacy terminator `0xFE`; whatever arrived is returned if the
    /// deadline passes first. While listening, the next command response
    /// frame is returned whole.
    pub async fn exchange(&self, bytes: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        if bytes.is_empty() {
            return Err(Error::WriteFailed("nothing to write".into()));
        }
        let _cmd = self.command_lock.lock().await;
        let deadline = Instant::now() + timeout;

        match self.state() {
            ConnectionState::Closed => Err(Error::LinkClosed),
            ConnectionState::Open => self.direct_until_terminator(bytes, deadline).await,
            ConnectionState::Listening => {
                let frame = self.routed_frame(None, bytes.to_vec(), deadline).await?;
                Ok(frame.raw.to_vec())
            }
        }
    }

    /// Ask the display to echo `data` back.
    pub async fn echo(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.request(CMD_ECHO, data, self.config.request_timeout).await
    }

    /// Read the firmware version.
    pub async fn version(&self) -> Result<Vec<u8>> {
        self.request(CMD_VERSION, &[], self.config.request_timeout).await
    }

    /// Drain the keypad buffer of a GLK display.
    ///
    /// Polls one key at a time while the display reports more keys queued,
    /// up to [`MAX_POLLED_KEYS`]. Returns key codes with the "more" bit
    /// stripped; an empty buffer yields an empty list. Not available while
    /// listening.
    pub async fn poll_keys(&self) -> Result<Vec<u8>> {
        let _cmd = self.command_lock.lock().await;
        match self.state() {
            ConnectionState::Closed => return Err(Error::LinkClosed),
            ConnectionState::Listening => {
                return Err(Error::state("keypad polling is not available while listening"));
            }
            ConnectionState::Open => {}
        }

        let mut link = self.link.lock().await;
        let transport = link.as_mut().ok_or(Error::LinkUnavailable)?;
        let poll = encode_command(CMD_POLL_KEYPAD, &[]);

        let mut keys = Vec::new();
        while keys.len() < MAX_POLLED_KEYS {
            transport.send(&poll).await?;
            let deadline = Instant::now() + self.config.request_timeout;
            let code = match read_byte(&mut **transport, deadline, self.config.read_timeout).await {
                Ok(code) => code,
                Err(Error::Timeout) => {
                    debug!(polled = keys.len(), "no keypad reply");
                    break;
                }
                Err(e) => return Err(e),
            };
            if code == 0x00 {
                break;
            }
            keys.push(code & 0x7F);
            if code & 0x80 == 0 {
                break;
            }
        }
        Ok(keys)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn listener_channels(&self) -> Result<ListenerChannels> {
        lock(&self.listener)
            .as_ref()
            .map(ListenerIo::channels)
            .ok_or_else(|| Error::state("not listening"))
    }

    /// Write through the background reader and wait for the routed reply.
    async fn routed_frame(
        &self,
        command_id: Option<u8>,
        bytes: Vec<u8>,
        deadline: Instant,
    ) -> Result<Frame> {
        let channels = self.listener_channels()?;
        let (_pending, mut mailbox) = channels.register(command_id, deadline);
        channels.write(bytes).await?;

        match tokio::time::timeout_at(deadline, mailbox.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(Error::state("listener stopped while waiting for a response")),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Write, then read until one frame is assembled.
    async fn direct_frame(&self, bytes: &[u8], deadline: Instant) -> Result<Frame> {
        let mut link = self.link.lock().await;
        let transport = link.as_mut().ok_or(Error::LinkUnavailable)?;
        transport.send(bytes).await?;

        let mut assembler = FrameAssembler::with_framing(self.config.event_framing);
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = read_chunk(&mut **transport, &mut buf, deadline, self.config.read_timeout).await?;
            assembler.push(&buf[..n]);
            if let Some(frame) = assembler.next_frame() {
                let extra = assembler.frames().count();
                if extra > 0 || assembler.buffered() > 0 {
                    debug!(extra, partial = assembler.buffered(), "dropping bytes after direct reply");
                }
                return Ok(frame);
            }
        }
    }

    /// Write, then read until the legacy terminator.
    async fn direct_until_terminator(&self, bytes: &[u8], deadline: Instant) -> Result<Vec<u8>> {
        let mut link = self.link.lock().await;
        let transport = link.as_mut().ok_or(Error::LinkUnavailable)?;
        transport.send(bytes).await?;

        let mut reply = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match read_chunk(&mut **transport, &mut buf, deadline, self.config.read_timeout).await {
                Ok(n) => {
                    reply.extend_from_slice(&buf[..n]);
                    if let Some(end) = find_terminator(&reply) {
                        reply.truncate(end);
                        return Ok(reply);
                    }
                }
                Err(Error::Timeout) if !reply.is_empty() => {
                    debug!(len = reply.len(), "no terminator before deadline, returning partial reply");
                    return Ok(reply);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// One read bounded by both the link read timeout and `deadline`.
///
/// Link timeouts and empty reads before the deadline are retried;
/// [`Error::Timeout`] is returned only once the deadline has passed.
async fn read_chunk(
    transport: &mut dyn Transport,
    buf: &mut [u8],
    deadline: Instant,
    read_timeout: Duration,
) -> Result<usize> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::Timeout);
        }
        let slice = remaining.min(read_timeout);
        match transport.receive(buf, slice).await {
            Err(Error::Timeout) => continue,
            // A port at EOF answers at once; wait out the slice instead of spinning.
            Ok(0) => tokio::time::sleep(slice).await,
            result => return result,
        }
    }
}

/// Read a single byte before `deadline`.
async fn read_byte(
    transport: &mut dyn Transport,
    deadline: Instant,
    read_timeout: Duration,
) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_chunk(transport, &mut buf, deadline, read_timeout).await?;
    Ok(buf[0])
}

/// Check a reply frame against the request it answers and strip the envelope.
fn validate_response(frame: &Frame, command_id: u8) -> Result<Vec<u8>> {
    let raw = &frame.raw[..];
    if frame.kind != FrameKind::CommandResponse {
        return Err(Error::protocol(
            format!("expected a command response, got {:?}", frame.kind),
            raw,
        ));
    }
    if raw.len() < HEADER_LEN {
        return Err(Error::protocol("response too short", raw));
    }
    if raw[0] != RESPONSE_SENTINEL {
        return Err(Error::protocol("response does not start with 0xFC", raw));
    }
    if frame.command_id != Some(command_id) {
        return Err(Error::protocol(
            format!("response echoes command 0x{:02X}, expected 0x{command_id:02X}", raw[1]),
            raw,
        ));
    }
    Ok(frame.payload.to_vec())
}
