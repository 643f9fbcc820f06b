//! Background reader for a listening display connection.
//!
//! While a [`Display`](crate::Display) is listening, one spawned task owns
//! the byte link. It performs writes queued by callers, reads the link in
//! bounded slices, assembles frames, and routes each one: command
//! responses to the pending request's mailbox, events to the subscriber
//! queue. When it exits, for whatever reason, it hands the link back to
//! the connection and reverts the state to `Open`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use gttlib_core::error::{Error, Result};
use gttlib_core::events::Event;
use gttlib_core::transport::Transport;
use gttlib_core::types::ConnectionState;

use crate::events::{decode_event, publish};
use crate::frame::{Frame, FrameAssembler, FrameKind, EventFraming};

/// Size of a single link read.
pub(crate) const READ_CHUNK: usize = 256;

/// Depth of the caller-to-worker write queue.
const WRITE_QUEUE_DEPTH: usize = 8;

/// The link slot shared between the connection and its worker.
pub(crate) type LinkSlot = Arc<tokio::sync::Mutex<Option<Box<dyn Transport>>>>;

/// The pending-request slot shared between the correlator and the worker.
pub(crate) type PendingSlot = Arc<Mutex<Option<Pending>>>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the background reader.
#[derive(Debug, Clone)]
pub(crate) struct IoConfig {
    /// Bound on a single link read.
    pub read_timeout: Duration,
    /// Consecutive failed reads after which the reader gives up.
    pub max_read_errors: u32,
    /// Whether a read that times out on an idle link counts as failed.
    pub count_idle_timeouts: bool,
    /// How long to wait for room in the mailbox or event queue.
    pub delivery_timeout: Duration,
    /// Property-event layout on the wire.
    pub framing: EventFraming,
}

/// A write queued for the worker to perform on the link.
pub(crate) struct WriteRequest {
    pub bytes: Vec<u8>,
    pub reply: oneshot::Sender<Result<()>>,
}

/// The one request currently waiting for a response.
pub(crate) struct Pending {
    /// Command id to match; `None` accepts any response.
    pub command_id: Option<u8>,
    /// Single-slot mailbox the matching frame is delivered to.
    pub slot: mpsc::Sender<Frame>,
    /// Responses arriving after this instant are not delivered.
    pub deadline: Instant,
}

impl Pending {
    fn matches(&self, frame: &Frame) -> bool {
        self.command_id.is_none() || self.command_id == frame.command_id
    }
}

/// Clears the pending slot when the waiting request finishes, however it
/// finishes.
pub(crate) struct PendingGuard {
    pending: PendingSlot,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock_pending(&self.pending).take();
    }
}

fn lock_pending(pending: &PendingSlot) -> MutexGuard<'_, Option<Pending>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// State the worker hands back to the connection when it exits.
pub(crate) struct Shared {
    pub link: LinkSlot,
    pub state: Arc<watch::Sender<ConnectionState>>,
}

/// Handle to the background reader. Stored inside `Display` while listening.
pub(crate) struct ListenerIo {
    /// Write queue into the worker.
    pub write_tx: mpsc::Sender<WriteRequest>,
    /// Pending-request slot read by the worker.
    pub pending: PendingSlot,
    /// Cooperative cancellation.
    pub cancel: CancellationToken,
    /// Join handle for the worker task.
    pub task: JoinHandle<()>,
}

impl ListenerIo {
    /// Cloneable parts a request needs while the worker runs.
    pub fn channels(&self) -> ListenerChannels {
        ListenerChannels {
            write_tx: self.write_tx.clone(),
            pending: self.pending.clone(),
        }
    }

    /// Cancel the worker and wait up to `grace` for it to exit.
    ///
    /// Returns `false` if the worker had to be aborted; the link it owned
    /// is lost in that case.
    pub async fn stop(self, grace: Duration) -> bool {
        self.cancel.cancel();
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "background reader did not stop in time, aborting"
                );
                task.abort();
                false
            }
        }
    }
}

/// Caller-side view of a running worker.
pub(crate) struct ListenerChannels {
    write_tx: mpsc::Sender<WriteRequest>,
    pending: PendingSlot,
}

impl ListenerChannels {
    /// Register the pending request and return the mailbox receiver.
    ///
    /// The registration lasts until the returned guard is dropped.
    pub fn register(
        &self,
        command_id: Option<u8>,
        deadline: Instant,
    ) -> (PendingGuard, mpsc::Receiver<Frame>) {
        let (slot, mailbox) = mpsc::channel(1);
        *lock_pending(&self.pending) = Some(Pending {
            command_id,
            slot,
            deadline,
        });
        (
            PendingGuard {
                pending: self.pending.clone(),
            },
            mailbox,
        )
    }

    /// Have the worker write `bytes` to the link.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.write_tx
            .send(WriteRequest { bytes, reply })
            .await
            .map_err(|_| Error::state("listener stopped"))?;
        done.await.map_err(|_| Error::state("listener stopped"))?
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the background reader. It owns `transport` until it exits.
pub(crate) fn spawn_listener(
    transport: Box<dyn Transport>,
    config: IoConfig,
    shared: Shared,
    event_tx: mpsc::Sender<Event>,
) -> ListenerIo {
    let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
    let pending: PendingSlot = Arc::new(Mutex::new(None));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(io_loop(
        transport,
        config,
        shared,
        pending.clone(),
        event_tx,
        write_rx,
        cancel.clone(),
    ));

    ListenerIo {
        write_tx,
        pending,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// The worker loop. Runs as a spawned Tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Queued writes
/// 3. One bounded read
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    shared: Shared,
    pending: PendingSlot,
    event_tx: mpsc::Sender<Event>,
    mut write_rx: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
) {
    let mut assembler = FrameAssembler::with_framing(config.framing);
    let mut buf = [0u8; READ_CHUNK];
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("background reader cancelled");
                break;
            }

            request = write_rx.recv() => {
                match request {
                    Some(WriteRequest { bytes, reply }) => {
                        trace!(len = bytes.len(), data = ?bytes, "writing queued command");
                        let _ = reply.send(transport.send(&bytes).await);
                    }
                    None => {
                        debug!("write queue closed, exiting background reader");
                        break;
                    }
                }
            }

            result = transport.receive(&mut buf, config.read_timeout) => {
                match result {
                    Ok(n) if n > 0 => {
                        failures = 0;
                        assembler.push(&buf[..n]);
                        while let Some(frame) = assembler.next_frame() {
                            route_frame(frame, &pending, &event_tx, config.delivery_timeout).await;
                        }
                    }
                    Ok(_) => {
                        failures += 1;
                        debug!(failures, "empty read");
                    }
                    Err(Error::Timeout) => {
                        if config.count_idle_timeouts {
                            failures += 1;
                        }
                        if assembler.buffered() > 0 {
                            debug!(len = assembler.buffered(), "discarding partial frame after idle gap");
                            assembler.clear();
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        debug!(failures, error = %e, "read failed");
                    }
                }

                if failures >= config.max_read_errors {
                    warn!(
                        failures,
                        "too many consecutive read failures, stopping background reader"
                    );
                    break;
                }
            }
        }
    }

    // Release whoever is waiting, end the event stream, return the link.
    lock_pending(&pending).take();
    drop(event_tx);
    *shared.link.lock().await = Some(transport);
    shared.state.send_if_modified(|state| {
        if *state == ConnectionState::Listening {
            *state = ConnectionState::Open;
            true
        } else {
            false
        }
    });
    info!("background reader stopped");
}

// ---------------------------------------------------------------------------
// Frame routing
// ---------------------------------------------------------------------------

/// Deliver one assembled frame to its consumer.
async fn route_frame(
    frame: Frame,
    pending: &PendingSlot,
    event_tx: &mpsc::Sender<Event>,
    delivery_timeout: Duration,
) {
    match frame.kind {
        FrameKind::CommandResponse => {
            let slot = {
                let guard = lock_pending(pending);
                match guard.as_ref() {
                    Some(p) if p.deadline <= Instant::now() => {
                        debug!(command_id = ?frame.command_id, "response arrived after deadline, dropping");
                        None
                    }
                    Some(p) if p.matches(&frame) => Some(p.slot.clone()),
                    Some(p) => {
                        debug!(
                            got = ?frame.command_id,
                            expected = ?p.command_id,
                            "discarding response for another command"
                        );
                        None
                    }
                    None => {
                        debug!(command_id = ?frame.command_id, "unsolicited response, dropping");
                        None
                    }
                }
            };
            if let Some(slot) = slot {
                if slot.send_timeout(frame, delivery_timeout).await.is_err() {
                    debug!("pending request gone before delivery");
                }
            }
        }
        FrameKind::PropertyEvent | FrameKind::TouchEvent => {
            if let Some(event) = decode_event(&frame) {
                trace!(kind = %event.kind, object_id = event.object_id, "publishing event");
                publish(event_tx, event, delivery_timeout).await;
            }
        }
        FrameKind::RawOpaque => {
            debug!(raw = ?&frame.raw[..], "dropping unframed bytes");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use gttlib_core::events::EventKind;
    use gttlib_test_harness::{MockTransport, echo_responder};

    fn test_config() -> IoConfig {
        IoConfig {
            read_timeout: Duration::from_millis(100),
            max_read_errors: 5,
            count_idle_timeouts: true,
            delivery_timeout: Duration::from_millis(600),
            framing: EventFraming::Unframed,
        }
    }

    fn test_shared() -> (Shared, LinkSlot, watch::Receiver<ConnectionState>) {
        let link: LinkSlot = Arc::new(tokio::sync::Mutex::new(None));
        let (state, state_rx) = watch::channel(ConnectionState::Listening);
        (
            Shared {
                link: link.clone(),
                state: Arc::new(state),
            },
            link,
            state_rx,
        )
    }

    #[test]
    fn pending_matching() {
        let (slot, _mailbox) = mpsc::channel(1);
        let frame = Frame {
            kind: FrameKind::CommandResponse,
            command_id: Some(0x10),
            object_id: None,
            payload: bytes::Bytes::new(),
            raw: bytes::Bytes::from_static(&[0xFC, 0x10, 0x00, 0x00]),
        };

        let any = Pending {
            command_id: None,
            slot: slot.clone(),
            deadline: Instant::now(),
        };
        assert!(any.matches(&frame));

        let other = Pending {
            command_id: Some(0x11),
            slot,
            deadline: Instant::now(),
        };
        assert!(!other.matches(&frame));
    }

    #[tokio::test]
    async fn pending_guard_clears_slot() {
        let channels = ListenerChannels {
            write_tx: mpsc::channel(1).0,
            pending: Arc::new(Mutex::new(None)),
        };
        let (guard, _mailbox) =
            channels.register(Some(0x00), Instant::now() + Duration::from_secs(1));
        assert!(lock_pending(&channels.pending).is_some());
        drop(guard);
        assert!(lock_pending(&channels.pending).is_none());
    }

    #[tokio::test]
    async fn write_after_worker_exit_is_state_error() {
        let (write_tx, write_rx) = mpsc::channel(1);
        drop(write_rx);
        let channels = ListenerChannels {
            write_tx,
            pending: Arc::new(Mutex::new(None)),
        };
        let result = channels.write(vec![0xFE, 0x00]).await;
        assert!(matches!(result, Err(Error::State(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn worker_delivers_matching_response() {
        let mock = MockTransport::with_responder(echo_responder);
        let (shared, _link, _state) = test_shared();
        let (event_tx, _event_rx) = mpsc::channel(4);
        let io = spawn_listener(Box::new(mock), test_config(), shared, event_tx);

        let channels = io.channels();
        let (_guard, mut mailbox) =
            channels.register(Some(0xFF), Instant::now() + Duration::from_secs(1));
        channels.write(vec![0xFE, 0xFF, 0x42]).await.unwrap();

        let frame = mailbox.recv().await.unwrap();
        assert_eq!(frame.command_id, Some(0xFF));
        assert_eq!(&frame.payload[..], &[0x42]);

        assert!(io.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_discards_mismatched_response() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let (shared, _link, _state) = test_shared();
        let (event_tx, _event_rx) = mpsc::channel(4);
        let io = spawn_listener(Box::new(mock), test_config(), shared, event_tx);

        let channels = io.channels();
        let (_guard, mut mailbox) =
            channels.register(Some(0x00), Instant::now() + Duration::from_secs(1));
        handle.inject(&[0xFC, 0x58, 0x00, 0x00]);
        handle.inject(&[0xFC, 0x00, 0x00, 0x01, 0x07]);

        let frame = mailbox.recv().await.unwrap();
        assert_eq!(frame.command_id, Some(0x00));
        assert!(mailbox.try_recv().is_err());

        assert!(io.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_routes_events_not_to_pending_request() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let (shared, _link, _state) = test_shared();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let io = spawn_listener(Box::new(mock), test_config(), shared, event_tx);

        let channels = io.channels();
        let (_guard, mut mailbox) = channels.register(None, Instant::now() + Duration::from_secs(1));
        handle.inject(&[0xFC, 0x87, 0x03]);

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::RegionTouch);
        assert_eq!(event.object_id, 3);
        assert!(mailbox.try_recv().is_err());

        assert!(io.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_exits_after_consecutive_failures() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        handle.fail_reads(5);
        let (shared, link, mut state) = test_shared();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let io = spawn_listener(Box::new(mock), test_config(), shared, event_tx);

        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Open);
        assert!(event_rx.recv().await.is_none());
        assert!(link.lock().await.is_some());
        assert!(io.task.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_read_resets_failure_count() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        handle.fail_reads(4);
        handle.inject(&[0xFC, 0x87, 0x01]);
        handle.fail_reads(4);
        handle.inject(&[0xFC, 0x87, 0x02]);
        let (shared, _link, state) = test_shared();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let io = spawn_listener(Box::new(mock), test_config(), shared, event_tx);

        assert_eq!(event_rx.recv().await.unwrap().object_id, 1);
        assert_eq!(event_rx.recv().await.unwrap().object_id, 2);
        assert_eq!(*state.borrow(), ConnectionState::Listening);

        assert!(io.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_read_timeouts_end_listening() {
        let (shared, link, mut state) = test_shared();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let start = Instant::now();
        let io = spawn_listener(Box::new(MockTransport::new()), test_config(), shared, event_tx);

        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Open);
        // Five 100 ms reads, nothing more.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(600));
        assert!(event_rx.recv().await.is_none());
        assert!(link.lock().await.is_some());
        assert!(io.task.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_link_keeps_listening_when_timeouts_are_tolerated() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let (shared, _link, state) = test_shared();
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let config = IoConfig {
            count_idle_timeouts: false,
            ..test_config()
        };
        let io = spawn_listener(Box::new(mock), config, shared, event_tx);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*state.borrow(), ConnectionState::Listening);

        handle.inject(&[0xFC, 0x87, 0x04]);
        assert_eq!(event_rx.recv().await.unwrap().object_id, 4);

        // Read errors still count.
        handle.fail_reads(5);
        assert!(event_rx.recv().await.is_none());
        assert_eq!(*state.borrow(), ConnectionState::Open);
        assert!(io.task.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_reads_count_as_failures() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        for _ in 0..5 {
            handle.inject_empty_read();
        }
        let (shared, _link, mut state) = test_shared();
        let (event_tx, _event_rx) = mpsc::channel(4);
        let io = spawn_listener(Box::new(mock), test_config(), shared, event_tx);

        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Open);
        assert!(io.task.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_reader_stuck_past_grace() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let (shared, link, state) = test_shared();
        let (event_tx, _event_rx) = mpsc::channel(1);
        let config = IoConfig {
            delivery_timeout: Duration::from_secs(30),
            ..test_config()
        };
        let io = spawn_listener(Box::new(mock), config, shared, event_tx);

        // The first touch fills the queue, the second blocks delivery.
        handle.inject(&[0xFC, 0x87, 0x01]);
        handle.inject(&[0xFC, 0x87, 0x02]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!io.stop(Duration::from_millis(50)).await);
        // The link went down with the task and the state was left alone.
        assert!(link.lock().await.is_none());
        assert_eq!(*state.borrow(), ConnectionState::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_returns_link_and_reverts_state() {
        let mock = MockTransport::new();
        let (shared, link, state) = test_shared();
        let (event_tx, _event_rx) = mpsc::channel(4);
        let io = spawn_listener(Box::new(mock), test_config(), shared, event_tx);

        assert!(io.stop(Duration::from_secs(1)).await);
        assert!(link.lock().await.is_some());
        assert_eq!(*state.borrow(), ConnectionState::Open);
    }
}
