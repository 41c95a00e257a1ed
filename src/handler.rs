//! The connection handler core (§4, §5).
//!
//! `ConnectionHandler` owns the dispatch queue, the holding buffer, the
//! inbound byte accumulator, the decoder, and the lifecycle state for one
//! transport attachment. It is driven from two execution contexts (§5):
//! the reader task (`transport::spawn_reader`), which is this crate's
//! single-threaded "I/O context", and any number of producer tasks
//! calling [`ConnectionHandler::write`].

use crate::command::RedisCommand;
use crate::decoder::Decoder;
use crate::error::HandlerError;
use crate::frame::Frame;
use crate::lifecycle::{LifecycleDriver, LifecycleState};
use crate::options::HandlerOptions;
use crate::queue::CommandQueue;
use crate::reliability::ReliabilityMode;
use crate::transport::{self, write_frame};

use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::ToSocketAddrs;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Receives lifecycle notifications from a [`ConnectionHandler`]. The
/// capability-set replacement for the source's class-based duplex-handler
/// inheritance (§9).
pub trait UpperHandler: Send + Sync {
    /// Called once the handler has transitioned to `Active` and replayed
    /// any held/in-flight commands.
    fn activated(&self);

    /// Called once the handler has observed the transport going inactive.
    fn deactivated(&self);
}

/// Boxed so the same handler can be driven by a real `TcpStream`'s owned
/// write half in production and by an in-memory `tokio::io::duplex` half
/// in this module's unit tests (§8) without a generic parameter on
/// `ConnectionHandler` itself.
type WriteHalf = BufWriter<Box<dyn AsyncWrite + Unpin + Send>>;

/// The client-side Redis protocol connection handler (§1's "THE CORE").
pub struct ConnectionHandler {
    options: HandlerOptions,
    reliability: ReliabilityMode,
    lifecycle: LifecycleDriver,
    /// `Q`: commands written to the transport, awaiting a response.
    dispatch: CommandQueue,
    /// `H`: commands accepted while the transport was unavailable.
    holding: CommandQueue,
    /// The write lock (§4.4, §5): guards the owned, buffered write half.
    /// `None` when no transport is registered.
    write_slot: tokio::sync::Mutex<Option<WriteHalf>>,
    /// Fast, lock-free approximation of "transport present and active",
    /// used by `write`'s no-lock pre-check (§4.4 step 2).
    active: AtomicBool,
    /// `E`: cached cause of the last transport failure observed while
    /// down, cleared on activation.
    cached_error: Mutex<Option<String>>,
    /// `B`: inbound byte accumulator, `None` before registration / after
    /// unregistration.
    inbound: Mutex<Option<BytesMut>>,
    decoder: Mutex<Decoder>,
    peer: Mutex<Option<SocketAddr>>,
    upper_handler: Mutex<Option<Arc<dyn UpperHandler>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    close_notify: Notify,
}

impl ConnectionHandler {
    /// Connects to `addr`, registers the resulting transport, and drives
    /// it active, returning the handler core rather than the high-level
    /// `Client` convenience API.
    pub async fn connect(addr: impl ToSocketAddrs, options: HandlerOptions) -> io::Result<Arc<Self>> {
        let reliability = ReliabilityMode::from_auto_reconnect(options.auto_reconnect);
        let handler = Arc::new(Self {
            options,
            reliability,
            lifecycle: LifecycleDriver::new(),
            dispatch: CommandQueue::new(),
            holding: CommandQueue::new(),
            write_slot: tokio::sync::Mutex::new(None),
            active: AtomicBool::new(false),
            cached_error: Mutex::new(None),
            inbound: Mutex::new(None),
            decoder: Mutex::new(Decoder::new()),
            peer: Mutex::new(None),
            upper_handler: Mutex::new(None),
            reader_task: Mutex::new(None),
            close_notify: Notify::new(),
        });

        handler.attach(addr).await?;
        Ok(handler)
    }

    /// Attaches a freshly dialed transport to an existing handler and
    /// drives it active — the caller-driven reconnect path (§1's
    /// Non-goals: "callers drive reconnects by constructing a new
    /// transport and calling `on_registered`/`on_active` again"). Held
    /// commands in `H` and any still in `Q` from the previous transport
    /// are replayed by `execute_queued_commands` as part of activation.
    pub async fn reconnect(self: &Arc<Self>, addr: impl ToSocketAddrs) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::Other, HandlerError::ClosedConnection.to_string()));
        }
        self.attach(addr).await
    }

    async fn attach(self: &Arc<Self>, addr: impl ToSocketAddrs) -> io::Result<()> {
        let (read_half, write_half, peer) = transport::connect_tcp(addr).await?;
        self.on_registered(peer, Box::new(write_half)).await;

        let reader = transport::spawn_reader(self.clone(), read_half);
        *self.reader_task.lock().unwrap() = Some(reader);

        self.on_active()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }

    pub fn set_upper_handler(&self, upper: Arc<dyn UpperHandler>) {
        *self.upper_handler.lock().unwrap() = Some(upper);
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.get().is_closed()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap()
    }

    fn fast_transport_ready(&self) -> bool {
        self.active.load(Ordering::SeqCst) && self.lifecycle.get().is_connected()
    }

    // ---- Write Path (§4.4) -------------------------------------------

    /// Submits `cmd` for writing. Returns `Err(ClosedConnection)` only for
    /// the synchronous `CLOSED` pre-check; every other outcome completes
    /// `cmd` through its own contract and returns `Ok(cmd)`.
    pub async fn write(&self, cmd: Arc<dyn RedisCommand>) -> Result<Arc<dyn RedisCommand>, HandlerError> {
        // Pre-check 1 (no lock): CLOSED fails synchronously.
        if self.lifecycle.get().is_closed() {
            return Err(HandlerError::ClosedConnection);
        }

        // Pre-check 2 (no write lock): transport down + reconnect disabled
        // fails the command fast.
        if !self.fast_transport_ready() && !self.options.auto_reconnect {
            cmd.fail(HandlerError::DisconnectedNoReconnect.cause_string());
            return Ok(cmd);
        }

        let mut slot = self.write_slot.lock().await;
        self.write_locked(&mut slot, cmd, false).await
    }

    /// The write-lock-already-held critical section body (§4.4 steps
    /// 3-4, §4.5's hook). Used directly by both `write` and
    /// `execute_queued_commands`'s replay loop — `tokio::sync::Mutex` is
    /// not reentrant, so replay cannot call back through `write` (§9).
    ///
    /// `propagate_write_errors` is `false` for an ordinary producer write
    /// (§4.4 step 3: a write/flush failure there is deferred to the
    /// channel-level exception path rather than failing the call) and
    /// `true` only when called from `execute_queued_commands`'s replay
    /// loop, where a write failure IS the activation failure the caller
    /// needs to see in order to honor `cancel_commands_on_reconnect_failure`
    /// (§4.7, §7's `ActivationFailure`).
    async fn write_locked(
        &self,
        slot: &mut Option<WriteHalf>,
        cmd: Arc<dyn RedisCommand>,
        propagate_write_errors: bool,
    ) -> Result<Arc<dyn RedisCommand>, HandlerError> {
        let transport_ready = slot.is_some() && self.fast_transport_ready();

        if !transport_ready {
            if self.holding.contains(&cmd) || self.dispatch.contains(&cmd) {
                trace!("write: idempotent re-submission, already buffered");
            } else if let Some(cached) = self.cached_error.lock().unwrap().clone() {
                cmd.fail(HandlerError::CachedConnectionError(cached).cause_string());
            } else {
                debug!(holding_len = self.holding.len() + 1, "buffering write while disconnected");
                self.holding.push_back(cmd.clone());
            }
            return Ok(cmd);
        }

        let frame = cmd.encode();
        let half = slot.as_mut().expect("checked transport_ready above");

        if self.reliability.is_at_least_once() {
            // Transport-Adjacent Write Hook (§4.5): append before issuing
            // the write, since this crate's transport has no separate I/O
            // thread to hand the write off to.
            if cmd.output().is_some() {
                self.dispatch.push_back(cmd.clone());
            } else {
                cmd.complete_without_response();
            }

            debug!(dispatch_len = self.dispatch.len(), "write (at-least-once)");
            if let Err(e) = write_and_flush(half, &frame).await {
                // AT_LEAST_ONCE surfaces write failures only via the
                // channel-level exception path (§4.4 step 3, §7); the
                // command stays in `Q` to be attributed by `on_exception`
                // or replayed after reconnect.
                debug!(error = %e, "write/flush failed under at-least-once; deferring to exception path");
                if propagate_write_errors {
                    return Err(HandlerError::ActivationFailure(e.to_string()));
                }
            }
        } else {
            debug!("write (at-most-once)");
            match write_and_flush(half, &frame).await {
                Ok(()) => {
                    if cmd.output().is_some() {
                        self.dispatch.push_back(cmd.clone());
                    } else {
                        cmd.complete_without_response();
                    }
                }
                Err(e) => {
                    // §4.9: must not leave a ghost entry in `Q`; it was
                    // never added on this path, so there is nothing to
                    // remove.
                    cmd.fail(HandlerError::TransportWriteFailure(e.to_string()).cause_string());
                    if propagate_write_errors {
                        return Err(HandlerError::ActivationFailure(e.to_string()));
                    }
                }
            }
        }

        Ok(cmd)
    }

    // ---- Read Path (§4.6) ---------------------------------------------

    pub(crate) async fn on_read(&self, chunk: BytesMut) -> Result<(), HandlerError> {
        if chunk.is_empty() {
            return Ok(());
        }

        let mut inbound_guard = self.inbound.lock().unwrap();
        let Some(buffer) = inbound_guard.as_mut() else {
            return Ok(());
        };
        buffer.extend_from_slice(&chunk);

        loop {
            let Some(head) = self.dispatch.peek_front() else {
                break;
            };

            let decoded = {
                let mut decoder_guard = self.decoder.lock().unwrap();
                decoder_guard.decode(buffer)?
            };

            match decoded {
                Some(frame) => {
                    self.dispatch.pop_front();
                    head.complete(frame);
                }
                None => break,
            }
        }

        Ok(())
    }

    // ---- Lifecycle Driver (§4.7) ---------------------------------------

    async fn on_registered(&self, peer: SocketAddr, write_half: Box<dyn AsyncWrite + Unpin + Send>) {
        *self.inbound.lock().unwrap() = Some(BytesMut::with_capacity(self.options.read_buffer_capacity));
        *self.decoder.lock().unwrap() = Decoder::new();
        *self.peer.lock().unwrap() = Some(peer);
        *self.write_slot.lock().await = Some(BufWriter::new(write_half));
        self.lifecycle.set_if_not_closed(LifecycleState::Registered);
        // "The transport reports active" (§4.4 step 3) tracks the socket
        // itself, not this crate's own ACTIVATING/ACTIVE bookkeeping — it
        // must already be true by the time `execute_queued_commands`
        // replays, matching a Netty channel's `isActive()` firing ahead of
        // any handler-level activation work.
        self.active.store(true, Ordering::SeqCst);
        debug!(%peer, "registered");
    }

    async fn on_active(&self) -> Result<(), HandlerError> {
        self.lifecycle.set_if_not_closed(LifecycleState::Connected);

        match self.execute_queued_commands().await {
            Ok(()) => {
                debug!(peer = ?self.peer(), state = ?self.lifecycle.get(), "connection active");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "activation failed while replaying queued commands");
                if self.options.cancel_commands_on_reconnect_failure {
                    self.reset().await;
                }
                Err(e)
            }
        }
    }

    pub(crate) async fn on_inactive(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.lifecycle.set_if_not_closed(LifecycleState::Disconnected);

        let upper = self.upper_handler.lock().unwrap().clone();
        if let Some(handler) = upper {
            self.lifecycle.set_if_not_closed(LifecycleState::Deactivating);
            handler.deactivated();
            self.lifecycle.set_if_not_closed(LifecycleState::Deactivated);
        }

        self.decoder.lock().unwrap().reset();
        if let Some(buffer) = self.inbound.lock().unwrap().as_mut() {
            buffer.clear();
        }

        debug!(state = ?self.lifecycle.get(), "connection inactive");
    }

    pub(crate) async fn on_unregistered(&self) {
        self.inbound.lock().unwrap().take();

        if self.lifecycle.get().is_closed() {
            self.cancel_commands("Connection closed");
        }

        *self.write_slot.lock().await = None;
        debug!("unregistered");
    }

    pub(crate) async fn on_exception(&self, cause: HandlerError) {
        // An exception reaching this point always means the transport is
        // on its way down (the reader task's loop breaks immediately
        // after calling this), so reflect that before deciding how to
        // attribute it. `on_inactive` is the only other place `active` is
        // cleared, and it runs after `on_exception` in the reader task's
        // teardown sequence — without clearing it here too,
        // `fast_transport_ready()` would still read `true` for the common
        // "connection was up, now erroring" case, and an exception with
        // an empty dispatch queue would fall through unattributed instead
        // of being cached in `E` for the next write (§4.7, §8).
        self.active.store(false, Ordering::SeqCst);

        if let Some(head) = self.dispatch.pop_front() {
            error!(error = %cause, "pipeline exception attributed to oldest unacknowledged command");
            head.fail(HandlerError::PipelineException(cause.cause_string()).cause_string());
            return;
        }

        debug!(error = %cause, "transport exception cached with empty dispatch queue");
        *self.cached_error.lock().unwrap() = Some(cause.cause_string());
    }

    // ---- Queue Replay (§4.8) -------------------------------------------

    async fn execute_queued_commands(&self) -> Result<(), HandlerError> {
        let mut slot = self.write_slot.lock().await;

        *self.cached_error.lock().unwrap() = None;

        // Snapshot H then Q (§9's flagged ordering, preserved as-is) and
        // clear both.
        let mut replay: Vec<Arc<dyn RedisCommand>> = self.holding.drain_all();
        replay.extend(self.dispatch.drain_all());

        let has_upper = self.upper_handler.lock().unwrap().is_some();
        if has_upper {
            self.lifecycle.set_if_not_closed(LifecycleState::Activating);
            if let Some(handler) = self.upper_handler.lock().unwrap().clone() {
                handler.activated();
            }
            self.lifecycle.set_if_not_closed(LifecycleState::Active);
        } else {
            self.lifecycle.set_if_not_closed(LifecycleState::Active);
        }

        debug!(replaying = replay.len(), "replaying queued commands after activation");

        for cmd in replay {
            if cmd.is_cancelled() {
                continue;
            }
            self.write_locked(&mut slot, cmd, true).await?;
        }

        Ok(())
    }

    // ---- reset() / close() (§4.10) -------------------------------------

    fn cancel_commands(&self, reason: &str) {
        for cmd in self.dispatch.drain_all().into_iter().chain(self.holding.drain_all()) {
            cmd.fail(reason.to_string());
        }
    }

    /// Cancels every queued and buffered command, resets the decoder, and
    /// clears the inbound buffer.
    pub async fn reset(&self) {
        let _slot = self.write_slot.lock().await;
        self.cancel_commands("Reset");
        self.decoder.lock().unwrap().reset();
        if let Some(buffer) = self.inbound.lock().unwrap().as_mut() {
            buffer.clear();
        }
        debug!("reset");
    }

    /// Transitions to `Closed` (terminal), shuts down the transport, and
    /// waits for the reader task to finish. A no-op if already closed.
    pub async fn close(&self) {
        if !self.lifecycle.close() {
            return;
        }

        self.active.store(false, Ordering::SeqCst);
        self.close_notify.notify_one();

        let half = {
            let mut slot = self.write_slot.lock().await;
            slot.take()
        };
        if let Some(mut half) = half {
            let _ = half.shutdown().await;
        }

        let task = self.reader_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        debug!("closed");
    }

    /// Exposed so the reader task can wait on a close request instead of
    /// only on socket EOF (§4.10's "synchronously wait for the transport's
    /// close future", adapted to this crate's split-stream transport).
    pub(crate) fn close_requested(&self) -> &Notify {
        &self.close_notify
    }
}

async fn write_and_flush(half: &mut WriteHalf, frame: &Frame) -> io::Result<()> {
    write_frame(half, frame).await?;
    half.flush().await
}

// ---- Unit tests (§8) -------------------------------------------------
//
// Exercise the write path / read path / lifecycle invariants directly
// against an in-memory `tokio::io::duplex` pair rather than a real
// socket, per §8's "in-memory duplex pair as the transport" testing
// strategy. `tests/handler.rs` covers the same properties end-to-end
// against a real loopback server.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{encode_args, SimpleCommand};
    use bytes::Bytes;
    use tokio::io::{split, DuplexStream};

    fn new_unregistered(options: HandlerOptions) -> Arc<ConnectionHandler> {
        let reliability = ReliabilityMode::from_auto_reconnect(options.auto_reconnect);
        Arc::new(ConnectionHandler {
            options,
            reliability,
            lifecycle: LifecycleDriver::new(),
            dispatch: CommandQueue::new(),
            holding: CommandQueue::new(),
            write_slot: tokio::sync::Mutex::new(None),
            active: AtomicBool::new(false),
            cached_error: Mutex::new(None),
            inbound: Mutex::new(None),
            decoder: Mutex::new(Decoder::new()),
            peer: Mutex::new(None),
            upper_handler: Mutex::new(None),
            reader_task: Mutex::new(None),
            close_notify: Notify::new(),
        })
    }

    const DUMMY_PEER: &str = "127.0.0.1:0";

    async fn spawn_test_handler(options: HandlerOptions) -> (Arc<ConnectionHandler>, DuplexStream) {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let (read_half, write_half) = split(client_side);

        let handler = new_unregistered(options);

        handler.on_registered(DUMMY_PEER.parse().unwrap(), Box::new(write_half)).await;

        let reader = transport::spawn_reader(handler.clone(), read_half);
        *handler.reader_task.lock().unwrap() = Some(reader);

        handler.on_active().await.unwrap();

        (handler, server_side)
    }

    async fn respond(server: &mut DuplexStream, frame: &Frame) {
        write_frame(server, frame).await.unwrap();
        server.flush().await.unwrap();
    }

    #[tokio::test]
    async fn responses_complete_commands_in_submission_order() {
        let (handler, mut server) = spawn_test_handler(HandlerOptions::default()).await;

        let (c1, rx1) = SimpleCommand::new(encode_args([Bytes::from_static(b"get"), Bytes::from_static(b"a")]));
        let (c2, rx2) = SimpleCommand::new(encode_args([Bytes::from_static(b"get"), Bytes::from_static(b"b")]));
        handler.write(c1).await.unwrap();
        handler.write(c2).await.unwrap();

        // Two responses arrive back to back, in a single read chunk plus a
        // second one, to also exercise the "loop back for further whole
        // frames already buffered" step of §4.6.
        respond(&mut server, &Frame::Bulk(Bytes::from_static(b"1"))).await;
        respond(&mut server, &Frame::Bulk(Bytes::from_static(b"2"))).await;

        let first = rx1.await.unwrap().unwrap();
        let second = rx2.await.unwrap().unwrap();
        assert!(matches!(first, Frame::Bulk(ref b) if &b[..] == b"1"));
        assert!(matches!(second, Frame::Bulk(ref b) if &b[..] == b"2"));

        handler.close().await;
    }

    #[tokio::test]
    async fn partial_reads_of_one_response_still_complete_exactly_once() {
        let (handler, mut server) = spawn_test_handler(HandlerOptions::default()).await;

        let (cmd, rx) = SimpleCommand::new(encode_args([Bytes::from_static(b"get"), Bytes::from_static(b"a")]));
        handler.write(cmd).await.unwrap();

        // "$5\r\nhello\r\n" split across three separate writes on the wire.
        server.write_all(b"$5\r\n").await.unwrap();
        server.flush().await.unwrap();
        server.write_all(b"hel").await.unwrap();
        server.flush().await.unwrap();
        server.write_all(b"lo\r\n").await.unwrap();
        server.flush().await.unwrap();

        let outcome = rx.await.unwrap().unwrap();
        assert!(matches!(outcome, Frame::Bulk(ref b) if &b[..] == b"hello"));

        handler.close().await;
    }

    #[tokio::test]
    async fn write_while_disconnected_buffers_and_is_idempotent_on_resubmission() {
        let (handler, _server) = spawn_test_handler(HandlerOptions::default()).await;
        handler.on_inactive().await;

        let (cmd, _rx) = SimpleCommand::new(encode_args([Bytes::from_static(b"get"), Bytes::from_static(b"a")]));
        handler.write(cmd.clone()).await.unwrap();
        assert_eq!(handler.holding.len(), 1);

        // Re-submitting the same `Arc` while still disconnected must not
        // duplicate it in `H` (§8 property 4).
        handler.write(cmd).await.unwrap();
        assert_eq!(handler.holding.len(), 1);

        handler.close().await;
    }

    #[tokio::test]
    async fn write_while_disconnected_without_reconnect_fails_fast() {
        let (handler, _server) = spawn_test_handler(HandlerOptions::new(false)).await;
        handler.on_inactive().await;

        let (cmd, rx) = SimpleCommand::new(encode_args([Bytes::from_static(b"get"), Bytes::from_static(b"a")]));
        handler.write(cmd).await.unwrap();

        let outcome = rx.await.unwrap();
        assert!(outcome.is_err());
        assert_eq!(handler.holding.len(), 0);

        handler.close().await;
    }

    #[tokio::test]
    async fn reset_cancels_and_empties_both_queues() {
        let (handler, _server) = spawn_test_handler(HandlerOptions::default()).await;
        handler.on_inactive().await;

        let (cmd, rx) = SimpleCommand::new(encode_args([Bytes::from_static(b"get"), Bytes::from_static(b"a")]));
        handler.write(cmd.clone()).await.unwrap();
        assert_eq!(handler.holding.len(), 1);

        handler.reset().await;

        assert_eq!(handler.holding.len(), 0);
        assert_eq!(handler.dispatch.len(), 0);
        assert!(cmd.is_cancelled());
        assert!(rx.await.unwrap().is_err());

        handler.close().await;
    }

    #[tokio::test]
    async fn close_is_terminal_and_fails_subsequent_writes() {
        let (handler, _server) = spawn_test_handler(HandlerOptions::default()).await;

        handler.close().await;
        assert!(handler.is_closed());
        handler.close().await; // idempotent, no panic

        let (cmd, _rx) = SimpleCommand::new(encode_args([Bytes::from_static(b"ping")]));
        let err = handler.write(cmd).await.unwrap_err();
        assert!(matches!(err, HandlerError::ClosedConnection));
    }

    #[tokio::test]
    async fn protocol_error_attributes_to_oldest_unacknowledged_command() {
        let (handler, mut server) = spawn_test_handler(HandlerOptions::default()).await;

        let (cmd, rx) = SimpleCommand::new(encode_args([Bytes::from_static(b"get"), Bytes::from_static(b"a")]));
        handler.write(cmd).await.unwrap();

        // An invalid frame type byte is a decode error (§4.6 step 3b),
        // which `on_read` propagates as a protocol exception (§4.7
        // `on_exception`) attributed to the dispatch queue's head.
        server.write_all(b"x\r\n").await.unwrap();
        server.flush().await.unwrap();

        let outcome = rx.await.unwrap();
        assert!(outcome.is_err());

        handler.close().await;
    }

    /// A write half that always fails, to deterministically exercise the
    /// replay-failure path without depending on `tokio::io::duplex`'s
    /// undocumented behavior once its peer is dropped.
    struct FailingWrite;

    impl AsyncWrite for FailingWrite {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "simulated write failure")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    /// A read half that always fails on its first poll, to deterministically
    /// exercise `on_exception`'s empty-queue caching path.
    struct FailingRead;

    impl tokio::io::AsyncRead for FailingRead {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "simulated read failure")))
        }
    }

    #[tokio::test]
    async fn activation_failure_triggers_reset_when_configured() {
        let options = HandlerOptions::new(true).with_cancel_commands_on_reconnect_failure(true);
        let handler = new_unregistered(options);

        // Buffer a command while unregistered (no transport at all yet),
        // landing it in `H`.
        let (cmd, rx) = SimpleCommand::new(encode_args([Bytes::from_static(b"get"), Bytes::from_static(b"a")]));
        handler.write(cmd.clone()).await.unwrap();
        assert_eq!(handler.holding.len(), 1);

        // Register a transport whose writes always fail, then activate:
        // `execute_queued_commands` replays the held command, the write
        // fails, and `write_locked` now surfaces that as `ActivationFailure`
        // instead of swallowing it.
        handler.on_registered(DUMMY_PEER.parse().unwrap(), Box::new(FailingWrite)).await;
        let result = handler.on_active().await;

        assert!(matches!(result, Err(HandlerError::ActivationFailure(_))));

        // `cancel_commands_on_reconnect_failure` was set, so `on_active`
        // must have run a full `reset()`: both queues empty and the
        // replayed command cancelled with its output failed.
        assert_eq!(handler.holding.len(), 0);
        assert_eq!(handler.dispatch.len(), 0);
        assert!(cmd.is_cancelled());
        assert!(rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn exception_with_empty_queue_caches_error_for_next_write() {
        let handler = new_unregistered(HandlerOptions::default());

        let (_write_half_unused_server, write_half) = tokio::io::duplex(4096);
        handler
            .on_registered(DUMMY_PEER.parse().unwrap(), Box::new(write_half))
            .await;
        handler.on_active().await.unwrap();

        let reader = transport::spawn_reader(handler.clone(), FailingRead);
        // The reader task fails its very first read, which calls
        // `on_exception` with an empty dispatch queue, then tears the
        // connection down. Await it directly instead of sleeping.
        reader.await.unwrap();

        let (cmd, rx) = SimpleCommand::new(encode_args([Bytes::from_static(b"get"), Bytes::from_static(b"a")]));
        handler.write(cmd).await.unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.contains("cached connection error"), "unexpected error: {err}");
    }
}
