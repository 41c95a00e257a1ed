//! The command contract (§3) and a single concrete implementation.
//!
//! `RedisCommand` is the capability-set replacement for the source's
//! class-based duplex-handler inheritance idiom (§9): rather than a base
//! class, callers hand the handler an `Arc<dyn RedisCommand>` and the
//! handler drives it through at most one of `complete` / `fail` / `cancel`.
//! The in-flight bookkeeping (`valkey-glide`'s `Pipeline` pairs a
//! `oneshot::Sender` with each queued message — see DESIGN.md) is adapted
//! here into a named trait plus one oneshot-backed implementation instead
//! of an anonymous sender tucked inside a pipeline message struct, since
//! this spec additionally needs `is_cancelled()` and identity comparison
//! exposed to the dispatch queue and holding buffer.

use crate::frame::Frame;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// The per-command accumulator that consumes the decoded response, or an
/// error string on exceptional completion. Absent means fire-and-forget.
#[derive(Debug)]
pub struct OutputSink {
    sender: Mutex<Option<oneshot::Sender<Result<Frame, String>>>>,
}

impl OutputSink {
    fn new(sender: oneshot::Sender<Result<Frame, String>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Consumes the sink's slot exactly once; subsequent calls are no-ops,
    /// matching the command's "completable exactly once" contract.
    fn send(&self, outcome: Result<Frame, String>) {
        if let Some(sender) = self.sender.lock().unwrap().take() {
            let _ = sender.send(outcome);
        }
    }
}

/// An opaque unit of work flowing through the write path, dispatch queue,
/// and holding buffer (§3). Implementations must be completable exactly
/// once and comparable by identity, never structural equality — the
/// dispatch queue and holding buffer compare commands with `Arc::ptr_eq`,
/// never `PartialEq` on command contents.
pub trait RedisCommand: fmt::Debug + Send + Sync {
    /// Encodes this command onto the transport. Encoding is the
    /// transport's job per §3, but the command owns the request payload.
    fn encode(&self) -> Frame;

    /// The output sink, or `None` for fire-and-forget commands.
    fn output(&self) -> Option<&OutputSink>;

    /// Normal completion: the decoder produced a full response `Frame`.
    fn complete(&self, frame: Frame) {
        if let Some(sink) = self.output() {
            sink.send(Ok(frame));
        }
    }

    /// Exceptional completion with a cause description.
    fn fail(&self, cause: String) {
        if let Some(sink) = self.output() {
            sink.send(Err(cause));
        }
        self.cancel();
    }

    /// Normal completion for a fire-and-forget command (no output sink,
    /// so there is nothing to deliver). A no-op by default; exists so the
    /// write path can mark a command done without special-casing the
    /// absent-sink case.
    fn complete_without_response(&self) {}

    /// Marks the command cancelled. Idempotent.
    fn cancel(&self);

    /// True once `cancel()` has been called.
    fn is_cancelled(&self) -> bool;
}

/// The default `RedisCommand` implementation: a pre-encoded request frame
/// plus an optional oneshot output sink.
#[derive(Debug)]
pub struct SimpleCommand {
    frame: Frame,
    output: Option<OutputSink>,
    cancelled: AtomicBool,
}

impl SimpleCommand {
    /// Builds a command expecting a response.
    pub fn new(frame: Frame) -> (std::sync::Arc<Self>, oneshot::Receiver<Result<Frame, String>>) {
        let (tx, rx) = oneshot::channel();
        let cmd = std::sync::Arc::new(Self {
            frame,
            output: Some(OutputSink::new(tx)),
            cancelled: AtomicBool::new(false),
        });
        (cmd, rx)
    }

    /// Builds a fire-and-forget command with no output sink.
    pub fn fire_and_forget(frame: Frame) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            frame,
            output: None,
            cancelled: AtomicBool::new(false),
        })
    }
}

impl RedisCommand for SimpleCommand {
    fn encode(&self) -> Frame {
        self.frame.clone()
    }

    fn output(&self) -> Option<&OutputSink> {
        self.output.as_ref()
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Builds a command request frame (`*N\r\n$len\r\narg\r\n...`) from a list
/// of arguments, via `Frame::array`/`push_bulk`.
pub fn encode_args<I, A>(args: I) -> Frame
where
    I: IntoIterator<Item = A>,
    A: Into<bytes::Bytes>,
{
    let mut frame = Frame::array();
    for arg in args {
        frame.push_bulk(arg.into());
    }
    frame
}
