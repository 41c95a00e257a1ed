//! Typed errors for the connection handler core.
//!
//! The rest of the crate (the RESP frame type and its parser) keeps the
//! plain `Box<dyn std::error::Error>` convention, since those are
//! unchanged external collaborators. The handler itself has a small, stable
//! set of failure kinds that callers need to match on, so it gets a proper
//! enum instead.

use crate::frame::FrameError;
use std::io;

/// Errors produced by the [`crate::handler::ConnectionHandler`].
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A producer called `write` after `close()` had already transitioned
    /// the handler to `CLOSED`. Returned synchronously; the command passed
    /// to `write` is untouched.
    #[error("connection is closed")]
    ClosedConnection,

    /// A producer called `write` while the transport was down and
    /// auto-reconnect is disabled.
    #[error("disconnected, reconnect disabled")]
    DisconnectedNoReconnect,

    /// A producer called `write` while the transport was down, reconnect is
    /// enabled, but a prior transport failure is still cached.
    #[error("cached connection error: {0}")]
    CachedConnectionError(String),

    /// An AT_MOST_ONCE write's future reported failure.
    #[error("transport write failed: {0}")]
    TransportWriteFailure(String),

    /// A transport-level exception occurred with a non-empty dispatch
    /// queue; attributed to the oldest unacknowledged command.
    #[error("pipeline exception: {0}")]
    PipelineException(String),

    /// Replaying the holding buffer / dispatch queue after activation
    /// failed.
    #[error("activation failure: {0}")]
    ActivationFailure(String),

    /// Bulk cancellation via `reset()`.
    #[error("reset")]
    Reset,

    /// Bulk cancellation via `close()`.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport I/O failure, not yet attributed to a specific command.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// RESP decode failure.
    #[error(transparent)]
    Protocol(#[from] FrameError),
}

impl HandlerError {
    /// Renders the error for caching into `E`, or for attributing to a
    /// command's output sink — both paths want a plain string, not a typed
    /// error, since the cached cause is replayed as `CachedConnectionError`
    /// on a later, unrelated write.
    pub(crate) fn cause_string(&self) -> String {
        self.to_string()
    }
}
