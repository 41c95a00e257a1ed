//! Handler configuration (§6, ambient).
//!
//! Constructed directly by the embedding application. There is no
//! file/env loading here — that belongs to the out-of-scope CLI/config
//! layer (§1).

/// Matches the 4 KiB default inbound buffer size used elsewhere in this
/// crate's read path.
const DEFAULT_READ_BUFFER_CAPACITY: usize = 4 * 1024;

/// Options recognized by [`crate::handler::ConnectionHandler`].
#[derive(Debug, Clone, Copy)]
pub struct HandlerOptions {
    /// Determines the reliability mode: `true` selects AT_LEAST_ONCE,
    /// `false` selects AT_MOST_ONCE (§3).
    pub auto_reconnect: bool,

    /// If set, an exception thrown while replaying queued commands causes
    /// a full `reset()` before the exception is re-raised (§4.7, §7).
    pub cancel_commands_on_reconnect_failure: bool,

    /// Initial capacity of the inbound byte accumulator `B`.
    pub read_buffer_capacity: usize,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            cancel_commands_on_reconnect_failure: false,
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
        }
    }
}

impl HandlerOptions {
    pub fn new(auto_reconnect: bool) -> Self {
        Self {
            auto_reconnect,
            ..Self::default()
        }
    }

    pub fn with_cancel_commands_on_reconnect_failure(mut self, cancel: bool) -> Self {
        self.cancel_commands_on_reconnect_failure = cancel;
        self
    }

    pub fn with_read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity;
        self
    }
}
